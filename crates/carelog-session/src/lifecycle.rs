//! Session key lifecycle: Locked -> Initializing -> Ready -> Locked.
//!
//! The derived keys live only in volatile memory inside this object and
//! are zeroized whenever the state leaves Ready. Dependents hold an
//! `Arc<KeyLifecycle>` and must treat `keys()` as fallible: a reader in
//! Locked fails immediately instead of waiting for an unlock.

use parking_lot::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use carelog_crypto::{derive_session_key, derive_signing_key, AES_KEY_LENGTH};

use crate::error::SessionError;

/// Key material for an authenticated session.
///
/// Never serialized, never logged, never sent over the network.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// AES-256-GCM key for record envelopes.
    pub encryption: [u8; AES_KEY_LENGTH],
    /// HMAC-SHA256 key for record signatures, derived independently.
    pub signing: [u8; AES_KEY_LENGTH],
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Locked,
    Initializing,
    Ready,
}

enum KeyState {
    Locked,
    Initializing,
    Ready(SessionKeys),
}

/// Owns the session key state machine. One instance per session, injected
/// into every dependent component.
pub struct KeyLifecycle {
    state: RwLock<KeyState>,
}

impl KeyLifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(KeyState::Locked),
        }
    }

    /// Derive the session keys from the password and per-account salt.
    ///
    /// Runs the slow PBKDF2 derivation off the async executor. Safe to call
    /// again after a prior `clear()`. A second call while derivation is in
    /// flight fails instead of queueing.
    pub async fn initialize_with_password(
        &self,
        password: &str,
        salt: &[u8],
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.write();
            if matches!(*state, KeyState::Initializing) {
                return Err(SessionError::DerivationInProgress);
            }
            *state = KeyState::Initializing;
        }

        let password = Zeroizing::new(password.to_string());
        let salt = salt.to_vec();
        let derived = tokio::task::spawn_blocking(move || {
            let encryption = derive_session_key(&password, &salt)?;
            let signing = derive_signing_key(&encryption)?;
            Ok::<SessionKeys, carelog_crypto::CryptoError>(SessionKeys { encryption, signing })
        })
        .await;

        let mut state = self.state.write();
        match derived {
            Ok(Ok(keys)) => {
                *state = KeyState::Ready(keys);
                tracing::debug!("session keys ready");
                Ok(())
            }
            Ok(Err(e)) => {
                *state = KeyState::Locked;
                Err(SessionError::Kdf(e))
            }
            Err(e) => {
                *state = KeyState::Locked;
                Err(SessionError::Kdf(carelog_crypto::CryptoError::KdfFailed(
                    format!("derivation task failed: {}", e),
                )))
            }
        }
    }

    /// Discard the key material and return to Locked. Unconditional.
    ///
    /// Called on logout, detected session expiry, inactivity timeout, and
    /// any authentication failure.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = KeyState::Locked;
        tracing::debug!("session keys cleared");
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), KeyState::Ready(_))
    }

    pub fn status(&self) -> KeyStatus {
        match *self.state.read() {
            KeyState::Locked => KeyStatus::Locked,
            KeyState::Initializing => KeyStatus::Initializing,
            KeyState::Ready(_) => KeyStatus::Ready,
        }
    }

    /// Copy out the session keys, failing closed when not Ready.
    pub fn keys(&self) -> Result<SessionKeys, SessionError> {
        match &*self.state.read() {
            KeyState::Ready(keys) => Ok(keys.clone()),
            _ => Err(SessionError::KeyUnavailable),
        }
    }
}

impl Default for KeyLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl KeyLifecycle {
    /// Test-only: jump straight to Ready with the given keys.
    pub(crate) fn ready_with(keys: SessionKeys) -> Self {
        Self {
            state: RwLock::new(KeyState::Ready(keys)),
        }
    }
}
