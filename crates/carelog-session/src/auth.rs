//! Identity handed over by the authentication collaborator on
//! login/registration. The sync engine and key lifecycle both depend on
//! this being present before they can operate.

/// Server-verified identity for the authenticated session.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub org_id: String,
    /// Per-account salt for session-key derivation. Stable for the life of
    /// the account; stored server-side, returned on authentication.
    pub encryption_salt: Vec<u8>,
}

impl AuthContext {
    /// True when every identity field needed for multi-tenant sync is set.
    pub fn has_identity(&self) -> bool {
        !self.user_id.is_empty() && !self.email.is_empty() && !self.org_id.is_empty()
    }
}
