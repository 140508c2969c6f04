//! Inactivity lock: unattended unlocked sessions must self-lock.
//!
//! A single deadline per session, replaced (not stacked) on every activity
//! signal. On expiry the session is force-locked even mid-task and lock
//! observers are notified. The observer subscription is decoupled from any
//! UI toolkit; the host wires whatever input events its platform exposes
//! into `record_activity`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::lifecycle::KeyLifecycle;

/// Default inactivity window: 30 minutes.
pub const DEFAULT_LOCK_WINDOW: Duration = Duration::from_secs(30 * 60);

/// User-activity signals that reset the inactivity deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
    Touch,
}

/// Configuration for the inactivity lock.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub window: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_LOCK_WINDOW,
        }
    }
}

/// Callback invoked after a forced lock.
pub type LockObserver = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    /// Armed deadline; None while disarmed.
    deadline: Mutex<Option<Instant>>,
    /// Bumped on every arm/disarm so stale watcher tasks exit.
    generation: AtomicU64,
    observers: Mutex<HashMap<u64, LockObserver>>,
    next_observer: AtomicU64,
}

/// Arms and maintains the single inactivity deadline for a session.
pub struct ActivityMonitor {
    lifecycle: Arc<KeyLifecycle>,
    window: Duration,
    shared: Arc<Shared>,
}

impl ActivityMonitor {
    pub fn new(lifecycle: Arc<KeyLifecycle>, options: LockOptions) -> Self {
        Self {
            lifecycle,
            window: options.window,
            shared: Arc::new(Shared {
                deadline: Mutex::new(None),
                generation: AtomicU64::new(0),
                observers: Mutex::new(HashMap::new()),
                next_observer: AtomicU64::new(1),
            }),
        }
    }

    /// Arm the inactivity deadline. Called once the session authenticates.
    /// Re-arming replaces any previous deadline and watcher.
    pub fn arm(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.deadline.lock() = Some(Instant::now() + self.window);

        let shared = Arc::clone(&self.shared);
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            watch(shared, lifecycle, generation).await;
        });
    }

    /// Stop watching without locking. Used on explicit logout, where the
    /// caller clears the lifecycle itself.
    pub fn disarm(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        *self.shared.deadline.lock() = None;
    }

    /// Reset the deadline. Ignored while disarmed.
    pub fn record_activity(&self, signal: ActivitySignal) {
        let mut deadline = self.shared.deadline.lock();
        if deadline.is_some() {
            *deadline = Some(Instant::now() + self.window);
            tracing::trace!(?signal, "inactivity deadline reset");
        }
    }

    /// Register a lock observer. Returns a handle for `remove_observer`.
    pub fn on_lock(&self, observer: LockObserver) -> u64 {
        let id = self.shared.next_observer.fetch_add(1, Ordering::SeqCst);
        self.shared.observers.lock().insert(id, observer);
        id
    }

    pub fn remove_observer(&self, id: u64) {
        self.shared.observers.lock().remove(&id);
    }
}

async fn watch(shared: Arc<Shared>, lifecycle: Arc<KeyLifecycle>, generation: u64) {
    loop {
        let target = match *shared.deadline.lock() {
            Some(t) => t,
            None => return,
        };
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        tokio::time::sleep_until(target).await;

        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let expired = {
            let mut deadline = shared.deadline.lock();
            match *deadline {
                // Activity may have pushed the deadline forward while we slept.
                Some(t) if t <= Instant::now() => {
                    *deadline = None;
                    true
                }
                Some(_) => false,
                None => return,
            }
        };

        if expired {
            lifecycle.clear();
            tracing::info!("session force-locked after inactivity");
            let observers: Vec<LockObserver> =
                shared.observers.lock().values().cloned().collect();
            for observer in observers {
                observer();
            }
            return;
        }
    }
}
