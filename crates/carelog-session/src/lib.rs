pub mod activity;
pub mod auth;
pub mod error;
pub mod lifecycle;

pub use activity::{
    ActivityMonitor, ActivitySignal, LockObserver, LockOptions, DEFAULT_LOCK_WINDOW,
};
pub use auth::AuthContext;
pub use error::SessionError;
pub use lifecycle::{KeyLifecycle, KeyStatus, SessionKeys};
