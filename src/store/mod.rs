//! Credential storage layer.

pub mod secure;
pub mod token_store;

pub use secure::{MemorySecureStore, SealedFileStore, SecureStore};
pub use token_store::TokenStore;

/// Storage keys that are not credentials.
pub mod keys {
    /// Provider the current session was established with
    pub const LOGIN_PROVIDER: &str = "login_provider";

    /// Prefix for credit grants still owed by the backend, one entry per transaction
    pub const PENDING_GRANT_PREFIX: &str = "pending_grant.";
}
