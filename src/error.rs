// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types, normalized at the manager/coordinator boundary.

use serde::Serialize;

/// Coarse error categories surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Build or wiring bug (e.g. an identity provider that was never registered).
    Configuration,
    /// The user backed out. Not a failure.
    UserCancelled,
    /// Timeouts and unreachable hosts. Retry the same idempotent call.
    TransientNetwork,
    /// Forged, corrupted or unverifiable receipt. Never retried automatically.
    Verification,
    /// Backend refused the request; retrying needs new input.
    BackendRejected,
    /// Identity provider refused the sign-in.
    ProviderRejected,
    /// No usable credential for an authenticated call.
    Unauthorized,
    /// Operation not allowed in the current session state.
    InvalidState,
    /// Local credential storage failed.
    Storage,
    Internal,
}

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Rejected by backend: {0}")]
    BackendRejected(String),

    #[error("Sign-in refused by provider: {0}")]
    ProviderRejected(String),

    #[error("Platform store error: {0}")]
    Store(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Map this error onto the user-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Configuration(_) => ErrorCategory::Configuration,
            AppError::Cancelled => ErrorCategory::UserCancelled,
            AppError::Unauthorized => ErrorCategory::Unauthorized,
            AppError::InvalidState(_) => ErrorCategory::InvalidState,
            AppError::Network(_) | AppError::Timeout(_) | AppError::Store(_) => {
                ErrorCategory::TransientNetwork
            }
            // A not-found that escapes the sync protocol means the backend disagrees
            // with us about a resource that should exist.
            AppError::NotFound(_) | AppError::BackendRejected(_) => ErrorCategory::BackendRejected,
            AppError::Verification(_) => ErrorCategory::Verification,
            AppError::ProviderRejected(_) => ErrorCategory::ProviderRejected,
            AppError::Storage(_) => ErrorCategory::Storage,
            AppError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether re-invoking the same idempotent call may succeed.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::TransientNetwork
    }

    /// Whether the backend has permanently refused this input.
    pub fn is_permanent_rejection(&self) -> bool {
        matches!(self, AppError::BackendRejected(_))
    }

    /// Whether this failure should be shown to the user rather than recovered silently.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Verification
                | ErrorCategory::BackendRejected
                | ErrorCategory::ProviderRejected
                | ErrorCategory::Configuration
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;
