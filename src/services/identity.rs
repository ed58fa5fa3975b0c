// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity provider capability.
//!
//! Each provider adapter (web-redirect OAuth, platform-native sign-in) owns its
//! own handshake and normalizes the result into a [`LoginOutcome`].

use crate::error::AppError;
use crate::models::{LoginOutcome, ProviderKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Failure reported by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("sign-in cancelled")]
    Cancelled,

    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("provider rejected sign-in: {0}")]
    Rejected(String),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => AppError::Cancelled,
            ProviderError::Network(msg) => AppError::Network(msg),
            ProviderError::Rejected(msg) => AppError::ProviderRejected(msg),
        }
    }
}

/// Capability every identity provider adapter implements.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Run the external handshake.
    async fn login(&self) -> Result<LoginOutcome, ProviderError>;

    /// Sign out at the provider. Returns whether the provider acknowledged it.
    async fn logout(&self) -> bool;

    /// Whether the provider still considers its own session valid.
    async fn verify_token(&self) -> bool;

    fn is_loading(&self) -> bool;

    fn error_message(&self) -> Option<String>;
}

/// Observable loading/error flags for adapter implementations.
#[derive(Debug, Default)]
pub struct ProviderActivity {
    loading: AtomicBool,
    error: Mutex<Option<String>>,
}

impl ProviderActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a handshake as started and clear the previous error.
    pub fn begin(&self) {
        self.loading.store(true, Ordering::SeqCst);
        self.set_error(None);
    }

    /// Mark the handshake as finished, recording the failure message if any.
    pub fn finish<T>(&self, result: &Result<T, ProviderError>) {
        let message = match result {
            Ok(_) | Err(ProviderError::Cancelled) => None,
            Err(e) => Some(e.to_string()),
        };
        self.set_error(message);
        self.loading.store(false, Ordering::SeqCst);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.lock().ok().and_then(|e| e.clone())
    }

    fn set_error(&self, message: Option<String>) {
        if let Ok(mut guard) = self.error.lock() {
            *guard = message;
        }
    }
}

/// Provider adapters registered at process start, keyed by kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Select the adapter for `kind`.
    ///
    /// A kind with no adapter is a wiring bug and fails loudly here rather than
    /// partway through a login.
    pub fn select(&self, kind: ProviderKind) -> Result<Arc<dyn IdentityProvider>, AppError> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            tracing::error!(provider = %kind, "Identity provider selected but not implemented");
            AppError::Configuration(format!("identity provider '{kind}' is not implemented"))
        })
    }

    pub fn is_available(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn available(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
