//! Platform store capability (product lookup, purchase, transaction streams).
//!
//! The native store SDK is an external collaborator behind this trait.

use crate::error::AppError;
use crate::models::{Product, PurchaseResult, Transaction};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Failure reported by a platform store adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store request failed: {0}")]
    Failed(String),
}

impl From<PlatformError> for AppError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Unavailable(msg) => AppError::Network(msg),
            PlatformError::Failed(msg) => AppError::Store(msg),
        }
    }
}

#[async_trait]
pub trait PlatformStore: Send + Sync {
    async fn products(&self, ids: &[String]) -> Result<Vec<Product>, PlatformError>;

    async fn purchase(&self, product: &Product) -> Result<PurchaseResult, PlatformError>;

    /// Live stream of newly arrived transactions (approvals, renewals, family grants).
    fn transaction_updates(&self) -> BoxStream<'static, Transaction>;

    /// Every currently valid entitlement the platform knows about.
    async fn current_entitlements(&self) -> Result<Vec<Transaction>, PlatformError>;

    /// Acknowledge a transaction so the platform stops redelivering it.
    async fn finish(&self, transaction: &Transaction) -> Result<(), PlatformError>;

    /// Re-sync purchase history with the platform (restore purchases).
    async fn sync(&self) -> Result<(), PlatformError>;
}
