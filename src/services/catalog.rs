// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Entitlement catalog: product definitions and the entitlement snapshot.

use crate::error::AppError;
use crate::models::{EntitlementSnapshot, Product, SubscriptionInfo};
use crate::services::platform::{PlatformError, PlatformStore};
use crate::services::verification::TransactionVerifier;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Cached products plus the published entitlement snapshot.
pub struct EntitlementCatalog {
    platform: Arc<dyn PlatformStore>,
    verifier: Arc<dyn TransactionVerifier>,
    products: RwLock<Arc<Vec<Product>>>,
    last_error: RwLock<Option<PlatformError>>,
    snapshot: watch::Sender<EntitlementSnapshot>,
}

impl EntitlementCatalog {
    pub fn new(platform: Arc<dyn PlatformStore>, verifier: Arc<dyn TransactionVerifier>) -> Self {
        let (snapshot, _) = watch::channel(EntitlementSnapshot::default());
        Self {
            platform,
            verifier,
            products: RwLock::new(Arc::new(Vec::new())),
            last_error: RwLock::new(None),
            snapshot,
        }
    }

    /// Fetch `ids` from the platform store, sorted by ascending price.
    ///
    /// On failure the previous cache is kept and the error recorded.
    pub async fn load_products(&self, ids: &[String]) -> Result<Vec<Product>, AppError> {
        match self.platform.products(ids).await {
            Ok(mut products) => {
                products.sort_by(|a, b| {
                    a.price_micros
                        .cmp(&b.price_micros)
                        .then_with(|| a.id.cmp(&b.id))
                });
                *self.products.write().await = Arc::new(products.clone());
                *self.last_error.write().await = None;
                tracing::info!(count = products.len(), "Product catalog loaded");
                Ok(products)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Product catalog load failed, keeping cached products");
                *self.last_error.write().await = Some(e.clone());
                Err(e.into())
            }
        }
    }

    pub async fn products(&self) -> Arc<Vec<Product>> {
        self.products.read().await.clone()
    }

    pub async fn product(&self, id: &str) -> Option<Product> {
        self.products.read().await.iter().find(|p| p.id == id).cloned()
    }

    /// Error from the most recent failed load, cleared by the next success.
    pub async fn last_error(&self) -> Option<PlatformError> {
        self.last_error.read().await.clone()
    }

    pub fn snapshot(&self) -> EntitlementSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EntitlementSnapshot> {
        self.snapshot.subscribe()
    }

    /// Enumerate current entitlements and replace the snapshot wholesale.
    ///
    /// Entries that fail verification, or are expired or revoked, are logged
    /// and left out; they are never treated as owned.
    pub async fn rebuild_snapshot(&self) -> Result<EntitlementSnapshot, AppError> {
        let entitlements = self.platform.current_entitlements().await?;
        let now = Utc::now();

        let mut owned = BTreeSet::new();
        for tx in &entitlements {
            if let Err(e) = self.verifier.verify(tx) {
                tracing::warn!(
                    transaction_id = %tx.id,
                    product_id = %tx.product_id,
                    error = %e,
                    "Excluding unverifiable entitlement"
                );
                continue;
            }
            if !tx.is_current(now) {
                tracing::debug!(transaction_id = %tx.id, "Skipping lapsed entitlement");
                continue;
            }
            owned.insert(tx.product_id.clone());
        }

        let mut published = None;
        self.snapshot.send_modify(|current| {
            *current = EntitlementSnapshot {
                purchased_product_ids: owned,
                subscription: current.subscription.clone(),
                refreshed_at: Some(now),
            };
            published = Some(current.clone());
        });

        let snapshot = published.unwrap_or_default();
        tracing::info!(
            owned = snapshot.purchased_product_ids.len(),
            "Entitlement snapshot rebuilt"
        );
        Ok(snapshot)
    }

    /// Replace the subscription status reported by the backend.
    pub fn set_subscription(&self, subscription: Option<SubscriptionInfo>) {
        self.snapshot.send_modify(|current| {
            current.subscription = subscription;
        });
    }

    /// Forget everything the previous user owned (logout).
    pub fn reset_snapshot(&self) {
        self.snapshot.send_replace(EntitlementSnapshot::default());
    }
}
