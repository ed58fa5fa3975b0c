// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Purchase coordinator: drives a transaction from platform receipt to a
//! finalized credit grant.
//!
//! Pipeline per transaction:
//! 1. Platform-level envelope verification (failure is terminal, never retried)
//! 2. Backend verification / credit grant (idempotent by transaction id)
//! 3. Platform acknowledgement (`finish`)
//! 4. Entitlement snapshot and credit balance refresh
//!
//! The purchase path acknowledges even when step 2 fails transiently and leaves
//! the grant outstanding for the reconciler. The update stream instead leaves
//! the transaction unacknowledged so the platform redelivers it.

use crate::error::{AppError, Result};
use crate::models::{
    Product, PurchaseResult, SessionState, SubscriptionStatusResponse, Transaction,
};
use crate::services::backend::BackendApi;
use crate::services::catalog::EntitlementCatalog;
use crate::services::ledger::{FinalizationLedger, GrantState};
use crate::services::platform::PlatformStore;
use crate::services::verification::TransactionVerifier;
use crate::store::TokenStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// When the platform is acknowledged relative to the backend grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge even if the grant failed transiently (purchase path).
    Always,
    /// Acknowledge only once the grant is settled (update stream).
    OnSettledGrant,
}

/// Credits confirmed by the backend for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditGrant {
    pub granted: i64,
    pub total: i64,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    Granted(CreditGrant),
    /// Acknowledged; backend grant left for the reconciler.
    GrantDeferred,
    /// An earlier run already handled this transaction; a deferred grant stays
    /// with the reconciler.
    AlreadyProcessed,
}

/// Outcome of a user-initiated purchase.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    Completed {
        transaction: Transaction,
        finalization: Finalization,
    },
    /// Awaiting external approval; the reconciler will finalize it.
    Pending,
    Cancelled,
}

/// Last credit balance reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreditBalance {
    pub total: i64,
    pub monthly_allocation: Option<i64>,
    pub next_grant_date: Option<String>,
}

/// Drives purchases and shared transaction finalization.
#[derive(Clone)]
pub struct PurchaseCoordinator {
    platform: Arc<dyn PlatformStore>,
    backend: Arc<dyn BackendApi>,
    verifier: Arc<dyn TransactionVerifier>,
    catalog: Arc<EntitlementCatalog>,
    ledger: Arc<FinalizationLedger>,
    tokens: TokenStore,
    session: watch::Receiver<SessionState>,
    credits: Arc<watch::Sender<Option<CreditBalance>>>,
}

impl PurchaseCoordinator {
    pub fn new(
        platform: Arc<dyn PlatformStore>,
        backend: Arc<dyn BackendApi>,
        verifier: Arc<dyn TransactionVerifier>,
        catalog: Arc<EntitlementCatalog>,
        ledger: Arc<FinalizationLedger>,
        tokens: TokenStore,
        session: watch::Receiver<SessionState>,
    ) -> Self {
        let (credits, _) = watch::channel(None);
        Self {
            platform,
            backend,
            verifier,
            catalog,
            ledger,
            tokens,
            session,
            credits: Arc::new(credits),
        }
    }

    pub fn platform(&self) -> &Arc<dyn PlatformStore> {
        &self.platform
    }

    pub fn catalog(&self) -> &Arc<EntitlementCatalog> {
        &self.catalog
    }

    pub fn ledger(&self) -> &Arc<FinalizationLedger> {
        &self.ledger
    }

    pub fn credits(&self) -> Option<CreditBalance> {
        self.credits.borrow().clone()
    }

    pub fn subscribe_credits(&self) -> watch::Receiver<Option<CreditBalance>> {
        self.credits.subscribe()
    }

    /// Forget the signed-out user's balance.
    pub fn reset_user_state(&self) {
        self.credits.send_replace(None);
    }

    fn current_user(&self) -> Option<String> {
        self.session.borrow().user_id().map(str::to_string)
    }

    /// Purchase `product` and drive the resulting transaction to finalization.
    ///
    /// Once the platform has produced a transaction the pipeline runs on its own
    /// task, so dropping the caller's future does not tear the purchase.
    pub async fn purchase(&self, product: &Product) -> Result<PurchaseOutcome> {
        if self.tokens.access_token().is_none() {
            return Err(AppError::Unauthorized);
        }

        tracing::info!(product_id = %product.id, "Purchase started");

        let result = self.platform.purchase(product).await?;
        let transaction = match result {
            PurchaseResult::UserCancelled => {
                tracing::info!(product_id = %product.id, "Purchase cancelled by user");
                return Ok(PurchaseOutcome::Cancelled);
            }
            PurchaseResult::Pending => {
                tracing::info!(product_id = %product.id, "Purchase pending external approval");
                return Ok(PurchaseOutcome::Pending);
            }
            PurchaseResult::Success(tx) => tx,
        };

        let coordinator = self.clone();
        let tx = transaction.clone();
        let finalization = tokio::spawn(async move {
            coordinator.finalize(&tx, AckPolicy::Always).await
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("purchase pipeline task failed: {}", e)))??;

        Ok(PurchaseOutcome::Completed {
            transaction,
            finalization,
        })
    }

    /// Re-sync purchase history with the platform and rebuild the snapshot.
    pub async fn restore_purchases(&self) -> Result<()> {
        tracing::info!("Restoring purchases");
        self.platform.sync().await?;
        self.catalog.rebuild_snapshot().await?;
        Ok(())
    }

    /// Run the verify -> grant -> acknowledge pipeline for one transaction.
    ///
    /// Safe to call repeatedly for the same transaction: runs are serialized per
    /// id and a settled transaction is never granted or acknowledged twice.
    pub async fn finalize(&self, tx: &Transaction, policy: AckPolicy) -> Result<Finalization> {
        let lock = self.ledger.lock_for(&tx.id);
        let _guard = lock.lock().await;
        let result = self.finalize_locked(tx, policy).await;
        self.ledger.release_lock_if_finalized(&tx.id);
        result
    }

    async fn finalize_locked(&self, tx: &Transaction, policy: AckPolicy) -> Result<Finalization> {
        if self.ledger.is_grant_settled(&tx.id)
            || matches!(self.ledger.grant_state(&tx.id), GrantState::Outstanding { .. })
        {
            if !self.ledger.is_acknowledged(&tx.id) {
                self.acknowledge(tx).await?;
            }
            tracing::debug!(transaction_id = %tx.id, "Transaction already processed");
            return Ok(Finalization::AlreadyProcessed);
        }

        if let Err(e) = self.verifier.verify(tx) {
            tracing::error!(
                transaction_id = %tx.id,
                product_id = %tx.product_id,
                error = %e,
                "Transaction failed verification; not finalizing"
            );
            return Err(e);
        }

        match self.backend.verify_transaction(tx).await {
            Ok(response) => {
                self.ledger.mark_granted(&tx.id);
                let grant = CreditGrant {
                    granted: response.credits_granted,
                    total: response.total_credits,
                };
                tracing::info!(
                    transaction_id = %tx.id,
                    product_id = %tx.product_id,
                    credits_granted = grant.granted,
                    total_credits = grant.total,
                    "Backend granted credits"
                );

                self.acknowledge(tx).await?;
                self.publish_total(grant.total);
                if response.subscription.is_some() {
                    self.catalog.set_subscription(response.subscription);
                }
                self.refresh_snapshot().await;

                Ok(Finalization::Granted(grant))
            }
            Err(e) if e.is_permanent_rejection() => {
                tracing::error!(transaction_id = %tx.id, error = %e, "Backend rejected transaction");
                self.ledger.mark_rejected(&tx.id, e.to_string());
                self.acknowledge(tx).await?;
                Err(e)
            }
            Err(e) => match policy {
                AckPolicy::Always => {
                    tracing::warn!(
                        transaction_id = %tx.id,
                        error = %e,
                        "Backend grant failed; acknowledging and deferring grant"
                    );
                    self.acknowledge(tx).await?;
                    self.ledger.defer_grant(tx, self.current_user());
                    Ok(Finalization::GrantDeferred)
                }
                AckPolicy::OnSettledGrant => {
                    tracing::warn!(
                        transaction_id = %tx.id,
                        error = %e,
                        "Backend grant failed; leaving transaction for redelivery"
                    );
                    Err(e)
                }
            },
        }
    }

    /// Re-send backend grants that were deferred and are now due.
    ///
    /// Only grants bought by the signed-in user are sent. Returns how many
    /// grants were confirmed. Each transaction is isolated: a failure only
    /// reschedules that one.
    pub async fn retry_outstanding_grants(&self) -> usize {
        let user = self.current_user();
        let due = self.ledger.due_grants(Instant::now(), user.as_deref());
        if due.is_empty() {
            return 0;
        }

        tracing::debug!(count = due.len(), "Retrying outstanding credit grants");
        let mut confirmed = 0;

        for grant in due {
            let tx = grant.transaction;
            let lock = self.ledger.lock_for(&tx.id);
            let _guard = lock.lock().await;

            // Settled by another path while we waited on the lock.
            if !matches!(self.ledger.grant_state(&tx.id), GrantState::Outstanding { .. }) {
                continue;
            }
            // The session changed hands while we waited.
            if grant.owner.is_some() && self.current_user() != grant.owner {
                tracing::debug!(transaction_id = %tx.id, "Grant owner no longer signed in");
                continue;
            }

            match self.backend.verify_transaction(&tx).await {
                Ok(response) => {
                    self.ledger.mark_granted(&tx.id);
                    self.publish_total(response.total_credits);
                    if response.subscription.is_some() {
                        self.catalog.set_subscription(response.subscription);
                    }
                    tracing::info!(
                        transaction_id = %tx.id,
                        credits_granted = response.credits_granted,
                        total_credits = response.total_credits,
                        "Deferred credit grant confirmed"
                    );
                    confirmed += 1;
                }
                Err(e) if e.is_permanent_rejection() => {
                    tracing::error!(transaction_id = %tx.id, error = %e, "Deferred grant rejected by backend");
                    self.ledger.mark_rejected(&tx.id, e.to_string());
                }
                Err(e) => {
                    let attempts = self.ledger.record_retry_failure(&tx.id);
                    tracing::warn!(
                        transaction_id = %tx.id,
                        attempts = ?attempts,
                        error = %e,
                        "Deferred grant still failing"
                    );
                }
            }
            self.ledger.release_lock_if_finalized(&tx.id);
        }

        if confirmed > 0 {
            self.refresh_snapshot().await;
        }
        confirmed
    }

    /// Fetch credit balance and subscription status from the backend.
    pub async fn refresh_status(&self) -> Result<SubscriptionStatusResponse> {
        let status = self.backend.subscription_status().await?;
        self.credits.send_replace(Some(CreditBalance {
            total: status.credits.balance,
            monthly_allocation: Some(status.credits.monthly_allocation),
            next_grant_date: status.credits.next_grant_date.clone(),
        }));
        self.catalog.set_subscription(status.subscription.clone());
        Ok(status)
    }

    async fn acknowledge(&self, tx: &Transaction) -> Result<()> {
        if self.ledger.is_acknowledged(&tx.id) {
            return Ok(());
        }
        self.platform.finish(tx).await.map_err(|e| {
            tracing::error!(transaction_id = %tx.id, error = %e, "Platform acknowledgement failed");
            AppError::from(e)
        })?;
        self.ledger.mark_acknowledged(&tx.id);
        tracing::info!(transaction_id = %tx.id, "Transaction acknowledged");
        Ok(())
    }

    fn publish_total(&self, total: i64) {
        self.credits.send_modify(|current| {
            let balance = current.get_or_insert_with(CreditBalance::default);
            balance.total = total;
        });
    }

    async fn refresh_snapshot(&self) {
        if let Err(e) = self.catalog.rebuild_snapshot().await {
            tracing::warn!(error = %e, "Entitlement snapshot refresh failed");
        }
    }
}
