// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Transaction reconciler: standing background process that re-drives
//! transactions to finalization.
//!
//! Two loops run for the lifetime of the process:
//! - Update loop: consumes the platform's live transaction stream and runs the
//!   shared pipeline for each arrival. Failures are logged and the transaction
//!   stays unacknowledged so the platform redelivers it.
//! - Snapshot loop: rebuilds the entitlement snapshot on request and, on a
//!   fixed tick, re-sends credit grants that the purchase path deferred.

use crate::config::ReconcileSettings;
use crate::services::purchase::{AckPolicy, Finalization, PurchaseCoordinator};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Starts the reconciler loops.
pub struct TransactionReconciler;

impl TransactionReconciler {
    /// Spawn both loops. An initial snapshot rebuild is requested immediately.
    pub fn start(coordinator: PurchaseCoordinator, settings: ReconcileSettings) -> ReconcilerHandle {
        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());

        let updates = tokio::spawn(update_loop(coordinator.clone(), cancel.clone()));
        let snapshots = tokio::spawn(snapshot_loop(
            coordinator,
            settings,
            refresh.clone(),
            cancel.clone(),
        ));

        refresh.notify_one();
        tracing::info!("Transaction reconciler started");

        ReconcilerHandle {
            cancel,
            refresh,
            tasks: vec![updates, snapshots],
        }
    }
}

/// Handle to the running reconciler.
pub struct ReconcilerHandle {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Ask for an entitlement snapshot rebuild (app foreground, post-purchase,
    /// post-restore). Requests made while a rebuild is queued coalesce.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Stop both loops and wait for them. Work already in progress completes first.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Reconciler task ended abnormally");
            }
        }
        tracing::info!("Transaction reconciler stopped");
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        // Dropping without shutdown() still stops the loops.
        self.cancel.cancel();
    }
}

async fn update_loop(coordinator: PurchaseCoordinator, cancel: CancellationToken) {
    let mut updates = coordinator.platform().transaction_updates();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = updates.next() => next,
        };

        let Some(tx) = next else {
            tracing::warn!("Platform transaction stream ended");
            break;
        };

        tracing::info!(
            transaction_id = %tx.id,
            product_id = %tx.product_id,
            "Transaction update received"
        );

        // Each transaction is isolated; one failure never stops the loop.
        match coordinator.finalize(&tx, AckPolicy::OnSettledGrant).await {
            Ok(Finalization::Granted(grant)) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    total_credits = grant.total,
                    "Transaction update finalized"
                );
            }
            Ok(other) => {
                tracing::debug!(transaction_id = %tx.id, outcome = ?other, "Transaction update handled");
            }
            Err(e) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    error = %e,
                    category = ?e.category(),
                    "Transaction update not finalized"
                );
            }
        }
    }
}

async fn snapshot_loop(
    coordinator: PurchaseCoordinator,
    settings: ReconcileSettings,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut retry_tick = tokio::time::interval(settings.tick);
    retry_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = refresh.notified() => {
                if let Err(e) = coordinator.catalog().rebuild_snapshot().await {
                    tracing::warn!(error = %e, "Entitlement snapshot rebuild failed");
                }
            }
            _ = retry_tick.tick() => {
                let confirmed = coordinator.retry_outstanding_grants().await;
                if confirmed > 0 {
                    tracing::info!(confirmed, "Outstanding credit grants confirmed");
                }
            }
        }
    }
}
