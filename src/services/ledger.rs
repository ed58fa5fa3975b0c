// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client-side finalization ledger.
//!
//! Tracks, per transaction id, whether the platform has been acknowledged and
//! whether the backend credit grant is confirmed, rejected or still
//! outstanding. Also hands out per-transaction locks so the purchase path and
//! the reconciler never run the pipeline for the same id at the same time.
//!
//! Outstanding grants are written through to the secure store so a relaunch
//! picks them back up; the platform never redelivers an acknowledged
//! transaction.

use crate::config::ReconcileSettings;
use crate::error::{AppError, Result};
use crate::models::Transaction;
use crate::store::keys::PENDING_GRANT_PREFIX;
use crate::store::SecureStore;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Backend side of finalization for one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum GrantState {
    #[default]
    NotAttempted,
    Granted,
    /// Permanently refused by the backend
    Rejected(String),
    /// Platform acknowledged but the backend grant is not yet confirmed
    Outstanding {
        transaction: Box<Transaction>,
        /// Backend user the purchase was made under
        owner: Option<String>,
        attempts: u32,
        next_attempt_at: Instant,
    },
}

#[derive(Debug, Clone, Default)]
struct LedgerEntry {
    acknowledged: bool,
    grant: GrantState,
}

/// Stored form of an outstanding grant.
#[derive(Debug, Serialize, Deserialize)]
struct PendingGrant {
    transaction: Transaction,
    owner: Option<String>,
    attempts: u32,
}

/// An outstanding grant ready to be re-sent.
#[derive(Debug, Clone)]
pub struct DueGrant {
    pub transaction: Transaction,
    pub owner: Option<String>,
}

/// Per-transaction finalization record, shared by coordinator and reconciler.
pub struct FinalizationLedger {
    entries: DashMap<String, LedgerEntry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    settings: ReconcileSettings,
    store: Option<Arc<dyn SecureStore>>,
}

impl FinalizationLedger {
    /// Ledger that lives only as long as the process.
    pub fn new(settings: ReconcileSettings) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            settings,
            store: None,
        }
    }

    /// Ledger whose outstanding grants survive a relaunch.
    ///
    /// Grants found in `store` are loaded as acknowledged and due immediately.
    pub fn persistent(settings: ReconcileSettings, store: Arc<dyn SecureStore>) -> Result<Self> {
        let ledger = Self {
            store: Some(store.clone()),
            ..Self::new(settings)
        };

        let now = Instant::now();
        for key in store.keys()? {
            if !key.starts_with(PENDING_GRANT_PREFIX) {
                continue;
            }
            let Some(raw) = store.read(&key)? else {
                continue;
            };
            let pending: PendingGrant = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping unreadable pending grant");
                    store.remove(&key)?;
                    continue;
                }
            };

            tracing::info!(
                transaction_id = %pending.transaction.id,
                attempts = pending.attempts,
                "Restored outstanding credit grant"
            );
            ledger.entries.insert(
                pending.transaction.id.clone(),
                LedgerEntry {
                    acknowledged: true,
                    grant: GrantState::Outstanding {
                        transaction: Box::new(pending.transaction),
                        owner: pending.owner,
                        attempts: pending.attempts,
                        next_attempt_at: now,
                    },
                },
            );
        }

        Ok(ledger)
    }

    /// Lock serializing pipeline runs for one transaction id.
    pub fn lock_for(&self, transaction_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(transaction_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock for a finalized transaction.
    ///
    /// Callers hold the guard, so any later run takes a fresh lock and
    /// finds the entry already settled.
    pub fn release_lock_if_finalized(&self, transaction_id: &str) {
        if self.is_finalized(transaction_id) {
            self.locks.remove(transaction_id);
        }
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn is_acknowledged(&self, transaction_id: &str) -> bool {
        self.entries
            .get(transaction_id)
            .is_some_and(|e| e.acknowledged)
    }

    pub fn mark_acknowledged(&self, transaction_id: &str) {
        self.entries
            .entry(transaction_id.to_string())
            .or_default()
            .acknowledged = true;
    }

    pub fn grant_state(&self, transaction_id: &str) -> GrantState {
        self.entries
            .get(transaction_id)
            .map(|e| e.grant.clone())
            .unwrap_or_default()
    }

    /// Backend outcome is settled (granted or permanently rejected).
    pub fn is_grant_settled(&self, transaction_id: &str) -> bool {
        self.entries.get(transaction_id).is_some_and(|e| {
            matches!(e.grant, GrantState::Granted | GrantState::Rejected(_))
        })
    }

    /// Both halves of finalization are done.
    pub fn is_finalized(&self, transaction_id: &str) -> bool {
        self.is_acknowledged(transaction_id) && self.is_grant_settled(transaction_id)
    }

    pub fn mark_granted(&self, transaction_id: &str) {
        self.entries
            .entry(transaction_id.to_string())
            .or_default()
            .grant = GrantState::Granted;
        self.forget_pending(transaction_id);
    }

    pub fn mark_rejected(&self, transaction_id: &str, reason: impl Into<String>) {
        self.entries
            .entry(transaction_id.to_string())
            .or_default()
            .grant = GrantState::Rejected(reason.into());
        self.forget_pending(transaction_id);
    }

    /// Record that the backend grant for `tx`, bought by `owner`, still has
    /// to be re-sent.
    pub fn defer_grant(&self, tx: &Transaction, owner: Option<String>) {
        let next_attempt_at = Instant::now() + self.settings.backoff(0);
        self.remember_pending(tx, owner.as_deref(), 0);
        self.entries.entry(tx.id.clone()).or_default().grant = GrantState::Outstanding {
            transaction: Box::new(tx.clone()),
            owner,
            attempts: 0,
            next_attempt_at,
        };
    }

    /// Push the next attempt for an outstanding grant further out.
    pub fn record_retry_failure(&self, transaction_id: &str) -> Option<u32> {
        let mut entry = self.entries.get_mut(transaction_id)?;
        match &mut entry.grant {
            GrantState::Outstanding {
                transaction,
                owner,
                attempts,
                next_attempt_at,
            } => {
                *attempts += 1;
                *next_attempt_at = Instant::now() + self.settings.backoff(*attempts);
                self.remember_pending(transaction, owner.as_deref(), *attempts);
                Some(*attempts)
            }
            _ => None,
        }
    }

    /// Outstanding grants owned by `user` whose next attempt is due at `now`.
    ///
    /// Nothing is due while no user is signed in; a grant is never re-sent
    /// under another user's credentials.
    pub fn due_grants(&self, now: Instant, user: Option<&str>) -> Vec<DueGrant> {
        let Some(user) = user else {
            return Vec::new();
        };

        self.entries
            .iter()
            .filter_map(|entry| match &entry.grant {
                GrantState::Outstanding {
                    transaction,
                    owner,
                    next_attempt_at,
                    ..
                } if *next_attempt_at <= now && owner.as_deref().is_none_or(|o| o == user) => {
                    Some(DueGrant {
                        transaction: (**transaction).clone(),
                        owner: owner.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    pub fn outstanding_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.grant, GrantState::Outstanding { .. }))
            .count()
    }

    fn remember_pending(&self, tx: &Transaction, owner: Option<&str>, attempts: u32) {
        let Some(store) = &self.store else {
            return;
        };
        let pending = PendingGrant {
            transaction: tx.clone(),
            owner: owner.map(str::to_string),
            attempts,
        };
        let written = serde_json::to_string(&pending)
            .map_err(|e| AppError::Storage(e.to_string()))
            .and_then(|raw| store.write(&pending_key(&tx.id), &raw));
        if let Err(e) = written {
            tracing::error!(transaction_id = %tx.id, error = %e, "Failed to persist outstanding grant");
        }
    }

    fn forget_pending(&self, transaction_id: &str) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.remove(&pending_key(transaction_id)) {
            tracing::warn!(transaction_id, error = %e, "Failed to remove settled grant");
        }
    }
}

fn pending_key(transaction_id: &str) -> String {
    format!("{PENDING_GRANT_PREFIX}{transaction_id}")
}
