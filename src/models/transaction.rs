// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Platform store transactions and the backend verification wire format.

use crate::time_utils::{iso8601, iso8601_opt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-level verdict on a transaction's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    Verified,
}

/// A platform store transaction, from a purchase attempt or a platform stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub original_transaction_id: String,
    pub product_id: String,
    pub purchase_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub revocation_date: Option<DateTime<Utc>>,
    pub verification: VerificationState,
    /// Signed envelope (JWS) as delivered by the platform
    pub signed_payload: String,
}

impl Transaction {
    /// Whether this transaction still grants its product at `now`.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.revocation_date.is_none() && self.expiration_date.is_none_or(|exp| exp > now)
    }
}

/// Result of asking the platform to purchase a product.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseResult {
    UserCancelled,
    /// Awaiting external approval; the transaction arrives later on the update stream.
    Pending,
    Success(Transaction),
}

/// Normalized transaction fields sent to `POST /subscriptions/verify`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub id: String,
    pub original_transaction_id: String,
    pub product_id: String,
    #[serde(with = "iso8601")]
    pub purchase_date: DateTime<Utc>,
    #[serde(with = "iso8601_opt", skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<DateTime<Utc>>,
    pub signed_payload: String,
}

impl From<&Transaction> for TransactionPayload {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            original_transaction_id: tx.original_transaction_id.clone(),
            product_id: tx.product_id.clone(),
            purchase_date: tx.purchase_date,
            expires_date: tx.expiration_date,
            signed_payload: tx.signed_payload.clone(),
        }
    }
}

/// Body of `POST /subscriptions/verify`.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyTransactionRequest {
    pub transaction: TransactionPayload,
}

/// Subscription details as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionInfo {
    pub product_id: Option<String>,
    pub status: Option<String>,
    pub expires_date: Option<String>,
    pub auto_renew: Option<bool>,
}

/// Response of `POST /subscriptions/verify`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTransactionResponse {
    pub success: bool,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
    #[serde(default)]
    pub credits_granted: i64,
    pub total_credits: i64,
}

/// Credit balance section of `GET /subscriptions/status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatus {
    pub balance: i64,
    #[serde(default)]
    pub monthly_allocation: i64,
    #[serde(default)]
    pub next_grant_date: Option<String>,
}

/// Response of `GET /subscriptions/status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionStatusResponse {
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
    pub credits: CreditStatus,
}
