// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Platform-level authenticity checks for store transactions.

use crate::error::AppError;
use crate::models::{Transaction, VerificationState};
use crate::services::claims::{decode_raw_claims, ClaimsError};
use serde_json::Value;

/// Decides whether a transaction's envelope can be trusted.
pub trait TransactionVerifier: Send + Sync {
    fn verify(&self, transaction: &Transaction) -> Result<(), AppError>;
}

/// Default verifier.
///
/// The platform store has already checked the JWS certificate chain and
/// reports its verdict in `verification`. On top of that verdict the signed
/// payload must decode and agree with the transaction fields it was delivered
/// with, so a mismatched or truncated envelope is caught before it reaches the
/// backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeVerifier;

impl TransactionVerifier for EnvelopeVerifier {
    fn verify(&self, tx: &Transaction) -> Result<(), AppError> {
        if tx.verification != VerificationState::Verified {
            return Err(AppError::Verification(format!(
                "transaction {} failed platform signature verification",
                tx.id
            )));
        }

        let payload = decode_raw_claims(&tx.signed_payload).map_err(|e| match e {
            ClaimsError::NotStructured => AppError::Verification(format!(
                "transaction {} has no signed envelope",
                tx.id
            )),
            other => AppError::Verification(format!(
                "transaction {} envelope unreadable: {other}",
                tx.id
            )),
        })?;

        let expected = [
            ("transactionId", tx.id.as_str()),
            ("originalTransactionId", tx.original_transaction_id.as_str()),
            ("productId", tx.product_id.as_str()),
        ];

        for (field, want) in expected {
            match payload.get(field).map(claim_as_string) {
                Some(Some(got)) if got == want => {}
                Some(got) => {
                    return Err(AppError::Verification(format!(
                        "transaction {} envelope {field} mismatch (got {:?})",
                        tx.id,
                        got.unwrap_or_default()
                    )));
                }
                None => {
                    return Err(AppError::Verification(format!(
                        "transaction {} envelope missing {field}",
                        tx.id
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Store ids arrive as strings or numbers depending on the platform.
fn claim_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
