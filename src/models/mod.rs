// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credential;
pub mod entitlement;
pub mod product;
pub mod session;
pub mod transaction;
pub mod user;

pub use credential::CredentialKind;
pub use entitlement::EntitlementSnapshot;
pub use product::Product;
pub use session::{FailureReason, IdentityClaims, LoginOutcome, ProviderKind, SessionState};
pub use transaction::{
    CreditStatus, PurchaseResult, SubscriptionInfo, SubscriptionStatusResponse, Transaction,
    TransactionPayload, VerificationState, VerifyTransactionRequest, VerifyTransactionResponse,
};
pub use user::{NewUser, SyncResult, UserRecord, UserUpdate};
