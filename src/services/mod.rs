// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - session and entitlement logic.

pub mod backend;
pub mod catalog;
pub mod claims;
pub mod identity;
pub mod ledger;
pub mod platform;
pub mod purchase;
pub mod reconciler;
pub mod session;
pub mod verification;

pub use backend::{BackendApi, HttpBackend};
pub use catalog::EntitlementCatalog;
pub use claims::{decode_claims, ClaimsError};
pub use identity::{IdentityProvider, ProviderActivity, ProviderError, ProviderRegistry};
pub use ledger::{DueGrant, FinalizationLedger, GrantState};
pub use platform::{PlatformError, PlatformStore};
pub use purchase::{
    AckPolicy, CreditBalance, CreditGrant, Finalization, PurchaseCoordinator, PurchaseOutcome,
};
pub use reconciler::{ReconcilerHandle, TransactionReconciler};
pub use session::SessionManager;
pub use verification::{EnvelopeVerifier, TransactionVerifier};
