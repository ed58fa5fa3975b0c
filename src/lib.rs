// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fable account core: identity sessions and entitlement reconciliation for the
//! story app.
//!
//! Login state, credential custody, in-app purchase verification and the
//! credit ledger all live here; the UI layer, identity provider handshakes and
//! the native store SDK plug in through the traits in [`services`].

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod time_utils;

use config::Config;
use services::{
    BackendApi, EntitlementCatalog, EnvelopeVerifier, FinalizationLedger, PlatformStore,
    ProviderRegistry, PurchaseCoordinator, ReconcilerHandle, SessionManager,
    TransactionReconciler, TransactionVerifier,
};
use std::sync::Arc;
use store::TokenStore;

/// Shared application context, constructed once at process start.
pub struct AppContext {
    pub config: Config,
    pub tokens: TokenStore,
    pub session: SessionManager,
    pub catalog: Arc<EntitlementCatalog>,
    pub purchases: PurchaseCoordinator,
}

impl AppContext {
    /// Wire the session and purchase stacks with the default envelope verifier.
    ///
    /// Fails only if outstanding grants cannot be read back from the
    /// credential backing.
    pub fn new(
        config: Config,
        tokens: TokenStore,
        providers: ProviderRegistry,
        backend: Arc<dyn BackendApi>,
        platform: Arc<dyn PlatformStore>,
    ) -> error::Result<Self> {
        Self::with_verifier(
            config,
            tokens,
            providers,
            backend,
            platform,
            Arc::new(EnvelopeVerifier),
        )
    }

    pub fn with_verifier(
        config: Config,
        tokens: TokenStore,
        providers: ProviderRegistry,
        backend: Arc<dyn BackendApi>,
        platform: Arc<dyn PlatformStore>,
        verifier: Arc<dyn TransactionVerifier>,
    ) -> error::Result<Self> {
        let tokens = tokens.with_clock_skew(config.clock_skew_secs);
        let session = SessionManager::new(
            providers,
            tokens.clone(),
            backend.clone(),
            config.auth_timeout,
            config.clock_skew_secs,
        );

        let catalog = Arc::new(EntitlementCatalog::new(platform.clone(), verifier.clone()));
        let ledger = Arc::new(FinalizationLedger::persistent(
            config.reconcile,
            tokens.backing(),
        )?);

        let purchases = PurchaseCoordinator::new(
            platform,
            backend,
            verifier,
            catalog.clone(),
            ledger,
            tokens.clone(),
            session.subscribe(),
        );

        Ok(Self {
            config,
            tokens,
            session,
            catalog,
            purchases,
        })
    }

    /// Start the standing transaction reconciler. Call once per process.
    pub fn start_reconciler(&self) -> ReconcilerHandle {
        TransactionReconciler::start(self.purchases.clone(), self.config.reconcile)
    }

    /// Log out and forget the previous user's entitlements and balance.
    pub async fn logout(&self) -> error::Result<()> {
        let result = self.session.logout().await;
        self.catalog.reset_snapshot();
        self.purchases.reset_user_state();
        result
    }
}
