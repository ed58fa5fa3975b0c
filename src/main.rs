// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fable account status tool.
//!
//! Restores the stored session (if any) and reports the account's credit
//! balance and subscription from the story backend.

use fable_account::{
    config::Config,
    services::{BackendApi, HttpBackend, ProviderRegistry, SessionManager},
    store::{SealedFileStore, TokenStore},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::from_env()?;
    tracing::info!(api_url = %config.api_url, "Starting fable-account status check");

    let backing = SealedFileStore::new(&config.token_store_path, config.token_seal_key.clone())?;
    tracing::info!(path = %backing.path().display(), "Credential store opened");

    let tokens = TokenStore::new(Arc::new(backing)).with_clock_skew(config.clock_skew_secs);
    let backend: Arc<dyn BackendApi> = Arc::new(HttpBackend::new(&config, tokens.clone())?);

    // Provider handshakes need a UI; this tool only restores existing sessions.
    let session = SessionManager::new(
        ProviderRegistry::new(),
        tokens,
        backend.clone(),
        config.auth_timeout,
        config.clock_skew_secs,
    );

    let state = session.check_login_status();
    let Some(user_id) = state.user_id() else {
        tracing::info!("No active session");
        return Ok(());
    };
    tracing::info!(user_id = %user_id, "Session active");

    match backend.subscription_status().await {
        Ok(status) => {
            tracing::info!(
                balance = status.credits.balance,
                monthly_allocation = status.credits.monthly_allocation,
                next_grant_date = status.credits.next_grant_date.as_deref().unwrap_or("-"),
                subscription = status
                    .subscription
                    .as_ref()
                    .and_then(|s| s.product_id.as_deref())
                    .unwrap_or("none"),
                "Account status"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, category = ?e.category(), "Failed to fetch account status");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fable_account=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
