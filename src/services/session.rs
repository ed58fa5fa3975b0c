// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session manager: login state machine and backend identity sync.
//!
//! State lives in a `watch` channel. Every transition replaces the whole value
//! in one step, so observers never see a torn state, and `login` always leaves
//! the machine in `Active`, `Failed` or `LoggedOut` when it returns.
//!
//! Each login attempt is numbered. `logout` retires the running attempt, and a
//! retired attempt can no longer move the machine or keep its tokens.

use crate::error::{AppError, Result};
use crate::models::{
    CredentialKind, FailureReason, LoginOutcome, NewUser, ProviderKind, SessionState, SyncResult,
    UserRecord,
};
use crate::services::backend::BackendApi;
use crate::services::claims::decode_claims;
use crate::services::identity::ProviderRegistry;
use crate::store::TokenStore;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Owns the login state machine.
pub struct SessionManager {
    providers: ProviderRegistry,
    tokens: TokenStore,
    backend: Arc<dyn BackendApi>,
    state: watch::Sender<SessionState>,
    /// Current login attempt; only changed under the state channel's lock
    attempt: AtomicU64,
    auth_timeout: Duration,
    clock_skew_secs: i64,
}

impl SessionManager {
    pub fn new(
        providers: ProviderRegistry,
        tokens: TokenStore,
        backend: Arc<dyn BackendApi>,
        auth_timeout: Duration,
        clock_skew_secs: i64,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::LoggedOut);
        Self {
            providers,
            tokens,
            backend,
            state,
            attempt: AtomicU64::new(0),
            auth_timeout,
            clock_skew_secs,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.state.borrow().user_id().map(str::to_string)
    }

    /// Access credential for authenticated requests, while a session is active.
    pub fn access_token(&self) -> Option<String> {
        if !self.state.borrow().is_active() {
            return None;
        }
        self.tokens.access_token()
    }

    /// Restore a session from stored credentials without a network call.
    ///
    /// The user id comes from the decoded id credential (falling back to the
    /// access credential). Anything missing, expired or malformed reads as
    /// "no session" and leaves the manager logged out.
    pub fn check_login_status(&self) -> SessionState {
        if self.state.borrow().is_in_flight() {
            return self.state();
        }

        let restored = self.restore_session();
        let next = match restored {
            Some((user_id, provider)) => {
                tracing::info!(user_id = %user_id, provider = %provider, "Session restored from stored credentials");
                SessionState::Active { user_id, provider }
            }
            None => SessionState::LoggedOut,
        };

        // A login that started meanwhile owns the machine.
        self.state.send_if_modified(|state| {
            if state.is_in_flight() {
                return false;
            }
            *state = next;
            true
        });
        self.state()
    }

    fn restore_session(&self) -> Option<(String, ProviderKind)> {
        if !self.tokens.is_access_token_valid() {
            return None;
        }
        let provider = self.tokens.provider()?;

        let claims = self
            .tokens
            .id_token()
            .and_then(|t| decode_claims(&t).ok())
            .or_else(|| {
                self.tokens
                    .access_token()
                    .and_then(|t| decode_claims(&t).ok())
            })?;

        if claims.is_expired(Utc::now().timestamp(), self.clock_skew_secs) {
            tracing::info!("Stored identity credential expired");
            return None;
        }

        Some((claims.subject, provider))
    }

    /// Log in with `kind` and sync the backend user record.
    ///
    /// Calling this while a login is in flight or a session is active is a
    /// caller error (`InvalidState`).
    pub async fn login(&self, kind: ProviderKind) -> Result<SyncResult> {
        let provider = self.providers.select(kind)?;

        let mut rejected_from = None;
        let mut attempt = 0;
        self.state.send_if_modified(|state| match state {
            SessionState::LoggedOut | SessionState::Failed(_) => {
                attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                *state = SessionState::Authenticating;
                true
            }
            other => {
                rejected_from = Some(other.clone());
                false
            }
        });
        if let Some(current) = rejected_from {
            return Err(AppError::InvalidState(format!(
                "login requested while {current:?}"
            )));
        }

        tracing::info!(provider = %kind, "Login started");
        let _abandoned = AbandonedLogin {
            state: &self.state,
            tokens: &self.tokens,
            current: &self.attempt,
            attempt,
        };

        let outcome = match self
            .with_timeout("identity provider login", async {
                provider.login().await.map_err(AppError::from)
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(AppError::Cancelled) => {
                tracing::info!(provider = %kind, "Login cancelled by user");
                self.advance(attempt, SessionState::LoggedOut);
                return Err(AppError::Cancelled);
            }
            Err(e) => return Err(self.fail(attempt, e)),
        };

        if !self.advance(attempt, SessionState::Syncing) {
            tracing::info!(provider = %kind, "Login ended by logout during provider handshake");
            return Err(AppError::Cancelled);
        }

        match self.complete_login(kind, &outcome).await {
            Ok(sync) => {
                let active = SessionState::Active {
                    user_id: sync.user.id.clone(),
                    provider: kind,
                };
                if !self.advance(attempt, active) {
                    tracing::info!(provider = %kind, "Login ended by logout during sync");
                    self.discard_tokens(attempt);
                    return Err(AppError::Cancelled);
                }
                tracing::info!(
                    user_id = %sync.user.id,
                    provider = %kind,
                    is_new = sync.is_new,
                    "Login complete"
                );
                Ok(sync)
            }
            Err(e) => {
                // Provider tokens must not outlive a failed sync.
                self.discard_tokens(attempt);
                Err(self.fail(attempt, e))
            }
        }
    }

    /// Move an in-flight login to `next`, unless `attempt` has been retired.
    fn advance(&self, attempt: u64, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if self.attempt.load(Ordering::SeqCst) != attempt || !state.is_in_flight() {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Drop the tokens `attempt` stored, unless a newer login or session now
    /// owns the store.
    fn discard_tokens(&self, attempt: u64) {
        let owned = self.attempt.load(Ordering::SeqCst) == attempt
            || matches!(
                *self.state.borrow(),
                SessionState::LoggedOut | SessionState::Failed(_)
            );
        if !owned {
            return;
        }
        if let Err(e) = self.tokens.clear_all() {
            tracing::error!(error = %e, "Failed to discard provider tokens");
        }
    }

    async fn complete_login(&self, kind: ProviderKind, outcome: &LoginOutcome) -> Result<SyncResult> {
        self.persist_tokens(kind, outcome)?;

        let subject = outcome.claims.subject.clone();
        let display_name = outcome.display_name_hint();
        let email = outcome.email_hint();

        self.with_timeout("backend identity sync", async {
            self.sync_user(&subject, display_name.as_deref(), email.as_deref())
                .await
        })
        .await
    }

    fn persist_tokens(&self, kind: ProviderKind, outcome: &LoginOutcome) -> Result<()> {
        // Stale credentials from an earlier session must not mix with these.
        self.tokens.clear_all()?;
        self.tokens.set(CredentialKind::Access, &outcome.access_token)?;
        if let Some(id_token) = &outcome.id_token {
            self.tokens.set(CredentialKind::Id, id_token)?;
        }
        if let Some(refresh_token) = &outcome.refresh_token {
            self.tokens.set(CredentialKind::Refresh, refresh_token)?;
        }
        self.tokens.set_provider(kind)
    }

    /// Fetch-or-create the backend user keyed by `subject`.
    ///
    /// Creation requires an email; its absence is a hard `BackendRejected`.
    pub async fn sync_user(
        &self,
        subject: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<SyncResult> {
        match self.backend.fetch_user(subject).await {
            Ok(user) => {
                tracing::debug!(user_id = %user.id, "Existing backend user found");
                Ok(SyncResult {
                    user,
                    is_new: false,
                })
            }
            Err(AppError::NotFound(_)) => {
                let email = email
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| {
                        AppError::BackendRejected(
                            "an email address is required to create an account".to_string(),
                        )
                    })?;

                let new_user = NewUser {
                    id: subject.to_string(),
                    user_name: best_effort_name(display_name, email),
                    email: email.to_string(),
                };

                tracing::info!(user_id = %subject, "Creating backend user");
                let user: UserRecord = self.backend.create_user(&new_user).await?;
                Ok(SyncResult { user, is_new: true })
            }
            Err(e) => Err(e),
        }
    }

    /// End the session: provider sign-out (best effort, bounded by the auth
    /// timeout), then credentials are cleared before the state flips to
    /// `LoggedOut`. A login still in flight is retired and returns `Cancelled`.
    pub async fn logout(&self) -> Result<()> {
        self.state.send_if_modified(|_| {
            self.attempt.fetch_add(1, Ordering::SeqCst);
            false
        });

        let provider = match &*self.state.borrow() {
            SessionState::Active { provider, .. } => Some(*provider),
            _ => self.tokens.provider(),
        };

        if let Some(kind) = provider {
            if let Ok(adapter) = self.providers.select(kind) {
                match tokio::time::timeout(self.auth_timeout, adapter.logout()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(provider = %kind, "Provider did not acknowledge logout");
                    }
                    Err(_) => {
                        tracing::warn!(
                            provider = %kind,
                            timeout_ms = self.auth_timeout.as_millis() as u64,
                            "Provider logout timed out; clearing credentials anyway"
                        );
                    }
                }
            }
        }

        let cleared = self.tokens.clear_all();
        self.state.send_modify(|state| {
            self.attempt.fetch_add(1, Ordering::SeqCst);
            *state = SessionState::LoggedOut;
        });
        tracing::info!("Logged out");
        cleared
    }

    async fn with_timeout<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.auth_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{what} exceeded {}s",
                self.auth_timeout.as_secs()
            ))),
        }
    }

    fn fail(&self, attempt: u64, err: AppError) -> AppError {
        tracing::warn!(error = %err, category = ?err.category(), "Login failed");
        self.advance(
            attempt,
            SessionState::Failed(FailureReason {
                category: err.category(),
                message: err.to_string(),
            }),
        );
        err
    }
}

/// Resets the machine if a login future is dropped before it finishes.
struct AbandonedLogin<'a> {
    state: &'a watch::Sender<SessionState>,
    tokens: &'a TokenStore,
    current: &'a AtomicU64,
    attempt: u64,
}

impl Drop for AbandonedLogin<'_> {
    fn drop(&mut self) {
        let mut was_syncing = false;
        let reset = self.state.send_if_modified(|state| {
            if self.current.load(Ordering::SeqCst) != self.attempt || !state.is_in_flight() {
                return false;
            }
            was_syncing = matches!(state, SessionState::Syncing);
            *state = SessionState::LoggedOut;
            true
        });
        if !reset {
            return;
        }
        tracing::warn!("Login abandoned before completion");
        if was_syncing {
            if let Err(e) = self.tokens.clear_all() {
                tracing::error!(error = %e, "Failed to discard provider tokens");
            }
        }
    }
}

/// Display name for a new account: the provider's name, else the email local part.
fn best_effort_name(display_name: Option<&str>, email: &str) -> String {
    display_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| {
            email
                .split('@')
                .next()
                .filter(|local| !local.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Storyteller".to_string())
}
