// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Story backend client for identity sync and purchase verification.
//!
//! Handles:
//! - User fetch/create/update keyed by identity-provider subject id
//! - Transaction verification (idempotent by transaction id, server-side)
//! - Credit and subscription status
//! - Status mapping into the app error taxonomy

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    NewUser, SubscriptionStatusResponse, Transaction, TransactionPayload, UserRecord, UserUpdate,
    VerifyTransactionRequest, VerifyTransactionResponse,
};
use crate::store::TokenStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

/// Backend endpoints the core consumes.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// `GET /users/{id}`. A missing user is `AppError::NotFound`.
    async fn fetch_user(&self, user_id: &str) -> Result<UserRecord, AppError>;

    /// `POST /users/`
    async fn create_user(&self, user: &NewUser) -> Result<UserRecord, AppError>;

    /// `PUT /users/{id}`
    async fn update_user(&self, user_id: &str, update: &UserUpdate)
        -> Result<UserRecord, AppError>;

    /// `POST /subscriptions/verify`. Requires an access credential.
    async fn verify_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<VerifyTransactionResponse, AppError>;

    /// `GET /subscriptions/status`. Requires an access credential.
    async fn subscription_status(&self) -> Result<SubscriptionStatusResponse, AppError>;
}

/// reqwest-backed implementation of [`BackendApi`].
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
}

impl HttpBackend {
    pub fn new(config: &Config, tokens: TokenStore) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn user_url(&self, user_id: &str) -> String {
        format!("{}/users/{}", self.base_url, urlencoding::encode(user_id))
    }

    /// Attach the access credential when one is held.
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.access_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Attach the access credential, refusing to send without one.
    fn require_authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        let token = self.tokens.access_token().ok_or(AppError::Unauthorized)?;
        Ok(request.bearer_auth(token))
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, AppError> {
        let response = request.send().await.map_err(|e| transport_error(what, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, what, &body));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Network(format!("{what}: invalid JSON response: {e}")))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_user(&self, user_id: &str) -> Result<UserRecord, AppError> {
        let request = self.authorized(self.http.get(self.user_url(user_id)));
        self.send_json(request, "fetch user").await
    }

    async fn create_user(&self, user: &NewUser) -> Result<UserRecord, AppError> {
        let url = format!("{}/users/", self.base_url);
        let request = self.authorized(self.http.post(url)).json(user);
        self.send_json(request, "create user").await
    }

    async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> Result<UserRecord, AppError> {
        let request = self
            .authorized(self.http.put(self.user_url(user_id)))
            .json(update);
        self.send_json(request, "update user").await
    }

    async fn verify_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<VerifyTransactionResponse, AppError> {
        let url = format!("{}/subscriptions/verify", self.base_url);
        let body = VerifyTransactionRequest {
            transaction: TransactionPayload::from(transaction),
        };
        let request = self.require_authorized(self.http.post(url))?.json(&body);
        let response: VerifyTransactionResponse = self.send_json(request, "verify transaction").await?;

        if !response.success {
            return Err(AppError::BackendRejected(format!(
                "transaction {} was not accepted",
                transaction.id
            )));
        }
        Ok(response)
    }

    async fn subscription_status(&self) -> Result<SubscriptionStatusResponse, AppError> {
        let url = format!("{}/subscriptions/status", self.base_url);
        let request = self.require_authorized(self.http.get(url))?;
        self.send_json(request, "subscription status").await
    }
}

fn transport_error(what: &str, err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("{what}: {err}"))
    } else {
        AppError::Network(format!("{what}: {err}"))
    }
}

/// Map a non-success status onto the error taxonomy.
fn status_error(status: StatusCode, what: &str, body: &str) -> AppError {
    match status {
        StatusCode::NOT_FOUND => AppError::NotFound(what.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            tracing::warn!(status = %status, "Backend asked us to back off");
            AppError::Network(format!("{what}: HTTP {status}"))
        }
        s if s.is_client_error() => {
            AppError::BackendRejected(format!("{what}: HTTP {status}: {body}"))
        }
        _ => AppError::Network(format!("{what}: HTTP {status}")),
    }
}
