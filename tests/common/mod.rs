// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared test doubles: a scripted identity provider, an in-memory backend
//! that is idempotent by transaction id, and a scripted platform store.

use async_trait::async_trait;
use chrono::Utc;
use fable_account::config::{Config, ReconcileSettings};
use fable_account::error::AppError;
use fable_account::models::{
    CreditStatus, LoginOutcome, NewUser, Product, ProviderKind, PurchaseResult, SubscriptionInfo,
    SubscriptionStatusResponse, Transaction, UserRecord, UserUpdate, VerificationState,
    VerifyTransactionResponse,
};
use fable_account::services::{
    decode_claims, BackendApi, IdentityProvider, PlatformError, PlatformStore, ProviderActivity,
    ProviderError, ProviderRegistry,
};
use fable_account::store::{MemorySecureStore, TokenStore};
use fable_account::AppContext;
use futures_util::stream::{self, BoxStream, StreamExt};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[allow(dead_code)]
pub const CREDITS_PER_PURCHASE: i64 = 1000;

// ─── Tokens ──────────────────────────────────────────────────────────────────

/// Mint a provider-style id token (signature is irrelevant to the client).
#[allow(dead_code)]
pub fn id_token(subject: &str, email: Option<&str>, expires_in_secs: i64) -> String {
    let mut claims = json!({
        "sub": subject,
        "iss": "https://accounts.google.com",
        "aud": "com.fable.app",
        "iat": Utc::now().timestamp(),
        "exp": Utc::now().timestamp() + expires_in_secs,
    });
    if let Some(email) = email {
        claims["email"] = json!(email);
    }
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"provider-signing-key"),
    )
    .expect("Failed to mint id token")
}

#[allow(dead_code)]
pub fn login_outcome(subject: &str, email: Option<&str>) -> LoginOutcome {
    let token = id_token(subject, email, 3600);
    LoginOutcome {
        access_token: format!("opaque-access-{subject}"),
        id_token: Some(token.clone()),
        refresh_token: Some(format!("refresh-{subject}")),
        claims: decode_claims(&token).expect("minted token decodes"),
        display_name: None,
        email: None,
    }
}

// ─── Transactions ────────────────────────────────────────────────────────────

fn signed_payload(id: &str, original_id: &str, product_id: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &json!({
            "transactionId": id,
            "originalTransactionId": original_id,
            "productId": product_id,
            "signedDate": Utc::now().timestamp_millis(),
        }),
        &EncodingKey::from_secret(b"store-signing-key"),
    )
    .expect("Failed to sign transaction")
}

/// A platform-verified transaction with a consistent envelope.
#[allow(dead_code)]
pub fn signed_transaction(id: &str, product_id: &str) -> Transaction {
    Transaction {
        id: id.to_string(),
        original_transaction_id: id.to_string(),
        product_id: product_id.to_string(),
        purchase_date: Utc::now(),
        expiration_date: None,
        revocation_date: None,
        verification: VerificationState::Verified,
        signed_payload: signed_payload(id, id, product_id),
    }
}

/// A transaction the platform could not verify.
#[allow(dead_code)]
pub fn forged_transaction(id: &str, product_id: &str) -> Transaction {
    Transaction {
        verification: VerificationState::Unverified,
        ..signed_transaction(id, product_id)
    }
}

#[allow(dead_code)]
pub fn product(id: &str, price_micros: i64) -> Product {
    Product {
        id: id.to_string(),
        display_name: id.rsplit('.').next().unwrap_or(id).to_string(),
        price_micros,
        display_price: format!("${:.2}", price_micros as f64 / 1_000_000.0),
        subscription_period: id.contains("plus").then(|| "P1M".to_string()),
    }
}

// ─── Identity provider ───────────────────────────────────────────────────────

pub struct MockProvider {
    kind: ProviderKind,
    result: Mutex<Result<LoginOutcome, ProviderError>>,
    delay: Duration,
    logout_delay: Duration,
    activity: ProviderActivity,
    pub logout_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new(kind: ProviderKind, result: Result<LoginOutcome, ProviderError>) -> Self {
        Self {
            kind,
            result: Mutex::new(result),
            delay: Duration::ZERO,
            logout_delay: Duration::ZERO,
            activity: ProviderActivity::new(),
            logout_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Provider sign-out that takes `delay` to answer.
    pub fn with_logout_delay(mut self, delay: Duration) -> Self {
        self.logout_delay = delay;
        self
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn login(&self) -> Result<LoginOutcome, ProviderError> {
        self.activity.begin();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = self.result.lock().unwrap().clone();
        self.activity.finish(&result);
        result
    }

    async fn logout(&self) -> bool {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if !self.logout_delay.is_zero() {
            tokio::time::sleep(self.logout_delay).await;
        }
        true
    }

    async fn verify_token(&self) -> bool {
        self.result.lock().unwrap().is_ok()
    }

    fn is_loading(&self) -> bool {
        self.activity.is_loading()
    }

    fn error_message(&self) -> Option<String> {
        self.activity.error_message()
    }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// In-memory backend. Credit grants are keyed by transaction id, so repeated
/// verification of the same transaction never grants twice.
#[derive(Default)]
pub struct MockBackend {
    pub users: Mutex<HashMap<String, UserRecord>>,
    grants: Mutex<HashMap<String, i64>>,
    /// Upcoming verify calls that fail before reaching the ledger
    pub fail_verify: AtomicUsize,
    /// Upcoming verify calls that commit the grant but lose the response
    pub lose_verify_response: AtomicUsize,
    pub reject_verify: AtomicBool,
    pub sync_delay: Mutex<Duration>,
    pub fetch_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn total_credits(&self) -> i64 {
        self.grants.lock().unwrap().values().sum()
    }

    pub fn granted(&self, transaction_id: &str) -> bool {
        self.grants.lock().unwrap().contains_key(transaction_id)
    }

    pub fn insert_user(&self, id: &str, email: &str) {
        self.users.lock().unwrap().insert(
            id.to_string(),
            UserRecord {
                id: id.to_string(),
                user_name: "Existing".to_string(),
                email: email.to_string(),
                created_at: None,
                updated_at: None,
            },
        );
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn fetch_user(&self, user_id: &str) -> Result<UserRecord, AppError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sync_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
    }

    async fn create_user(&self, user: &NewUser) -> Result<UserRecord, AppError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if user.email.is_empty() {
            return Err(AppError::BackendRejected("email required".to_string()));
        }
        let record = UserRecord {
            id: user.id.clone(),
            user_name: user.user_name.clone(),
            email: user.email.clone(),
            created_at: Some(Utc::now().to_rfc3339()),
            updated_at: None,
        };
        self.users
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> Result<UserRecord, AppError> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
        if let Some(name) = &update.user_name {
            user.user_name = name.clone();
        }
        if let Some(email) = &update.email {
            user.email = email.clone();
        }
        Ok(user.clone())
    }

    async fn verify_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<VerifyTransactionResponse, AppError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.fail_verify) {
            return Err(AppError::Network("connection reset".to_string()));
        }
        if self.reject_verify.load(Ordering::SeqCst) {
            return Err(AppError::BackendRejected("transaction refunded".to_string()));
        }

        let credits_granted = {
            let mut grants = self.grants.lock().unwrap();
            if grants.contains_key(&transaction.id) {
                0
            } else {
                grants.insert(transaction.id.clone(), CREDITS_PER_PURCHASE);
                CREDITS_PER_PURCHASE
            }
        };

        if take_one(&self.lose_verify_response) {
            return Err(AppError::Timeout("verify transaction".to_string()));
        }

        Ok(VerifyTransactionResponse {
            success: true,
            subscription: Some(SubscriptionInfo {
                product_id: Some(transaction.product_id.clone()),
                status: Some("active".to_string()),
                ..Default::default()
            }),
            credits_granted,
            total_credits: self.total_credits(),
        })
    }

    async fn subscription_status(&self) -> Result<SubscriptionStatusResponse, AppError> {
        Ok(SubscriptionStatusResponse {
            subscription: None,
            credits: CreditStatus {
                balance: self.total_credits(),
                monthly_allocation: 500,
                next_grant_date: Some("2026-11-01".to_string()),
            },
        })
    }
}

// ─── Platform store ──────────────────────────────────────────────────────────

pub struct MockPlatform {
    pub catalog: Mutex<Vec<Product>>,
    pub catalog_unavailable: AtomicBool,
    pub next_purchase: Mutex<Option<PurchaseResult>>,
    pub entitlements: Mutex<Vec<Transaction>>,
    pub finished: Mutex<Vec<String>>,
    pub sync_calls: AtomicUsize,
    updates_tx: mpsc::UnboundedSender<Transaction>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<Transaction>>>,
}

#[allow(dead_code)]
impl MockPlatform {
    pub fn new() -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            catalog: Mutex::new(Vec::new()),
            catalog_unavailable: AtomicBool::new(false),
            next_purchase: Mutex::new(None),
            entitlements: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            sync_calls: AtomicUsize::new(0),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        }
    }

    pub fn script_purchase(&self, result: PurchaseResult) {
        *self.next_purchase.lock().unwrap() = Some(result);
    }

    /// Deliver a transaction on the live update stream.
    pub fn deliver(&self, tx: Transaction) {
        self.updates_tx.send(tx).expect("update stream closed");
    }

    pub fn add_entitlement(&self, tx: Transaction) {
        self.entitlements.lock().unwrap().push(tx);
    }

    pub fn remove_entitlement(&self, product_id: &str) {
        self.entitlements
            .lock()
            .unwrap()
            .retain(|t| t.product_id != product_id);
    }

    pub fn finish_count(&self, transaction_id: &str) -> usize {
        self.finished
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == transaction_id)
            .count()
    }
}

#[async_trait]
impl PlatformStore for MockPlatform {
    async fn products(&self, ids: &[String]) -> Result<Vec<Product>, PlatformError> {
        if self.catalog_unavailable.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("store offline".to_string()));
        }
        Ok(self
            .catalog
            .lock()
            .unwrap()
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn purchase(&self, _product: &Product) -> Result<PurchaseResult, PlatformError> {
        let result = self
            .next_purchase
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| PlatformError::Failed("no purchase scripted".to_string()))?;
        if let PurchaseResult::Success(tx) = &result {
            self.add_entitlement(tx.clone());
        }
        Ok(result)
    }

    fn transaction_updates(&self) -> BoxStream<'static, Transaction> {
        match self.updates_rx.lock().unwrap().take() {
            Some(rx) => {
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|tx| (tx, rx)) })
                    .boxed()
            }
            None => stream::empty().boxed(),
        }
    }

    async fn current_entitlements(&self) -> Result<Vec<Transaction>, PlatformError> {
        Ok(self.entitlements.lock().unwrap().clone())
    }

    async fn finish(&self, transaction: &Transaction) -> Result<(), PlatformError> {
        self.finished.lock().unwrap().push(transaction.id.clone());
        Ok(())
    }

    async fn sync(&self) -> Result<(), PlatformError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Config with short timeouts and immediately-due grant retries.
#[allow(dead_code)]
pub fn test_config() -> Config {
    Config {
        auth_timeout: Duration::from_millis(200),
        reconcile: ReconcileSettings {
            retry_base: Duration::ZERO,
            retry_max: Duration::ZERO,
            tick: Duration::from_millis(20),
        },
        ..Config::default()
    }
}

pub struct TestApp {
    pub ctx: AppContext,
    pub backend: Arc<MockBackend>,
    pub platform: Arc<MockPlatform>,
}

/// Build an app context over the mocks with the given providers registered.
#[allow(dead_code)]
pub fn test_app(providers: Vec<Arc<MockProvider>>) -> TestApp {
    test_app_with_config(test_config(), providers)
}

#[allow(dead_code)]
pub fn test_app_with_config(config: Config, providers: Vec<Arc<MockProvider>>) -> TestApp {
    let backend = Arc::new(MockBackend::default());
    let platform = Arc::new(MockPlatform::new());
    let tokens = TokenStore::new(Arc::new(MemorySecureStore::new()));

    let registry = registry_of(providers);

    let ctx = AppContext::new(config, tokens, registry, backend.clone(), platform.clone())
        .expect("context should build");

    TestApp {
        ctx,
        backend,
        platform,
    }
}

fn registry_of(providers: Vec<Arc<MockProvider>>) -> ProviderRegistry {
    providers
        .into_iter()
        .fold(ProviderRegistry::new(), |registry, p| registry.register(p))
}

#[allow(dead_code)]
impl TestApp {
    /// Tear the context down and start a new process over the same credential
    /// backing, backend and platform.
    pub fn relaunch(self, providers: Vec<Arc<MockProvider>>) -> TestApp {
        let TestApp {
            ctx,
            backend,
            platform,
        } = self;
        let config = ctx.config.clone();
        let tokens = TokenStore::new(ctx.tokens.backing());
        drop(ctx);

        let ctx = AppContext::new(
            config,
            tokens,
            registry_of(providers),
            backend.clone(),
            platform.clone(),
        )
        .expect("context should rebuild");

        TestApp {
            ctx,
            backend,
            platform,
        }
    }
}

/// An app with a signed-in session (credentials stored, state Active).
#[allow(dead_code)]
pub async fn signed_in_app() -> TestApp {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Google,
        Ok(login_outcome("abc123", Some("a@b.com"))),
    ));
    let app = test_app(vec![provider]);
    app.ctx
        .session
        .login(ProviderKind::Google)
        .await
        .expect("login should succeed");
    app
}

/// Poll `check` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
