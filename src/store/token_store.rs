// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token custody: named credentials over a secure key-value backing.
//!
//! An absent credential is not an error; it is the "no session" signal.

use crate::error::Result;
use crate::models::{CredentialKind, ProviderKind};
use crate::services::claims::{decode_raw_claims, expiry_of, ClaimsError};
use crate::store::keys;
use crate::store::SecureStore;
use chrono::Utc;
use std::sync::Arc;

/// Default clock skew tolerated when checking credential expiry (seconds).
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

/// Credential store shared by the session manager and the backend client.
#[derive(Clone)]
pub struct TokenStore {
    backing: Arc<dyn SecureStore>,
    clock_skew_secs: i64,
}

impl TokenStore {
    pub fn new(backing: Arc<dyn SecureStore>) -> Self {
        Self {
            backing,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
        }
    }

    pub fn with_clock_skew(mut self, secs: i64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    pub fn set(&self, kind: CredentialKind, value: &str) -> Result<()> {
        self.backing.write(kind.storage_key(), value)?;
        tracing::debug!(credential = kind.storage_key(), "Credential stored");
        Ok(())
    }

    /// Read a credential. Backing failures are logged and read as absent.
    pub fn get(&self, kind: CredentialKind) -> Option<String> {
        match self.backing.read(kind.storage_key()) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, credential = kind.storage_key(), "Credential read failed");
                None
            }
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.get(CredentialKind::Access)
    }

    pub fn id_token(&self) -> Option<String> {
        self.get(CredentialKind::Id)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get(CredentialKind::Refresh)
    }

    pub fn set_provider(&self, provider: ProviderKind) -> Result<()> {
        self.backing.write(keys::LOGIN_PROVIDER, provider.as_str())
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.backing
            .read(keys::LOGIN_PROVIDER)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
    }

    /// Remove every credential and the session provider marker.
    ///
    /// Other entries in the backing (pending credit grants) are left alone.
    pub fn clear_all(&self) -> Result<()> {
        for kind in CredentialKind::ALL {
            self.backing.remove(kind.storage_key())?;
        }
        self.backing.remove(keys::LOGIN_PROVIDER)?;
        tracing::info!("All credentials cleared");
        Ok(())
    }

    /// Backing store shared with the finalization ledger.
    pub fn backing(&self) -> Arc<dyn SecureStore> {
        self.backing.clone()
    }

    /// Whether the stored access credential can still be presented.
    ///
    /// Opaque bearer strings are valid while present. Structured tokens must also
    /// carry an expiry in the future (less the configured skew); a structured
    /// token that does not decode counts as absent.
    pub fn is_access_token_valid(&self) -> bool {
        let Some(token) = self.access_token() else {
            return false;
        };

        match decode_raw_claims(&token) {
            Ok(raw) => match expiry_of(&raw) {
                Ok(Some(exp)) => exp - self.clock_skew_secs > Utc::now().timestamp(),
                Ok(None) => true,
                Err(_) => false,
            },
            Err(ClaimsError::NotStructured) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Stored access credential is malformed");
                false
            }
        }
    }

    /// Whether no credential and no session marker is stored.
    pub fn is_empty(&self) -> bool {
        CredentialKind::ALL.iter().all(|kind| self.get(*kind).is_none())
            && self.provider().is_none()
    }
}
