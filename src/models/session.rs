// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session state and identity types.

use crate::error::ErrorCategory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Identity provider variants the app knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Apple,
    Line,
    Twitter,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Apple => "apple",
            ProviderKind::Line => "line",
            ProviderKind::Twitter => "twitter",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(ProviderKind::Google),
            "apple" => Ok(ProviderKind::Apple),
            "line" => Ok(ProviderKind::Line),
            "twitter" => Ok(ProviderKind::Twitter),
            other => Err(format!("unknown identity provider: {other}")),
        }
    }
}

/// Why the last login attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub category: ErrorCategory,
    pub message: String,
}

/// Observable login state. Only `SessionManager` transitions it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    Syncing,
    Active {
        user_id: String,
        provider: ProviderKind,
    },
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }

    /// Authenticating or Syncing.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionState::Authenticating | SessionState::Syncing)
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            SessionState::Active { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// Decoded payload of a session credential.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityClaims {
    /// Stable identity-provider user identifier
    pub subject: String,
    /// Expiry (Unix seconds), when the credential carries one
    pub expires_at: Option<i64>,
    pub raw: Map<String, Value>,
}

impl IdentityClaims {
    /// Whether the credential expires within `skew_secs` of `now` (or already has).
    /// Credentials without an expiry claim never expire here.
    pub fn is_expired(&self, now: i64, skew_secs: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp - skew_secs <= now)
    }

    pub fn email(&self) -> Option<&str> {
        self.claim_str("email").filter(|e| !e.trim().is_empty())
    }

    /// Best-effort human name from the usual OIDC claims.
    pub fn display_name(&self) -> Option<&str> {
        ["name", "preferred_username", "given_name", "nickname"]
            .iter()
            .find_map(|key| self.claim_str(key))
            .filter(|n| !n.trim().is_empty())
    }

    pub fn claim_str(&self, key: &str) -> Option<&str> {
        self.raw.get(key).and_then(Value::as_str)
    }
}

/// Provider-neutral result of a successful login handshake.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub claims: IdentityClaims,
    /// Name reported by the provider outside the token (e.g. first Apple sign-in)
    pub display_name: Option<String>,
    /// Email reported by the provider outside the token
    pub email: Option<String>,
}

impl LoginOutcome {
    pub fn email_hint(&self) -> Option<String> {
        self.email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| self.claims.email().map(str::to_string))
    }

    pub fn display_name_hint(&self) -> Option<String> {
        self.display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.claims.display_name().map(str::to_string))
    }
}
