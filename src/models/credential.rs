//! Credential kinds held by the token store.

use serde::{Deserialize, Serialize};

/// The kinds of credential a session can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Access,
    Id,
    Refresh,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 3] = [
        CredentialKind::Access,
        CredentialKind::Id,
        CredentialKind::Refresh,
    ];

    /// Stable key under which this credential is persisted.
    pub fn storage_key(self) -> &'static str {
        match self {
            CredentialKind::Access => "access_token",
            CredentialKind::Id => "id_token",
            CredentialKind::Refresh => "refresh_token",
        }
    }
}
