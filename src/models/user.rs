//! User records exchanged with the story backend.

use serde::{Deserialize, Serialize};

/// User record as stored by the backend (keyed by identity-provider subject id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub user_name: String,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Body of `POST /users/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUser {
    pub id: String,
    pub user_name: String,
    pub email: String,
}

/// Body of `PUT /users/{id}`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Outcome of the fetch-or-create identity sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub user: UserRecord,
    /// True when the backend record was created by this sync (first-run setup).
    pub is_new: bool,
}
