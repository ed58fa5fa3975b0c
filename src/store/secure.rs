// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Secure key-value backings for credentials.
//!
//! The platform keychain is an external collaborator; the backings here are an
//! in-memory store and a sealed JSON file for desktop tooling.

use crate::error::{AppError, Result};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// Opaque secure key-value store.
pub trait SecureStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// Remove every entry.
    fn clear(&self) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    entries: DashMap<String, String>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemorySecureStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// On-disk layout: entries plus an HMAC-SHA256 tag over their canonical JSON.
#[derive(Serialize, Deserialize)]
struct SealedFile {
    entries: BTreeMap<String, String>,
    tag: String,
}

/// JSON file store whose contents are sealed with a device key.
///
/// A file that fails to parse or whose tag does not verify reads as empty, so
/// a tampered credential file means "no session" rather than a crash.
pub struct SealedFileStore {
    path: PathBuf,
    key: Vec<u8>,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl SealedFileStore {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(AppError::Configuration(
                "token seal key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            path: path.into(),
            key,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sign(&self, entries: &BTreeMap<String, String>) -> Result<String> {
        let canonical = serde_json::to_vec(entries)
            .map_err(|e| AppError::Storage(format!("encode entries: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
        mac.update(&canonical);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, file: &SealedFile) -> bool {
        let Ok(canonical) = serde_json::to_vec(&file.entries) else {
            return false;
        };
        let Ok(tag) = hex::decode(&file.tag) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(&canonical);
        mac.verify_slice(&tag).is_ok()
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(AppError::Storage(format!("read credential file: {e}"))),
        };

        let file: SealedFile = match serde_json::from_slice(&bytes) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Credential file is malformed, ignoring");
                return Ok(BTreeMap::new());
            }
        };

        if !self.verify(&file) {
            tracing::warn!(path = %self.path.display(), "Credential file seal mismatch, ignoring");
            return Ok(BTreeMap::new());
        }

        Ok(file.entries)
    }

    fn save(&self, entries: BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("create credential dir: {e}")))?;
        }

        let tag = self.sign(&entries)?;
        let bytes = serde_json::to_vec_pretty(&SealedFile { entries, tag })
            .map_err(|e| AppError::Storage(format!("encode credential file: {e}")))?;

        // Replaced via rename; readers never see a partial file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .map_err(|e| AppError::Storage(format!("write credential file: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::Storage(format!("replace credential file: {e}")))
    }

    fn modify(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::Storage("credential file lock poisoned".to_string()))?;
        let mut entries = self.load()?;
        f(&mut entries);
        self.save(entries)
    }
}

impl SecureStore for SealedFileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.modify(BTreeMap::clear)
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }
}
