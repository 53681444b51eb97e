//! Sources of runtime context used to enrich telemetry entries.
//!
//! Every accessor reports absence explicitly (`Option`) or fails with a
//! typed error; the logger turns both into a missing field.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use thiserror::Error;

/// Key of the persisted authentication blob.
pub const AUTH_STORAGE_KEY: &str = "auth-storage";

/// Key of the current session identifier.
pub const SESSION_ID_KEY: &str = "session-id";

/// Errors raised by key/value stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to persisted client state.
pub trait KeyValueStore: Send + Sync {
    /// Returns `Ok(None)` when the key is not set.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Access to the environment an entry is logged from.
pub trait RuntimeContext: Send + Sync {
    fn user_agent(&self) -> Option<String>;
    fn current_url(&self) -> Option<String>;
    /// Resident memory in bytes.
    fn memory_usage(&self) -> Option<u64>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self
            .values
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }
}

/// Context of the current process, sampled with `sysinfo`.
pub struct ProcessContext {
    url: Option<String>,
    system: Mutex<sysinfo::System>,
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext").field("url", &self.url).finish()
    }
}

impl ProcessContext {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl RuntimeContext for ProcessContext {
    fn user_agent(&self) -> Option<String> {
        Some(format!(
            "{}/{} ({}; {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    }

    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    fn memory_usage(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock().ok()?;
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

/// Extracts the user id from a persisted authentication blob.
///
/// Accepts `{"state": {"user": {"id": ..}}}` and `{"user": {"id": ..}}`, with
/// string or numeric ids. Malformed content yields `None`.
pub fn user_id_from_auth_blob(blob: &str) -> Option<String> {
    let value: Value = serde_json::from_str(blob).ok()?;
    let user = value
        .pointer("/state/user")
        .or_else(|| value.get("user"))?;

    match user.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
