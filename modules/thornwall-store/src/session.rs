//! Per-user session state for interactive review surfaces.
//!
//! A session is a map from typed keys to JSON values kept in the shared KV
//! under `session:<user_id>` with a TTL refreshed on every touch. Each key
//! declares whether it persists: non-persistent entries live only in process
//! memory and are dropped on serialization.
//!
//! JSON cannot carry full 64-bit subject identifiers through consumers that
//! treat numbers as doubles, so values cross a precision codec: on write,
//! integers above 2^53 are tagged as strings anywhere in the tree; on read
//! the tree is walked and tags restored to exact integers before decoding
//! into the target type.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::kv::KvStore;

/// Integers above this cannot be represented exactly as a double.
const MAX_SAFE_INTEGER: u64 = 1 << 53;

const TAG_PREFIX: &str = "u64:";

/// A registered session key: a name, a declared value type, and whether the
/// entry survives serialization.
pub struct SessionKey<T> {
    pub name: &'static str,
    pub persist: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SessionKey<T> {
    /// A key whose value is written to the shared KV on touch.
    pub const fn persistent(name: &'static str) -> Self {
        Self {
            name,
            persist: true,
            _marker: PhantomData,
        }
    }

    /// A key whose value stays in process memory for the session's lifetime.
    pub const fn ephemeral(name: &'static str) -> Self {
        Self {
            name,
            persist: false,
            _marker: PhantomData,
        }
    }
}

fn session_storage_key(user_id: u64) -> String {
    format!("session:{user_id}")
}

struct SessionData {
    values: HashMap<String, serde_json::Value>,
    persist_flags: HashMap<String, bool>,
}

pub struct Session {
    kv: Arc<dyn KvStore>,
    user_id: u64,
    ttl: Duration,
    data: Mutex<SessionData>,
}

impl Session {
    /// Load an existing session or start a fresh one. Entries read back from
    /// the KV are persistent by definition.
    pub async fn load(kv: Arc<dyn KvStore>, user_id: u64, ttl: Duration) -> Result<Self> {
        let values: HashMap<String, serde_json::Value> =
            match kv.get(&session_storage_key(user_id)).await? {
                Some(raw) => serde_json::from_str(&raw)?,
                None => HashMap::new(),
            };
        let persist_flags = values.keys().map(|k| (k.clone(), true)).collect();

        Ok(Self {
            kv,
            user_id,
            ttl,
            data: Mutex::new(SessionData {
                values,
                persist_flags,
            }),
        })
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Record a value under a typed key.
    pub fn set<T: Serialize>(&self, key: &SessionKey<T>, value: &T) -> Result<()> {
        let mut encoded = serde_json::to_value(value)?;
        tag_large_integers(&mut encoded);

        let mut data = self.data.lock().expect("session lock poisoned");
        data.values.insert(key.name.to_string(), encoded);
        data.persist_flags
            .insert(key.name.to_string(), key.persist);
        debug!(key = key.name, "Session key set");
        Ok(())
    }

    /// Decode a value back into its declared type.
    ///
    /// The stored tree is re-serialized, re-parsed, and walked to restore
    /// tagged 64-bit integers before the final decode, so nested subject ids
    /// survive exactly regardless of what wrote the blob.
    pub fn get<T: DeserializeOwned>(&self, key: &SessionKey<T>) -> Result<Option<T>> {
        let value = {
            let data = self.data.lock().expect("session lock poisoned");
            match data.values.get(key.name) {
                Some(value) => value.clone(),
                None => return Ok(None),
            }
        };

        let rendered = serde_json::to_string(&value)?;
        let mut reparsed: serde_json::Value = serde_json::from_str(&rendered)?;
        restore_large_integers(&mut reparsed);

        Ok(Some(serde_json::from_value(reparsed)?))
    }

    pub fn delete<T>(&self, key: &SessionKey<T>) {
        let mut data = self.data.lock().expect("session lock poisoned");
        data.values.remove(key.name);
        data.persist_flags.remove(key.name);
        debug!(key = key.name, "Session key deleted");
    }

    /// Store binary data under a buffer key as base64.
    pub fn set_buffer(&self, key: &SessionKey<Vec<u8>>, bytes: &[u8]) {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let mut data = self.data.lock().expect("session lock poisoned");
        data.values.insert(
            key.name.to_string(),
            serde_json::Value::String(encoded),
        );
        data.persist_flags
            .insert(key.name.to_string(), key.persist);
    }

    pub fn get_buffer(&self, key: &SessionKey<Vec<u8>>) -> Option<Vec<u8>> {
        let data = self.data.lock().expect("session lock poisoned");
        let value = data.values.get(key.name)?;
        let encoded = value.as_str()?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok()
    }

    /// Serialize persistent entries to the shared KV and refresh the TTL.
    pub async fn touch(&self) -> Result<()> {
        let persistent: HashMap<String, serde_json::Value> = {
            let data = self.data.lock().expect("session lock poisoned");
            data.values
                .iter()
                .filter(|(key, _)| data.persist_flags.get(*key).copied().unwrap_or(true))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };

        self.kv
            .set(
                &session_storage_key(self.user_id),
                &serde_json::to_string(&persistent)?,
                Some(self.ttl),
            )
            .await
    }
}

/// Walk a JSON tree replacing u64 values above 2^53 with tagged strings.
fn tag_large_integers(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                if v >= MAX_SAFE_INTEGER {
                    *value = serde_json::Value::String(format!("{TAG_PREFIX}{v}"));
                }
            }
        }
        serde_json::Value::Object(map) => {
            for (_, child) in map.iter_mut() {
                tag_large_integers(child);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                tag_large_integers(item);
            }
        }
        _ => {}
    }
}

/// Walk a JSON tree restoring tagged strings back to exact integers.
fn restore_large_integers(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if let Some(digits) = s.strip_prefix(TAG_PREFIX) {
                if let Ok(v) = digits.parse::<u64>() {
                    *value = serde_json::Value::Number(serde_json::Number::from(v));
                }
            }
        }
        serde_json::Value::Object(map) => {
            for (_, child) in map.iter_mut() {
                restore_large_integers(child);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                restore_large_integers(item);
            }
        }
        _ => {}
    }
}
