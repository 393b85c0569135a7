//! Versioned key-value store underlying all shared workflow state.
//!
//! The store is an append-only log of named, typed records. A plain lookup
//! returns the most recent record for a name; older records stay queryable
//! through attribute patterns but are never returned by `get`. Records are
//! superseded, never mutated, and removed only by clearing the whole store at
//! task teardown.
//!
//! One store instance belongs to one task: it is constructed at task start,
//! injected into every manager, and torn down with the task. The handle is
//! cheap to clone; all clones share the same underlying log behind a single
//! exclusive lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Semantic tag describing a record's payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Scalar text content.
    #[default]
    Text,
    /// Nested or ordered structured content.
    Structured,
    /// Raw binary content.
    Binary,
}

impl RecordKind {
    /// Infer the kind from a value's shape: scalars are text, nested or
    /// ordered payloads are structured. Binary is never inferred; callers
    /// tag binary payloads explicitly.
    pub fn infer(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => RecordKind::Structured,
            _ => RecordKind::Text,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Text => write!(f, "text"),
            RecordKind::Structured => write!(f, "structured"),
            RecordKind::Binary => write!(f, "binary"),
        }
    }
}

/// One entry in the store's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// The record's name (lookup key).
    pub name: String,
    /// The payload.
    pub value: serde_json::Value,
    /// Semantic tag for the payload.
    pub kind: RecordKind,
    /// String attributes; always contains the record's `name`.
    pub attributes: HashMap<String, String>,
    /// When the record was appended.
    pub created_at: DateTime<Utc>,
}

/// Argument to [`KeyValueStore::query`].
#[derive(Debug, Clone)]
pub enum RecordQuery {
    /// Return at most the single most recent record for this name.
    Name(String),
    /// Return all records whose attributes are a superset of `attributes`,
    /// or whose text content contains `content`, in store order.
    Pattern {
        /// Attribute pairs that must all be present on a matching record.
        attributes: HashMap<String, String>,
        /// Text that a matching record's content must contain.
        content: Option<String>,
    },
}

impl RecordQuery {
    /// Build a pattern query over a single attribute pair
    pub fn attribute(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(key.into(), value.into());
        RecordQuery::Pattern {
            attributes,
            content: None,
        }
    }

    /// Build a pattern query over several attribute pairs
    pub fn attributes<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        RecordQuery::Pattern {
            attributes: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            content: None,
        }
    }
}

impl From<&str> for RecordQuery {
    fn from(name: &str) -> Self {
        RecordQuery::Name(name.to_string())
    }
}

/// Cooperative cancellation flag shared between a task driver and its store.
///
/// Once cancelled, `set` becomes a no-op and `query` returns empty; no
/// partial record is ever written.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the token to cancelled. Irreversible.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Task-scoped versioned key-value store.
#[derive(Clone, Default)]
pub struct KeyValueStore {
    log: Arc<RwLock<Vec<Record>>>,
    cancellation: Option<CancellationToken>,
}

impl KeyValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store tied to a cancellation token
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            log: Arc::new(RwLock::new(Vec::new())),
            cancellation: Some(token),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(CancellationToken::is_cancelled)
            .unwrap_or(false)
    }

    /// Append a record for `name`, inferring its kind from the value shape.
    ///
    /// Never fails; if the task has been cancelled the call is a no-op and
    /// emits no record.
    pub async fn set(
        &self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> StoreResult<()> {
        self.set_with(name, value, None, HashMap::new()).await
    }

    /// Append a record with an explicit kind and/or extra attributes.
    ///
    /// The record's `name` is always present in its attributes, overriding
    /// any caller-provided `name` attribute.
    pub async fn set_with(
        &self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
        kind: Option<RecordKind>,
        mut attributes: HashMap<String, String>,
    ) -> StoreResult<()> {
        if self.is_cancelled() {
            warn!("Set operation cancelled; no record written");
            return Ok(());
        }

        let name = name.into();
        let value = value.into();
        let kind = kind.unwrap_or_else(|| RecordKind::infer(&value));
        attributes.insert("name".to_string(), name.clone());

        let record = Record {
            name: name.clone(),
            value,
            kind,
            attributes,
            created_at: Utc::now(),
        };

        let mut log = self.log.write().await;
        log.push(record);
        debug!(name = %name, kind = %kind, size = log.len(), "Appended record");
        Ok(())
    }

    /// Get the most recent value for `name`, if any.
    pub async fn get(&self, name: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(self
            .get_with_attributes(name)
            .await?
            .map(|record| record.value))
    }

    /// Get the most recent record for `name`, attributes included.
    pub async fn get_with_attributes(&self, name: &str) -> StoreResult<Option<Record>> {
        let log = self.log.read().await;
        Ok(log.iter().rev().find(|r| r.name == name).cloned())
    }

    /// Get the most recent value for `name` deserialized into `T`.
    ///
    /// A record that exists but does not deserialize is a corrupt-store
    /// condition, reported as an error rather than silently skipped.
    pub async fn get_json<T: DeserializeOwned>(&self, name: &str) -> StoreResult<Option<T>> {
        match self.get(name).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    expected: std::any::type_name::<T>().to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Serialize `value` and append it as a record for `name`.
    pub async fn set_json<T: Serialize>(
        &self,
        name: impl Into<String>,
        value: &T,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::Corrupt {
            expected: std::any::type_name::<T>().to_string(),
            message: e.to_string(),
        })?;
        self.set(name, value).await
    }

    /// Serialize `value` and append it with extra attributes.
    pub async fn set_json_with<T: Serialize>(
        &self,
        name: impl Into<String>,
        value: &T,
        attributes: HashMap<String, String>,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::Corrupt {
            expected: std::any::type_name::<T>().to_string(),
            message: e.to_string(),
        })?;
        self.set_with(name, value, None, attributes).await
    }

    /// Query the store.
    ///
    /// A name query returns at most the single most recent record for that
    /// name. A pattern query returns every record whose attributes are a
    /// superset of the pattern's, or whose text content contains the
    /// pattern's text, in store (insertion) order.
    ///
    /// Returns empty if the task has been cancelled.
    pub async fn query(&self, query: RecordQuery) -> StoreResult<Vec<Record>> {
        if self.is_cancelled() {
            warn!("Query operation cancelled; returning empty result");
            return Ok(Vec::new());
        }

        let log = self.log.read().await;
        let results = match &query {
            RecordQuery::Name(name) => log
                .iter()
                .rev()
                .find(|r| &r.name == name)
                .cloned()
                .into_iter()
                .collect::<Vec<_>>(),
            RecordQuery::Pattern {
                attributes,
                content,
            } => log
                .iter()
                .filter(|record| {
                    let attrs_match = !attributes.is_empty()
                        && attributes
                            .iter()
                            .all(|(k, v)| record.attributes.get(k) == Some(v));
                    let content_match = match content {
                        Some(text) => record
                            .value
                            .as_str()
                            .map(|s| s.contains(text.as_str()))
                            .unwrap_or(false),
                        None => false,
                    };
                    attrs_match || content_match
                })
                .cloned()
                .collect(),
        };
        debug!(matches = results.len(), "Store query");
        Ok(results)
    }

    /// Remove every record. Used only at task teardown.
    pub async fn clear(&self) -> StoreResult<()> {
        let mut log = self.log.write().await;
        let dropped = log.len();
        log.clear();
        debug!(dropped, "Cleared store");
        Ok(())
    }

    /// Number of records in the log, superseded ones included.
    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    /// Whether the log holds no records.
    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("cancellable", &self.cancellation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_then_get_returns_latest() {
        let store = KeyValueStore::new();
        store.set("greeting", json!("hello")).await.unwrap();
        store.set("greeting", json!("world")).await.unwrap();

        let value = store.get("greeting").await.unwrap();
        assert_eq!(value, Some(json!("world")));
        // Both records remain in the log
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_absent_name() {
        let store = KeyValueStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kind_inference() {
        let store = KeyValueStore::new();
        store.set("text", json!("plain")).await.unwrap();
        store.set("structured", json!({"a": 1})).await.unwrap();
        store.set("list", json!([1, 2, 3])).await.unwrap();

        let text = store.get_with_attributes("text").await.unwrap().unwrap();
        assert_eq!(text.kind, RecordKind::Text);

        let obj = store
            .get_with_attributes("structured")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(obj.kind, RecordKind::Structured);

        let list = store.get_with_attributes("list").await.unwrap().unwrap();
        assert_eq!(list.kind, RecordKind::Structured);
    }

    #[tokio::test]
    async fn test_explicit_kind_and_attributes() {
        let store = KeyValueStore::new();
        let mut attrs = HashMap::new();
        attrs.insert("source".to_string(), "loader".to_string());
        store
            .set_with("blob", json!("AAEC"), Some(RecordKind::Binary), attrs)
            .await
            .unwrap();

        let record = store.get_with_attributes("blob").await.unwrap().unwrap();
        assert_eq!(record.kind, RecordKind::Binary);
        assert_eq!(record.attributes.get("source").unwrap(), "loader");
        // name attribute is always present
        assert_eq!(record.attributes.get("name").unwrap(), "blob");
    }

    #[tokio::test]
    async fn test_query_by_name_returns_single_latest() {
        let store = KeyValueStore::new();
        store.set("key", json!(1)).await.unwrap();
        store.set("key", json!(2)).await.unwrap();

        let results = store.query(RecordQuery::from("key")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, json!(2));
    }

    #[tokio::test]
    async fn test_query_by_attribute_superset_in_store_order() {
        let store = KeyValueStore::new();
        let mut attrs = HashMap::new();
        attrs.insert("topic".to_string(), "birds".to_string());
        store
            .set_with("a", json!(1), None, attrs.clone())
            .await
            .unwrap();
        store.set("b", json!(2)).await.unwrap();
        store.set_with("c", json!(3), None, attrs).await.unwrap();

        let results = store
            .query(RecordQuery::attribute("topic", "birds"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "a");
        assert_eq!(results[1].name, "c");
    }

    #[tokio::test]
    async fn test_query_by_content_contains() {
        let store = KeyValueStore::new();
        store.set("note1", json!("migratory birds")).await.unwrap();
        store.set("note2", json!("fish only")).await.unwrap();

        let results = store
            .query(RecordQuery::Pattern {
                attributes: HashMap::new(),
                content: Some("birds".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "note1");
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let store = KeyValueStore::new();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!(2)).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_set_is_noop() {
        let token = CancellationToken::new();
        let store = KeyValueStore::with_cancellation(token.clone());
        store.set("before", json!(1)).await.unwrap();

        token.cancel();
        store.set("after", json!(2)).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("after").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_query_returns_empty() {
        let token = CancellationToken::new();
        let store = KeyValueStore::with_cancellation(token.clone());
        store.set("key", json!(1)).await.unwrap();

        token.cancel();
        let results = store.query(RecordQuery::from("key")).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_the_log() {
        let store = KeyValueStore::new();
        let clone = store.clone();
        store.set("shared", json!("yes")).await.unwrap();

        assert_eq!(clone.get("shared").await.unwrap(), Some(json!("yes")));
    }

    #[tokio::test]
    async fn test_get_json_typed() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Payload {
            n: u32,
        }

        let store = KeyValueStore::new();
        store.set_json("payload", &Payload { n: 7 }).await.unwrap();

        let back: Option<Payload> = store.get_json("payload").await.unwrap();
        assert_eq!(back, Some(Payload { n: 7 }));
    }

    #[tokio::test]
    async fn test_get_json_corrupt_record() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Strict {
            required: String,
        }

        let store = KeyValueStore::new();
        store.set("bad", json!({"other": 1})).await.unwrap();

        let result: StoreResult<Option<Strict>> = store.get_json("bad").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
