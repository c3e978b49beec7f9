//! Item-oriented key-value store boundary.
//!
//! The recommender never talks to a concrete database. It sees [`KeyValueStore`], whose errors
//! are already classified into [`StoreErrorKind`] at the boundary so retry and circuit logic can
//! decide what to do without inspecting messages.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{Classify, ErrorClass};

/// A stored record: attribute name to JSON value.
pub type Item = Map<String, Value>;

/// Well-known table names and their key attributes.
pub mod tables {
    pub const MENU_ITEMS: &str = "menu_items";
    pub const MENU_ITEMS_KEY: &str = "item_id";
    pub const HEALTH_RULES: &str = "health_rules";
    pub const HEALTH_RULES_KEY: &str = "rule_id";
}

/// Build a single-attribute key.
pub fn key(attribute: &str, value: impl Into<Value>) -> Item {
    let mut key = Item::new();
    key.insert(attribute.to_string(), value.into());
    key
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// The store is shedding load.
    Throttling,
    /// The store did not answer in time.
    Timeout,
    /// Any other store-side failure.
    Other,
    /// The request or the stored data is unusable; repeating the call cannot help.
    Malformed,
}

impl StoreErrorKind {
    /// Map a provider error code onto a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "ProvisionedThroughputExceededException" | "ThrottlingException" => Self::Throttling,
            "RequestTimeout" | "RequestTimeoutException" => Self::Timeout,
            "ValidationException" | "SerializationException" => Self::Malformed,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Throttling => "throttling",
            Self::Timeout => "timeout",
            Self::Other => "store error",
            Self::Malformed => "malformed request",
        };
        f.write_str(name)
    }
}

/// Classified failure from the store boundary, tagged with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} during {operation} on {table}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub operation: String,
    pub table: String,
    pub message: String,
    /// Provider error code, when the failure came from one.
    pub code: Option<String>,
}

impl StoreError {
    pub fn new(
        kind: StoreErrorKind,
        operation: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation: operation.into(),
            table: table.into(),
            message: message.into(),
            code: None,
        }
    }

    /// Classify a provider error code and keep it for diagnostics.
    pub fn from_code(
        code: &str,
        operation: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::new(StoreErrorKind::from_code(code), operation, table, message);
        err.code = Some(code.to_string());
        err
    }

    pub fn malformed(
        operation: impl Into<String>,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(StoreErrorKind::Malformed, operation, table, message)
    }
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self.kind {
            StoreErrorKind::Throttling | StoreErrorKind::Timeout | StoreErrorKind::Other => {
                ErrorClass::Retryable
            }
            StoreErrorKind::Malformed => ErrorClass::Fatal,
        }
    }
}

/// Conjunction of attribute-equality conditions evaluated against each scanned item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFilter {
    conditions: Vec<(String, Value)>,
}

impl ScanFilter {
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_eq(attribute, value)
    }

    pub fn and_eq(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((attribute.into(), value.into()));
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.conditions.iter().all(|(attr, expected)| item.get(attr) == Some(expected))
    }
}

/// Asynchronous item store. Every method may fail with a classified [`StoreError`].
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    async fn get(&self, table: &str, key: &Item) -> Result<Option<Item>, StoreError>;

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError>;

    /// Merge `updates` into the item at `key`, creating it if absent. Returns the new item.
    async fn update(&self, table: &str, key: &Item, updates: Item) -> Result<Item, StoreError>;

    /// Returns whether an item was removed.
    async fn delete(&self, table: &str, key: &Item) -> Result<bool, StoreError>;

    async fn scan(&self, table: &str, filter: Option<&ScanFilter>) -> Result<Vec<Item>, StoreError>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, table: &str, key: &Item) -> Result<Option<Item>, StoreError> {
        (**self).get(table, key).await
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        (**self).put(table, item).await
    }

    async fn update(&self, table: &str, key: &Item, updates: Item) -> Result<Item, StoreError> {
        (**self).update(table, key, updates).await
    }

    async fn delete(&self, table: &str, key: &Item) -> Result<bool, StoreError> {
        (**self).delete(table, key).await
    }

    async fn scan(
        &self,
        table: &str,
        filter: Option<&ScanFilter>,
    ) -> Result<Vec<Item>, StoreError> {
        (**self).scan(table, filter).await
    }
}

#[derive(Debug, Default)]
struct Table {
    key_attribute: String,
    rows: BTreeMap<String, Item>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    outage: Option<StoreErrorKind>,
    latency: Option<Duration>,
}

/// In-process store holding the standard tables.
///
/// Clones share data. An outage or artificial latency can be switched on to exercise the
/// degradation paths.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    faults: Arc<Mutex<Faults>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Store with the `menu_items` and `health_rules` tables registered.
    pub fn new() -> Self {
        let store = Self::empty();
        store.register_table(tables::MENU_ITEMS, tables::MENU_ITEMS_KEY);
        store.register_table(tables::HEALTH_RULES, tables::HEALTH_RULES_KEY);
        store
    }

    pub fn empty() -> Self {
        Self { tables: Arc::default(), faults: Arc::default() }
    }

    pub fn register_table(&self, name: &str, key_attribute: &str) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(name.to_string()).or_insert_with(|| Table {
            key_attribute: key_attribute.to_string(),
            rows: BTreeMap::new(),
        });
    }

    /// Fail every call with `kind` until cleared with `None`.
    pub fn set_outage(&self, kind: Option<StoreErrorKind>) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).outage = kind;
    }

    /// Delay every call by `latency` before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).latency = latency;
    }

    /// Number of rows currently in `table`.
    pub fn len(&self, table: &str) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    async fn enter(&self, operation: &str, table: &str) -> Result<(), StoreError> {
        let faults = *self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = faults.latency {
            tokio::time::sleep(latency).await;
        }
        match faults.outage {
            Some(kind) => Err(StoreError::new(kind, operation, table, "injected outage")),
            None => Ok(()),
        }
    }

    fn with_table<T>(
        &self,
        operation: &str,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        match tables.get_mut(table) {
            Some(t) => f(t),
            None => Err(StoreError::from_code(
                "ResourceNotFoundException",
                operation,
                table,
                "requested table does not exist",
            )),
        }
    }
}

fn key_value(
    operation: &str,
    table: &str,
    attribute: &str,
    item: &Item,
) -> Result<String, StoreError> {
    match item.get(attribute) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(StoreError::malformed(
            operation,
            table,
            format!("key attribute {attribute} has unsupported type: {other}"),
        )),
        None => Err(StoreError::malformed(
            operation,
            table,
            format!("missing key attribute {attribute}"),
        )),
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, table: &str, key: &Item) -> Result<Option<Item>, StoreError> {
        self.enter("get_item", table).await?;
        self.with_table("get_item", table, |t| {
            let id = key_value("get_item", table, &t.key_attribute, key)?;
            Ok(t.rows.get(&id).cloned())
        })
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        self.enter("put_item", table).await?;
        self.with_table("put_item", table, |t| {
            let id = key_value("put_item", table, &t.key_attribute, &item)?;
            t.rows.insert(id, item);
            Ok(())
        })
    }

    async fn update(&self, table: &str, key: &Item, updates: Item) -> Result<Item, StoreError> {
        self.enter("update_item", table).await?;
        self.with_table("update_item", table, |t| {
            let id = key_value("update_item", table, &t.key_attribute, key)?;
            let row = t.rows.entry(id).or_insert_with(|| key.clone());
            for (attr, value) in updates {
                if attr != t.key_attribute {
                    row.insert(attr, value);
                }
            }
            Ok(row.clone())
        })
    }

    async fn delete(&self, table: &str, key: &Item) -> Result<bool, StoreError> {
        self.enter("delete_item", table).await?;
        self.with_table("delete_item", table, |t| {
            let id = key_value("delete_item", table, &t.key_attribute, key)?;
            Ok(t.rows.remove(&id).is_some())
        })
    }

    async fn scan(
        &self,
        table: &str,
        filter: Option<&ScanFilter>,
    ) -> Result<Vec<Item>, StoreError> {
        self.enter("scan", table).await?;
        self.with_table("scan", table, |t| {
            Ok(t
                .rows
                .values()
                .filter(|item| filter.map_or(true, |f| f.matches(item)))
                .cloned()
                .collect())
        })
    }
}
