//! Document model shared by all document store implementations

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::StoreError;

/// A stored document: a JSON object keyed by field name
pub type Document = Map<String, Value>;

/// Location of a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Full slash-separated path, e.g. `conversations/abc`
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl std::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document read from the store together with its id
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: Document,
}

impl Snapshot {
    pub fn new(id: impl Into<String>, data: Document) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Deserialize the document body into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

/// Serialize a typed record into a document body
pub fn to_document<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Kind of change delivered by a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A single change record from a collection listener
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub document: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// Field predicate applied by range queries
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals { field: String, value: Value },
    ArrayContains { field: String, value: Value },
}

impl Filter {
    pub fn matches(&self, data: &Document) -> bool {
        match self {
            Filter::Equals { field, value } => data.get(field) == Some(value),
            Filter::ArrayContains { field, value } => match data.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
        }
    }
}

/// Pagination cursor: the last document of the previous page
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub id: String,
    pub value: Value,
}

impl Cursor {
    /// Build a cursor from a snapshot and the field the query is ordered by
    pub fn from_snapshot(snapshot: &Snapshot, order_field: &str) -> Self {
        Self {
            id: snapshot.id.clone(),
            value: snapshot.field(order_field).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Ordered, limited, cursor-based range query over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, OrderDirection)>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

/// Deep-merge `patch` into `target`. Nested objects are merged key by key,
/// every other value replaces what was there.
pub fn merge_documents(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_documents(existing, nested);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Total order over field values used for sorting query results:
/// null < bool < number < string < everything else
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
