//! Documents, queries and write batches.
//!
//! A document is a JSON object addressed by a collection path
//! (`chats`, `chats/<id>/messages`) and an id.  Writes are expressed as
//! [`Fields`]: ordered `(dot.path, FieldValue)` pairs, so nested fields
//! such as `offer.status` can be updated without rewriting the parent.

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use hidden_shared::models::decode_document;
use hidden_shared::ModelError;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A stored document as returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Decode into a model type; the document id becomes the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> std::result::Result<T, ModelError> {
        decode_document(&self.id, &self.data)
    }

    /// Look up a possibly nested field by dot path.
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup(&self.data, path)
    }
}

/// Notification emitted after a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Collection path the written document lives in.
    pub path: String,
    pub doc_id: String,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A collection-scoped query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub path: String,
    pub order_by: Option<String>,
    pub direction: Direction,
    pub limit: Option<usize>,
}

impl Query {
    /// Every document of `path`, in insertion order.
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            order_by: None,
            direction: Direction::Ascending,
            limit: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(field.into());
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sort and truncate `docs` (given in insertion order) the way this
    /// query orders them.  Documents with equal keys keep insertion order.
    pub fn arrange(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if let Some(field) = &self.order_by {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.field(field), b.field(field));
                match self.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

/// Total order over optional JSON values: missing/null, booleans, numbers,
/// strings, then everything else.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x
                    .as_f64()
                    .unwrap_or(0.0)
                    .total_cmp(&y.as_f64().unwrap_or(0.0)),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

// ---------------------------------------------------------------------------
// Field writes
// ---------------------------------------------------------------------------

/// Value written to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Plain JSON value.
    Value(Value),
    /// Replaced by the store clock (microseconds) when the batch commits.
    ServerTimestamp,
    /// Add each value to the array unless already present.
    ArrayUnion(Vec<Value>),
}

/// Ordered set of field writes applied to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, FieldValue)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((path.into(), FieldValue::Value(value.into())));
        self
    }

    pub fn server_timestamp(mut self, path: impl Into<String>) -> Self {
        self.0.push((path.into(), FieldValue::ServerTimestamp));
        self
    }

    pub fn array_union(mut self, path: impl Into<String>, values: Vec<Value>) -> Self {
        self.0.push((path.into(), FieldValue::ArrayUnion(values)));
        self
    }

    /// One top-level write per field of a serialized struct.
    pub fn from_serializable<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        let mut fields = Self::new();
        match serde_json::to_value(value)? {
            Value::Object(map) => {
                for (key, value) in map {
                    fields = fields.set(key, value);
                }
            }
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "expected a struct, found {other}"
                )))
            }
        }
        Ok(fields)
    }

    /// Apply every write to `target`, creating intermediate objects as
    /// needed.  `now_micros` resolves [`FieldValue::ServerTimestamp`].
    pub fn apply(&self, target: &mut Value, now_micros: i64) {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        for (path, value) in &self.0 {
            let slot = slot_mut(target, path);
            match value {
                FieldValue::Value(v) => *slot = v.clone(),
                FieldValue::ServerTimestamp => *slot = Value::from(now_micros),
                FieldValue::ArrayUnion(values) => {
                    if !slot.is_array() {
                        *slot = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = slot {
                        for v in values {
                            if !items.contains(v) {
                                items.push(v.clone());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Mutable slot at `path`, creating (or overwriting non-object) parents.
fn slot_mut<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
    let mut current = root;
    for key in path.split('.') {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(key.to_string()).or_insert(Value::Null),
            _ => unreachable!("parent was just made an object"),
        };
    }
    current
}

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// A single document write.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create a document; fails if the id is taken.
    Insert { path: String, id: String, fields: Fields },
    /// Create or fully replace a document.
    Set { path: String, id: String, fields: Fields },
    /// Modify fields of an existing document; fails if it is missing.
    Update { path: String, id: String, fields: Fields },
    /// Like `Update`, but only while `field` still holds `expected`;
    /// checked atomically with the rest of the batch.
    UpdateIf {
        path: String,
        id: String,
        field: String,
        expected: Value,
        fields: Fields,
    },
}

impl Write {
    pub fn path(&self) -> &str {
        match self {
            Write::Insert { path, .. }
            | Write::Set { path, .. }
            | Write::Update { path, .. }
            | Write::UpdateIf { path, .. } => path,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Write::Insert { id, .. }
            | Write::Set { id, .. }
            | Write::Update { id, .. }
            | Write::UpdateIf { id, .. } => id,
        }
    }

    pub fn change(&self) -> Change {
        Change {
            path: self.path().to_string(),
            doc_id: self.id().to_string(),
        }
    }
}

/// Writes committed atomically: all of them land or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert under a freshly generated id and return that id.
    pub fn insert(&mut self, path: impl Into<String>, fields: Fields) -> String {
        let id = Uuid::new_v4().to_string();
        self.insert_with_id(path, id.clone(), fields);
        id
    }

    pub fn insert_with_id(
        &mut self,
        path: impl Into<String>,
        id: impl Into<String>,
        fields: Fields,
    ) -> &mut Self {
        self.writes.push(Write::Insert {
            path: path.into(),
            id: id.into(),
            fields,
        });
        self
    }

    pub fn set(&mut self, path: impl Into<String>, id: impl Into<String>, fields: Fields) -> &mut Self {
        self.writes.push(Write::Set {
            path: path.into(),
            id: id.into(),
            fields,
        });
        self
    }

    pub fn update(
        &mut self,
        path: impl Into<String>,
        id: impl Into<String>,
        fields: Fields,
    ) -> &mut Self {
        self.writes.push(Write::Update {
            path: path.into(),
            id: id.into(),
            fields,
        });
        self
    }

    /// Queue an update of `path/id` that only applies while `field`
    /// equals `expected`.  Otherwise the whole batch fails with
    /// [`StoreError::PreconditionFailed`](crate::StoreError::PreconditionFailed).
    pub fn update_if(
        &mut self,
        path: impl Into<String>,
        id: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<Value>,
        fields: Fields,
    ) -> &mut Self {
        self.writes.push(Write::UpdateIf {
            path: path.into(),
            id: id.into(),
            field: field.into(),
            expected: expected.into(),
            fields,
        });
        self
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_nested_paths() {
        let mut doc = json!({ "offer": { "amount": 5, "status": "pending" } });
        Fields::new()
            .set("offer.status", "accepted")
            .server_timestamp("createdAt")
            .apply(&mut doc, 42);
        assert_eq!(doc["offer"]["status"], "accepted");
        assert_eq!(doc["offer"]["amount"], 5);
        assert_eq!(doc["createdAt"], 42);
    }

    #[test]
    fn array_union_is_idempotent() {
        let mut doc = json!({});
        let fields = Fields::new().array_union("deletedFor", vec![json!("a")]);
        fields.apply(&mut doc, 0);
        fields.apply(&mut doc, 0);
        assert_eq!(doc["deletedFor"], json!(["a"]));

        Fields::new()
            .array_union("deletedFor", vec![json!("b"), json!("a")])
            .apply(&mut doc, 0);
        assert_eq!(doc["deletedFor"], json!(["a", "b"]));
    }

    #[test]
    fn arrange_orders_missing_first_and_keeps_ties_stable() {
        let docs = vec![
            Document::new("x", json!({ "t": 2 })),
            Document::new("y", json!({})),
            Document::new("z", json!({ "t": 2 })),
            Document::new("w", json!({ "t": 1 })),
        ];
        let asc = Query::collection("c").order_by("t", Direction::Ascending);
        let ids: Vec<_> = asc.arrange(docs.clone()).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["y", "w", "x", "z"]);

        let desc = Query::collection("c").order_by("t", Direction::Descending).limit(2);
        let ids: Vec<_> = desc.arrange(docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["x", "z"]);
    }

    #[test]
    fn from_serializable_rejects_scalars() {
        assert!(Fields::from_serializable(&3).is_err());
        let fields = Fields::from_serializable(&json!({ "a": 1, "b": "x" })).unwrap();
        let mut doc = json!({ "c": true });
        fields.apply(&mut doc, 0);
        assert_eq!(doc, json!({ "a": 1, "b": "x", "c": true }));
    }
}
