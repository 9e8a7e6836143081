//! The work item: the structured document exchanged between a task plugin
//! and the orchestration server. Plugin-visible data lives under the
//! top-level `fields` object; every other top-level key is a transient
//! marker the server interprets as a control event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::coerce::{self, Element};
use crate::error::WorkerError;

pub const FIELDS_KEY: &str = "fields";
pub const ERROR_FIELD: &str = "__error__";
pub const LINKS_FIELD: &str = "__links__";

pub const OUTPUT_META: &str = "__output__";
pub const STREAMING_META: &str = "__streaming__";
pub const CANCEL_META: &str = "__cancel__";
pub const NOT_NEEDED_META: &str = "__not_needed__";
pub const WAITING_META: &str = "__waiting__";

pub const PERSIST_META: &str = "__persist__";
pub const CREATE_META: &str = "__create__";
pub const UPDATE_META: &str = "__update__";
pub const DELETE_META: &str = "__delete__";
pub const MODEL_META: &str = "__model__";
pub const RECORD_ID_META: &str = "__record_id__";
pub const RECORD_FIELD_META: &str = "__record_field__";
pub const RECORD_VALUE_META: &str = "__record_value__";
pub const RECORD_FIELDS_META: &str = "__record_fields__";
pub const RECORD_VALUES_META: &str = "__record_values__";
pub const NAME_META: &str = "__name__";

/// A mutable work item document. One instance is owned by one `perform`
/// invocation; instances are never reused across invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem {
    doc: Map<String, Value>,
}

impl WorkItem {
    pub fn new(doc: Map<String, Value>) -> Self {
        Self { doc }
    }

    /// An empty work item that already carries a `fields` object.
    pub fn with_fields() -> Self {
        let mut doc = Map::new();
        doc.insert(FIELDS_KEY.to_string(), Value::Object(Map::new()));
        Self { doc }
    }

    /// Normalizes a host-supplied document by running it through its
    /// serialized form, so foreign value layouts cannot leak into the
    /// worker.
    pub fn round_trip(document: &Map<String, Value>) -> Self {
        match serde_json::to_string(document)
            .and_then(|json| serde_json::from_str::<Map<String, Value>>(&json))
        {
            Ok(doc) => Self { doc },
            Err(e) => {
                warn!("work item did not survive a serialization round trip: {e}");
                Self {
                    doc: document.clone(),
                }
            }
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.doc
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.doc
    }

    pub fn to_json(&self) -> Result<String, WorkerError> {
        Ok(serde_json::to_string(&self.doc)?)
    }

    /// The plugin-visible `fields` object. Its absence is a caller error.
    pub fn fields(&self) -> Result<&Map<String, Value>, WorkerError> {
        match self.doc.get(FIELDS_KEY) {
            Some(Value::Object(fields)) => Ok(fields),
            _ => Err(WorkerError::MissingFields),
        }
    }

    pub fn fields_mut(&mut self) -> Result<&mut Map<String, Value>, WorkerError> {
        match self.doc.get_mut(FIELDS_KEY) {
            Some(Value::Object(fields)) => Ok(fields),
            _ => Err(WorkerError::MissingFields),
        }
    }

    /// Reads a field as text. Scalars are rendered with their JSON
    /// representation; explicit nulls read as absent. A missing `fields`
    /// object is the same caller error it is on the write side.
    pub fn get_field(&self, name: &str) -> Result<Option<String>, WorkerError> {
        Ok(match self.fields()?.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), WorkerError> {
        self.fields_mut()?.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn set_error(&mut self, message: &str) -> Result<(), WorkerError> {
        self.set_field(ERROR_FIELD, message)
    }

    pub fn error(&self) -> Result<Option<String>, WorkerError> {
        self.get_field(ERROR_FIELD)
    }

    /// Adds a `{name, url}` link record for the server UI, creating the
    /// `__links__` array on first use.
    pub fn add_link(&mut self, name: &str, url: &str) -> Result<(), WorkerError> {
        let fields = self.fields_mut()?;
        let links = fields
            .entry(LINKS_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));
        match links {
            Value::Array(items) => {
                items.push(json!({ "name": name, "url": url }));
                Ok(())
            }
            other => Err(WorkerError::UnsupportedFieldShape {
                field: LINKS_FIELD.to_string(),
                value: other.clone(),
            }),
        }
    }

    /// Reads an array-valued field, normalizing whichever representation
    /// is stored (native array, JSON-encoded string, absent).
    pub fn array_field<T: Element>(&self, name: &str) -> Result<Option<Vec<T>>, WorkerError> {
        coerce::coerce_array(name, self.fields()?.get(name))
    }

    pub fn insert_marker(&mut self, key: &str, value: Value) {
        self.doc.insert(key.to_string(), value);
    }

    pub fn remove_marker(&mut self, key: &str) -> Option<Value> {
        self.doc.remove(key)
    }

    pub fn marker(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    /// True while the server has been told to keep this run parked.
    /// Inbound documents cross the wire as JSON text, so both boolean and
    /// string forms of the flag count.
    pub fn waiting(&self) -> bool {
        self.marker(WAITING_META).is_some_and(is_truthy)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
