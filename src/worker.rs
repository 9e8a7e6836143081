//! The worker: control operations a task plugin calls to report back to
//! the orchestration server.
//!
//! Every control operation follows the same template: stamp marker fields
//! onto the work item, open a fresh connection, publish the whole
//! serialized document, release the connection, then strip the stamped
//! markers again. Cleanup runs on every path so a failed publish never
//! leaks markers into the returned document.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::coerce::Element;
use crate::connection::{Connector, StompConfig, TcpConnector};
use crate::error::WorkerError;
use crate::workitem::{self, WorkItem};

/// Client-side shim owned by one plugin-operation invocation. Holds the
/// work item being mutated, the broker configuration and the connection
/// factory.
pub struct Worker {
    workitem: Option<WorkItem>,
    config: Option<StompConfig>,
    connector: Arc<dyn Connector>,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    /// Builds a worker around a substitute connection factory. This is the
    /// seam tests use to publish into an in-memory transport.
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            workitem: None,
            config: None,
            connector,
        }
    }

    pub fn set_stomp_config(&mut self, config: StompConfig) {
        self.config = Some(config);
    }

    pub fn stomp_config(&self) -> Option<&StompConfig> {
        self.config.as_ref()
    }

    pub fn set_workitem(&mut self, workitem: WorkItem) {
        self.workitem = Some(workitem);
    }

    pub fn workitem(&self) -> Option<&WorkItem> {
        self.workitem.as_ref()
    }

    pub fn workitem_mut(&mut self) -> Option<&mut WorkItem> {
        self.workitem.as_mut()
    }

    pub fn take_workitem(&mut self) -> Option<WorkItem> {
        self.workitem.take()
    }

    fn require_workitem(&self) -> Result<&WorkItem, WorkerError> {
        self.workitem.as_ref().ok_or(WorkerError::WorkitemNotSet)
    }

    fn require_workitem_mut(&mut self) -> Result<&mut WorkItem, WorkerError> {
        self.workitem.as_mut().ok_or(WorkerError::WorkitemNotSet)
    }

    pub fn fields(&self) -> Result<&Map<String, Value>, WorkerError> {
        self.require_workitem()?.fields()
    }

    pub fn fields_mut(&mut self) -> Result<&mut Map<String, Value>, WorkerError> {
        self.require_workitem_mut()?.fields_mut()
    }

    pub fn get_field(&self, name: &str) -> Result<Option<String>, WorkerError> {
        self.require_workitem()?.get_field(name)
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), WorkerError> {
        self.require_workitem_mut()?.set_field(name, value)
    }

    pub fn set_error(&mut self, message: &str) -> Result<(), WorkerError> {
        self.require_workitem_mut()?.set_error(message)
    }

    pub fn error(&self) -> Result<Option<String>, WorkerError> {
        self.require_workitem()?.error()
    }

    pub fn add_link(&mut self, name: &str, url: &str) -> Result<(), WorkerError> {
        self.require_workitem_mut()?.add_link(name, url)
    }

    pub fn array_field<T: Element>(&self, name: &str) -> Result<Option<Vec<T>>, WorkerError> {
        self.require_workitem()?.array_field(name)
    }

    /// Sends one output line to the server for persistence. The companion
    /// streaming flag makes the server append rather than replace.
    pub fn write_output(&mut self, output: &str) -> Result<(), WorkerError> {
        self.send_fields(vec![
            (workitem::OUTPUT_META, Value::from(output)),
            (workitem::STREAMING_META, Value::Bool(true)),
        ])
    }

    /// Asks the server to abort the running composition.
    pub fn cancel(&mut self) -> Result<(), WorkerError> {
        self.send_fields(vec![(workitem::CANCEL_META, Value::Bool(true))])
    }

    /// Tells the server this step can be skipped without failing the run.
    pub fn not_needed(&mut self) -> Result<(), WorkerError> {
        self.send_fields(vec![(workitem::NOT_NEEDED_META, Value::Bool(true))])
    }

    /// Parks the run (`true`) or lets it continue (`false`). Unlike every
    /// other marker, a truthy waiting flag survives cleanup; it only goes
    /// away when explicitly set back to `false`.
    pub fn set_waiting(&mut self, waiting: bool) -> Result<(), WorkerError> {
        self.send_fields(vec![(workitem::WAITING_META, Value::Bool(waiting))])
    }

    /// Requests an update of one field on an existing server-side record.
    pub fn update_record(
        &mut self,
        model: &str,
        name_or_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), WorkerError> {
        self.send_fields(vec![
            (workitem::PERSIST_META, Value::Bool(true)),
            (workitem::UPDATE_META, Value::Bool(true)),
            (workitem::MODEL_META, Value::from(model)),
            (workitem::RECORD_ID_META, Value::from(name_or_id)),
            (workitem::RECORD_FIELD_META, Value::from(field)),
            (workitem::RECORD_VALUE_META, Value::from(value)),
        ])
    }

    /// Requests creation of a server-side record. Field names and values
    /// are comma-joined on the wire; a name or value containing a comma
    /// corrupts the record. Known format limitation, no escaping exists.
    pub fn create_record(
        &mut self,
        model: &str,
        record_fields: &[&str],
        record_values: &[&str],
    ) -> Result<(), WorkerError> {
        self.send_fields(vec![
            (workitem::PERSIST_META, Value::Bool(true)),
            (workitem::CREATE_META, Value::Bool(true)),
            (workitem::MODEL_META, Value::from(model)),
            (workitem::RECORD_FIELDS_META, Value::from(record_fields.join(","))),
            (workitem::RECORD_VALUES_META, Value::from(record_values.join(","))),
        ])
    }

    /// Requests deletion of a server-side record.
    pub fn delete_record(&mut self, model: &str, name_or_id: &str) -> Result<(), WorkerError> {
        self.send_fields(vec![
            (workitem::PERSIST_META, Value::Bool(true)),
            (workitem::DELETE_META, Value::Bool(true)),
            (workitem::MODEL_META, Value::from(model)),
            (workitem::NAME_META, Value::from(name_or_id)),
        ])
    }

    /// The shared stamp → publish → cleanup template. The stamped markers
    /// are stripped whatever the publish outcome, so the work item is left
    /// consistent on every path; only a truthy waiting flag stays behind.
    fn send_fields(&mut self, markers: Vec<(&'static str, Value)>) -> Result<(), WorkerError> {
        let mut workitem = self.workitem.take().ok_or(WorkerError::WorkitemNotSet)?;
        let outcome = self.stamp_and_publish(&mut workitem, &markers);
        for (key, _) in &markers {
            if *key == workitem::WAITING_META && workitem.waiting() {
                continue;
            }
            workitem.remove_marker(key);
        }
        self.workitem = Some(workitem);
        outcome
    }

    fn stamp_and_publish(
        &self,
        workitem: &mut WorkItem,
        markers: &[(&'static str, Value)],
    ) -> Result<(), WorkerError> {
        workitem.fields()?;
        for (key, value) in markers {
            workitem.insert_marker(key, value.clone());
        }

        // Configuration problems abort before any network activity.
        let config = self
            .config
            .as_ref()
            .ok_or(WorkerError::MissingConfig("host and port"))?;
        let queue = config
            .queue
            .as_deref()
            .ok_or(WorkerError::MissingConfig("queue"))?;

        let payload = serde_json::to_vec(workitem)?;
        let mut connection = self.connector.connect(config)?;
        let sent = connection.publish(queue, &payload);
        // Close failures stay inside close(); they must not mask `sent`.
        connection.close();
        sent
    }
}
