//! The dispatch entry point the host agent calls.
//!
//! Operation names resolve through an explicit registry populated when the
//! plugin type registers its operations; there is no reflection. Failures
//! inside an operation body never escape [`perform`]: they are formatted
//! into the work item's `__error__` slot and the document is returned as
//! usual.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::worker::Worker;
use crate::workitem::WorkItem;

/// A zero-argument plugin operation. It sees the plugin state and the
/// worker it may issue control calls through.
pub type Operation<P> = fn(&mut P, &mut Worker) -> anyhow::Result<()>;

/// Registry mapping operation names to callables.
pub struct OperationSet<P> {
    ops: HashMap<&'static str, Operation<P>>,
}

impl<P> OperationSet<P> {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    pub fn register(mut self, name: &'static str, op: Operation<P>) -> Self {
        self.ops.insert(name, op);
        self
    }

    pub fn get(&self, name: &str) -> Option<Operation<P>> {
        self.ops.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.keys().copied()
    }
}

impl<P> Default for OperationSet<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Implemented by every task plugin the agent can dispatch into.
pub trait Plugin: Sized {
    /// Plugin type name, used in progress and error messages.
    fn kind(&self) -> &str;

    /// The operations this plugin exposes to the agent.
    fn operations() -> OperationSet<Self>;
}

/// Runs the named operation against the supplied document and returns the
/// (possibly mutated) document. Never panics and never returns an error:
/// any failure is written to the output log and to `fields.__error__`, and
/// the host is expected to inspect that slot.
pub fn perform<P: Plugin>(
    plugin: &mut P,
    worker: &mut Worker,
    operation: &str,
    document: &Map<String, Value>,
) -> Map<String, Value> {
    let kind = plugin.kind().to_string();
    info!("dispatching {kind}.{operation}");

    worker.set_workitem(WorkItem::round_trip(document));

    announce(worker, &format!("Executing plugin: {kind}.{operation}\n"));

    let outcome = match P::operations().get(operation) {
        Some(op) => op(plugin, worker),
        None => Err(WorkerError::UnknownOperation(operation.to_string()).into()),
    };

    match outcome {
        Ok(()) => {
            announce(
                worker,
                &format!("Finished plugin execution: {kind}.{operation}\n"),
            );
        }
        Err(err) => {
            // {:#} renders the whole cause chain down to the root cause
            let message = format!("Plugin {kind}.{operation} failed: {err:#}");
            announce(worker, &message);
            if let Err(e) = worker.set_error(&message) {
                warn!("could not record plugin failure on the work item: {e}");
            }
        }
    }

    worker
        .take_workitem()
        .map(WorkItem::into_map)
        .unwrap_or_default()
}

/// Progress lines are best effort: a broker hiccup must not fail the run.
fn announce(worker: &mut Worker, line: &str) {
    if let Err(e) = worker.write_output(line) {
        warn!("could not publish progress line: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOpPlugin;

    impl Plugin for NoOpPlugin {
        fn kind(&self) -> &str {
            "NoOpPlugin"
        }

        fn operations() -> OperationSet<Self> {
            OperationSet::new().register("test", |_plugin, _worker| Ok(()))
        }
    }

    #[test]
    fn operation_sets_resolve_registered_names_only() {
        let ops = NoOpPlugin::operations();
        assert!(ops.get("test").is_some());
        assert!(ops.get("missing").is_none());
        assert_eq!(ops.names().collect::<Vec<_>>(), vec!["test"]);
    }

    #[test]
    fn perform_without_broker_config_still_returns_the_document() {
        // announcements fail (no config) but must be swallowed
        let mut plugin = NoOpPlugin;
        let mut worker = Worker::new();
        let document: Map<String, Value> =
            serde_json::from_value(serde_json::json!({ "fields": {} })).unwrap();

        let returned = perform(&mut plugin, &mut worker, "test", &document);
        assert_eq!(returned.get("fields"), Some(&serde_json::json!({})));
        assert!(!returned.contains_key("__error__"));
    }

    #[test]
    fn unknown_operation_is_reported_through_the_error_slot() {
        let mut plugin = NoOpPlugin;
        let mut worker = Worker::new();
        let document: Map<String, Value> =
            serde_json::from_value(serde_json::json!({ "fields": {} })).unwrap();

        let returned = perform(&mut plugin, &mut worker, "nope", &document);
        let error = returned["fields"]["__error__"].as_str().unwrap();
        assert!(error.starts_with("Plugin NoOpPlugin.nope failed:"));
        assert!(error.contains("no operation named `nope`"));
    }
}
