use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by worker control operations and the dispatch layer.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A required piece of broker configuration is absent.
    #[error("missing broker configuration: make sure {0} is set")]
    MissingConfig(&'static str),

    /// The broker configuration is present but unusable.
    #[error("invalid broker configuration: {0}")]
    InvalidConfig(String),

    /// The transport to the broker could not be established.
    #[error("error connecting to broker at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The broker answered with an ERROR frame.
    #[error("broker rejected the request: {0}")]
    Broker(String),

    /// A control operation ran before a work item was installed.
    #[error("work item has not been set yet")]
    WorkitemNotSet,

    /// The work item carries no `fields` object.
    #[error("work item has no `fields` object")]
    MissingFields,

    /// The dispatcher could not resolve the named operation.
    #[error("plugin has no operation named `{0}`")]
    UnknownOperation(String),

    /// An array field holds something that cannot be read as a sequence
    /// of the requested element type.
    #[error("field {field} is not an array nor can be parsed as such: {value}")]
    UnsupportedFieldShape { field: String, value: Value },

    /// Something went wrong encoding or decoding JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A raw transport failure while talking to the broker.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}
