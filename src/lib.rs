pub mod coerce;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod stomp;
pub mod worker;
pub mod workitem;

pub use connection::{Connection, Connector, StompConfig, TcpConnector};
pub use dispatch::{Operation, OperationSet, Plugin, perform};
pub use error::WorkerError;
pub use worker::Worker;
pub use workitem::WorkItem;
