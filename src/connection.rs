//! Broker configuration and the single-use connection layer.
//!
//! Every control operation opens a fresh connection, pushes one frame and
//! releases the transport. The factory is injected through the
//! [`Connector`] trait so tests can substitute an in-memory transport.

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::WorkerError;
use crate::stomp::{self, Frame};

pub const DEFAULT_STOMP_PORT: u16 = 61613;

/// How long to linger after a send before disconnecting, so a slow broker
/// still picks the frame up before the socket goes away.
pub const DEFAULT_SEND_GRACE_MS: u64 = 500;

/// Where and how to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StompConfig {
    pub host: String,
    pub port: u16,
    /// Destination queue. Optional at construction, required before any
    /// publish can succeed.
    pub queue: Option<String>,
    /// Post-send grace period in milliseconds. Zero disables the pause.
    pub send_grace_ms: u64,
    /// True for `stomp+ssl` brokers.
    pub ssl: bool,
}

impl StompConfig {
    pub fn new(host: impl Into<String>, port: u16, queue: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            queue: Some(queue.into()),
            send_grace_ms: DEFAULT_SEND_GRACE_MS,
            ssl: false,
        }
    }

    /// Builds a config from the string map the host agent hands over.
    /// `host` and `port` are required; `port` may arrive as a numeric
    /// string. `queue` and `send_grace_ms` are optional here.
    pub fn from_map(config: &HashMap<String, String>) -> Result<Self, WorkerError> {
        let host = config
            .get("host")
            .filter(|h| !h.is_empty())
            .ok_or(WorkerError::MissingConfig("host"))?;
        let port = config
            .get("port")
            .ok_or(WorkerError::MissingConfig("port"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| WorkerError::InvalidConfig(format!("port is not a number: {port}")))?;
        let send_grace_ms = match config.get("send_grace_ms") {
            Some(ms) => ms.parse().map_err(|_| {
                WorkerError::InvalidConfig(format!("send_grace_ms is not a number: {ms}"))
            })?,
            None => DEFAULT_SEND_GRACE_MS,
        };
        Ok(Self {
            host: host.clone(),
            port,
            queue: config.get("queue").cloned(),
            send_grace_ms,
            ssl: false,
        })
    }

    /// Parses a full broker URI, `stomp://host:port` or
    /// `stomp+ssl://host:port`, defaulting the port to 61613.
    pub fn from_uri(uri: &str) -> Result<Self, WorkerError> {
        let parsed = Url::parse(uri)
            .map_err(|e| WorkerError::InvalidConfig(format!("bad broker uri {uri}: {e}")))?;
        let ssl = match parsed.scheme() {
            "stomp" => false,
            "stomp+ssl" => true,
            other => {
                return Err(WorkerError::InvalidConfig(format!(
                    "unsupported broker scheme: {other}"
                )));
            }
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| WorkerError::InvalidConfig(format!("broker uri has no host: {uri}")))?;
        Ok(Self {
            host: host.to_string(),
            port: parsed.port().unwrap_or(DEFAULT_STOMP_PORT),
            queue: None,
            send_grace_ms: DEFAULT_SEND_GRACE_MS,
            ssl,
        })
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn send_grace(mut self, grace: Duration) -> Self {
        self.send_grace_ms = grace.as_millis() as u64;
        self
    }
}

/// A single-use transport connection: one publish, then release.
pub trait Connection: Send {
    /// Sends one frame to `destination`. Fire and forget beyond what the
    /// transport itself guarantees.
    fn publish(&mut self, destination: &str, body: &[u8]) -> Result<(), WorkerError>;

    /// Quiesces and releases the transport. Idempotent; failures stay
    /// inside this call so they can never mask an earlier result.
    fn close(&mut self);
}

/// Opens connections. Implementations must tolerate concurrent `connect`
/// calls; every call returns a fresh connection.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &StompConfig) -> Result<Box<dyn Connection>, WorkerError>;
}

/// The stock blocking TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, config: &StompConfig) -> Result<Box<dyn Connection>, WorkerError> {
        if config.ssl {
            return Err(WorkerError::InvalidConfig(
                "stomp+ssl brokers are not supported by the built-in connector".to_string(),
            ));
        }
        let addr = format!("{}:{}", config.host, config.port);
        let stream = TcpStream::connect(&addr)
            .map_err(|source| WorkerError::Connect { addr, source })?;
        let reader = BufReader::new(stream.try_clone()?);
        let mut connection = StompConnection {
            stream,
            reader,
            grace: Duration::from_millis(config.send_grace_ms),
            open: true,
        };
        connection.handshake(&config.host)?;
        Ok(Box::new(connection))
    }
}

struct StompConnection {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    grace: Duration,
    open: bool,
}

impl StompConnection {
    fn handshake(&mut self, host: &str) -> Result<(), WorkerError> {
        let connect = Frame::new(stomp::CONNECT)
            .header("accept-version", "1.2")
            .header("host", host);
        self.stream.write_all(&connect.encode())?;
        self.stream.flush()?;

        let reply = Frame::decode(&mut self.reader)?;
        match reply.command.as_str() {
            stomp::CONNECTED => {
                debug!("connected to broker at {host}");
                Ok(())
            }
            stomp::ERROR => Err(WorkerError::Broker(broker_message(&reply))),
            other => Err(WorkerError::Broker(format!(
                "unexpected {other} frame during handshake"
            ))),
        }
    }
}

impl Connection for StompConnection {
    fn publish(&mut self, destination: &str, body: &[u8]) -> Result<(), WorkerError> {
        let frame = Frame::new(stomp::SEND)
            .header(stomp::HDR_DESTINATION, destination)
            .header(stomp::HDR_CONTENT_TYPE, "application/json")
            .with_body(body.to_vec());
        self.stream.write_all(&frame.encode())?;
        self.stream.flush()?;
        // Grace period so a slow broker drains the frame before we hang up.
        if !self.grace.is_zero() {
            std::thread::sleep(self.grace);
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let bye = Frame::new(stomp::DISCONNECT);
        if let Err(e) = self
            .stream
            .write_all(&bye.encode())
            .and_then(|_| self.stream.flush())
        {
            warn!("error disconnecting from broker: {e}");
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            warn!("error releasing broker socket: {e}");
        }
    }
}

impl Drop for StompConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn broker_message(frame: &Frame) -> String {
    frame
        .header_value("message")
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_map_parses_numeric_string_port() {
        let config = StompConfig::from_map(&map(&[
            ("host", "localhost"),
            ("port", "61619"),
            ("queue", "/queue/test"),
        ]))
        .unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 61619);
        assert_eq!(config.queue.as_deref(), Some("/queue/test"));
        assert_eq!(config.send_grace_ms, DEFAULT_SEND_GRACE_MS);
    }

    #[test]
    fn from_map_requires_host_and_port() {
        let err = StompConfig::from_map(&map(&[("port", "61613")])).unwrap_err();
        assert!(matches!(err, WorkerError::MissingConfig("host")));
        let err = StompConfig::from_map(&map(&[("host", "localhost")])).unwrap_err();
        assert!(matches!(err, WorkerError::MissingConfig("port")));
        let err =
            StompConfig::from_map(&map(&[("host", "localhost"), ("port", "not-a-port")]))
                .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidConfig(_)));
    }

    #[test]
    fn from_uri_defaults_port_and_maps_schemes() {
        let config = StompConfig::from_uri("stomp://broker.example.com").unwrap();
        assert_eq!(config.port, DEFAULT_STOMP_PORT);
        assert!(!config.ssl);

        let config = StompConfig::from_uri("stomp+ssl://broker.example.com:61614").unwrap();
        assert_eq!(config.port, 61614);
        assert!(config.ssl);

        assert!(StompConfig::from_uri("amqp://broker.example.com").is_err());
    }

    #[test]
    fn tcp_connector_rejects_ssl() {
        let mut config = StompConfig::new("localhost", 61613, "/queue/test");
        config.ssl = true;
        assert!(matches!(
            TcpConnector.connect(&config),
            Err(WorkerError::InvalidConfig(_))
        ));
    }
}
