//! Minimal STOMP 1.2 wire types.
//!
//! Only what the shim needs to push one work item per connection: frame
//! encode/decode with header escaping, plus the handful of commands used
//! by the connect/send/disconnect cycle. No subscription bookkeeping, no
//! transactions.

use std::io::{self, BufRead};

pub const CONNECT: &str = "CONNECT";
pub const CONNECTED: &str = "CONNECTED";
pub const SEND: &str = "SEND";
pub const DISCONNECT: &str = "DISCONNECT";
pub const ERROR: &str = "ERROR";
pub const MESSAGE: &str = "MESSAGE";

pub const HDR_DESTINATION: &str = "destination";
pub const HDR_CONTENT_LENGTH: &str = "content-length";
pub const HDR_CONTENT_TYPE: &str = "content-type";

/// One STOMP frame: command line, headers, body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the frame, appending a `content-length` header so the
    /// receiver does not have to scan the body for the NUL terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 64);
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');
        for (key, value) in &self.headers {
            out.extend_from_slice(escape_header(key).as_bytes());
            out.push(b':');
            out.extend_from_slice(escape_header(value).as_bytes());
            out.push(b'\n');
        }
        if self.header_value(HDR_CONTENT_LENGTH).is_none() {
            out.extend_from_slice(
                format!("{}:{}\n", HDR_CONTENT_LENGTH, self.body.len()).as_bytes(),
            );
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Reads one frame off the transport, blocking until it is complete.
    /// Empty lines before the command (heartbeats, frame separators) are
    /// skipped.
    pub fn decode<R: BufRead>(reader: &mut R) -> io::Result<Frame> {
        let command = loop {
            let line = read_line(reader)?;
            if !line.is_empty() {
                break line;
            }
        };

        let mut headers = Vec::new();
        loop {
            let line = read_line(reader)?;
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((unescape_header(key), unescape_header(value)));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == HDR_CONTENT_LENGTH)
            .and_then(|(_, v)| v.parse::<usize>().ok());

        let body = match content_length {
            Some(len) => {
                let mut body = vec![0u8; len];
                reader.read_exact(&mut body)?;
                let mut nul = [0u8; 1];
                reader.read_exact(&mut nul)?;
                if nul[0] != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "frame body not NUL-terminated",
                    ));
                }
                body
            }
            None => {
                let mut body = Vec::new();
                reader.read_until(0, &mut body)?;
                if body.last() != Some(&0) {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed inside a frame body",
                    ));
                }
                body.pop();
                body
            }
        };

        Ok(Frame {
            command,
            headers,
            body,
        })
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a complete frame",
        ));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encode_then_decode_send_frame() {
        let frame = Frame::new(SEND)
            .header(HDR_DESTINATION, "/queue/test")
            .with_body(b"{\"fields\":{}}".to_vec());
        let bytes = frame.encode();
        let decoded = Frame::decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.command, SEND);
        assert_eq!(decoded.header_value(HDR_DESTINATION), Some("/queue/test"));
        assert_eq!(decoded.header_value(HDR_CONTENT_LENGTH), Some("13"));
        assert_eq!(decoded.body, b"{\"fields\":{}}");
    }

    #[test]
    fn header_values_are_escaped() {
        let frame = Frame::new(SEND).header(HDR_DESTINATION, "/queue/a:b\nc");
        let bytes = frame.encode();
        let text = String::from_utf8_lossy(&bytes).to_string();
        assert!(text.contains("destination:/queue/a\\cb\\nc"));
        let decoded = Frame::decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.header_value(HDR_DESTINATION), Some("/queue/a:b\nc"));
    }

    #[test]
    fn decode_without_content_length_scans_for_nul() {
        let raw = b"CONNECTED\nversion:1.2\n\n\0".to_vec();
        let frame = Frame::decode(&mut Cursor::new(raw)).unwrap();
        assert_eq!(frame.command, CONNECTED);
        assert_eq!(frame.header_value("version"), Some("1.2"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn decode_skips_leading_heartbeats() {
        let raw = b"\n\nMESSAGE\ndestination:/queue/test\n\nhi\0".to_vec();
        let frame = Frame::decode(&mut Cursor::new(raw)).unwrap();
        assert_eq!(frame.command, MESSAGE);
        assert_eq!(frame.body, b"hi");
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let raw = b"MESSAGE\n\nno terminator".to_vec();
        assert!(Frame::decode(&mut Cursor::new(raw)).is_err());
    }
}
