//! The three primitive commands exchanged between mesh peers
//!
//! Every value placed on the wire is one of `New`, `Accept`, or `Data`,
//! serialized as a positional JSON array `[kind, payload]`. The shapes are
//! fixed by the protocol, so encoding maps to and from `serde_json::Value`
//! by hand rather than relying on derived representations.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CollectiveError;

/// A peer's listen address. Identity for connection lookup is the
/// canonical `"host:port"` string, never the raw socket address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Canonical identity used as the connection-table key.
    pub fn id(&self) -> PeerId {
        PeerId(format!("{}:{}", self.host, self.port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Canonical `"host:port"` peer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The mutation kinds carried by a `Data` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Increment,
    Delete,
}

impl Operation {
    pub fn code(self) -> u64 {
        match self {
            Operation::Set => 0,
            Operation::Increment => 1,
            Operation::Delete => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Operation::Set),
            1 => Some(Operation::Increment),
            2 => Some(Operation::Delete),
            _ => None,
        }
    }
}

const KIND_NEW: u64 = 0;
const KIND_ACCEPT: u64 = 1;
const KIND_DATA: u64 = 2;

/// The closed set of commands a peer can send.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// "I am `addr`; dial me back. If `want_snapshot`, also send me your
    /// full document." Sent to every connection during the join round.
    New {
        addr: PeerAddress,
        want_snapshot: bool,
    },
    /// Reply to `New`: a full document snapshot, or `None` as a bare
    /// acknowledgement carrying no data.
    Accept { snapshot: Option<Value> },
    /// One mutation, stamped by the originating node. Never relayed.
    Data {
        path: String,
        timestamp: i64,
        value: Value,
        op: Operation,
    },
}

impl Command {
    /// Serialize to the positional `[kind, payload]` wire form.
    pub fn to_wire(&self) -> Value {
        match self {
            Command::New {
                addr,
                want_snapshot,
            } => json!([KIND_NEW, [&addr.host, addr.port, want_snapshot]]),
            Command::Accept { snapshot } => match snapshot {
                Some(doc) => json!([KIND_ACCEPT, doc]),
                None => json!([KIND_ACCEPT, null]),
            },
            Command::Data {
                path,
                timestamp,
                value,
                op,
            } => json!([KIND_DATA, [path, timestamp, value, op.code()]]),
        }
    }

    /// Parse one decoded frame. Any shape violation is a
    /// `CollectiveError::Protocol`, fatal for the offending connection.
    pub fn from_wire(frame: Value) -> Result<Self, CollectiveError> {
        let parts = frame
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| protocol_err("frame is not a [kind, payload] pair"))?;

        let kind = parts[0]
            .as_u64()
            .ok_or_else(|| protocol_err("non-integer command kind"))?;
        let payload = &parts[1];

        match kind {
            KIND_NEW => {
                let fields = payload
                    .as_array()
                    .filter(|a| a.len() == 3)
                    .ok_or_else(|| protocol_err("malformed New payload"))?;
                let host = fields[0]
                    .as_str()
                    .ok_or_else(|| protocol_err("New host is not a string"))?;
                let port = fields[1]
                    .as_u64()
                    .and_then(|p| u16::try_from(p).ok())
                    .ok_or_else(|| protocol_err("New port is not a valid port"))?;
                let want_snapshot = fields[2]
                    .as_bool()
                    .ok_or_else(|| protocol_err("New wantSnapshot is not a boolean"))?;
                Ok(Command::New {
                    addr: PeerAddress::new(host, port),
                    want_snapshot,
                })
            }
            KIND_ACCEPT => Ok(Command::Accept {
                snapshot: match payload {
                    Value::Null => None,
                    doc => Some(doc.clone()),
                },
            }),
            KIND_DATA => {
                let fields = payload
                    .as_array()
                    .filter(|a| a.len() == 4)
                    .ok_or_else(|| protocol_err("malformed Data payload"))?;
                let path = fields[0]
                    .as_str()
                    .ok_or_else(|| protocol_err("Data path is not a string"))?;
                let timestamp = fields[1]
                    .as_i64()
                    .ok_or_else(|| protocol_err("Data timestamp is not an integer"))?;
                let op = fields[3]
                    .as_u64()
                    .and_then(Operation::from_code)
                    .ok_or_else(|| protocol_err("unknown Data operation"))?;
                Ok(Command::Data {
                    path: path.to_string(),
                    timestamp,
                    value: fields[2].clone(),
                    op,
                })
            }
            other => Err(protocol_err(&format!("unknown command kind {other}"))),
        }
    }
}

fn protocol_err(msg: &str) -> CollectiveError {
    CollectiveError::Protocol(msg.to_string())
}
