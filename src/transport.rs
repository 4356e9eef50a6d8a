use crate::roles::Dialer;
use crate::types::{Entry, Epoch, Lai, NodeId, RangeId, Timestamp};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const SUBSCRIBE_PATH: &str = "/closedts/subscribe";
const PULL_PATH: &str = "/closedts/pull";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure to establish a session with a peer. Recovered by the client pool
/// with backoff; never surfaced to writers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialError {
    #[error("closed timestamps disabled")]
    Disabled,
    #[error("no endpoint known for {0}")]
    UnknownPeer(NodeId),
    #[error("dial {node} failed: {reason}")]
    Unreachable { node: NodeId, reason: String },
}

/// Failure on an established session. Ends the session; the pool redials.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("session to {node} broken: {reason}")]
    Broken { node: NodeId, reason: String },
    #[error("malformed entry batch from {node}: {reason}")]
    Malformed { node: NodeId, reason: String },
}

/// An established inbound entry session: successive `recv` calls yield the
/// peer's entries in `(epoch, closed)` order.
pub trait EntryStream: Send {
    fn recv(&mut self) -> Result<Vec<Entry>, TransportError>;
}

/// Wire form of [`Entry`]. Field names are the cross-version contract; the
/// in-memory type is free to evolve independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub epoch: u64,
    pub closed_wall_ns: u64,
    pub closed_logical: u32,
    pub full: bool,
    /// Range id to LAI requirement; 0 clears the range in an incremental
    /// entry.
    pub lai_by_range: BTreeMap<u64, u64>,
}

impl From<&Entry> for WireEntry {
    fn from(entry: &Entry) -> Self {
        Self {
            epoch: entry.epoch.0,
            closed_wall_ns: entry.closed.wall_ns,
            closed_logical: entry.closed.logical,
            full: entry.full,
            lai_by_range: entry
                .lai_by_range
                .iter()
                .map(|(range, lai)| (range.0, lai.0))
                .collect(),
        }
    }
}

impl From<WireEntry> for Entry {
    fn from(wire: WireEntry) -> Self {
        Self {
            epoch: Epoch(wire.epoch),
            closed: Timestamp {
                wall_ns: wire.closed_wall_ns,
                logical: wire.closed_logical,
            },
            full: wire.full,
            lai_by_range: wire
                .lai_by_range
                .into_iter()
                .map(|(range, lai)| (RangeId(range), Lai(lai)))
                .collect(),
        }
    }
}

/// Request body for both subscribe and pull calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSubscribeRequest {
    pub peer: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub cursor: u64,
}

/// One pull's worth of entries plus the cursor to resume from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEntryBatch {
    pub node: u32,
    pub cursor: u64,
    pub entries: Vec<WireEntry>,
}

/// Dials peers over blocking HTTP/JSON. One dial opens a session; `recv`
/// long-polls the pull endpoint with a cursor. A redial resets the cursor,
/// and the serving side answers a fresh cursor with a full entry.
#[derive(Debug, Clone)]
pub struct HttpEntryDialer {
    local: NodeId,
    endpoints: BTreeMap<NodeId, String>,
    token: Option<String>,
}

impl HttpEntryDialer {
    pub fn new(local: NodeId, endpoints: BTreeMap<NodeId, String>, token: Option<String>) -> Self {
        Self {
            local,
            endpoints,
            token,
        }
    }

    fn endpoint(&self, node: NodeId) -> Result<&str, DialError> {
        self.endpoints
            .get(&node)
            .map(String::as_str)
            .ok_or(DialError::UnknownPeer(node))
    }
}

impl Dialer for HttpEntryDialer {
    fn dial(&self, node: NodeId) -> Result<Box<dyn EntryStream>, DialError> {
        let base = self.endpoint(node)?.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| DialError::Unreachable {
                node,
                reason: err.to_string(),
            })?;
        let request = WireSubscribeRequest {
            peer: self.local.0,
            token: self.token.clone(),
            cursor: 0,
        };
        let response = client
            .post(format!("{base}{SUBSCRIBE_PATH}"))
            .json(&request)
            .send()
            .map_err(|err| DialError::Unreachable {
                node,
                reason: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DialError::Unreachable {
                node,
                reason: format!("subscribe returned status {}", response.status()),
            });
        }
        Ok(Box::new(HttpEntryStream {
            node,
            peer: self.local,
            token: self.token.clone(),
            client,
            base,
            cursor: 0,
        }))
    }
}

struct HttpEntryStream {
    node: NodeId,
    peer: NodeId,
    token: Option<String>,
    client: Client,
    base: String,
    cursor: u64,
}

impl EntryStream for HttpEntryStream {
    fn recv(&mut self) -> Result<Vec<Entry>, TransportError> {
        let request = WireSubscribeRequest {
            peer: self.peer.0,
            token: self.token.clone(),
            cursor: self.cursor,
        };
        let response = self
            .client
            .post(format!("{}{}", self.base, PULL_PATH))
            .json(&request)
            .send()
            .map_err(|err| TransportError::Broken {
                node: self.node,
                reason: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(TransportError::Broken {
                node: self.node,
                reason: format!("pull returned status {}", response.status()),
            });
        }
        let batch: WireEntryBatch =
            response.json().map_err(|err| TransportError::Malformed {
                node: self.node,
                reason: err.to_string(),
            })?;
        self.cursor = batch.cursor;
        Ok(batch.entries.into_iter().map(Entry::from).collect())
    }
}
