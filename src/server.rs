use crate::logging::SubsystemLog;
use crate::provider::Subscription;
use crate::roles::{Provider, Server};
use crate::types::{NodeId, RangeId};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("missing or invalid access token")]
    Unauthenticated,
    #[error("peer {0} is not in the authorized set")]
    UnknownPeer(NodeId),
    #[error("closed timestamps disabled")]
    Disabled,
}

/// Admission policy for inbound peers: membership in the authorized set
/// plus an optional shared secret.
#[derive(Debug, Clone)]
pub struct ServerAccess {
    authorized: BTreeSet<NodeId>,
    secret_digest: Option<[u8; 32]>,
}

impl ServerAccess {
    pub fn new(authorized: BTreeSet<NodeId>, shared_secret: Option<&str>) -> Self {
        Self {
            authorized,
            secret_digest: shared_secret.map(digest),
        }
    }

    /// Open policy used when no peer allow-list is configured.
    pub fn open() -> Self {
        Self {
            authorized: BTreeSet::new(),
            secret_digest: None,
        }
    }

    fn verify(&self, peer: NodeId, token: Option<&str>) -> Result<(), AccessError> {
        if !self.authorized.is_empty() && !self.authorized.contains(&peer) {
            return Err(AccessError::UnknownPeer(peer));
        }
        if let Some(expected) = &self.secret_digest {
            let presented = token.ok_or(AccessError::Unauthenticated)?;
            // Digest comparison keeps the secret itself out of memory
            // comparisons and log lines.
            if &digest(presented) != expected {
                return Err(AccessError::Unauthenticated);
            }
        }
        Ok(())
    }
}

fn digest(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Inbound endpoint handlers: access checks in front of the provider.
pub struct EntryServer {
    provider: Arc<dyn Provider>,
    access: ServerAccess,
    log: SubsystemLog,
}

impl EntryServer {
    pub fn new(provider: Arc<dyn Provider>, access: ServerAccess, log: SubsystemLog) -> Self {
        Self {
            provider,
            access,
            log,
        }
    }
}

impl Server for EntryServer {
    fn subscribe(&self, peer: NodeId, token: Option<&str>) -> Result<Subscription, AccessError> {
        if let Err(err) = self.access.verify(peer, token) {
            self.log
                .warn("server", &format!("rejected subscribe from {peer}: {err}"));
            return Err(err);
        }
        self.log.info("server", &format!("peer {peer} subscribed"));
        Ok(self.provider.subscribe(peer))
    }

    fn request(
        &self,
        peer: NodeId,
        token: Option<&str>,
        node: NodeId,
        range: RangeId,
    ) -> Result<(), AccessError> {
        if let Err(err) = self.access.verify(peer, token) {
            self.log
                .warn("server", &format!("rejected request from {peer}: {err}"));
            return Err(err);
        }
        self.provider.request(node, range);
        Ok(())
    }
}
