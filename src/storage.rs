use crate::roles::{EntryVisitor, Storage};
use crate::telemetry::SubsystemTelemetry;
use crate::types::{Entry, Epoch, Lai, NodeId, RangeId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// In-memory per-node log of closed-timestamp entries.
///
/// Each node's log holds the entries of a single epoch: a newer epoch wipes
/// the log (a lease change invalidates everything the old epoch announced).
/// Incremental entries are merged into a cumulative requirement map so the
/// log can answer queries without replaying the delta chain from scratch.
/// One mutex around the node table gives readers atomic snapshots.
pub struct MemStorage {
    entries_per_node: usize,
    telemetry: Arc<SubsystemTelemetry>,
    nodes: Mutex<HashMap<NodeId, NodeLog>>,
}

struct NodeLog {
    epoch: Epoch,
    cumulative: BTreeMap<RangeId, Lai>,
    entries: VecDeque<StoredEntry>,
}

struct StoredEntry {
    entry: Entry,
    /// Cumulative requirement map as of this entry. Used to re-base the
    /// oldest retained entry into a full one when history is evicted.
    cumulative: BTreeMap<RangeId, Lai>,
}

impl MemStorage {
    pub fn new(entries_per_node: usize, telemetry: Arc<SubsystemTelemetry>) -> Self {
        Self {
            entries_per_node: entries_per_node.max(1),
            telemetry,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Latest epoch recorded for `node`, if any entries are retained.
    pub fn latest_epoch(&self, node: NodeId) -> Option<Epoch> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(&node)
            .filter(|log| !log.entries.is_empty())
            .map(|log| log.epoch)
    }

    /// Nodes with retained history, in stable order.
    pub fn known_nodes(&self) -> Vec<NodeId> {
        let nodes = self.nodes.lock().unwrap();
        let mut known: Vec<NodeId> = nodes
            .iter()
            .filter(|(_, log)| !log.entries.is_empty())
            .map(|(node, _)| *node)
            .collect();
        known.sort();
        known
    }
}

impl Storage for MemStorage {
    fn add(&self, node: NodeId, entry: Entry) {
        let mut nodes = self.nodes.lock().unwrap();
        let log = nodes.entry(node).or_insert_with(|| NodeLog {
            epoch: entry.epoch,
            cumulative: BTreeMap::new(),
            entries: VecDeque::new(),
        });

        if entry.epoch < log.epoch {
            self.telemetry.record_entry_rejected();
            return;
        }
        let mut entry = entry;
        if entry.epoch > log.epoch {
            // New lease generation: all prior state for the node is void.
            log.epoch = entry.epoch;
            log.cumulative.clear();
            log.entries.clear();
            entry.full = true;
        }
        if let Some(last) = log.entries.back() {
            if entry.closed < last.entry.closed {
                self.telemetry.record_entry_rejected();
                return;
            }
        }

        if entry.full {
            log.cumulative = entry
                .lai_by_range
                .iter()
                .filter(|(_, lai)| !lai.is_cleared())
                .map(|(range, lai)| (*range, *lai))
                .collect();
        } else {
            for (range, lai) in &entry.lai_by_range {
                if lai.is_cleared() {
                    log.cumulative.remove(range);
                } else {
                    log.cumulative.insert(*range, *lai);
                }
            }
        }

        log.entries.push_back(StoredEntry {
            entry,
            cumulative: log.cumulative.clone(),
        });
        while log.entries.len() > self.entries_per_node {
            log.entries.pop_front();
            if let Some(oldest) = log.entries.front_mut() {
                // The evicted prefix carried the chain's base; fold the
                // cumulative view into the new oldest entry.
                oldest.entry.full = true;
                oldest.entry.lai_by_range = oldest.cumulative.clone();
            }
        }
    }

    fn visit_ascending(&self, node: NodeId, visitor: EntryVisitor<'_>) {
        let nodes = self.nodes.lock().unwrap();
        if let Some(log) = nodes.get(&node) {
            for stored in log.entries.iter() {
                if visitor(&stored.entry) {
                    return;
                }
            }
        }
    }

    fn visit_descending(&self, node: NodeId, visitor: EntryVisitor<'_>) {
        let nodes = self.nodes.lock().unwrap();
        if let Some(log) = nodes.get(&node) {
            for stored in log.entries.iter().rev() {
                if visitor(&stored.entry) {
                    return;
                }
            }
        }
    }

    fn clear(&self) {
        self.nodes.lock().unwrap().clear();
    }
}
