//! Delta messages, full-snapshot messages and store-slice checksums.

use std::collections::HashMap;

use adler32::RollingAdler32;
use serde::{Deserialize, Serialize};

use crate::entities::{
    DataEntity, Edge, Family, FamilyProxy, Job, Task, TaskProxy, Workflow,
};

/// The collection kinds of a per-workflow store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Edges,
    Families,
    FamilyProxies,
    Jobs,
    Tasks,
    TaskProxies,
    Workflow,
}

impl EntityKind {
    /// All kinds, in canonical order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Edges,
        EntityKind::Families,
        EntityKind::FamilyProxies,
        EntityKind::Jobs,
        EntityKind::Tasks,
        EntityKind::TaskProxies,
        EntityKind::Workflow,
    ];

    /// Wire-format name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Edges => "edges",
            EntityKind::Families => "families",
            EntityKind::FamilyProxies => "family_proxies",
            EntityKind::Jobs => "jobs",
            EntityKind::Tasks => "tasks",
            EntityKind::TaskProxies => "task_proxies",
            EntityKind::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic name of the combined all-deltas message.
pub const ALL_DELTAS_TOPIC: &str = "all";

/// Accumulated changes to one collection kind over an iteration.
///
/// `added` carries full entities, `updated` partial entities, `pruned`
/// entity ids. `time`, `checksum` and `reloaded` are stamped by the
/// producer at finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deltas<E> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
    pub reloaded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<E>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<E>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pruned: Vec<String>,
}

impl<E> Deltas<E> {
    /// True when no additions, updates or prunings have accumulated.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.pruned.is_empty()
    }

    /// Resets the message to its initial state.
    pub fn clear(&mut self) {
        self.time = None;
        self.checksum = None;
        self.reloaded = false;
        self.added.clear();
        self.updated.clear();
        self.pruned.clear();
    }
}

/// Accumulated changes to the workflow singleton. There is no pruning
/// for the singleton and no slice checksum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowDeltas {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    pub reloaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<Workflow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<Workflow>,
}

impl WorkflowDeltas {
    /// True when neither bucket is populated.
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.updated.is_none()
    }

    /// Resets the message to its initial state.
    pub fn clear(&mut self) {
        self.time = None;
        self.reloaded = false;
        self.added = None;
        self.updated = None;
    }
}

/// Every non-empty per-kind delta of an iteration, as one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllDeltas {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<Deltas<Edge>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub families: Option<Deltas<Family>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_proxies: Option<Deltas<FamilyProxy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Deltas<Job>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Deltas<Task>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_proxies: Option<Deltas<TaskProxy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowDeltas>,
}

/// A delta message of one kind, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMessage {
    Edges(Deltas<Edge>),
    Families(Deltas<Family>),
    FamilyProxies(Deltas<FamilyProxy>),
    Jobs(Deltas<Job>),
    Tasks(Deltas<Task>),
    TaskProxies(Deltas<TaskProxy>),
    Workflow(WorkflowDeltas),
}

impl DeltaMessage {
    /// The collection kind this message carries.
    pub fn kind(&self) -> EntityKind {
        match self {
            DeltaMessage::Edges(_) => EntityKind::Edges,
            DeltaMessage::Families(_) => EntityKind::Families,
            DeltaMessage::FamilyProxies(_) => EntityKind::FamilyProxies,
            DeltaMessage::Jobs(_) => EntityKind::Jobs,
            DeltaMessage::Tasks(_) => EntityKind::Tasks,
            DeltaMessage::TaskProxies(_) => EntityKind::TaskProxies,
            DeltaMessage::Workflow(_) => EntityKind::Workflow,
        }
    }
}

/// Full-snapshot message containing every element of a workflow store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntireWorkflow {
    pub workflow: Workflow,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_proxies: Vec<TaskProxy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<Job>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<Family>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub family_proxies: Vec<FamilyProxy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
}

/// Adler-32 over the concatenation of the lexicographically sorted input
/// strings. Cheap, and stable across platforms and word sizes; this is a
/// change marker, not a signature.
pub fn generate_checksum<I, S>(tokens: I) -> u32
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = tokens
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect();
    sorted.sort_unstable();
    let joined = sorted.concat();
    let mut hash = RollingAdler32::new();
    hash.update_buffer(joined.as_bytes());
    hash.hash()
}

/// Checksum of a store slice: edge slices hash over entity ids, all other
/// kinds over entity stamps.
pub fn slice_checksum<E: DataEntity>(slice: &HashMap<String, E>) -> u32 {
    generate_checksum(slice.values().map(|e| e.checksum_token()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_value() {
        // adler32("abc"), sorted from unsorted input.
        assert_eq!(generate_checksum(["b", "a", "c"]), 0x024d_0127);
    }

    #[test]
    fn test_checksum_order_independent() {
        let forward = generate_checksum(["x@1", "y@2", "z@3"]);
        let reverse = generate_checksum(["z@3", "y@2", "x@1"]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_edge_slice_hashes_ids() {
        let mut slice: HashMap<String, Edge> = HashMap::new();
        slice.insert(
            "e1".to_string(),
            Edge {
                id: "e1".to_string(),
                stamp: Some("e1@99.0".to_string()),
                ..Edge::default()
            },
        );
        assert_eq!(slice_checksum(&slice), generate_checksum(["e1"]));
    }

    #[test]
    fn test_deltas_empty_and_clear() {
        let mut deltas: Deltas<Edge> = Deltas::default();
        assert!(deltas.is_empty());
        deltas.pruned.push("e1".to_string());
        assert!(!deltas.is_empty());
        deltas.time = Some(1.0);
        deltas.clear();
        assert!(deltas.is_empty());
        assert_eq!(deltas.time, None);
    }
}
