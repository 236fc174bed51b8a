//! Read-side interface onto the workflow configuration.
//!
//! The configuration loader is an external collaborator; the data store
//! consumes it through [`ConfigView`] only. Implementations are treated
//! as immutable within a reload epoch.

use std::collections::HashMap;

use cadence_schema::PollingTask;

use crate::point::CyclePoint;

/// Static definition data for one task.
#[derive(Debug, Clone, Default)]
pub struct TaskDefData {
    /// Task name.
    pub name: String,

    /// Inheritance hierarchy, nearest namespace first.
    pub namespace_hierarchy: Vec<String>,

    /// Declared metadata items (`title`, `description`, `URL` and any
    /// user-defined keys).
    pub meta: HashMap<String, String>,

    /// Recorded elapsed-time samples, seconds.
    pub elapsed_times: Vec<f64>,

    /// Configured execution time limit, seconds.
    pub execution_time_limit: Option<f64>,
}

/// One edge produced by graph parsing for a cycle point range.
///
/// Nodes are `name.point` references; a `None` source marks an edge the
/// parser could not anchor and is skipped by the engine.
#[derive(Debug, Clone, Default)]
pub struct GraphEdge {
    pub source: Option<String>,
    pub target: Option<String>,
    pub suicide: bool,
    pub cond: bool,
}

/// The configuration surface consumed by the data store.
pub trait ConfigView {
    /// Graphed task definitions by name.
    fn task_defs(&self) -> &HashMap<String, TaskDefData>;

    /// Names of namespaces with no children in the graph.
    fn leaves(&self) -> &[String];

    /// Names of namespaces with no parents in the graph.
    fn feet(&self) -> &[String];

    /// Tasks polled by remote workflows, keyed by local proxy name.
    fn polling_tasks(&self) -> &HashMap<String, PollingTask>;

    /// First-parent ancestry per namespace: `[self, parent, ..., root]`.
    fn first_parent_ancestors(&self) -> &HashMap<String, Vec<String>>;

    /// First-parent ancestry restricted to graphed namespaces.
    fn pruned_first_parent_ancestors(&self) -> &HashMap<String, Vec<String>>;

    /// First-parent descendants per family name.
    fn first_parent_descendants(&self) -> &HashMap<String, Vec<String>>;

    /// Full parent lists per namespace (multi-parent inheritance).
    fn parent_lists(&self) -> &HashMap<String, Vec<String>>;

    /// Graph edges for the inclusive cycle point range `[start, stop]`.
    fn graph_edges(&self, start: &CyclePoint, stop: &CyclePoint) -> Vec<GraphEdge>;

    /// Run mode (`live`, `simulation`, `dummy`).
    fn run_mode(&self) -> &str;

    /// Cycling mode (`integer` or a calendar mode).
    fn cycling_mode(&self) -> &str;

    /// Namespace definition order.
    fn ns_defn_order(&self) -> &[String];

    /// Workflow-level metadata items.
    fn workflow_meta(&self) -> &HashMap<String, String>;

    /// Metadata items of a family namespace.
    fn family_meta(&self, name: &str) -> Option<&HashMap<String, String>>;

    /// True when the workflow clock runs in UTC.
    fn utc_mode(&self) -> bool;
}
