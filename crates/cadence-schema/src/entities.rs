//! Typed data-store entities and their field-merge semantics.
//!
//! Every entity carries an `id` and a `stamp` (`id@updateTime`), an advisory
//! change marker refreshed on every content change. Delta messages carry
//! *partial* entities: scalar fields use `Option` so that an absent field
//! never touches the merge target, while a present value always replaces.
//! Repeated fields and maps accumulate by append on merge; the fields that
//! must instead be overwritten are cleared by the applicator beforehand
//! (see [`DataEntity::clear_overwritten_fields`]).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::deltas::EntityKind;
use crate::state::TaskStatus;

/// Common behaviour shared by all data-store entities.
pub trait DataEntity: Clone + Default {
    /// The collection kind this entity belongs to.
    const KIND: EntityKind;

    /// Entity identifier.
    fn id(&self) -> &str;

    /// Advisory change marker, `id@updateTime`.
    fn stamp(&self) -> Option<&str>;

    /// Merges a partial entity into `self`: present scalars replace,
    /// repeated fields append, maps merge by key.
    fn merge_from(&mut self, delta: &Self);

    /// Clears the fields of `self` that the incoming delta overwrites
    /// rather than appends to (the clear-before-merge set of this kind).
    fn clear_overwritten_fields(&mut self, delta: &Self);

    /// The string contributed to the store-slice checksum.
    fn checksum_token(&self) -> &str {
        self.stamp().unwrap_or_default()
    }
}

fn merge_scalar<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if let Some(value) = source {
        *target = Some(value.clone());
    }
}

fn append_repeated<T: Clone>(target: &mut Vec<T>, source: &[T]) {
    target.extend(source.iter().cloned());
}

fn merge_map<K, V>(target: &mut HashMap<K, V>, source: &HashMap<K, V>)
where
    K: Clone + Eq + std::hash::Hash,
    V: Clone,
{
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// Descriptive metadata common to workflows, tasks and families.
///
/// The recognised keys (`title`, `description`, `URL`) are first-class;
/// everything else the configuration declares is JSON-encoded into
/// `user_defined`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// User-defined metadata, JSON-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_defined: Option<String>,
}

impl EntityMeta {
    fn merge_from(&mut self, delta: &Self) {
        merge_scalar(&mut self.title, &delta.title);
        merge_scalar(&mut self.description, &delta.description);
        merge_scalar(&mut self.url, &delta.url);
        merge_scalar(&mut self.user_defined, &delta.user_defined);
    }
}

/// Time zone descriptor of the workflow host clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeZoneInfo {
    pub hours: i32,
    pub minutes: i32,
    pub string_basic: String,
    pub string_extended: String,
}

/// A task in this workflow that a remote workflow polls the state of.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingTask {
    pub local_proxy: String,
    pub workflow: String,
    pub remote_proxy: String,
    pub req_state: String,
    pub graph_string: String,
}

/// Graph topology summary carried on the workflow singleton.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowGraph {
    /// Ids of all live edges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub leaves: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feet: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workflow_polling_tasks: Vec<PollingTask>,
}

impl WorkflowGraph {
    fn merge_from(&mut self, delta: &Self) {
        append_repeated(&mut self.edges, &delta.edges);
        append_repeated(&mut self.leaves, &delta.leaves);
        append_repeated(&mut self.feet, &delta.feet);
        append_repeated(
            &mut self.workflow_polling_tasks,
            &delta.workflow_polling_tasks,
        );
    }
}

/// One condition of a task prerequisite expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrereqCondition {
    pub task_proxy: String,
    pub expr_alias: String,
    pub req_state: String,
    pub satisfied: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// A task prerequisite in wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prerequisite {
    pub expression: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PrereqCondition>,
    pub satisfied: bool,
}

/// Static task definition element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namespace: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EntityMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_elapsed_time: Option<f64>,
    /// Ids of the live cycle-point instances of this task.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
}

impl Task {
    /// Creates a partial task delta carrying only an id.
    pub fn partial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl DataEntity for Task {
    const KIND: EntityKind = EntityKind::Tasks;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    fn merge_from(&mut self, delta: &Self) {
        merge_scalar(&mut self.stamp, &delta.stamp);
        merge_scalar(&mut self.name, &delta.name);
        merge_scalar(&mut self.depth, &delta.depth);
        append_repeated(&mut self.namespace, &delta.namespace);
        append_repeated(&mut self.parents, &delta.parents);
        merge_scalar(&mut self.first_parent, &delta.first_parent);
        if let Some(meta) = &delta.meta {
            self.meta.get_or_insert_with(EntityMeta::default).merge_from(meta);
        }
        merge_scalar(&mut self.mean_elapsed_time, &delta.mean_elapsed_time);
        append_repeated(&mut self.proxies, &delta.proxies);
    }

    fn clear_overwritten_fields(&mut self, _delta: &Self) {}
}

/// Static family definition element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Family {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EntityMeta>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_tasks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_families: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
}

impl Family {
    /// Creates a partial family delta carrying only an id.
    pub fn partial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl DataEntity for Family {
    const KIND: EntityKind = EntityKind::Families;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    fn merge_from(&mut self, delta: &Self) {
        merge_scalar(&mut self.stamp, &delta.stamp);
        merge_scalar(&mut self.name, &delta.name);
        merge_scalar(&mut self.depth, &delta.depth);
        if let Some(meta) = &delta.meta {
            self.meta.get_or_insert_with(EntityMeta::default).merge_from(meta);
        }
        append_repeated(&mut self.parents, &delta.parents);
        merge_scalar(&mut self.first_parent, &delta.first_parent);
        append_repeated(&mut self.child_tasks, &delta.child_tasks);
        append_repeated(&mut self.child_families, &delta.child_families);
        append_repeated(&mut self.proxies, &delta.proxies);
    }

    fn clear_overwritten_fields(&mut self, _delta: &Self) {}
}

/// Cycle-point instance of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskProxy {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
    /// Id of the owning task definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namespace: Vec<String>,
    /// Family proxy ids, nearest first, ending at root.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_held: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_submits: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<Prerequisite>,
    /// Mapping of output trigger to completion, JSON-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<String>,
    /// Trigger annotations (clock, external, xtrigger), JSON-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extras: Option<String>,
}

impl TaskProxy {
    /// Creates a partial task proxy delta carrying only an id.
    pub fn partial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl DataEntity for TaskProxy {
    const KIND: EntityKind = EntityKind::TaskProxies;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    fn merge_from(&mut self, delta: &Self) {
        merge_scalar(&mut self.stamp, &delta.stamp);
        merge_scalar(&mut self.task, &delta.task);
        merge_scalar(&mut self.name, &delta.name);
        merge_scalar(&mut self.cycle_point, &delta.cycle_point);
        merge_scalar(&mut self.depth, &delta.depth);
        append_repeated(&mut self.namespace, &delta.namespace);
        append_repeated(&mut self.ancestors, &delta.ancestors);
        merge_scalar(&mut self.first_parent, &delta.first_parent);
        merge_scalar(&mut self.state, &delta.state);
        merge_scalar(&mut self.is_held, &delta.is_held);
        merge_scalar(&mut self.flow_label, &delta.flow_label);
        merge_scalar(&mut self.job_submits, &delta.job_submits);
        merge_scalar(&mut self.latest_message, &delta.latest_message);
        append_repeated(&mut self.jobs, &delta.jobs);
        append_repeated(&mut self.edges, &delta.edges);
        append_repeated(&mut self.prerequisites, &delta.prerequisites);
        merge_scalar(&mut self.outputs, &delta.outputs);
        merge_scalar(&mut self.extras, &delta.extras);
    }

    // Prerequisites are rewritten wholesale on every dynamic update;
    // outputs is a singular JSON field and replaces on merge anyway.
    fn clear_overwritten_fields(&mut self, delta: &Self) {
        if !delta.prerequisites.is_empty() {
            self.prerequisites.clear();
        }
        if delta.outputs.is_some() {
            self.outputs = None;
        }
    }
}

/// Cycle-point instance of a family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyProxy {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
    /// Id of the owning family definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_tasks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_families: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<TaskStatus>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub state_totals: HashMap<TaskStatus, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_held: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_held_total: Option<i64>,
}

impl FamilyProxy {
    /// Creates a partial family proxy delta carrying only an id.
    pub fn partial(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl DataEntity for FamilyProxy {
    const KIND: EntityKind = EntityKind::FamilyProxies;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    fn merge_from(&mut self, delta: &Self) {
        merge_scalar(&mut self.stamp, &delta.stamp);
        merge_scalar(&mut self.family, &delta.family);
        merge_scalar(&mut self.name, &delta.name);
        merge_scalar(&mut self.cycle_point, &delta.cycle_point);
        merge_scalar(&mut self.depth, &delta.depth);
        append_repeated(&mut self.ancestors, &delta.ancestors);
        merge_scalar(&mut self.first_parent, &delta.first_parent);
        append_repeated(&mut self.child_tasks, &delta.child_tasks);
        append_repeated(&mut self.child_families, &delta.child_families);
        merge_scalar(&mut self.state, &delta.state);
        append_repeated(&mut self.states, &delta.states);
        merge_map(&mut self.state_totals, &delta.state_totals);
        merge_scalar(&mut self.is_held, &delta.is_held);
        merge_scalar(&mut self.is_held_total, &delta.is_held_total);
    }

    // Rollup recomputes totals from scratch each pass; stale counts must
    // not survive the merge.
    fn clear_overwritten_fields(&mut self, delta: &Self) {
        if !delta.state_totals.is_empty() {
            self.state_totals.clear();
        }
        if !delta.states.is_empty() {
            self.states.clear();
        }
    }
}

/// An edge between two task proxies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Edge {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suicide: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cond: Option<bool>,
}

impl DataEntity for Edge {
    const KIND: EntityKind = EntityKind::Edges;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    fn merge_from(&mut self, delta: &Self) {
        merge_scalar(&mut self.stamp, &delta.stamp);
        merge_scalar(&mut self.source, &delta.source);
        merge_scalar(&mut self.target, &delta.target);
        merge_scalar(&mut self.suicide, &delta.suicide);
        merge_scalar(&mut self.cond, &delta.cond);
    }

    fn clear_overwritten_fields(&mut self, _delta: &Self) {}

    // Edge contents never change after creation, so the slice checksum
    // runs over ids rather than stamps.
    fn checksum_token(&self) -> &str {
        &self.id
    }
}

/// A job submission of a task proxy. Owned by the job pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_num: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskStatus>,
    /// Id of the owning task proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_sys_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_sys_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_log_dir: Option<String>,
}

impl DataEntity for Job {
    const KIND: EntityKind = EntityKind::Jobs;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    fn merge_from(&mut self, delta: &Self) {
        merge_scalar(&mut self.stamp, &delta.stamp);
        merge_scalar(&mut self.submit_num, &delta.submit_num);
        merge_scalar(&mut self.state, &delta.state);
        merge_scalar(&mut self.task_proxy, &delta.task_proxy);
        merge_scalar(&mut self.submitted_time, &delta.submitted_time);
        merge_scalar(&mut self.started_time, &delta.started_time);
        merge_scalar(&mut self.finished_time, &delta.finished_time);
        merge_scalar(&mut self.batch_sys_name, &delta.batch_sys_name);
        merge_scalar(&mut self.batch_sys_job_id, &delta.batch_sys_job_id);
        merge_scalar(&mut self.host, &delta.host);
        merge_scalar(&mut self.job_log_dir, &delta.job_log_dir);
    }

    fn clear_overwritten_fields(&mut self, _delta: &Self) {}
}

/// The workflow summary singleton, root of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Server port, `-1` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Publish port, `-1` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EntityMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_depth: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone_info: Option<TimeZoneInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycling_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_log_dir: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub job_log_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ns_def_order: Vec<String>,
    /// Broadcast snapshot, JSON-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcasts: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<TaskStatus>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub state_totals: HashMap<TaskStatus, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_held_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_cycle_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_cycle_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_runahead_cycle_point: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_proxies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub family_proxies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<WorkflowGraph>,
}

impl Workflow {
    /// True when any field of the singleton has been set.
    pub fn is_set(&self) -> bool {
        *self != Self::default()
    }

    /// Refreshes `last_updated` and the stamp from a wall clock time.
    pub fn set_stamp(&mut self, update_time: f64) {
        self.last_updated = Some(update_time);
        self.stamp = Some(format!("{}@{}", self.id, update_time));
    }
}

impl DataEntity for Workflow {
    const KIND: EntityKind = EntityKind::Workflow;

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    fn merge_from(&mut self, delta: &Self) {
        if !delta.id.is_empty() {
            self.id = delta.id.clone();
        }
        merge_scalar(&mut self.stamp, &delta.stamp);
        merge_scalar(&mut self.name, &delta.name);
        merge_scalar(&mut self.owner, &delta.owner);
        merge_scalar(&mut self.host, &delta.host);
        merge_scalar(&mut self.port, &delta.port);
        merge_scalar(&mut self.pub_port, &delta.pub_port);
        merge_scalar(&mut self.api_version, &delta.api_version);
        merge_scalar(&mut self.engine_version, &delta.engine_version);
        merge_scalar(&mut self.status, &delta.status);
        merge_scalar(&mut self.status_msg, &delta.status_msg);
        merge_scalar(&mut self.last_updated, &delta.last_updated);
        if let Some(meta) = &delta.meta {
            self.meta.get_or_insert_with(EntityMeta::default).merge_from(meta);
        }
        merge_scalar(&mut self.tree_depth, &delta.tree_depth);
        merge_scalar(&mut self.time_zone_info, &delta.time_zone_info);
        merge_scalar(&mut self.run_mode, &delta.run_mode);
        merge_scalar(&mut self.cycling_mode, &delta.cycling_mode);
        merge_scalar(&mut self.workflow_log_dir, &delta.workflow_log_dir);
        append_repeated(&mut self.job_log_names, &delta.job_log_names);
        append_repeated(&mut self.ns_def_order, &delta.ns_def_order);
        merge_scalar(&mut self.broadcasts, &delta.broadcasts);
        append_repeated(&mut self.states, &delta.states);
        merge_map(&mut self.state_totals, &delta.state_totals);
        merge_scalar(&mut self.is_held_total, &delta.is_held_total);
        merge_scalar(&mut self.oldest_cycle_point, &delta.oldest_cycle_point);
        merge_scalar(&mut self.newest_cycle_point, &delta.newest_cycle_point);
        merge_scalar(
            &mut self.newest_runahead_cycle_point,
            &delta.newest_runahead_cycle_point,
        );
        append_repeated(&mut self.tasks, &delta.tasks);
        append_repeated(&mut self.families, &delta.families);
        append_repeated(&mut self.task_proxies, &delta.task_proxies);
        append_repeated(&mut self.family_proxies, &delta.family_proxies);
        append_repeated(&mut self.jobs, &delta.jobs);
        if let Some(graph) = &delta.graph {
            self.graph
                .get_or_insert_with(WorkflowGraph::default)
                .merge_from(graph);
        }
    }

    fn clear_overwritten_fields(&mut self, delta: &Self) {
        if !delta.state_totals.is_empty() {
            self.state_totals.clear();
        }
        if !delta.states.is_empty() {
            self.states.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_presence_merge() {
        let mut target = TaskProxy::partial("wf|1|a");
        target.state = Some(TaskStatus::Running);
        target.is_held = Some(true);

        // Absent fields leave the target alone.
        let delta = TaskProxy::partial("wf|1|a");
        let mut merged = target.clone();
        merged.merge_from(&delta);
        assert_eq!(merged.state, Some(TaskStatus::Running));
        assert_eq!(merged.is_held, Some(true));

        // A present false replaces a true.
        let mut delta = TaskProxy::partial("wf|1|a");
        delta.is_held = Some(false);
        merged.merge_from(&delta);
        assert_eq!(merged.is_held, Some(false));
    }

    #[test]
    fn test_repeated_fields_append() {
        let mut target = Task::partial("wf|a");
        target.proxies = vec!["wf|1|a".to_string()];
        let mut delta = Task::partial("wf|a");
        delta.proxies = vec!["wf|2|a".to_string()];
        target.merge_from(&delta);
        assert_eq!(target.proxies, vec!["wf|1|a", "wf|2|a"]);
    }

    #[test]
    fn test_family_proxy_clear_before_merge() {
        let mut target = FamilyProxy::partial("wf|1|root");
        target.states = vec![TaskStatus::Waiting];
        target.state_totals.insert(TaskStatus::Waiting, 2);

        let mut delta = FamilyProxy::partial("wf|1|root");
        delta.states = vec![TaskStatus::Running];
        delta.state_totals.insert(TaskStatus::Running, 1);

        target.clear_overwritten_fields(&delta);
        target.merge_from(&delta);
        assert_eq!(target.states, vec![TaskStatus::Running]);
        assert_eq!(target.state_totals.len(), 1);
        assert_eq!(target.state_totals[&TaskStatus::Running], 1);
    }

    #[test]
    fn test_task_proxy_prerequisites_replace() {
        let mut target = TaskProxy::partial("wf|1|b");
        target.prerequisites = vec![Prerequisite {
            expression: "c0".to_string(),
            conditions: Vec::new(),
            satisfied: false,
        }];

        let mut delta = TaskProxy::partial("wf|1|b");
        delta.prerequisites = vec![Prerequisite {
            expression: "c0".to_string(),
            conditions: Vec::new(),
            satisfied: true,
        }];

        target.clear_overwritten_fields(&delta);
        target.merge_from(&delta);
        assert_eq!(target.prerequisites.len(), 1);
        assert!(target.prerequisites[0].satisfied);
    }

    #[test]
    fn test_workflow_is_set() {
        let mut workflow = Workflow::default();
        assert!(!workflow.is_set());
        workflow.id = "me|flow".to_string();
        assert!(workflow.is_set());
    }

    #[test]
    fn test_partial_serialization_is_compact() {
        let delta = TaskProxy::partial("wf|1|a");
        let encoded = serde_json::to_string(&delta).unwrap();
        assert_eq!(encoded, r#"{"id":"wf|1|a"}"#);
    }
}
