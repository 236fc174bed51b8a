//! The workflow data-store manager.
//!
//! The manager keeps the authoritative store consistent with the live
//! scheduler pool and accumulates every change of an iteration as deltas:
//! minimal messages carrying only the elements, and only the fields of
//! those elements, that changed. At the end of the iteration the deltas
//! are applied to the local store, checksummed, packaged for publishing,
//! and cleared.
//!
//! Static elements (workflow, task and family definitions) are generated
//! on start, restart and reload. Updates are driven by the task pool:
//! graph edges are generated for new cycle points, ghost proxies are
//! created from edge endpoints, and cycle points no longer in the pool or
//! the edge adjacency set are pruned. Task state changes flag their first
//! parent family for a recursive rollup to root, which in turn feeds the
//! workflow summary.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info};

use cadence_schema::{
    group_state, AllDeltas, DataEntity, DeltaMessage, Deltas, Edge, EntityKind,
    EntityMeta, Family, FamilyProxy, Job, Task, TaskProxy, TaskStatus,
    Workflow, WorkflowDeltas, WorkflowGraph, ALL_DELTAS_TOPIC,
};

use crate::config::TaskDefData;
use crate::context::{time_zone_info, wallclock_now, LiveTask, SchedulerContext};
use crate::error::{DataStoreError, DataStoreResult};
use crate::identity;
use crate::job_pool::JobPool;
use crate::point::CyclePoint;
use crate::store::DataStore;
use crate::{API_VERSION, ENGINE_VERSION, JOB_LOG_NAMES};

/// Name of the synthetic root family.
const ROOT_FAMILY: &str = "root";

/// A serialized delta payload ready for the publisher.
#[derive(Debug, Clone)]
pub struct PublishedDelta {
    /// Topic: an [`EntityKind`] name or [`ALL_DELTAS_TOPIC`].
    pub topic: String,
    /// Serialized delta message.
    pub payload: Vec<u8>,
}

/// Entities accumulated between flush points, keyed like the store.
#[derive(Debug, Clone, Default)]
struct EntityBuffers {
    edges: HashMap<String, Edge>,
    families: HashMap<String, Family>,
    family_proxies: HashMap<String, FamilyProxy>,
    jobs: HashMap<String, Job>,
    tasks: HashMap<String, Task>,
    task_proxies: HashMap<String, TaskProxy>,
    workflow: Workflow,
}

impl EntityBuffers {
    fn clear(&mut self) {
        self.edges.clear();
        self.families.clear();
        self.family_proxies.clear();
        self.jobs.clear();
        self.tasks.clear();
        self.task_proxies.clear();
        self.workflow = Workflow::default();
    }
}

/// The per-kind delta messages being assembled this iteration.
#[derive(Debug, Clone, Default)]
struct DeltaSet {
    edges: Deltas<Edge>,
    families: Deltas<Family>,
    family_proxies: Deltas<FamilyProxy>,
    jobs: Deltas<Job>,
    tasks: Deltas<Task>,
    task_proxies: Deltas<TaskProxy>,
    workflow: WorkflowDeltas,
}

impl DeltaSet {
    fn clear(&mut self) {
        self.edges.clear();
        self.families.clear();
        self.family_proxies.clear();
        self.jobs.clear();
        self.tasks.clear();
        self.task_proxies.clear();
        self.workflow.clear();
    }
}

fn sorted_values<E: DataEntity>(map: &HashMap<String, E>) -> Vec<E> {
    let mut values: Vec<E> = map.values().cloned().collect();
    values.sort_by(|a, b| a.id().cmp(b.id()));
    values
}

/// Splits configured metadata into the recognised first-class keys and a
/// JSON blob of everything user-defined.
fn split_meta(items: &HashMap<String, String>) -> DataStoreResult<EntityMeta> {
    let mut meta = EntityMeta::default();
    let mut user_defined: BTreeMap<&str, &str> = BTreeMap::new();
    for (key, value) in items {
        match key.as_str() {
            "title" => meta.title = Some(value.clone()),
            "description" => meta.description = Some(value.clone()),
            "URL" => meta.url = Some(value.clone()),
            _ => {
                user_defined.insert(key, value);
            }
        }
    }
    meta.user_defined = Some(serde_json::to_string(&user_defined)?);
    Ok(meta)
}

/// Mean of the recorded elapsed-time samples, falling back to the
/// configured execution time limit.
fn mean_elapsed_time(tdef: &TaskDefData) -> Option<f64> {
    if !tdef.elapsed_times.is_empty() {
        let sum: f64 = tdef.elapsed_times.iter().sum();
        return Some(sum / tdef.elapsed_times.len() as f64);
    }
    tdef.execution_time_limit
}

fn satisfied_label(satisfied: bool) -> &'static str {
    if satisfied {
        "satisfied"
    } else {
        "NOT satisfied"
    }
}

/// Which buffer holds the family proxy a child id is appended to.
enum FamilySlot {
    Updated,
    Added,
}

/// Manages one workflow's data store and its delta synchronization.
#[derive(Debug, Clone, Default)]
pub struct DataStoreMgr {
    workflow_id: String,
    ancestors: HashMap<String, Vec<String>>,
    descendants: HashMap<String, Vec<String>>,
    parents: HashMap<String, Vec<String>>,
    pool_points: BTreeSet<CyclePoint>,
    min_point: Option<CyclePoint>,
    max_point: Option<CyclePoint>,
    /// Edge adjacency by cycle point only: source point to target points.
    edge_points: HashMap<CyclePoint, BTreeSet<CyclePoint>>,
    /// Families flagged for state rollup.
    state_update_families: HashSet<String>,
    /// Families already rolled up this pass.
    updated_state_families: HashSet<String>,
    store: DataStore,
    added: EntityBuffers,
    updated: EntityBuffers,
    deltas: DeltaSet,
    /// Set when the store diverges from its last published state.
    pub updates_pending: bool,
    publish_deltas: Vec<PublishedDelta>,
}

impl DataStoreMgr {
    /// Creates a manager for the workflow owned by `owner` named `name`.
    pub fn new(owner: &str, name: &str) -> Self {
        Self::with_workflow_id(identity::workflow_id(owner, name))
    }

    fn with_workflow_id(workflow_id: String) -> Self {
        Self {
            workflow_id,
            ..Self::default()
        }
    }

    /// The workflow id this store is authoritative for.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Read access to the authoritative store.
    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Oldest cycle point in the pool.
    pub fn min_point(&self) -> Option<&CyclePoint> {
        self.min_point.as_ref()
    }

    /// Newest cycle point in the pool.
    pub fn max_point(&self) -> Option<&CyclePoint> {
        self.max_point.as_ref()
    }

    /// Edge adjacency by cycle point.
    pub fn edge_points(&self) -> &HashMap<CyclePoint, BTreeSet<CyclePoint>> {
        &self.edge_points
    }

    /// First-parent ancestry, as captured at the last (re)generation.
    pub fn ancestors(&self) -> &HashMap<String, Vec<String>> {
        &self.ancestors
    }

    /// First-parent descendants, as captured at the last (re)generation.
    pub fn descendants(&self) -> &HashMap<String, Vec<String>> {
        &self.descendants
    }

    /// Full parent lists, as captured at the last (re)generation.
    pub fn parents(&self) -> &HashMap<String, Vec<String>> {
        &self.parents
    }

    /// The latest publishable bundle.
    pub fn publish_deltas(&self) -> &[PublishedDelta] {
        &self.publish_deltas
    }

    /// Initiates or rebuilds the data model on start, restart or reload.
    ///
    /// With `reloaded` set, all component state is dropped and regenerated
    /// from the (new) configuration, and stale task-job references are
    /// reconciled against the job pool.
    pub fn initiate_data_model(
        &mut self,
        ctx: &SchedulerContext<'_>,
        job_pool: &mut JobPool,
        reloaded: bool,
    ) -> DataStoreResult<()> {
        if reloaded {
            *self = Self::with_workflow_id(self.workflow_id.clone());
        }
        info!(workflow = %self.workflow_id, reloaded, "initiating data model");

        self.generate_definition_elements(ctx)?;
        self.increment_graph_elements(ctx, job_pool)?;

        if reloaded {
            let new_tasks: HashSet<String> =
                self.added.task_proxies.keys().cloned().collect();
            let stale: Vec<String> = job_pool
                .task_jobs
                .keys()
                .filter(|tp_id| !new_tasks.contains(*tp_id))
                .cloned()
                .collect();
            for tp_id in stale {
                job_pool.remove_task_jobs(&tp_id);
            }
            for (tp_id, tproxy) in self.added.task_proxies.iter_mut() {
                tproxy.jobs =
                    job_pool.task_jobs.get(tp_id).cloned().unwrap_or_default();
            }
            job_pool.reload_deltas();
        }

        self.update_workflow(ctx);
        self.apply_deltas(job_pool, reloaded);
        self.updates_pending = false;
        job_pool.updates_pending = false;

        self.publish_deltas = self.collect_publish_deltas()?;
        self.clear_deltas();
        Ok(())
    }

    /// Reflects one iteration's workflow changes in the data structure:
    /// graph increment, dynamic updates, summary, apply, publish, clear.
    pub fn update_data_structure(
        &mut self,
        ctx: &SchedulerContext<'_>,
        job_pool: &mut JobPool,
        updated_tasks: &[LiveTask],
    ) -> DataStoreResult<()> {
        self.increment_graph_elements(ctx, job_pool)?;
        self.update_dynamic_elements(ctx, job_pool, updated_tasks)?;

        if self.updates_pending {
            self.update_workflow(ctx);
        }
        if self.updates_pending || job_pool.updates_pending {
            self.apply_deltas(job_pool, false);
            self.updates_pending = false;
            job_pool.updates_pending = false;
        }

        self.publish_deltas = self.collect_publish_deltas()?;
        self.clear_deltas();
        Ok(())
    }

    /// Generates the static definition elements (tasks, families and the
    /// workflow singleton) from configuration.
    fn generate_definition_elements(
        &mut self,
        ctx: &SchedulerContext<'_>,
    ) -> DataStoreResult<()> {
        let config = ctx.config;
        let update_time = wallclock_now();
        let ancestors = config.first_parent_ancestors().clone();
        let descendants = config.first_parent_descendants().clone();
        let parents = config.parent_lists().clone();

        self.added.workflow.id = self.workflow_id.clone();
        self.added.workflow.set_stamp(update_time);

        let mut graph = WorkflowGraph {
            leaves: config.leaves().to_vec(),
            feet: config.feet().to_vec(),
            ..WorkflowGraph::default()
        };
        let mut polling: Vec<_> = config.polling_tasks().values().cloned().collect();
        polling.sort_by(|a, b| a.local_proxy.cmp(&b.local_proxy));
        graph.workflow_polling_tasks = polling;
        self.added.workflow.graph = Some(graph);

        // Definition elements for graphed tasks.
        let mut task_names: Vec<&String> = config.task_defs().keys().collect();
        task_names.sort();
        for name in task_names {
            let tdef = &config.task_defs()[name];
            let chain = ancestors
                .get(name)
                .ok_or_else(|| DataStoreError::MissingAncestry(name.clone()))?;
            let t_id = identity::def_id(&self.workflow_id, name);
            let mut task = Task {
                id: t_id.clone(),
                stamp: Some(identity::stamp(&t_id, update_time)),
                name: Some(name.clone()),
                depth: Some(chain.len() as i32 - 1),
                ..Task::default()
            };
            task.namespace = tdef.namespace_hierarchy.clone();
            task.first_parent = chain
                .get(1)
                .map(|parent| identity::def_id(&self.workflow_id, parent));
            task.meta = Some(split_meta(&tdef.meta)?);
            task.mean_elapsed_time = mean_elapsed_time(tdef);
            if let Some(parent_list) = parents.get(name) {
                task.parents = parent_list
                    .iter()
                    .map(|parent| identity::def_id(&self.workflow_id, parent))
                    .collect();
            }
            self.added.tasks.insert(t_id, task);
        }

        // Family definition elements for the first-parent ancestors of
        // graphed tasks. Root is generated like any other ancestor.
        let empty_meta = HashMap::new();
        let mut chain_keys: Vec<&String> = ancestors.keys().collect();
        chain_keys.sort();
        for key in chain_keys {
            for name in &ancestors[key] {
                if key == name {
                    continue;
                }
                let f_id = identity::def_id(&self.workflow_id, name);
                if self.added.families.contains_key(&f_id) {
                    continue;
                }
                let chain = ancestors
                    .get(name)
                    .ok_or_else(|| DataStoreError::MissingAncestry(name.clone()))?;
                let mut family = Family {
                    id: f_id.clone(),
                    stamp: Some(identity::stamp(&f_id, update_time)),
                    name: Some(name.clone()),
                    depth: Some(chain.len() as i32 - 1),
                    ..Family::default()
                };
                family.meta = Some(split_meta(
                    config.family_meta(name).unwrap_or(&empty_meta),
                )?);
                if let Some(parent_list) = parents.get(name) {
                    family.parents = parent_list
                        .iter()
                        .map(|parent| identity::def_id(&self.workflow_id, parent))
                        .collect();
                }
                family.first_parent = chain
                    .get(1)
                    .map(|parent| identity::def_id(&self.workflow_id, parent));
                self.added.families.insert(f_id, family);
            }
        }

        // Wire child relationships through each first parent.
        let mut child_names: Vec<&String> = parents.keys().collect();
        child_names.sort();
        for name in child_names {
            let parent_list = &parents[name];
            let Some(first) = parent_list.first() else {
                continue;
            };
            let f_id = identity::def_id(&self.workflow_id, first);
            let ch_id = identity::def_id(&self.workflow_id, name);
            if let Some(family) = self.added.families.get_mut(&f_id) {
                if config.task_defs().contains_key(name) {
                    family.child_tasks.push(ch_id);
                } else {
                    family.child_families.push(ch_id);
                }
            }
        }

        // Static fields of the workflow singleton.
        let workflow = &mut self.added.workflow;
        workflow.api_version = Some(API_VERSION);
        workflow.engine_version = Some(ENGINE_VERSION.to_string());
        workflow.name = Some(ctx.info.name.clone());
        workflow.owner = Some(ctx.info.owner.clone());
        workflow.host = Some(ctx.info.host.clone());
        workflow.port = Some(ctx.info.port.unwrap_or(-1));
        workflow.pub_port = Some(ctx.info.pub_port.unwrap_or(-1));
        workflow.meta = Some(split_meta(config.workflow_meta())?);
        workflow.tree_depth = Some(
            config
                .pruned_first_parent_ancestors()
                .values()
                .map(|chain| chain.len())
                .max()
                .unwrap_or(1) as i32
                - 1,
        );
        workflow.time_zone_info = Some(time_zone_info(config.utc_mode()));
        workflow.run_mode = Some(config.run_mode().to_string());
        workflow.cycling_mode = Some(config.cycling_mode().to_string());
        workflow.workflow_log_dir = Some(ctx.info.workflow_log_dir.clone());
        workflow.job_log_names =
            JOB_LOG_NAMES.iter().map(|name| name.to_string()).collect();
        workflow.ns_def_order = config.ns_defn_order().to_vec();
        workflow.broadcasts = Some(ctx.broadcasts.to_string());

        let mut task_ids: Vec<String> = self.added.tasks.keys().cloned().collect();
        task_ids.sort();
        workflow.tasks = task_ids;
        let mut family_ids: Vec<String> =
            self.added.families.keys().cloned().collect();
        family_ids.sort();
        workflow.families = family_ids;

        self.ancestors = ancestors;
        self.descendants = descendants;
        self.parents = parents;
        Ok(())
    }

    /// Creates a ghost task proxy populated with static data, if absent.
    fn generate_ghost_task(
        &mut self,
        t_id: &str,
        tp_id: &str,
        point: &str,
    ) -> DataStoreResult<()> {
        if self.store.task_proxies.contains_key(tp_id)
            || self.added.task_proxies.contains_key(tp_id)
        {
            return Ok(());
        }

        let taskdef = self
            .store
            .tasks
            .get(t_id)
            .or_else(|| self.added.tasks.get(t_id))
            .ok_or_else(|| DataStoreError::MissingDefinition(t_id.to_string()))?;
        let name = taskdef.name.clone().unwrap_or_default();
        let depth = taskdef.depth;
        let namespace = taskdef.namespace.clone();

        let update_time = wallclock_now();
        let chain = self
            .ancestors
            .get(&name)
            .ok_or_else(|| DataStoreError::MissingAncestry(name.clone()))?;
        let ancestor_ids: Vec<String> = chain
            .iter()
            .filter(|a_name| *a_name != &name)
            .map(|a_name| identity::proxy_id(&self.workflow_id, point, a_name))
            .collect();
        let first_parent = ancestor_ids.first().cloned();

        let tproxy = TaskProxy {
            id: tp_id.to_string(),
            stamp: Some(identity::stamp(tp_id, update_time)),
            task: Some(t_id.to_string()),
            name: Some(name),
            cycle_point: Some(point.to_string()),
            depth,
            namespace,
            ancestors: ancestor_ids,
            first_parent: first_parent.clone(),
            ..TaskProxy::default()
        };
        self.added.task_proxies.insert(tp_id.to_string(), tproxy);
        self.updated.workflow.task_proxies.push(tp_id.to_string());
        self.updated
            .tasks
            .entry(t_id.to_string())
            .or_insert_with(|| Task {
                id: t_id.to_string(),
                stamp: Some(identity::stamp(t_id, update_time)),
                ..Task::default()
            })
            .proxies
            .push(tp_id.to_string());

        if let Some(fp_id) = first_parent {
            self.generate_ghost_family(&fp_id, None, Some(tp_id))?;
        }
        Ok(())
    }

    /// Ensures a family proxy exists for the given id, recursing up the
    /// first-parent chain to root, and registers the requesting child.
    fn generate_ghost_family(
        &mut self,
        fp_id: &str,
        child_fam: Option<&str>,
        child_task: Option<&str>,
    ) -> DataStoreResult<()> {
        let slot = if self.store.family_proxies.contains_key(fp_id) {
            self.updated
                .family_proxies
                .entry(fp_id.to_string())
                .or_insert_with(|| FamilyProxy::partial(fp_id));
            FamilySlot::Updated
        } else if self.added.family_proxies.contains_key(fp_id) {
            FamilySlot::Added
        } else {
            let update_time = wallclock_now();
            let (point, name) = identity::proxy_id_parts(fp_id)
                .map(|(point, name)| (point.to_string(), name.to_string()))
                .ok_or_else(|| DataStoreError::MalformedId(fp_id.to_string()))?;
            let f_id = identity::def_id(&self.workflow_id, &name);
            let fam = self
                .store
                .families
                .get(&f_id)
                .or_else(|| self.added.families.get(&f_id))
                .ok_or_else(|| DataStoreError::MissingDefinition(f_id.clone()))?;
            let fam_name = fam.name.clone().unwrap_or_else(|| name.clone());
            let fam_depth = fam.depth;

            let chain = self
                .ancestors
                .get(&fam_name)
                .ok_or_else(|| DataStoreError::MissingAncestry(fam_name.clone()))?;
            let ancestor_ids: Vec<String> = chain
                .iter()
                .filter(|a_name| *a_name != &fam_name)
                .map(|a_name| identity::proxy_id(&self.workflow_id, &point, a_name))
                .collect();
            // An empty chain terminates at root.
            let first_parent = ancestor_ids.first().cloned();

            let fproxy = FamilyProxy {
                id: fp_id.to_string(),
                stamp: Some(identity::stamp(fp_id, update_time)),
                family: Some(f_id.clone()),
                name: Some(fam_name),
                cycle_point: Some(point),
                depth: fam_depth,
                ancestors: ancestor_ids,
                first_parent: first_parent.clone(),
                ..FamilyProxy::default()
            };
            self.added.family_proxies.insert(fp_id.to_string(), fproxy);

            let f_entry = self
                .updated
                .families
                .entry(f_id.clone())
                .or_insert_with(|| Family::partial(&f_id));
            f_entry.stamp = Some(identity::stamp(&f_id, update_time));
            f_entry.proxies.push(fp_id.to_string());
            self.updated.workflow.family_proxies.push(fp_id.to_string());

            if let Some(parent_id) = first_parent {
                self.generate_ghost_family(&parent_id, Some(fp_id), None)?;
            }
            FamilySlot::Added
        };

        let parent = match slot {
            FamilySlot::Updated => self.updated.family_proxies.get_mut(fp_id),
            FamilySlot::Added => self.added.family_proxies.get_mut(fp_id),
        };
        if let Some(parent) = parent {
            match (child_fam, child_task) {
                (Some(fam_id), _) => {
                    if !parent.child_families.iter().any(|c| c == fam_id) {
                        parent.child_families.push(fam_id.to_string());
                    }
                }
                (None, Some(task_id)) => {
                    parent.child_tasks.push(task_id.to_string());
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    /// Generates edges and ghost nodes for the cycle point range
    /// `[start, stop]`.
    fn generate_graph_elements(
        &mut self,
        ctx: &SchedulerContext<'_>,
        start: &CyclePoint,
        stop: &CyclePoint,
    ) -> DataStoreResult<()> {
        if self.pool_points.is_empty() {
            return Ok(());
        }

        let mut new_edges: Vec<String> = Vec::new();
        for edge in ctx.config.graph_edges(start, stop) {
            let Some(s_node) = edge.source.as_deref() else {
                continue;
            };
            let Some((s_name, s_point)) = identity::split_node(s_node) else {
                continue;
            };
            let s_valid = identity::is_valid_node(s_node);
            let s_pool_point =
                s_valid && self.pool_points.contains(&CyclePoint::new(s_point));

            let t_info = edge.target.as_deref().and_then(|t_node| {
                identity::split_node(t_node)
                    .map(|(t_name, t_point)| (t_node, t_name, t_point))
            });
            let t_valid = t_info
                .map(|(t_node, _, _)| identity::is_valid_node(t_node))
                .unwrap_or(false);
            let t_pool_point = t_valid
                && t_info
                    .map(|(_, _, t_point)| {
                        self.pool_points.contains(&CyclePoint::new(t_point))
                    })
                    .unwrap_or(false);

            // Proceed only when an endpoint's point is in the task pool.
            if !s_pool_point && !t_pool_point {
                continue;
            }

            let source_id = identity::proxy_id(&self.workflow_id, s_point, s_name);
            let s_point_cls = CyclePoint::new(s_point);

            // A valid source is added before any target check, as it may
            // be an isolate with no outgoing edges.
            if s_valid {
                let s_task_id = identity::def_id(&self.workflow_id, s_name);
                self.edge_points.entry(s_point_cls.clone()).or_default();
                self.generate_ghost_task(&s_task_id, &source_id, s_point)?;
            }
            // Edges are only created for valid targets.
            if t_valid {
                let Some((t_node, t_name, t_point)) = t_info else {
                    continue;
                };
                let target_id =
                    identity::proxy_id(&self.workflow_id, t_point, t_name);
                let t_task_id = identity::def_id(&self.workflow_id, t_name);
                self.edge_points
                    .entry(s_point_cls.clone())
                    .or_default()
                    .insert(CyclePoint::new(t_point));
                self.generate_ghost_task(&t_task_id, &target_id, t_point)?;

                let e_id = identity::edge_id(&self.workflow_id, s_node, t_node);
                self.added.edges.insert(
                    e_id.clone(),
                    Edge {
                        id: e_id.clone(),
                        source: Some(source_id.clone()),
                        target: Some(target_id.clone()),
                        suicide: Some(edge.suicide),
                        cond: Some(edge.cond),
                        ..Edge::default()
                    },
                );
                new_edges.push(e_id.clone());

                // Edge ids on the node elements, for resolver reference.
                self.updated
                    .task_proxies
                    .entry(target_id.clone())
                    .or_insert_with(|| TaskProxy::partial(&target_id))
                    .edges
                    .push(e_id.clone());
                if s_valid {
                    self.updated
                        .task_proxies
                        .entry(source_id.clone())
                        .or_insert_with(|| TaskProxy::partial(&source_id))
                        .edges
                        .push(e_id.clone());
                }
            }
        }

        if !new_edges.is_empty() {
            self.updated
                .workflow
                .graph
                .get_or_insert_with(WorkflowGraph::default)
                .edges
                .extend(new_edges);
        }
        Ok(())
    }

    /// Generates and/or prunes graph elements against the current pool.
    ///
    /// Edges are incremented pointwise for each cycle point new to the
    /// pool, which also accommodates historical task insertion in gaps.
    /// A cycle point is pruned when it is neither in the pool nor a
    /// source or target point of the current edge set, keeping a buffer
    /// of sources and targets around the pool.
    pub fn increment_graph_elements(
        &mut self,
        ctx: &SchedulerContext<'_>,
        job_pool: &mut JobPool,
    ) -> DataStoreResult<()> {
        let old_points = std::mem::replace(&mut self.pool_points, ctx.pool.points.clone());
        // No action until the pool is initiated.
        if self.pool_points.is_empty() {
            return Ok(());
        }

        let new_points: Vec<CyclePoint> =
            self.pool_points.difference(&old_points).cloned().collect();
        for point in &new_points {
            self.generate_graph_elements(ctx, point, point)?;
        }
        // Extrema follow the pool on any membership change, including a
        // slide that only drops points.
        if self.pool_points != old_points {
            self.min_point = self.pool_points.iter().next().cloned();
            self.max_point = self.pool_points.iter().next_back().cloned();
        }

        let mut prune_points: HashSet<String> = HashSet::new();
        let source_points: Vec<CyclePoint> =
            self.edge_points.keys().cloned().collect();
        for s_point in source_points {
            let Some(t_points) = self.edge_points.get(&s_point) else {
                continue;
            };
            if !self.pool_points.contains(&s_point)
                && t_points.is_disjoint(&self.pool_points)
            {
                prune_points.insert(s_point.to_string());
                prune_points.extend(t_points.iter().map(|p| p.to_string()));
                self.edge_points.remove(&s_point);
                continue;
            }
            let stale: Vec<CyclePoint> = t_points
                .difference(&self.pool_points)
                .cloned()
                .collect();
            if !stale.is_empty() {
                prune_points.extend(stale.iter().map(|p| p.to_string()));
                if let Some(t_points) = self.edge_points.get_mut(&s_point) {
                    for point in &stale {
                        t_points.remove(point);
                    }
                }
            }
        }

        if !prune_points.is_empty() {
            self.prune_points(&prune_points, job_pool);
        }
        if !new_points.is_empty() || !prune_points.is_empty() {
            self.updates_pending = true;
        }
        Ok(())
    }

    /// Schedules all nodes and edges of the given cycle points for
    /// pruning, and their jobs for removal from the job pool.
    fn prune_points(&mut self, point_strings: &HashSet<String>, job_pool: &mut JobPool) {
        let mut node_ids: HashSet<String> = HashSet::new();
        for (tp_id, tproxy) in &self.store.task_proxies {
            let in_points = tproxy
                .cycle_point
                .as_deref()
                .map(|point| point_strings.contains(point))
                .unwrap_or(false);
            if in_points {
                node_ids.insert(tp_id.clone());
                self.deltas.task_proxies.pruned.push(tp_id.clone());
                job_pool.remove_task_jobs(tp_id);
            }
        }
        for (fp_id, fproxy) in &self.store.family_proxies {
            let in_points = fproxy
                .cycle_point
                .as_deref()
                .map(|point| point_strings.contains(point))
                .unwrap_or(false);
            if in_points {
                self.deltas.family_proxies.pruned.push(fp_id.clone());
            }
        }
        for (e_id, edge) in &self.store.edges {
            let source_gone = edge
                .source
                .as_ref()
                .map(|id| node_ids.contains(id))
                .unwrap_or(false);
            let target_gone = edge
                .target
                .as_ref()
                .map(|id| node_ids.contains(id))
                .unwrap_or(false);
            if source_gone || target_gone {
                self.deltas.edges.pruned.push(e_id.clone());
            }
        }
        self.deltas.task_proxies.pruned.sort_unstable();
        self.deltas.family_proxies.pruned.sort_unstable();
        self.deltas.edges.pruned.sort_unstable();
        info!(
            points = point_strings.len(),
            task_proxies = self.deltas.task_proxies.pruned.len(),
            "pruned data-store cycle points",
        );
    }

    /// Transcribes dynamic fields from live tasks and rolls families up.
    pub fn update_dynamic_elements(
        &mut self,
        ctx: &SchedulerContext<'_>,
        job_pool: &JobPool,
        updated_tasks: &[LiveTask],
    ) -> DataStoreResult<()> {
        if updated_tasks.is_empty() {
            return Ok(());
        }
        self.update_task_proxies(ctx, job_pool, updated_tasks)?;
        self.update_family_proxies();
        self.updates_pending = true;
        Ok(())
    }

    /// Updates dynamic fields of task proxies from live pool tasks.
    fn update_task_proxies(
        &mut self,
        ctx: &SchedulerContext<'_>,
        job_pool: &JobPool,
        updated_tasks: &[LiveTask],
    ) -> DataStoreResult<()> {
        let update_time = wallclock_now();
        let mut task_names: BTreeSet<String> = BTreeSet::new();

        for itask in updated_tasks {
            let tp_id = identity::proxy_id(
                &self.workflow_id,
                &itask.cycle_point,
                &itask.name,
            );
            let Some(known) = self
                .store
                .task_proxies
                .get(&tp_id)
                .or_else(|| self.added.task_proxies.get(&tp_id))
            else {
                // Definition may have been removed by reload.
                debug!(id = %tp_id, "unknown task proxy in dynamic update");
                continue;
            };
            task_names.insert(itask.name.clone());
            if let Some(first_parent) = &known.first_parent {
                self.state_update_families.insert(first_parent.clone());
            }
            let known_jobs: Vec<String> = self
                .store
                .task_proxies
                .get(&tp_id)
                .map(|tproxy| tproxy.jobs.clone())
                .unwrap_or_default();

            let mut outputs: BTreeMap<&str, bool> = BTreeMap::new();
            for (trigger, is_completed) in &itask.outputs {
                outputs.insert(trigger, *is_completed);
            }
            let mut extras: BTreeMap<String, Value> = BTreeMap::new();
            if let Some(clock) = &itask.clock_trigger {
                extras.insert(
                    "Clock trigger time reached".to_string(),
                    Value::Bool(clock.satisfied),
                );
                extras.insert(
                    "Triggers at".to_string(),
                    Value::String(clock.trigger_time.clone()),
                );
            }
            for trigger in &itask.external_triggers {
                extras.insert(
                    format!("External trigger \"{}\"", trigger.label),
                    Value::String(satisfied_label(trigger.satisfied).to_string()),
                );
            }
            for xtrigger in &itask.xtriggers {
                extras.insert(
                    format!("xtrigger \"{} = {}\"", xtrigger.label, xtrigger.signature),
                    Value::String(satisfied_label(xtrigger.satisfied).to_string()),
                );
            }

            let tp_delta = self
                .updated
                .task_proxies
                .entry(tp_id.clone())
                .or_insert_with(|| TaskProxy::partial(&tp_id));
            tp_delta.stamp = Some(identity::stamp(&tp_id, update_time));
            tp_delta.state = Some(itask.state);
            tp_delta.is_held = Some(itask.is_held);
            tp_delta.flow_label = Some(itask.flow_label.clone());
            tp_delta.job_submits = Some(itask.submit_num);
            tp_delta.latest_message = Some(itask.latest_message.clone());
            tp_delta.jobs = job_pool
                .task_jobs
                .get(&tp_id)
                .map(|j_ids| {
                    j_ids
                        .iter()
                        .filter(|j_id| !known_jobs.contains(j_id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            tp_delta.prerequisites = itask.prerequisites.clone();
            tp_delta.outputs = Some(serde_json::to_string(&outputs)?);
            tp_delta.extras = Some(serde_json::to_string(&extras)?);
        }

        // Recalculate affected task definitions' mean elapsed time.
        for name in task_names {
            let Some(tdef) = ctx.config.task_defs().get(&name) else {
                continue;
            };
            let Some(elapsed_time) = mean_elapsed_time(tdef) else {
                continue;
            };
            let t_id = identity::def_id(&self.workflow_id, &name);
            let mut t_delta = Task::partial(&t_id);
            t_delta.stamp = Some(identity::stamp(&t_id, update_time));
            t_delta.mean_elapsed_time = Some(elapsed_time);
            self.updated
                .tasks
                .entry(t_id.clone())
                .or_insert_with(|| Task::partial(&t_id))
                .merge_from(&t_delta);
            if let Some(task) = self.store.tasks.get_mut(&t_id) {
                task.merge_from(&t_delta);
            }
        }
        Ok(())
    }

    /// Rolls state and summary up from flagged families to root.
    ///
    /// Tasks with updated state flag their first parent by id. The set is
    /// drained here, each member ascending through its ancestry; every
    /// family is checked at most once per pass.
    pub fn update_family_proxies(&mut self) {
        self.updated_state_families.clear();
        while let Some(fp_id) = self.state_update_families.iter().next().cloned() {
            self.family_ascent_point_update(&fp_id);
        }
    }

    /// Updates the given family after its unchecked child families, then
    /// flags its own first parent.
    fn family_ascent_point_update(&mut self, fp_id: &str) {
        let Some(fam_node) = self
            .store
            .family_proxies
            .get(fp_id)
            .or_else(|| self.added.family_proxies.get(fp_id))
        else {
            debug!(id = fp_id, "unknown family proxy in rollup");
            self.state_update_families.remove(fp_id);
            return;
        };
        let child_families = fam_node.child_families.clone();
        let child_tasks = fam_node.child_tasks.clone();
        let first_parent = fam_node.first_parent.clone();

        let unchecked: Vec<String> = child_families
            .iter()
            .filter(|child_id| !self.updated_state_families.contains(*child_id))
            .cloned()
            .collect();
        for child_id in &unchecked {
            self.family_ascent_point_update(child_id);
        }

        if !self.state_update_families.contains(fp_id) {
            return;
        }

        // Gather child states for counts and the held total, preferring
        // this pass's updates over the (not yet merged) store view.
        let mut state_counter: BTreeMap<TaskStatus, i64> = BTreeMap::new();
        let mut is_held_total: i64 = 0;
        for child_id in &child_families {
            let child_node = self
                .updated
                .family_proxies
                .get(child_id)
                .or_else(|| self.store.family_proxies.get(child_id));
            if let Some(child_node) = child_node {
                is_held_total += child_node.is_held_total.unwrap_or(0);
                for (state, count) in &child_node.state_totals {
                    *state_counter.entry(*state).or_insert(0) += count;
                }
            }
        }
        for tp_id in &child_tasks {
            let tp_node = self
                .updated
                .task_proxies
                .get(tp_id)
                .or_else(|| self.store.task_proxies.get(tp_id));
            if let Some(tp_node) = tp_node {
                if let Some(state) = tp_node.state {
                    *state_counter.entry(state).or_insert(0) += 1;
                }
                if tp_node.is_held == Some(true) {
                    is_held_total += 1;
                }
            }
        }

        let mut fp_delta = FamilyProxy::partial(fp_id);
        fp_delta.stamp = Some(identity::stamp(fp_id, wallclock_now()));
        fp_delta.state = group_state(state_counter.keys().copied());
        fp_delta.is_held = Some(is_held_total > 0);
        fp_delta.is_held_total = Some(is_held_total);
        fp_delta.states = state_counter.keys().copied().collect();
        fp_delta.state_totals = state_counter.into_iter().collect();
        self.updated
            .family_proxies
            .entry(fp_id.to_string())
            .or_insert_with(|| FamilyProxy::partial(fp_id))
            .merge_from(&fp_delta);

        // Mark checked before the parent family's own ascent.
        self.updated_state_families.insert(fp_id.to_string());
        if let Some(parent_id) = first_parent {
            self.state_update_families.insert(parent_id);
        }
        self.state_update_families.remove(fp_id);
    }

    /// Updates the workflow singleton's status and state totals from the
    /// root family proxies.
    pub fn update_workflow(&mut self, ctx: &SchedulerContext<'_>) {
        let update_time = wallclock_now();

        let root_ids: BTreeSet<String> = self
            .store
            .family_proxies
            .values()
            .chain(self.added.family_proxies.values())
            .filter(|fproxy| fproxy.name.as_deref() == Some(ROOT_FAMILY))
            .map(|fproxy| fproxy.id.clone())
            .collect();

        let mut state_counter: BTreeMap<TaskStatus, i64> = BTreeMap::new();
        let mut is_held_total: i64 = 0;
        for root_id in &root_ids {
            let root_node = self
                .updated
                .family_proxies
                .get(root_id)
                .or_else(|| self.store.family_proxies.get(root_id))
                .or_else(|| self.added.family_proxies.get(root_id));
            let Some(root_node) = root_node else {
                continue;
            };
            if root_node.state.is_none() {
                continue;
            }
            is_held_total += root_node.is_held_total.unwrap_or(0);
            for (state, count) in &root_node.state_totals {
                *state_counter.entry(*state).or_insert(0) += count;
            }
        }

        let workflow = &mut self.updated.workflow;
        workflow.id = self.workflow_id.clone();
        workflow.set_stamp(update_time);
        workflow.states = state_counter.keys().copied().collect();
        workflow.state_totals = state_counter.into_iter().collect();
        workflow.is_held_total = Some(is_held_total);
        workflow.status = Some(ctx.status.status.clone());
        workflow.status_msg = Some(ctx.status.message.clone());

        if let Some(point) = &self.min_point {
            workflow.oldest_cycle_point = Some(point.to_string());
        }
        if let Some(point) = &self.max_point {
            workflow.newest_cycle_point = Some(point.to_string());
        }
        if let Some(point) = &ctx.pool.max_runahead_point {
            workflow.newest_runahead_cycle_point = Some(point.to_string());
        }
    }

    /// Re-dumps the broadcast snapshot on a change event.
    pub fn delta_broadcast(&mut self, broadcasts: &Value) {
        self.updated.workflow.broadcasts = Some(broadcasts.to_string());
        self.updates_pending = true;
    }

    /// Gathers the accumulated buffers into delta messages, applies them
    /// to the authoritative store, and stamps each non-empty message with
    /// the update time and a store-slice checksum.
    pub fn apply_deltas(&mut self, job_pool: &mut JobPool, reloaded: bool) {
        // Job deltas are copied in by value from the job pool.
        self.deltas
            .jobs
            .pruned
            .extend(job_pool.pruned.iter().cloned());
        self.added.jobs = job_pool.added.clone();
        self.updated.jobs = job_pool.updated.clone();
        if !self.added.jobs.is_empty() {
            let mut j_ids: Vec<String> = self.added.jobs.keys().cloned().collect();
            j_ids.sort_unstable();
            self.updated.workflow.jobs.extend(j_ids);
        }

        // Fold the buffers into the cumulative delta messages.
        self.deltas.edges.added.extend(sorted_values(&self.added.edges));
        self.deltas
            .families
            .added
            .extend(sorted_values(&self.added.families));
        self.deltas
            .family_proxies
            .added
            .extend(sorted_values(&self.added.family_proxies));
        self.deltas.jobs.added.extend(sorted_values(&self.added.jobs));
        self.deltas.tasks.added.extend(sorted_values(&self.added.tasks));
        self.deltas
            .task_proxies
            .added
            .extend(sorted_values(&self.added.task_proxies));
        if self.added.workflow.is_set() {
            self.deltas.workflow.added = Some(self.added.workflow.clone());
        }

        self.deltas.edges.updated.extend(sorted_values(&self.updated.edges));
        self.deltas
            .families
            .updated
            .extend(sorted_values(&self.updated.families));
        self.deltas
            .family_proxies
            .updated
            .extend(sorted_values(&self.updated.family_proxies));
        self.deltas.jobs.updated.extend(sorted_values(&self.updated.jobs));
        self.deltas.tasks.updated.extend(sorted_values(&self.updated.tasks));
        self.deltas
            .task_proxies
            .updated
            .extend(sorted_values(&self.updated.task_proxies));
        if self.updated.workflow.is_set() {
            self.deltas.workflow.updated = Some(self.updated.workflow.clone());
        }

        // Apply to the local store.
        if !self.deltas.edges.is_empty() {
            self.deltas.edges.reloaded = reloaded;
            self.store.apply_edge_deltas(&self.deltas.edges);
        }
        if !self.deltas.families.is_empty() {
            self.deltas.families.reloaded = reloaded;
            self.store.apply_family_deltas(&self.deltas.families);
        }
        if !self.deltas.family_proxies.is_empty() {
            self.deltas.family_proxies.reloaded = reloaded;
            self.store
                .apply_family_proxy_deltas(&self.deltas.family_proxies);
        }
        if !self.deltas.jobs.is_empty() {
            self.deltas.jobs.reloaded = reloaded;
            self.store.apply_job_deltas(&self.deltas.jobs);
        }
        if !self.deltas.tasks.is_empty() {
            self.deltas.tasks.reloaded = reloaded;
            self.store.apply_task_deltas(&self.deltas.tasks);
        }
        if !self.deltas.task_proxies.is_empty() {
            self.deltas.task_proxies.reloaded = reloaded;
            self.store.apply_task_proxy_deltas(&self.deltas.task_proxies);
        }
        if !self.deltas.workflow.is_empty() {
            self.deltas.workflow.reloaded = reloaded;
            self.store.apply_workflow_deltas(&self.deltas.workflow);
        }

        // Construct checksums on the deltas for export.
        let update_time = wallclock_now();
        if !self.deltas.edges.is_empty() {
            self.deltas.edges.time = Some(update_time);
            self.deltas.edges.checksum =
                Some(cadence_schema::slice_checksum(&self.store.edges));
        }
        if !self.deltas.families.is_empty() {
            self.deltas.families.time = Some(update_time);
            self.deltas.families.checksum =
                Some(cadence_schema::slice_checksum(&self.store.families));
        }
        if !self.deltas.family_proxies.is_empty() {
            self.deltas.family_proxies.time = Some(update_time);
            self.deltas.family_proxies.checksum = Some(
                cadence_schema::slice_checksum(&self.store.family_proxies),
            );
        }
        if !self.deltas.jobs.is_empty() {
            self.deltas.jobs.time = Some(update_time);
            self.deltas.jobs.checksum =
                Some(cadence_schema::slice_checksum(&self.store.jobs));
        }
        if !self.deltas.tasks.is_empty() {
            self.deltas.tasks.time = Some(update_time);
            self.deltas.tasks.checksum =
                Some(cadence_schema::slice_checksum(&self.store.tasks));
        }
        if !self.deltas.task_proxies.is_empty() {
            self.deltas.task_proxies.time = Some(update_time);
            self.deltas.task_proxies.checksum =
                Some(cadence_schema::slice_checksum(&self.store.task_proxies));
        }
        if !self.deltas.workflow.is_empty() {
            self.deltas.workflow.time = Some(update_time);
        }

        // Job pool changes are cleared once applied here.
        job_pool.clear_deltas();
    }

    /// Clears all delta buffers. Called after application and publishing.
    pub fn clear_deltas(&mut self) {
        self.deltas.clear();
        self.added.clear();
        self.updated.clear();
    }

    /// Serializes each non-empty per-kind delta plus the combined
    /// all-deltas aggregate into a publishable bundle.
    fn collect_publish_deltas(&self) -> DataStoreResult<Vec<PublishedDelta>> {
        let mut bundle: Vec<PublishedDelta> = Vec::new();
        let mut all = AllDeltas::default();

        if !self.deltas.edges.is_empty() {
            bundle.push(PublishedDelta {
                topic: EntityKind::Edges.as_str().to_string(),
                payload: serde_json::to_vec(&self.deltas.edges)?,
            });
            all.edges = Some(self.deltas.edges.clone());
        }
        if !self.deltas.families.is_empty() {
            bundle.push(PublishedDelta {
                topic: EntityKind::Families.as_str().to_string(),
                payload: serde_json::to_vec(&self.deltas.families)?,
            });
            all.families = Some(self.deltas.families.clone());
        }
        if !self.deltas.family_proxies.is_empty() {
            bundle.push(PublishedDelta {
                topic: EntityKind::FamilyProxies.as_str().to_string(),
                payload: serde_json::to_vec(&self.deltas.family_proxies)?,
            });
            all.family_proxies = Some(self.deltas.family_proxies.clone());
        }
        if !self.deltas.jobs.is_empty() {
            bundle.push(PublishedDelta {
                topic: EntityKind::Jobs.as_str().to_string(),
                payload: serde_json::to_vec(&self.deltas.jobs)?,
            });
            all.jobs = Some(self.deltas.jobs.clone());
        }
        if !self.deltas.tasks.is_empty() {
            bundle.push(PublishedDelta {
                topic: EntityKind::Tasks.as_str().to_string(),
                payload: serde_json::to_vec(&self.deltas.tasks)?,
            });
            all.tasks = Some(self.deltas.tasks.clone());
        }
        if !self.deltas.task_proxies.is_empty() {
            bundle.push(PublishedDelta {
                topic: EntityKind::TaskProxies.as_str().to_string(),
                payload: serde_json::to_vec(&self.deltas.task_proxies)?,
            });
            all.task_proxies = Some(self.deltas.task_proxies.clone());
        }
        if !self.deltas.workflow.is_empty() {
            bundle.push(PublishedDelta {
                topic: EntityKind::Workflow.as_str().to_string(),
                payload: serde_json::to_vec(&self.deltas.workflow)?,
            });
            all.workflow = Some(self.deltas.workflow.clone());
        }

        bundle.push(PublishedDelta {
            topic: ALL_DELTAS_TOPIC.to_string(),
            payload: serde_json::to_vec(&all)?,
        });
        Ok(bundle)
    }

    /// Gathers the whole store into a full-snapshot message.
    pub fn get_entire_workflow(&self) -> cadence_schema::EntireWorkflow {
        self.store.entire_workflow()
    }

    /// Returns a delta of the given kind whose `added` bucket carries the
    /// entire current slice, for initial sync of a new subscriber.
    pub fn get_data_elements(&self, kind: EntityKind) -> DeltaMessage {
        let time = self.store.workflow.last_updated;
        match kind {
            EntityKind::Edges => DeltaMessage::Edges(Deltas {
                time,
                added: sorted_values(&self.store.edges),
                ..Deltas::default()
            }),
            EntityKind::Families => DeltaMessage::Families(Deltas {
                time,
                added: sorted_values(&self.store.families),
                ..Deltas::default()
            }),
            EntityKind::FamilyProxies => DeltaMessage::FamilyProxies(Deltas {
                time,
                added: sorted_values(&self.store.family_proxies),
                ..Deltas::default()
            }),
            EntityKind::Jobs => DeltaMessage::Jobs(Deltas {
                time,
                added: sorted_values(&self.store.jobs),
                ..Deltas::default()
            }),
            EntityKind::Tasks => DeltaMessage::Tasks(Deltas {
                time,
                added: sorted_values(&self.store.tasks),
                ..Deltas::default()
            }),
            EntityKind::TaskProxies => DeltaMessage::TaskProxies(Deltas {
                time,
                added: sorted_values(&self.store.task_proxies),
                ..Deltas::default()
            }),
            EntityKind::Workflow => DeltaMessage::Workflow(WorkflowDeltas {
                time,
                added: Some(self.store.workflow.clone()),
                ..WorkflowDeltas::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_meta_separates_recognised_keys() {
        let mut items = HashMap::new();
        items.insert("title".to_string(), "Tides".to_string());
        items.insert("URL".to_string(), "https://example.org".to_string());
        items.insert("colour".to_string(), "blue".to_string());
        let meta = split_meta(&items).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Tides"));
        assert_eq!(meta.url.as_deref(), Some("https://example.org"));
        assert_eq!(meta.user_defined.as_deref(), Some(r#"{"colour":"blue"}"#));
    }

    #[test]
    fn test_mean_elapsed_time_prefers_samples() {
        let tdef = TaskDefData {
            elapsed_times: vec![10.0, 20.0],
            execution_time_limit: Some(99.0),
            ..TaskDefData::default()
        };
        assert_eq!(mean_elapsed_time(&tdef), Some(15.0));
    }

    #[test]
    fn test_mean_elapsed_time_falls_back_to_limit() {
        let tdef = TaskDefData {
            execution_time_limit: Some(99.0),
            ..TaskDefData::default()
        };
        assert_eq!(mean_elapsed_time(&tdef), Some(99.0));
        assert_eq!(mean_elapsed_time(&TaskDefData::default()), None);
    }
}
