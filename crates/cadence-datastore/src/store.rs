//! The authoritative per-workflow store and delta application.
//!
//! Application is also the mirror-side inverse of delta production:
//! a remote store that applies published bundles in order converges to
//! the producer's store.

use std::collections::HashMap;

use tracing::debug;

use cadence_schema::{
    AllDeltas, DataEntity, Deltas, Edge, EntireWorkflow, Family, FamilyProxy,
    Job, Task, TaskProxy, Workflow, WorkflowDeltas,
};

/// Authoritative maps of one workflow's data elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataStore {
    pub edges: HashMap<String, Edge>,
    pub families: HashMap<String, Family>,
    pub family_proxies: HashMap<String, FamilyProxy>,
    pub jobs: HashMap<String, Job>,
    pub tasks: HashMap<String, Task>,
    pub task_proxies: HashMap<String, TaskProxy>,
    pub workflow: Workflow,
}

/// Inserts or replaces full entities by id.
fn assimilate<E: DataEntity>(map: &mut HashMap<String, E>, added: &[E]) {
    for entity in added {
        map.insert(entity.id().to_string(), entity.clone());
    }
}

/// Field-merges partial entities into existing elements. A missing target
/// is logged and skipped so a sync hiccup never fails the batch; a later
/// full resync is the recovery channel.
fn merge_updates<E: DataEntity>(map: &mut HashMap<String, E>, updated: &[E]) {
    for delta in updated {
        match map.get_mut(delta.id()) {
            Some(entity) => {
                entity.clear_overwritten_fields(delta);
                entity.merge_from(delta);
            }
            None => {
                debug!(
                    kind = %E::KIND,
                    id = delta.id(),
                    "missing data-store element on update application",
                );
            }
        }
    }
}

impl DataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an edge delta. Pruned edge ids are also withdrawn from the
    /// workflow graph summary.
    pub fn apply_edge_deltas(&mut self, deltas: &Deltas<Edge>) {
        assimilate(&mut self.edges, &deltas.added);
        merge_updates(&mut self.edges, &deltas.updated);
        for id in &deltas.pruned {
            if self.edges.remove(id).is_none() {
                continue;
            }
            if let Some(graph) = self.workflow.graph.as_mut() {
                graph.edges.retain(|e_id| e_id != id);
            }
        }
    }

    /// Applies a task definition delta.
    pub fn apply_task_deltas(&mut self, deltas: &Deltas<Task>) {
        assimilate(&mut self.tasks, &deltas.added);
        merge_updates(&mut self.tasks, &deltas.updated);
        for id in &deltas.pruned {
            self.tasks.remove(id);
        }
    }

    /// Applies a family definition delta.
    pub fn apply_family_deltas(&mut self, deltas: &Deltas<Family>) {
        assimilate(&mut self.families, &deltas.added);
        merge_updates(&mut self.families, &deltas.updated);
        for id in &deltas.pruned {
            self.families.remove(id);
        }
    }

    /// Applies a job delta.
    pub fn apply_job_deltas(&mut self, deltas: &Deltas<Job>) {
        assimilate(&mut self.jobs, &deltas.added);
        merge_updates(&mut self.jobs, &deltas.updated);
        for id in &deltas.pruned {
            self.jobs.remove(id);
        }
    }

    /// Applies a task proxy delta. Pruning removes the proxy's id from its
    /// owning task definition and from the workflow listing before the
    /// element itself is deleted.
    pub fn apply_task_proxy_deltas(&mut self, deltas: &Deltas<TaskProxy>) {
        assimilate(&mut self.task_proxies, &deltas.added);
        merge_updates(&mut self.task_proxies, &deltas.updated);
        for id in &deltas.pruned {
            let Some(proxy) = self.task_proxies.remove(id) else {
                continue;
            };
            if let Some(task) = proxy
                .task
                .as_ref()
                .and_then(|t_id| self.tasks.get_mut(t_id))
            {
                task.proxies.retain(|p_id| p_id != id);
            }
            self.workflow.task_proxies.retain(|p_id| p_id != id);
        }
    }

    /// Applies a family proxy delta; cross-references are removed as for
    /// task proxies.
    pub fn apply_family_proxy_deltas(&mut self, deltas: &Deltas<FamilyProxy>) {
        assimilate(&mut self.family_proxies, &deltas.added);
        merge_updates(&mut self.family_proxies, &deltas.updated);
        for id in &deltas.pruned {
            let Some(proxy) = self.family_proxies.remove(id) else {
                continue;
            };
            if let Some(family) = proxy
                .family
                .as_ref()
                .and_then(|f_id| self.families.get_mut(f_id))
            {
                family.proxies.retain(|p_id| p_id != id);
            }
            self.workflow.family_proxies.retain(|p_id| p_id != id);
        }
    }

    /// Applies a workflow singleton delta: `added` copies wholesale when
    /// any field is set, `updated` field-merges under the clear rules.
    pub fn apply_workflow_deltas(&mut self, deltas: &WorkflowDeltas) {
        if let Some(added) = &deltas.added {
            if added.is_set() {
                self.workflow = added.clone();
            }
        }
        if let Some(updated) = &deltas.updated {
            self.workflow.clear_overwritten_fields(updated);
            self.workflow.merge_from(updated);
        }
    }

    /// Applies every delta present in a combined message.
    pub fn apply_all_deltas(&mut self, all: &AllDeltas) {
        if let Some(deltas) = &all.edges {
            self.apply_edge_deltas(deltas);
        }
        if let Some(deltas) = &all.families {
            self.apply_family_deltas(deltas);
        }
        if let Some(deltas) = &all.family_proxies {
            self.apply_family_proxy_deltas(deltas);
        }
        if let Some(deltas) = &all.jobs {
            self.apply_job_deltas(deltas);
        }
        if let Some(deltas) = &all.tasks {
            self.apply_task_deltas(deltas);
        }
        if let Some(deltas) = &all.task_proxies {
            self.apply_task_proxy_deltas(deltas);
        }
        if let Some(deltas) = &all.workflow {
            self.apply_workflow_deltas(deltas);
        }
    }

    /// Gathers every element into a full-snapshot message, each collection
    /// sorted by id for deterministic output.
    pub fn entire_workflow(&self) -> EntireWorkflow {
        fn sorted_values<E: DataEntity>(map: &HashMap<String, E>) -> Vec<E> {
            let mut values: Vec<E> = map.values().cloned().collect();
            values.sort_by(|a, b| a.id().cmp(b.id()));
            values
        }

        EntireWorkflow {
            workflow: self.workflow.clone(),
            tasks: sorted_values(&self.tasks),
            task_proxies: sorted_values(&self.task_proxies),
            jobs: sorted_values(&self.jobs),
            families: sorted_values(&self.families),
            family_proxies: sorted_values(&self.family_proxies),
            edges: sorted_values(&self.edges),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_schema::TaskStatus;

    fn seeded_store() -> DataStore {
        let mut store = DataStore::new();
        store.workflow.id = "ida|tides".to_string();
        store.tasks.insert(
            "ida|tides|ebb".to_string(),
            Task {
                id: "ida|tides|ebb".to_string(),
                stamp: Some("ida|tides|ebb@1.0".to_string()),
                name: Some("ebb".to_string()),
                proxies: vec!["ida|tides|1|ebb".to_string()],
                ..Task::default()
            },
        );
        store.task_proxies.insert(
            "ida|tides|1|ebb".to_string(),
            TaskProxy {
                id: "ida|tides|1|ebb".to_string(),
                task: Some("ida|tides|ebb".to_string()),
                cycle_point: Some("1".to_string()),
                ..TaskProxy::default()
            },
        );
        store
            .workflow
            .task_proxies
            .push("ida|tides|1|ebb".to_string());
        store
    }

    #[test]
    fn test_update_merges_into_existing() {
        let mut store = seeded_store();
        let mut delta = TaskProxy::partial("ida|tides|1|ebb");
        delta.state = Some(TaskStatus::Running);
        store.apply_task_proxy_deltas(&Deltas {
            updated: vec![delta],
            ..Deltas::default()
        });
        assert_eq!(
            store.task_proxies["ida|tides|1|ebb"].state,
            Some(TaskStatus::Running)
        );
    }

    #[test]
    fn test_update_missing_target_is_skipped() {
        let mut store = seeded_store();
        let delta = TaskProxy::partial("ida|tides|9|ghost");
        store.apply_task_proxy_deltas(&Deltas {
            updated: vec![delta],
            ..Deltas::default()
        });
        assert!(!store.task_proxies.contains_key("ida|tides|9|ghost"));
    }

    #[test]
    fn test_prune_removes_cross_references() {
        let mut store = seeded_store();
        store.apply_task_proxy_deltas(&Deltas {
            pruned: vec!["ida|tides|1|ebb".to_string()],
            ..Deltas::default()
        });
        assert!(store.task_proxies.is_empty());
        assert!(store.tasks["ida|tides|ebb"].proxies.is_empty());
        assert!(store.workflow.task_proxies.is_empty());
    }

    #[test]
    fn test_prune_edge_updates_graph_summary() {
        let mut store = seeded_store();
        store.edges.insert(
            "ida|tides|ebb.1|flow.1".to_string(),
            Edge {
                id: "ida|tides|ebb.1|flow.1".to_string(),
                ..Edge::default()
            },
        );
        store.workflow.graph = Some(cadence_schema::WorkflowGraph {
            edges: vec!["ida|tides|ebb.1|flow.1".to_string()],
            ..cadence_schema::WorkflowGraph::default()
        });
        store.apply_edge_deltas(&Deltas {
            pruned: vec!["ida|tides|ebb.1|flow.1".to_string()],
            ..Deltas::default()
        });
        assert!(store.edges.is_empty());
        assert!(store.workflow.graph.as_ref().unwrap().edges.is_empty());
    }

    #[test]
    fn test_workflow_added_copies_wholesale() {
        let mut store = DataStore::new();
        let mut workflow = Workflow::default();
        workflow.id = "ida|tides".to_string();
        workflow.status = Some("running".to_string());
        store.apply_workflow_deltas(&WorkflowDeltas {
            added: Some(workflow),
            ..WorkflowDeltas::default()
        });
        assert_eq!(store.workflow.status.as_deref(), Some("running"));
    }
}
