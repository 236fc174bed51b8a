//! # Cadence Schema
//!
//! The typed wire schema of the Cadence cycling workflow platform: data-store
//! entity messages, delta messages, field-merge semantics, the task status
//! vocabulary, and store-slice checksums.
//!
//! Entities are plain serde types mirroring the externally specified wire
//! schema. Partial entities (delta payloads) rely on `Option` presence:
//! an absent scalar never touches the merge target, a present scalar
//! replaces, and repeated fields append. The handful of repeated fields
//! that must be overwritten instead are declared per kind via
//! [`entities::DataEntity::clear_overwritten_fields`].

pub mod deltas;
pub mod entities;
pub mod error;
pub mod state;

pub use deltas::{
    generate_checksum, slice_checksum, AllDeltas, DeltaMessage, Deltas,
    EntireWorkflow, EntityKind, WorkflowDeltas, ALL_DELTAS_TOPIC,
};
pub use entities::{
    DataEntity, Edge, EntityMeta, Family, FamilyProxy, Job, PollingTask,
    PrereqCondition, Prerequisite, Task, TaskProxy, TimeZoneInfo, Workflow,
    WorkflowGraph,
};
pub use error::{SchemaError, SchemaResult};
pub use state::{group_state, TaskStatus};
