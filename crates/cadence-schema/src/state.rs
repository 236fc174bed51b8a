//! Task status vocabulary and group-state aggregation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Status of a task instance or job.
///
/// The declaration order is the canonical display order for state lists;
/// aggregation priority is a separate ordering (see [`group_state`]).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Waiting on prerequisites.
    Waiting,

    /// Queued behind a runtime limit.
    Queued,

    /// Ready for job submission.
    Ready,

    /// Expired without running.
    Expired,

    /// Job submitted, not yet running.
    Submitted,

    /// Job submission failed.
    SubmitFailed,

    /// Awaiting submission retry.
    SubmitRetrying,

    /// Job running.
    Running,

    /// Finished successfully.
    Succeeded,

    /// Finished with failure.
    Failed,

    /// Awaiting execution retry.
    Retrying,
}

impl TaskStatus {
    /// Wire-format name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Queued => "queued",
            TaskStatus::Ready => "ready",
            TaskStatus::Expired => "expired",
            TaskStatus::Submitted => "submitted",
            TaskStatus::SubmitFailed => "submit-failed",
            TaskStatus::SubmitRetrying => "submit-retrying",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskStatus::Waiting),
            "queued" => Ok(TaskStatus::Queued),
            "ready" => Ok(TaskStatus::Ready),
            "expired" => Ok(TaskStatus::Expired),
            "submitted" => Ok(TaskStatus::Submitted),
            "submit-failed" => Ok(TaskStatus::SubmitFailed),
            "submit-retrying" => Ok(TaskStatus::SubmitRetrying),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "retrying" => Ok(TaskStatus::Retrying),
            other => Err(SchemaError::UnknownStatus(other.to_string())),
        }
    }
}

/// Aggregation priority, most urgent first. A group of child statuses is
/// summarised as the highest-priority member present.
const GROUP_STATE_PRIORITY: [TaskStatus; 11] = [
    TaskStatus::SubmitFailed,
    TaskStatus::Failed,
    TaskStatus::Expired,
    TaskStatus::SubmitRetrying,
    TaskStatus::Retrying,
    TaskStatus::Running,
    TaskStatus::Submitted,
    TaskStatus::Ready,
    TaskStatus::Queued,
    TaskStatus::Waiting,
    TaskStatus::Succeeded,
];

/// Selects the canonical aggregate status for a set of child statuses.
///
/// Returns `None` when the set is empty.
pub fn group_state<I>(states: I) -> Option<TaskStatus>
where
    I: IntoIterator<Item = TaskStatus>,
{
    let present: Vec<TaskStatus> = states.into_iter().collect();
    GROUP_STATE_PRIORITY
        .iter()
        .find(|status| present.contains(status))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for status in GROUP_STATE_PRIORITY {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status() {
        assert!("held".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_group_state_priority() {
        let states = [
            TaskStatus::Succeeded,
            TaskStatus::Running,
            TaskStatus::Waiting,
        ];
        assert_eq!(group_state(states), Some(TaskStatus::Running));

        let states = [TaskStatus::Succeeded, TaskStatus::Failed];
        assert_eq!(group_state(states), Some(TaskStatus::Failed));
    }

    #[test]
    fn test_group_state_empty() {
        assert_eq!(group_state([]), None);
    }
}
