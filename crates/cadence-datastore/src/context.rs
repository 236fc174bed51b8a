//! Snapshots of scheduler state handed to the data store each iteration.

use std::collections::BTreeSet;

use chrono::{Local, Offset, Utc};
use serde_json::Value;

use cadence_schema::{Prerequisite, TaskStatus, TimeZoneInfo};

use crate::config::ConfigView;
use crate::point::CyclePoint;

/// Static facts about the running scheduler.
#[derive(Debug, Clone, Default)]
pub struct SchedulerInfo {
    pub owner: String,
    pub name: String,
    pub host: String,
    pub port: Option<i32>,
    pub pub_port: Option<i32>,
    pub workflow_log_dir: String,
}

/// Workflow status line for monitoring clients.
#[derive(Debug, Clone, Default)]
pub struct SuiteStatus {
    pub status: String,
    pub message: String,
}

/// The scheduler pool as seen at one suspension point.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    /// Cycle points currently in the pool.
    pub points: BTreeSet<CyclePoint>,

    /// Maximum point the scheduler may run ahead to.
    pub max_runahead_point: Option<CyclePoint>,
}

/// Clock-trigger state of a live task.
#[derive(Debug, Clone, Default)]
pub struct ClockTrigger {
    pub satisfied: bool,
    /// Absolute trigger time, preformatted by the wall clock source.
    pub trigger_time: String,
}

/// External-trigger state of a live task.
#[derive(Debug, Clone, Default)]
pub struct ExternalTrigger {
    pub label: String,
    pub satisfied: bool,
}

/// Xtrigger state of a live task, with its computed call signature.
#[derive(Debug, Clone, Default)]
pub struct XtriggerState {
    pub label: String,
    pub signature: String,
    pub satisfied: bool,
}

/// Dynamic state of one live task, transcribed from the scheduler pool.
#[derive(Debug, Clone)]
pub struct LiveTask {
    pub name: String,
    pub cycle_point: String,
    pub state: TaskStatus,
    pub is_held: bool,
    pub flow_label: String,
    pub submit_num: i32,
    pub latest_message: String,
    /// Prerequisites already dumped to wire form; empty dumps excluded.
    pub prerequisites: Vec<Prerequisite>,
    /// Output trigger completion, in trigger order.
    pub outputs: Vec<(String, bool)>,
    pub external_triggers: Vec<ExternalTrigger>,
    pub xtriggers: Vec<XtriggerState>,
    pub clock_trigger: Option<ClockTrigger>,
}

/// Bundle of collaborator views passed into each data-store operation.
pub struct SchedulerContext<'a> {
    pub config: &'a dyn ConfigView,
    pub info: &'a SchedulerInfo,
    pub pool: &'a PoolSnapshot,
    pub status: &'a SuiteStatus,
    /// Current broadcast settings snapshot.
    pub broadcasts: &'a Value,
}

/// Current wall clock time as floating-point seconds since the epoch.
pub fn wallclock_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Time zone descriptor for the workflow singleton, UTC or host-local.
pub fn time_zone_info(utc: bool) -> TimeZoneInfo {
    if utc {
        return TimeZoneInfo {
            hours: 0,
            minutes: 0,
            string_basic: "Z".to_string(),
            string_extended: "Z".to_string(),
        };
    }
    let offset_secs = Local::now().offset().fix().local_minus_utc();
    let hours = offset_secs / 3600;
    let minutes = (offset_secs.abs() % 3600) / 60;
    TimeZoneInfo {
        hours,
        minutes,
        string_basic: format!("{hours:+03}{minutes:02}"),
        string_extended: format!("{hours:+03}:{minutes:02}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_time_zone_info() {
        let info = time_zone_info(true);
        assert_eq!(info.hours, 0);
        assert_eq!(info.string_basic, "Z");
    }

    #[test]
    fn test_wallclock_monotonic_enough() {
        let a = wallclock_now();
        let b = wallclock_now();
        assert!(b >= a);
    }
}
