//! Lifecycle state of a managed generator.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::role::GeneratorRole;

/// Lifecycle phase of a generator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No artifact installed yet.
    Idle,
    /// An artifact download is in progress.
    Downloading,
    /// An artifact is installed and the last operation succeeded.
    Ready,
    /// At least one execution is in flight.
    Executing,
    /// An artifact is installed but the last execution failed.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Downloading => "downloading",
            Phase::Ready => "ready",
            Phase::Executing => "executing",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mutable state guarded by the generator's lock.
///
/// `settled` only ever holds `Idle`, `Ready` or `Failed`; the transient
/// phases are derived from `downloading` and `in_flight`.
#[derive(Debug)]
pub(super) struct GeneratorState {
    pub installed: bool,
    pub source_url: Option<String>,
    pub settled: Phase,
    pub downloading: bool,
    /// Argument lists of executions currently running.
    pub in_flight: HashSet<Vec<String>>,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Version line printed by the resolver self-test.
    pub reported_version: Option<String>,
    /// Last document produced by a playlist run.
    pub last_output: Option<Arc<str>>,
}

impl GeneratorState {
    pub fn new(installed: bool) -> Self {
        Self {
            installed,
            source_url: None,
            settled: if installed { Phase::Ready } else { Phase::Idle },
            downloading: false,
            in_flight: HashSet::new(),
            last_execution_at: None,
            last_error: None,
            reported_version: None,
            last_output: None,
        }
    }

    pub fn phase(&self) -> Phase {
        if !self.in_flight.is_empty() {
            Phase::Executing
        } else if self.downloading {
            Phase::Downloading
        } else {
            self.settled
        }
    }
}

/// Schedule part of a status snapshot, serialized inline with a
/// `schedule_` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    #[serde(rename = "schedule_active")]
    pub active: bool,
    #[serde(rename = "schedule_interval")]
    pub interval: Option<String>,
    #[serde(rename = "schedule_interval_ms")]
    pub interval_ms: Option<u64>,
}

/// Flat, serializable snapshot of a generator instance.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratorStatus {
    pub role: GeneratorRole,
    pub phase: Phase,
    pub running: bool,
    pub artifact_present: bool,
    pub artifact_path: Option<String>,
    pub source_url: Option<String>,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub reported_version: Option<String>,
    pub has_output: bool,
    #[serde(flatten)]
    pub schedule: ScheduleStatus,
}
