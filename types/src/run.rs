use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a [`Run`]. Terminal variants are sticky: once reached,
/// nothing moves a run back to `Pending` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A single submitted research workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub idea_version_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub parent_run_id: Option<String>,
    /// The idea payload baked into the pod's environment at launch,
    /// denormalized onto the run row so a GPU-shortage relaunch (§4.10) can
    /// rebuild an identical pod environment without calling back out to the
    /// (out-of-scope) idea-generation system.
    pub idea_payload: Value,
    pub status: RunStatus,
    pub initialization_status: Option<String>,
    pub pod_id: Option<String>,
    pub pod_name: Option<String>,
    pub gpu_type: Option<String>,
    pub cost_per_hour: Decimal,
    pub public_ip: Option<String>,
    pub ssh_port: Option<i32>,
    pub pod_host_id: Option<String>,
    pub container_disk_gb: i32,
    pub volume_disk_gb: i32,
    pub webhook_token_hash: String,
    pub restart_count: i32,
    pub error_message: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub heartbeat_failures: i32,
    pub start_deadline_at: Option<DateTime<Utc>>,
    pub started_running_at: Option<DateTime<Utc>>,
    pub stopped_running_at: Option<DateTime<Utc>>,
    pub last_billed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whitelisted fields that `update_run` is permitted to patch. Every other
/// field on [`Run`] (notably `webhook_token_hash` and `status` moving out of
/// a terminal state) is rejected by the store, not merely omitted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub initialization_status: Option<String>,
    pub error_message: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub heartbeat_failures: Option<i32>,
    pub started_running_at: Option<DateTime<Utc>>,
    pub stopped_running_at: Option<DateTime<Utc>>,
    pub last_billed_at: Option<DateTime<Utc>>,
    pub restart_count: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_sticky() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            let rendered = status.to_string();
            assert_eq!(RunStatus::from_str(&rendered).unwrap(), status);
        }
    }
}
