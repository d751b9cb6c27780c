use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    Requested,
    InProgress,
    Terminated,
    Failed,
}

impl TerminationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TerminationStatus::Terminated | TerminationStatus::Failed)
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationStatus::Requested => "requested",
            TerminationStatus::InProgress => "in_progress",
            TerminationStatus::Terminated => "terminated",
            TerminationStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TerminationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(TerminationStatus::Requested),
            "in_progress" => Ok(TerminationStatus::InProgress),
            "terminated" => Ok(TerminationStatus::Terminated),
            "failed" => Ok(TerminationStatus::Failed),
            other => Err(format!("unknown termination status: {other}")),
        }
    }
}

pub const MAX_TERMINATION_ATTEMPTS: i32 = 3;
pub const TERMINATION_LEASE_SECONDS: i64 = 3000;
pub const TERMINATION_STUCK_SECONDS: i64 = 3600;

/// One row per run, tracking the post-pipeline cleanup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Termination {
    pub run_id: String,
    pub status: TerminationStatus,
    pub trigger: String,
    pub attempts: i32,
    pub artifacts_uploaded_at: Option<DateTime<Utc>>,
    pub pod_terminated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub scheduled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Termination {
    pub fn exhausted(&self) -> bool {
        self.attempts >= MAX_TERMINATION_ATTEMPTS
    }
}
