use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    pub run_id: String,
    pub stage_id: String,
    pub progress: f64,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstageCompleted {
    pub run_id: String,
    pub stage_id: String,
    pub substage_id: String,
    pub summary: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstageSummary {
    pub run_id: String,
    pub stage_id: String,
    pub substage_id: String,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperGenerationProgress {
    pub run_id: String,
    pub stage: String,
    pub progress: f64,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Upsert key: `execution_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecution {
    pub run_id: String,
    pub execution_id: String,
    pub code: String,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
}

/// Upsert key: `(run_id, stage)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSkipWindow {
    pub run_id: String,
    pub stage: String,
    pub open: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Upsert key: `(run_id, stage_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeViz {
    pub run_id: String,
    pub stage_id: String,
    pub tree_json: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub line: String,
    pub stream: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlmFigureReview {
    pub run_id: String,
    pub figure_key: String,
    pub score: Option<f64>,
    pub feedback: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Insert returns an `id`, carried at the call site rather than on this
/// struct so callers can distinguish "about to insert" from "persisted."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmReview {
    pub run_id: String,
    pub review_type: String,
    pub score: Option<f64>,
    pub feedback: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestNodeSelection {
    pub run_id: String,
    pub stage_id: String,
    pub node_id: String,
    pub metric: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

/// Upsert key: `(run_id, s3_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub run_id: String,
    pub s3_key: String,
    pub artifact_type: String,
    pub size_bytes: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwStats {
    pub run_id: String,
    pub gpu_util: Option<f64>,
    pub cpu_util: Option<f64>,
    pub mem_used_bytes: Option<i64>,
    pub disk_used_bytes: Option<i64>,
    pub disk_total_bytes: Option<i64>,
    pub partition: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
