//! Wire payloads accepted by the webhook ingress (§6). Each struct mirrors
//! the "Payload (key fields)" column of the endpoint table exactly; fields
//! marked optional in the table are `Option<T>` here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageProgressPayload {
    pub stage_id: String,
    pub progress: f64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubstageCompletedPayload {
    pub stage_id: String,
    pub substage_id: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubstageSummaryPayload {
    pub stage_id: String,
    pub substage_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaperGenerationProgressPayload {
    pub stage: String,
    pub progress: f64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactUploadedPayload {
    pub s3_key: String,
    pub artifact_type: String,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewCompletedPayload {
    pub review_type: String,
    pub score: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FigureReviewEntry {
    pub figure_key: String,
    pub score: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FigureReviewsPayload {
    pub reviews: Vec<FigureReviewEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TreeVizStoredPayload {
    pub stage_id: String,
    pub tree_json: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunLogPayload {
    pub line: String,
    pub stream: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodexEventPayload {
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunningCodePayload {
    pub execution_id: String,
    pub code: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageSkipWindowPayload {
    pub stage: String,
    pub open: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunStartedPayload {}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitializationProgressPayload {
    pub phase: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HeartbeatPayload {}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HwStatsPayload {
    pub gpu_util: Option<f64>,
    pub cpu_util: Option<f64>,
    pub mem_used_bytes: Option<i64>,
    pub disk_used_bytes: Option<i64>,
    pub disk_total_bytes: Option<i64>,
    pub partition: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuShortagePayload {
    pub requested_gpu_type: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenUsagePayload {
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub cached_input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunCompletedPayload {
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunFinishedStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunFinishedPayload {
    pub status: RunFinishedStatus,
    pub error_message: Option<String>,
}

/// `POST /research-pipeline/runs` request body. `idea` is the flat JSON
/// object with the original implementation's exact key names (`Name`,
/// `Title`, `Short Hypothesis`, ...) — left as `Value` here so `runforge-types`
/// does not need to depend on `runforge-core`'s `IdeaPayload`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateRunRequest {
    pub idea_version_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub parent_run_id: Option<String>,
    pub container_disk_gb: i32,
    pub volume_disk_gb: i32,
    pub idea: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub webhook_token: String,
}
