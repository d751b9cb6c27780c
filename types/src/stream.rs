use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::events::RunEvent;
use crate::projections::{
    CodeExecution, HwStats, PaperGenerationProgress, RunArtifact, RunLog, StageProgress,
    StageSkipWindow, SubstageCompleted, SubstageSummary, TreeViz, VlmFigureReview,
};
use crate::run::Run;
use crate::termination::Termination;

/// Full rehydrated view of a run, emitted as the `snapshot` SSE frame and
/// returned verbatim by the plain-JSON snapshot endpoint (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run: Run,
    pub termination: Option<Termination>,
    pub events: Vec<RunEvent>,
    pub stage_progress: Vec<StageProgress>,
    pub substage_completed: Vec<SubstageCompleted>,
    pub substage_summary: Vec<SubstageSummary>,
    pub paper_generation_progress: Vec<PaperGenerationProgress>,
    pub code_executions: Vec<CodeExecution>,
    pub stage_skip_windows: Vec<StageSkipWindow>,
    pub tree_viz: Vec<TreeViz>,
    pub run_logs: Vec<RunLog>,
    pub figure_reviews: Vec<VlmFigureReview>,
    pub artifacts: Vec<RunArtifact>,
    pub hw_stats: Vec<HwStats>,
}

/// One frame on the `/stream` SSE endpoint. `event:` is the serde tag; the
/// wire representation is `event: <tag>\ndata: <json>\n\n`, assembled by the
/// stream handler rather than by this enum's own `Serialize` impl (axum's
/// `sse::Event::event(...).json_data(...)` needs the tag and payload apart).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Snapshot(Box<RunSnapshot>),
    RunEvent(RunEvent),
    Heartbeat { at: DateTime<Utc> },
    HwCostEstimate { elapsed_seconds: i64, estimated_cost_usd: Decimal },
    Complete { run_id: String },
    /// Terminal frame on subscriber-queue overflow (§4.8 Backpressure): sent
    /// once, immediately before the stream closes, so the client knows to
    /// reconnect rather than assume the run silently stopped emitting.
    Error { message: String },
}

impl StreamFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Snapshot(_) => "snapshot",
            StreamFrame::RunEvent(_) => "run_event",
            StreamFrame::Heartbeat { .. } => "heartbeat",
            StreamFrame::HwCostEstimate { .. } => "hw_cost_estimate",
            StreamFrame::Complete { .. } => "complete",
            StreamFrame::Error { .. } => "error",
        }
    }
}
