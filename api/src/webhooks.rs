//! Per-endpoint webhook handlers (§4.7, §6). Each handler persists its
//! projection (where one exists), appends an audit `RunEvent`, and publishes
//! a `StreamFrame::RunEvent` to the bus for live subscribers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use runforge_types::{
    ArtifactUploadedPayload, CodexEventPayload, DiskUsageEvent, FigureReviewsPayload,
    GpuShortageEvent, GpuShortagePayload, HeartbeatPayload, HwStatsPayload,
    InitializationProgressPayload, LlmReview, PaperGenerationProgressPayload, RunArtifact,
    RunCompletedPayload, RunEvent, RunFinishedPayload, RunFinishedStatus, RunLog, RunLogPayload,
    RunPatch, RunStartedPayload, RunStatus, RunningCodePayload, StageProgressPayload,
    StageSkipWindowPayload, StreamFrame, SubstageCompletedPayload, SubstageSummaryPayload,
    TokenUsage, TokenUsagePayload, TreeVizStoredPayload, VlmFigureReview,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stage-progress", post(stage_progress))
        .route("/substage-completed", post(substage_completed))
        .route("/substage-summary", post(substage_summary))
        .route("/paper-generation-progress", post(paper_generation_progress))
        .route("/artifact-uploaded", post(artifact_uploaded))
        .route("/review-completed", post(review_completed))
        .route("/figure-reviews", post(figure_reviews))
        .route("/tree-viz-stored", post(tree_viz_stored))
        .route("/run-log", post(run_log))
        .route("/codex-event", post(codex_event))
        .route("/running-code", post(running_code))
        .route("/stage-skip-window", post(stage_skip_window))
        .route("/run-started", post(run_started))
        .route("/initialization-progress", post(initialization_progress))
        .route("/heartbeat", post(heartbeat))
        .route("/hw-stats", post(hw_stats))
        .route("/gpu-shortage", post(gpu_shortage))
        .route("/token-usage", post(token_usage))
        .route("/run-completed", post(run_completed))
        .route("/run-finished", post(run_finished))
        .route_layer(middleware::from_fn(crate::auth::require_webhook_token))
}

fn publish_event(state: &AppState, run_id: &str, event_type: &str, metadata: serde_json::Value) {
    state.bus.publish(run_id, StreamFrame::RunEvent(RunEvent::new(run_id, event_type, metadata)));
}

async fn append_and_publish(
    state: &AppState,
    run_id: &str,
    event_type: &str,
    metadata: serde_json::Value,
) -> Result<(), StatusCode> {
    state
        .store
        .append_event(run_id, event_type, metadata.clone(), Utc::now())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    publish_event(state, run_id, event_type, metadata);
    Ok(())
}

async fn stage_progress(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<StageProgressPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .insert_stage_progress(runforge_types::StageProgress {
            run_id: run_id.clone(),
            stage_id: payload.stage_id.clone(),
            progress: payload.progress,
            message: payload.message.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "stage_progress",
        serde_json::json!({ "stage_id": payload.stage_id, "progress": payload.progress }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn substage_completed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<SubstageCompletedPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .insert_substage_completed(runforge_types::SubstageCompleted {
            run_id: run_id.clone(),
            stage_id: payload.stage_id.clone(),
            substage_id: payload.substage_id.clone(),
            summary: payload.summary.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "substage_completed",
        serde_json::json!({ "stage_id": payload.stage_id, "substage_id": payload.substage_id }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn substage_summary(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<SubstageSummaryPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .insert_substage_summary(runforge_types::SubstageSummary {
            run_id: run_id.clone(),
            stage_id: payload.stage_id.clone(),
            substage_id: payload.substage_id.clone(),
            summary: payload.summary.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "substage_summary",
        serde_json::json!({ "stage_id": payload.stage_id, "substage_id": payload.substage_id }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn paper_generation_progress(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<PaperGenerationProgressPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .insert_paper_generation_progress(runforge_types::PaperGenerationProgress {
            run_id: run_id.clone(),
            stage: payload.stage.clone(),
            progress: payload.progress,
            message: payload.message.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "paper_generation_progress",
        serde_json::json!({ "stage": payload.stage, "progress": payload.progress }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn artifact_uploaded(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<ArtifactUploadedPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .upsert_artifact(RunArtifact {
            run_id: run_id.clone(),
            s3_key: payload.s3_key.clone(),
            artifact_type: payload.artifact_type.clone(),
            size_bytes: payload.size_bytes,
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "artifact_uploaded",
        serde_json::json!({ "s3_key": payload.s3_key, "artifact_type": payload.artifact_type }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn review_completed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<runforge_types::ReviewCompletedPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    let id = state
        .store
        .insert_llm_review(LlmReview {
            run_id: run_id.clone(),
            review_type: payload.review_type.clone(),
            score: payload.score,
            feedback: payload.feedback.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "review_completed",
        serde_json::json!({ "id": id, "review_type": payload.review_type, "score": payload.score }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn figure_reviews(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<FigureReviewsPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    let count = payload.reviews.len();
    let rows = payload
        .reviews
        .into_iter()
        .map(|r| VlmFigureReview {
            run_id: run_id.clone(),
            figure_key: r.figure_key,
            score: r.score,
            feedback: r.feedback,
            occurred_at,
        })
        .collect();
    state
        .store
        .insert_figure_reviews(rows)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(&state, &run_id, "figure_reviews", serde_json::json!({ "count": count })).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn tree_viz_stored(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<TreeVizStoredPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .upsert_tree_viz(runforge_types::TreeViz {
            run_id: run_id.clone(),
            stage_id: payload.stage_id.clone(),
            tree_json: payload.tree_json,
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(&state, &run_id, "tree_viz_stored", serde_json::json!({ "stage_id": payload.stage_id })).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_log(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<RunLogPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .insert_run_log(RunLog {
            run_id: run_id.clone(),
            line: payload.line.clone(),
            stream: payload.stream.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    // No synthesized cost tick accompanies run-log (§6); log lines still get
    // an audit event so the snapshot/stream can replay them.
    append_and_publish(&state, &run_id, "run_log", serde_json::json!({ "stream": payload.stream })).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn codex_event(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<CodexEventPayload>,
) -> Result<StatusCode, StatusCode> {
    append_and_publish(
        &state,
        &run_id,
        "codex_event",
        serde_json::json!({ "event_type": payload.event_type, "payload": payload.payload }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn running_code(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<RunningCodePayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .upsert_code_execution(runforge_types::CodeExecution {
            run_id: run_id.clone(),
            execution_id: payload.execution_id.clone(),
            code: payload.code.clone(),
            status: payload.status.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "running_code",
        serde_json::json!({ "execution_id": payload.execution_id, "status": payload.status }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stage_skip_window(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<StageSkipWindowPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .upsert_stage_skip_window(runforge_types::StageSkipWindow {
            run_id: run_id.clone(),
            stage: payload.stage.clone(),
            open: payload.open,
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "stage_skip_window",
        serde_json::json!({ "stage": payload.stage, "open": payload.open }),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_started(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(_payload): Json<RunStartedPayload>,
) -> Result<StatusCode, StatusCode> {
    // Idempotent: `update_run`'s `started_running_at` patch only takes effect
    // the first time (§3); a replayed `run-started` just appends an event.
    state
        .store
        .update_run(
            &run_id,
            RunPatch {
                status: Some(RunStatus::Running),
                started_running_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(&state, &run_id, "run_started", serde_json::json!({})).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn initialization_progress(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<InitializationProgressPayload>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .update_run(
            &run_id,
            RunPatch { initialization_status: Some(payload.phase.clone()), ..Default::default() },
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(&state, &run_id, "initialization_progress", serde_json::json!({ "phase": payload.phase })).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(_payload): Json<HeartbeatPayload>,
) -> Result<StatusCode, StatusCode> {
    state
        .store
        .update_run(
            &run_id,
            RunPatch {
                last_heartbeat_at: Some(Utc::now()),
                heartbeat_failures: Some(0),
                ..Default::default()
            },
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn hw_stats(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<HwStatsPayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .insert_hw_stats(runforge_types::HwStats {
            run_id: run_id.clone(),
            gpu_util: payload.gpu_util,
            cpu_util: payload.cpu_util,
            mem_used_bytes: payload.mem_used_bytes,
            disk_used_bytes: payload.disk_used_bytes,
            disk_total_bytes: payload.disk_total_bytes,
            partition: payload.partition.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let (Some(used), Some(total)) = (payload.disk_used_bytes, payload.disk_total_bytes) {
        let disk_event = DiskUsageEvent {
            run_id: run_id.clone(),
            used_bytes: used,
            total_bytes: total,
            partition: payload.partition.clone(),
            occurred_at,
        };
        let low = disk_event.is_low_disk();
        state
            .store
            .insert_disk_usage_event(disk_event)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if low {
            append_and_publish(
                &state,
                &run_id,
                "low_disk_space",
                serde_json::json!({ "used_bytes": used, "total_bytes": total }),
            )
            .await?;
        }
    }

    append_and_publish(&state, &run_id, "hw_stats", serde_json::json!({})).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn gpu_shortage(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<GpuShortagePayload>,
) -> Result<StatusCode, StatusCode> {
    let occurred_at = Utc::now();
    state
        .store
        .insert_gpu_shortage_event(GpuShortageEvent {
            run_id: run_id.clone(),
            requested_gpu_type: payload.requested_gpu_type.clone(),
            reason: payload.reason.clone(),
            occurred_at,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "gpu_shortage_detected",
        serde_json::json!({ "requested_gpu_type": payload.requested_gpu_type, "reason": payload.reason }),
    )
    .await?;

    // The relaunch itself is driven by runforge-worker's leader-elected
    // reconciliation loop, not from here: this handler only records the
    // signal so `list_unhandled_gpu_shortages` picks it up.
    Ok(StatusCode::NO_CONTENT)
}

async fn token_usage(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<TokenUsagePayload>,
) -> Result<StatusCode, StatusCode> {
    let run = state.store.get_run(&run_id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .store
        .insert_token_usage(TokenUsage {
            conversation_id: run.conversation_id.clone(),
            run_id: Some(run_id.clone()),
            provider: payload.provider.clone(),
            model: payload.model.clone(),
            input_tokens: payload.input_tokens,
            cached_input_tokens: payload.cached_input_tokens,
            output_tokens: payload.output_tokens,
            created_at: Utc::now(),
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .billing
        .charge_for_llm_usage(
            &run.user_id,
            &run.conversation_id,
            &payload.provider,
            &payload.model,
            payload.input_tokens,
            payload.cached_input_tokens,
            payload.output_tokens,
            "research pipeline LLM token usage",
            Some(&run_id),
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_completed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<RunCompletedPayload>,
) -> Result<StatusCode, StatusCode> {
    // Non-terminal (§9 resolved open question) — informational only.
    append_and_publish(&state, &run_id, "run_completed", serde_json::json!({ "message": payload.message })).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_finished(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(payload): Json<RunFinishedPayload>,
) -> Result<StatusCode, StatusCode> {
    let status = match payload.status {
        RunFinishedStatus::Completed => RunStatus::Completed,
        RunFinishedStatus::Failed => RunStatus::Failed,
        RunFinishedStatus::Cancelled => RunStatus::Cancelled,
    };
    state
        .store
        .update_run(
            &run_id,
            RunPatch {
                status: Some(status),
                error_message: payload.error_message.clone(),
                stopped_running_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .store
        .enqueue_termination(&run_id, "run_finished")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    append_and_publish(
        &state,
        &run_id,
        "status_changed",
        serde_json::json!({ "to_status": status.to_string(), "error_message": payload.error_message }),
    )
    .await?;
    // Closes any live stream immediately rather than waiting for its next
    // heartbeat poll to notice the terminal status (§4.8.1) — the fast path,
    // since this transition happened in this same process.
    state.bus.publish(&run_id, StreamFrame::Complete { run_id: run_id.clone() });
    Ok(StatusCode::NO_CONTENT)
}
