//! Component F's synchronous half: run creation and user-initiated stop
//! (§4.6, §6).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use runforge_core::{IdeaPayload, LaunchRequest};
use runforge_types::{CreateRunRequest, CreateRunResponse, RunPatch, RunStatus};

use crate::state::AppState;

pub async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<CreateRunResponse>), StatusCode> {
    let idea: IdeaPayload =
        serde_json::from_value(req.idea).map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let launched = state
        .launcher
        .launch(LaunchRequest {
            idea_version_id: req.idea_version_id,
            user_id: req.user_id,
            conversation_id: req.conversation_id,
            parent_run_id: req.parent_run_id,
            container_disk_gb: req.container_disk_gb,
            volume_disk_gb: req.volume_disk_gb,
            idea,
            gpu_preferences_override: None,
        })
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRunResponse {
            run_id: launched.run_id,
            webhook_token: launched.webhook_token,
        }),
    ))
}

/// User-initiated stop (§6): cancels an in-flight provisioning task, or if
/// the pod is already up, enqueues a termination job.
pub async fn stop_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    if state.launcher.cancel_provisioning(&run_id) {
        state
            .store
            .update_run(
                &run_id,
                RunPatch {
                    status: Some(RunStatus::Cancelled),
                    error_message: Some("stopped by user before pod was ready".to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        return Ok(StatusCode::NO_CONTENT);
    }

    state
        .store
        .enqueue_termination(&run_id, "user_stop")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .store
        .append_event(&run_id, "run_stop_requested", serde_json::json!({}), chrono::Utc::now())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}
