//! Component H: the long-lived per-run SSE multiplexer plus its plain-JSON
//! snapshot sibling (§4.8).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures_util::stream::Stream;
use rust_decimal::Decimal;

use runforge_types::{RunSnapshot, RunStatus, StreamFrame};

use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

async fn assemble_snapshot(state: &AppState, run_id: &str) -> Result<RunSnapshot, StatusCode> {
    let run = state.store.get_run(run_id).await.map_err(|_| StatusCode::NOT_FOUND)?;
    let termination = state.store.get_termination(run_id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let events = state.store.list_events(run_id).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let (
        stage_progress,
        substage_completed,
        substage_summary,
        paper_generation_progress,
        code_executions,
        stage_skip_windows,
        tree_viz,
        run_logs,
        figure_reviews,
        artifacts,
        hw_stats,
    ) = state
        .store
        .get_snapshot_rows(run_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(RunSnapshot {
        run,
        termination,
        events,
        stage_progress,
        substage_completed,
        substage_summary,
        paper_generation_progress,
        code_executions,
        stage_skip_windows,
        tree_viz,
        run_logs,
        figure_reviews,
        artifacts,
        hw_stats,
    })
}

pub async fn snapshot_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunSnapshot>, StatusCode> {
    Ok(Json(assemble_snapshot(&state, &run_id).await?))
}

fn hw_cost_estimate(run: &runforge_types::Run) -> Option<StreamFrame> {
    if run.status != RunStatus::Running {
        return None;
    }
    let started_running_at = run.started_running_at?;
    let end = run.stopped_running_at.unwrap_or_else(Utc::now).min(Utc::now());
    let elapsed_seconds = (end - started_running_at).num_seconds().max(0);
    let estimated_cost_usd =
        Decimal::from(elapsed_seconds) * run.cost_per_hour / Decimal::from(3600);
    Some(StreamFrame::HwCostEstimate { elapsed_seconds, estimated_cost_usd })
}

fn to_sse_event(frame: &StreamFrame) -> Event {
    Event::default().event(frame.event_name()).json_data(frame).unwrap_or_else(|_| {
        Event::default().event("error").data("failed to encode frame")
    })
}

pub async fn stream_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    // Subscribe before assembling the snapshot so no bus event published
    // between the two can be missed (§4.8).
    let mut subscription = state.bus.subscribe(&run_id);
    let snapshot = assemble_snapshot(&state, &run_id).await?;

    let stream = async_stream::stream! {
        yield Ok(to_sse_event(&StreamFrame::Snapshot(Box::new(snapshot))));

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                frame = subscription.rx.recv() => {
                    let Some(frame) = frame else {
                        // The bus dropped this subscriber for falling behind
                        // (queue overflow) rather than a normal completion —
                        // tell the client to reconnect instead of silently
                        // going quiet.
                        yield Ok(to_sse_event(&StreamFrame::Error {
                            message: "subscriber queue overflowed, reconnect".to_string(),
                        }));
                        break;
                    };
                    let is_complete = matches!(frame, StreamFrame::Complete { .. });
                    yield Ok(to_sse_event(&frame));
                    if is_complete {
                        break;
                    }
                    if let Ok(run) = state.store.get_run(&run_id).await {
                        if let Some(cost_frame) = hw_cost_estimate(&run) {
                            yield Ok(to_sse_event(&cost_frame));
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(to_sse_event(&StreamFrame::Heartbeat { at: Utc::now() }));
                    if let Ok(run) = state.store.get_run(&run_id).await {
                        if let Some(cost_frame) = hw_cost_estimate(&run) {
                            yield Ok(to_sse_event(&cost_frame));
                        }
                        // Catches terminal transitions made by the worker
                        // process (GPU-retry exhaustion, user stop) that
                        // this process's bus was never told about directly.
                        if run.status.is_terminal() {
                            yield Ok(to_sse_event(&StreamFrame::Complete { run_id: run_id.clone() }));
                            break;
                        }
                    }
                }
            }
        }

        state.bus.unsubscribe(&subscription);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
