//! Component A: durable CRUD over runs, their projections, and the
//! termination queue. See SPEC_FULL.md §4.1 for the contract and §4.1.1 for
//! why the atomic operations are single `UPDATE ... RETURNING` statements
//! rather than application-level transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_postgres::Row;

use runforge_types::{
    BestNodeSelection, CodeExecution, DiskUsageEvent, GpuShortageEvent, HwStats, LlmReview,
    PaperGenerationProgress, PodBillingRecord, PodBillingSummary, Run, RunArtifact, RunEvent,
    RunLog, RunPatch, RunStatus, StageProgress, StageSkipWindow, SubstageCompleted,
    SubstageSummary, Termination, TerminationStatus, TokenUsage, TreeViz, VlmFigureReview,
};

use crate::error::StoreError;

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(
        &self,
        run_id: &str,
        idea_version_id: &str,
        user_id: &str,
        conversation_id: &str,
        parent_run_id: Option<&str>,
        idea_payload: Value,
        webhook_token_hash: &str,
        container_disk_gb: i32,
        volume_disk_gb: i32,
        start_deadline_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Run, StoreError>;

    async fn set_pod_identity(
        &self,
        run_id: &str,
        pod_id: &str,
        pod_name: &str,
        gpu_type: &str,
        cost_per_hour: Decimal,
    ) -> Result<(), StoreError>;

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<(), StoreError>;

    async fn append_event(
        &self,
        run_id: &str,
        event_type: &str,
        metadata: Value,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn list_events(&self, run_id: &str) -> Result<Vec<RunEvent>, StoreError>;

    async fn get_webhook_token_hash(&self, run_id: &str) -> Result<Option<String>, StoreError>;

    async fn insert_stage_progress(&self, row: StageProgress) -> Result<(), StoreError>;
    async fn insert_substage_completed(&self, row: SubstageCompleted) -> Result<(), StoreError>;
    async fn insert_substage_summary(&self, row: SubstageSummary) -> Result<(), StoreError>;
    async fn insert_paper_generation_progress(
        &self,
        row: PaperGenerationProgress,
    ) -> Result<(), StoreError>;
    async fn upsert_code_execution(&self, row: CodeExecution) -> Result<(), StoreError>;
    async fn upsert_tree_viz(&self, row: TreeViz) -> Result<(), StoreError>;
    async fn upsert_stage_skip_window(&self, row: StageSkipWindow) -> Result<(), StoreError>;
    async fn insert_llm_review(&self, row: LlmReview) -> Result<i64, StoreError>;
    async fn upsert_artifact(&self, row: RunArtifact) -> Result<(), StoreError>;
    async fn insert_figure_reviews(&self, rows: Vec<VlmFigureReview>) -> Result<(), StoreError>;
    async fn insert_token_usage(&self, row: TokenUsage) -> Result<(), StoreError>;
    async fn insert_run_log(&self, row: RunLog) -> Result<(), StoreError>;
    async fn insert_hw_stats(&self, row: HwStats) -> Result<(), StoreError>;
    async fn insert_best_node_selection(&self, row: BestNodeSelection) -> Result<(), StoreError>;

    /// Supplemental (§3.1) projections. Each is recorded alongside (not in
    /// place of) the `RunEvent` the ingress handler appends for the same
    /// webhook.
    async fn insert_disk_usage_event(&self, row: DiskUsageEvent) -> Result<(), StoreError>;
    async fn insert_gpu_shortage_event(&self, row: GpuShortageEvent) -> Result<(), StoreError>;
    async fn insert_pod_billing_summary(&self, row: PodBillingSummary) -> Result<(), StoreError>;

    /// The terminal counterpart of `insert_pod_billing_summary`: one row per
    /// pod, written once the termination worker has confirmed `delete_pod`
    /// succeeded, carrying the provider's full billing payload rather than
    /// just the headline amount.
    async fn insert_pod_billing_record(&self, row: PodBillingRecord) -> Result<(), StoreError>;

    /// Runs with a `gpu_shortage_detected` audit event strictly newer than
    /// their most recent `gpu_shortage_retry`/`gpu_shortage_exhausted` event
    /// (or no such event at all) — the GPU-retry trigger's work queue.
    /// Grounded in the audit log rather than a dedicated queue table since
    /// `run_events` already carries exactly this ordering.
    async fn list_unhandled_gpu_shortages(&self) -> Result<Vec<Run>, StoreError>;

    async fn get_snapshot_rows(
        &self,
        run_id: &str,
    ) -> Result<
        (
            Vec<StageProgress>,
            Vec<SubstageCompleted>,
            Vec<SubstageSummary>,
            Vec<PaperGenerationProgress>,
            Vec<CodeExecution>,
            Vec<StageSkipWindow>,
            Vec<TreeViz>,
            Vec<RunLog>,
            Vec<VlmFigureReview>,
            Vec<RunArtifact>,
            Vec<HwStats>,
        ),
        StoreError,
    >;

    async fn enqueue_termination(
        &self,
        run_id: &str,
        trigger: &str,
    ) -> Result<Termination, StoreError>;

    async fn get_termination(&self, run_id: &str) -> Result<Option<Termination>, StoreError>;

    async fn claim_next_termination(
        &self,
        lease_owner: &str,
        lease_seconds: i64,
        stuck_seconds: i64,
    ) -> Result<Option<Termination>, StoreError>;

    async fn mark_termination_artifacts_uploaded(&self, run_id: &str) -> Result<(), StoreError>;
    async fn mark_termination_pod_terminated(&self, run_id: &str) -> Result<(), StoreError>;
    async fn mark_termination_terminated(
        &self,
        run_id: &str,
        attempts: i32,
    ) -> Result<(), StoreError>;
    async fn mark_termination_failed(
        &self,
        run_id: &str,
        attempts: i32,
        error: &str,
    ) -> Result<(), StoreError>;
    async fn reschedule_termination(
        &self,
        run_id: &str,
        attempts: i32,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn mark_stale_pending(&self, run_id: &str) -> Result<(), StoreError>;
    async fn list_stale_pending(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;
}

pub struct PostgresRunStore {
    pool: Pool,
}

impl PostgresRunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn row_to_run(row: &Row) -> Result<Run, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status: RunStatus = status_str
        .parse()
        .map_err(|e: String| StoreError::Conflict(e))?;
    Ok(Run {
        run_id: row.try_get("run_id")?,
        idea_version_id: row.try_get("idea_version_id")?,
        user_id: row.try_get("user_id")?,
        conversation_id: row.try_get("conversation_id")?,
        parent_run_id: row.try_get("parent_run_id")?,
        idea_payload: row.try_get("idea_payload")?,
        status,
        initialization_status: row.try_get("initialization_status")?,
        pod_id: row.try_get("pod_id")?,
        pod_name: row.try_get("pod_name")?,
        gpu_type: row.try_get("gpu_type")?,
        cost_per_hour: row.try_get("cost_per_hour")?,
        public_ip: row.try_get("public_ip")?,
        ssh_port: row.try_get("ssh_port")?,
        pod_host_id: row.try_get("pod_host_id")?,
        container_disk_gb: row.try_get("container_disk_gb")?,
        volume_disk_gb: row.try_get("volume_disk_gb")?,
        webhook_token_hash: row.try_get("webhook_token_hash")?,
        restart_count: row.try_get("restart_count")?,
        error_message: row.try_get("error_message")?,
        last_heartbeat_at: row.try_get("last_heartbeat_at")?,
        heartbeat_failures: row.try_get("heartbeat_failures")?,
        start_deadline_at: row.try_get("start_deadline_at")?,
        started_running_at: row.try_get("started_running_at")?,
        stopped_running_at: row.try_get("stopped_running_at")?,
        last_billed_at: row.try_get("last_billed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_termination(row: &Row) -> Result<Termination, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status: TerminationStatus = status_str
        .parse()
        .map_err(|e: String| StoreError::Conflict(e))?;
    Ok(Termination {
        run_id: row.try_get("run_id")?,
        status,
        trigger: row.try_get("trigger")?,
        attempts: row.try_get("attempts")?,
        artifacts_uploaded_at: row.try_get("artifacts_uploaded_at")?,
        pod_terminated_at: row.try_get("pod_terminated_at")?,
        last_error: row.try_get("last_error")?,
        lease_owner: row.try_get("lease_owner")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        scheduled_at: row.try_get("scheduled_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn create_run(
        &self,
        run_id: &str,
        idea_version_id: &str,
        user_id: &str,
        conversation_id: &str,
        parent_run_id: Option<&str>,
        idea_payload: Value,
        webhook_token_hash: &str,
        container_disk_gb: i32,
        volume_disk_gb: i32,
        start_deadline_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO runs (
                    run_id, idea_version_id, user_id, conversation_id, parent_run_id,
                    idea_payload, status, webhook_token_hash, container_disk_gb, volume_disk_gb,
                    cost_per_hour, restart_count, heartbeat_failures, start_deadline_at,
                    created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, 0, 0, 0, $10, now(), now())",
                &[
                    &run_id,
                    &idea_version_id,
                    &user_id,
                    &conversation_id,
                    &parent_run_id,
                    &idea_payload,
                    &webhook_token_hash,
                    &container_disk_gb,
                    &volume_disk_gb,
                    &start_deadline_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Run, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM runs WHERE run_id = $1", &[&run_id])
            .await?
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        row_to_run(&row)
    }

    async fn set_pod_identity(
        &self,
        run_id: &str,
        pod_id: &str,
        pod_name: &str,
        gpu_type: &str,
        cost_per_hour: Decimal,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE runs SET pod_id = $2, pod_name = $3, gpu_type = $4, cost_per_hour = $5, updated_at = now()
                 WHERE run_id = $1 AND pod_id IS NULL",
                &[&run_id, &pod_id, &pod_name, &gpu_type, &cost_per_hour],
            )
            .await?;
        Ok(())
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<(), StoreError> {
        let client = self.pool.get().await?;

        if let Some(status) = patch.status {
            let updated = client
                .execute(
                    "UPDATE runs SET status = $2, updated_at = now()
                     WHERE run_id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')",
                    &[&run_id, &status.to_string()],
                )
                .await?;
            if updated == 0 {
                let current = self.get_run(run_id).await?;
                if current.status.is_terminal() && status != current.status {
                    return Err(StoreError::Conflict(format!(
                        "run {run_id} is terminal ({}); refusing to move to {status}",
                        current.status
                    )));
                }
            }
        }
        if let Some(v) = patch.initialization_status {
            client
                .execute(
                    "UPDATE runs SET initialization_status = $2, updated_at = now() WHERE run_id = $1",
                    &[&run_id, &v],
                )
                .await?;
        }
        if let Some(v) = patch.error_message {
            client
                .execute(
                    "UPDATE runs SET error_message = $2, updated_at = now() WHERE run_id = $1",
                    &[&run_id, &v],
                )
                .await?;
        }
        if let Some(v) = patch.last_heartbeat_at {
            client
                .execute(
                    "UPDATE runs SET last_heartbeat_at = $2, updated_at = now() WHERE run_id = $1",
                    &[&run_id, &v],
                )
                .await?;
        }
        if let Some(v) = patch.heartbeat_failures {
            client
                .execute(
                    "UPDATE runs SET heartbeat_failures = $2, updated_at = now() WHERE run_id = $1",
                    &[&run_id, &v],
                )
                .await?;
        }
        if let Some(v) = patch.started_running_at {
            client
                .execute(
                    "UPDATE runs SET started_running_at = $2, updated_at = now()
                     WHERE run_id = $1 AND started_running_at IS NULL",
                    &[&run_id, &v],
                )
                .await?;
        }
        if let Some(v) = patch.stopped_running_at {
            client
                .execute(
                    "UPDATE runs SET stopped_running_at = $2, updated_at = now() WHERE run_id = $1",
                    &[&run_id, &v],
                )
                .await?;
        }
        if let Some(v) = patch.last_billed_at {
            client
                .execute(
                    "UPDATE runs SET last_billed_at = $2, updated_at = now() WHERE run_id = $1",
                    &[&run_id, &v],
                )
                .await?;
        }
        if let Some(v) = patch.restart_count {
            client
                .execute(
                    "UPDATE runs SET restart_count = $2, updated_at = now() WHERE run_id = $1",
                    &[&run_id, &v],
                )
                .await?;
        }
        Ok(())
    }

    async fn append_event(
        &self,
        run_id: &str,
        event_type: &str,
        metadata: Value,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO run_events (run_id, event_type, metadata, occurred_at) VALUES ($1, $2, $3, $4)",
                &[&run_id, &event_type, &metadata, &occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn list_events(&self, run_id: &str) -> Result<Vec<RunEvent>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT run_id, event_type, metadata, occurred_at FROM run_events
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(RunEvent {
                    run_id: row.try_get("run_id")?,
                    event_type: row.try_get("event_type")?,
                    metadata: row.try_get("metadata")?,
                    occurred_at: row.try_get("occurred_at")?,
                })
            })
            .collect()
    }

    async fn get_webhook_token_hash(&self, run_id: &str) -> Result<Option<String>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT webhook_token_hash FROM runs WHERE run_id = $1",
                &[&run_id],
            )
            .await?;
        Ok(row.map(|r| r.get("webhook_token_hash")))
    }

    async fn insert_stage_progress(&self, row: StageProgress) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO stage_progress (run_id, stage_id, progress, message, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&row.run_id, &row.stage_id, &row.progress, &row.message, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn insert_substage_completed(&self, row: SubstageCompleted) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO substage_completed (run_id, stage_id, substage_id, summary, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &row.run_id,
                    &row.stage_id,
                    &row.substage_id,
                    &row.summary,
                    &row.occurred_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_substage_summary(&self, row: SubstageSummary) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO substage_summary (run_id, stage_id, substage_id, summary, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &row.run_id,
                    &row.stage_id,
                    &row.substage_id,
                    &row.summary,
                    &row.occurred_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_paper_generation_progress(
        &self,
        row: PaperGenerationProgress,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO paper_generation_progress (run_id, stage, progress, message, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&row.run_id, &row.stage, &row.progress, &row.message, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn upsert_code_execution(&self, row: CodeExecution) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO code_executions (run_id, execution_id, code, status, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (execution_id) DO UPDATE SET
                    code = EXCLUDED.code, status = EXCLUDED.status, occurred_at = EXCLUDED.occurred_at",
                &[
                    &row.run_id,
                    &row.execution_id,
                    &row.code,
                    &row.status,
                    &row.occurred_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn upsert_tree_viz(&self, row: TreeViz) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO tree_viz (run_id, stage_id, tree_json, occurred_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (run_id, stage_id) DO UPDATE SET
                    tree_json = EXCLUDED.tree_json, occurred_at = EXCLUDED.occurred_at",
                &[&row.run_id, &row.stage_id, &row.tree_json, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn upsert_stage_skip_window(&self, row: StageSkipWindow) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO stage_skip_windows (run_id, stage, open, occurred_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (run_id, stage) DO UPDATE SET
                    open = EXCLUDED.open, occurred_at = EXCLUDED.occurred_at",
                &[&row.run_id, &row.stage, &row.open, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn insert_llm_review(&self, row: LlmReview) -> Result<i64, StoreError> {
        let client = self.pool.get().await?;
        let result_row = client
            .query_one(
                "INSERT INTO llm_reviews (run_id, review_type, score, feedback, occurred_at)
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[
                    &row.run_id,
                    &row.review_type,
                    &row.score,
                    &row.feedback,
                    &row.occurred_at,
                ],
            )
            .await?;
        Ok(result_row.get("id"))
    }

    async fn upsert_artifact(&self, row: RunArtifact) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO run_artifacts (run_id, s3_key, artifact_type, size_bytes, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (run_id, s3_key) DO UPDATE SET
                    artifact_type = EXCLUDED.artifact_type,
                    size_bytes = EXCLUDED.size_bytes,
                    occurred_at = EXCLUDED.occurred_at",
                &[
                    &row.run_id,
                    &row.s3_key,
                    &row.artifact_type,
                    &row.size_bytes,
                    &row.occurred_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_figure_reviews(&self, rows: Vec<VlmFigureReview>) -> Result<(), StoreError> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;
        for row in rows {
            txn.execute(
                "INSERT INTO vlm_figure_reviews (run_id, figure_key, score, feedback, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&row.run_id, &row.figure_key, &row.score, &row.feedback, &row.occurred_at],
            )
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn insert_token_usage(&self, row: TokenUsage) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO token_usage (
                    conversation_id, run_id, provider, model,
                    input_tokens, cached_input_tokens, output_tokens, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &row.conversation_id,
                    &row.run_id,
                    &row.provider,
                    &row.model,
                    &row.input_tokens,
                    &row.cached_input_tokens,
                    &row.output_tokens,
                    &row.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_run_log(&self, row: RunLog) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO run_logs (run_id, line, stream, occurred_at) VALUES ($1, $2, $3, $4)",
                &[&row.run_id, &row.line, &row.stream, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn insert_hw_stats(&self, row: HwStats) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO hw_stats (
                    run_id, gpu_util, cpu_util, mem_used_bytes,
                    disk_used_bytes, disk_total_bytes, partition, occurred_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &row.run_id,
                    &row.gpu_util,
                    &row.cpu_util,
                    &row.mem_used_bytes,
                    &row.disk_used_bytes,
                    &row.disk_total_bytes,
                    &row.partition,
                    &row.occurred_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn insert_best_node_selection(&self, row: BestNodeSelection) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO best_node_selections (run_id, stage_id, node_id, metric, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&row.run_id, &row.stage_id, &row.node_id, &row.metric, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn insert_disk_usage_event(&self, row: DiskUsageEvent) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO disk_usage_events (run_id, used_bytes, total_bytes, partition, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&row.run_id, &row.used_bytes, &row.total_bytes, &row.partition, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn insert_gpu_shortage_event(&self, row: GpuShortageEvent) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO gpu_shortage_events (run_id, requested_gpu_type, reason, occurred_at)
                 VALUES ($1, $2, $3, $4)",
                &[&row.run_id, &row.requested_gpu_type, &row.reason, &row.occurred_at],
            )
            .await?;
        Ok(())
    }

    async fn insert_pod_billing_summary(&self, row: PodBillingSummary) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO pod_billing_summaries (run_id, amount_usd, time_billed_ms, observed_at)
                 VALUES ($1, $2, $3, $4)",
                &[&row.run_id, &row.amount_usd, &row.time_billed_ms, &row.observed_at],
            )
            .await?;
        Ok(())
    }

    async fn insert_pod_billing_record(&self, row: PodBillingRecord) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO pod_billing_records (run_id, amount_usd, time_billed_ms, records, context, occurred_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &row.run_id,
                    &row.amount_usd,
                    &row.time_billed_ms,
                    &row.records,
                    &row.context,
                    &row.occurred_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_unhandled_gpu_shortages(&self) -> Result<Vec<Run>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT r.* FROM runs r
                 WHERE EXISTS (
                     SELECT 1 FROM run_events e1
                     WHERE e1.run_id = r.run_id AND e1.event_type = 'gpu_shortage_detected'
                     AND e1.occurred_at > COALESCE(
                         (SELECT MAX(e2.occurred_at) FROM run_events e2
                          WHERE e2.run_id = r.run_id
                          AND e2.event_type IN ('gpu_shortage_retry', 'gpu_shortage_exhausted')),
                         '-infinity'
                     )
                 )
                 ORDER BY r.created_at ASC",
                &[],
            )
            .await?;
        rows.iter().map(row_to_run).collect()
    }

    async fn get_snapshot_rows(
        &self,
        run_id: &str,
    ) -> Result<
        (
            Vec<StageProgress>,
            Vec<SubstageCompleted>,
            Vec<SubstageSummary>,
            Vec<PaperGenerationProgress>,
            Vec<CodeExecution>,
            Vec<StageSkipWindow>,
            Vec<TreeViz>,
            Vec<RunLog>,
            Vec<VlmFigureReview>,
            Vec<RunArtifact>,
            Vec<HwStats>,
        ),
        StoreError,
    > {
        let client = self.pool.get().await?;

        let stage_progress = client
            .query(
                "SELECT run_id, stage_id, progress, message, occurred_at FROM stage_progress
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| StageProgress {
                run_id: r.get("run_id"),
                stage_id: r.get("stage_id"),
                progress: r.get("progress"),
                message: r.get("message"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let substage_completed = client
            .query(
                "SELECT run_id, stage_id, substage_id, summary, occurred_at FROM substage_completed
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| SubstageCompleted {
                run_id: r.get("run_id"),
                stage_id: r.get("stage_id"),
                substage_id: r.get("substage_id"),
                summary: r.get("summary"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let substage_summary = client
            .query(
                "SELECT run_id, stage_id, substage_id, summary, occurred_at FROM substage_summary
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| SubstageSummary {
                run_id: r.get("run_id"),
                stage_id: r.get("stage_id"),
                substage_id: r.get("substage_id"),
                summary: r.get("summary"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let paper_generation_progress = client
            .query(
                "SELECT run_id, stage, progress, message, occurred_at FROM paper_generation_progress
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| PaperGenerationProgress {
                run_id: r.get("run_id"),
                stage: r.get("stage"),
                progress: r.get("progress"),
                message: r.get("message"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let code_executions = client
            .query(
                "SELECT run_id, execution_id, code, status, occurred_at FROM code_executions
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| CodeExecution {
                run_id: r.get("run_id"),
                execution_id: r.get("execution_id"),
                code: r.get("code"),
                status: r.get("status"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let stage_skip_windows = client
            .query(
                "SELECT run_id, stage, open, occurred_at FROM stage_skip_windows
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| StageSkipWindow {
                run_id: r.get("run_id"),
                stage: r.get("stage"),
                open: r.get("open"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let tree_viz = client
            .query(
                "SELECT run_id, stage_id, tree_json, occurred_at FROM tree_viz
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| TreeViz {
                run_id: r.get("run_id"),
                stage_id: r.get("stage_id"),
                tree_json: r.get("tree_json"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let run_logs = client
            .query(
                "SELECT run_id, line, stream, occurred_at FROM run_logs
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| RunLog {
                run_id: r.get("run_id"),
                line: r.get("line"),
                stream: r.get("stream"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let figure_reviews = client
            .query(
                "SELECT run_id, figure_key, score, feedback, occurred_at FROM vlm_figure_reviews
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| VlmFigureReview {
                run_id: r.get("run_id"),
                figure_key: r.get("figure_key"),
                score: r.get("score"),
                feedback: r.get("feedback"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let artifacts = client
            .query(
                "SELECT run_id, s3_key, artifact_type, size_bytes, occurred_at FROM run_artifacts
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| RunArtifact {
                run_id: r.get("run_id"),
                s3_key: r.get("s3_key"),
                artifact_type: r.get("artifact_type"),
                size_bytes: r.get("size_bytes"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        let hw_stats = client
            .query(
                "SELECT run_id, gpu_util, cpu_util, mem_used_bytes, disk_used_bytes,
                        disk_total_bytes, partition, occurred_at FROM hw_stats
                 WHERE run_id = $1 ORDER BY occurred_at ASC",
                &[&run_id],
            )
            .await?
            .iter()
            .map(|r| HwStats {
                run_id: r.get("run_id"),
                gpu_util: r.get("gpu_util"),
                cpu_util: r.get("cpu_util"),
                mem_used_bytes: r.get("mem_used_bytes"),
                disk_used_bytes: r.get("disk_used_bytes"),
                disk_total_bytes: r.get("disk_total_bytes"),
                partition: r.get("partition"),
                occurred_at: r.get("occurred_at"),
            })
            .collect();

        Ok((
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
        ))
    }

    async fn enqueue_termination(
        &self,
        run_id: &str,
        trigger: &str,
    ) -> Result<Termination, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "INSERT INTO terminations (run_id, status, trigger, attempts, scheduled_at, updated_at)
                 VALUES ($1, 'requested', $2, 0, now(), now())
                 ON CONFLICT (run_id) DO UPDATE SET
                    trigger = EXCLUDED.trigger, updated_at = now()
                 WHERE terminations.status NOT IN ('terminated', 'failed')
                 RETURNING *",
                &[&run_id, &trigger],
            )
            .await?;
        match row {
            Some(row) => row_to_termination(&row),
            // The row already exists and is already terminated/failed — a
            // second stop request, or a race between the GPU-retry policy
            // and a user stop on a run that already finished cleanup. Not a
            // conflict worth surfacing: return the existing terminal row.
            None => self
                .get_termination(run_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("termination for run {run_id}"))),
        }
    }

    async fn get_termination(&self, run_id: &str) -> Result<Option<Termination>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM terminations WHERE run_id = $1", &[&run_id])
            .await?;
        row.map(|r| row_to_termination(&r)).transpose()
    }

    async fn claim_next_termination(
        &self,
        lease_owner: &str,
        lease_seconds: i64,
        stuck_seconds: i64,
    ) -> Result<Option<Termination>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "UPDATE terminations SET
                    status = 'in_progress',
                    lease_owner = $1,
                    lease_expires_at = now() + make_interval(secs => $2::double precision),
                    updated_at = now()
                 WHERE run_id = (
                    SELECT run_id FROM terminations
                    WHERE status = 'requested'
                       OR (status = 'in_progress' AND lease_expires_at < now() - make_interval(secs => $3::double precision))
                    ORDER BY scheduled_at ASC
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                 )
                 RETURNING *",
                &[&lease_owner, &(lease_seconds as f64), &(stuck_seconds as f64)],
            )
            .await?;
        row.map(|r| row_to_termination(&r)).transpose()
    }

    async fn mark_termination_artifacts_uploaded(&self, run_id: &str) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE terminations SET artifacts_uploaded_at = now(), updated_at = now() WHERE run_id = $1",
                &[&run_id],
            )
            .await?;
        Ok(())
    }

    async fn mark_termination_pod_terminated(&self, run_id: &str) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE terminations SET pod_terminated_at = now(), updated_at = now() WHERE run_id = $1",
                &[&run_id],
            )
            .await?;
        Ok(())
    }

    async fn mark_termination_terminated(
        &self,
        run_id: &str,
        attempts: i32,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE terminations SET status = 'terminated', attempts = $2,
                    lease_owner = NULL, lease_expires_at = NULL, updated_at = now()
                 WHERE run_id = $1",
                &[&run_id, &attempts],
            )
            .await?;
        Ok(())
    }

    async fn mark_termination_failed(
        &self,
        run_id: &str,
        attempts: i32,
        error: &str,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE terminations SET status = 'failed', attempts = $2, last_error = $3,
                    lease_owner = NULL, lease_expires_at = NULL, updated_at = now()
                 WHERE run_id = $1",
                &[&run_id, &attempts, &error],
            )
            .await?;
        Ok(())
    }

    async fn reschedule_termination(
        &self,
        run_id: &str,
        attempts: i32,
        error: &str,
    ) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE terminations SET status = 'requested', attempts = $2, last_error = $3,
                    lease_owner = NULL, lease_expires_at = NULL, updated_at = now()
                 WHERE run_id = $1",
                &[&run_id, &attempts, &error],
            )
            .await?;
        Ok(())
    }

    async fn mark_stale_pending(&self, run_id: &str) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE runs SET status = 'failed', error_message = 'start deadline exceeded', updated_at = now()
                 WHERE run_id = $1 AND status = 'pending'",
                &[&run_id],
            )
            .await?;
        Ok(())
    }

    async fn list_stale_pending(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT run_id FROM runs WHERE status = 'pending' AND start_deadline_at IS NOT NULL AND start_deadline_at < $1",
                &[&now],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("run_id")).collect())
    }
}
