//! Component J: on a GPU-shortage signal, relaunch the run on an alternate
//! GPU preference list up to a bound, or give up and enqueue termination
//! (§4.10).

use std::sync::Arc;

use chrono::Utc;
use owo_colors::OwoColorize;

use runforge_types::{Run, RunPatch, RunStatus};

use crate::billing::CreditsLedger;
use crate::launcher::{IdeaPayload, LaunchRequest, Launcher};
use crate::pod_provider::PodProvider;
use crate::store::RunStore;

pub const MAX_GPU_RETRIES: i32 = 3;

/// Builds the retry preference list per §4.10's three cases.
///
/// - No prior GPU recorded → the full supported list, provider order.
/// - Prior GPU still supported → retry with only that GPU.
/// - Prior GPU no longer supported → prior first, then the rest of the
///   supported list.
pub fn build_retry_gpu_preferences(
    prior_gpu_type: Option<&str>,
    supported_gpu_types: &[String],
) -> Vec<String> {
    let Some(prior) = prior_gpu_type else {
        return supported_gpu_types.to_vec();
    };

    if supported_gpu_types.iter().any(|g| g == prior) {
        vec![prior.to_string()]
    } else {
        let mut prefs = vec![prior.to_string()];
        prefs.extend(supported_gpu_types.iter().cloned());
        prefs
    }
}

pub struct GpuRetryPolicy<S, P, L>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    L: CreditsLedger + 'static,
{
    store: Arc<S>,
    pod_provider: Arc<P>,
    launcher: Arc<Launcher<S, P, L>>,
}

impl<S, P, L> GpuRetryPolicy<S, P, L>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    L: CreditsLedger + 'static,
{
    pub fn new(store: Arc<S>, pod_provider: Arc<P>, launcher: Arc<Launcher<S, P, L>>) -> Self {
        Self { store, pod_provider, launcher }
    }

    /// Reacts to a `gpu-shortage` webhook for `run`: relaunches on an
    /// alternate preference list, or — once `MAX_GPU_RETRIES` is exceeded —
    /// marks the run `failed` and enqueues termination with
    /// `trigger="gpu_shortage_exhausted"`. The relaunch idea payload is
    /// rebuilt from `run.idea_payload` (denormalized at creation time) rather
    /// than re-fetched from the out-of-scope idea-generation system.
    pub async fn handle_shortage(&self, run: &Run) -> anyhow::Result<()> {
        if run.restart_count >= MAX_GPU_RETRIES {
            println!(
                "{} run={} restart_count={}",
                "🛑 GPU retries exhausted".yellow(),
                run.run_id,
                run.restart_count
            );
            self.store
                .update_run(
                    &run.run_id,
                    RunPatch {
                        status: Some(RunStatus::Failed),
                        error_message: Some("GPU shortage retries exhausted".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            self.store
                .enqueue_termination(&run.run_id, "gpu_shortage_exhausted")
                .await?;
            self.store
                .append_event(
                    &run.run_id,
                    "gpu_shortage_exhausted",
                    serde_json::json!({ "restart_count": run.restart_count }),
                    Utc::now(),
                )
                .await?;
            return Ok(());
        }

        let supported = self.pod_provider.supported_gpu_types().await?;
        let gpu_preferences = build_retry_gpu_preferences(run.gpu_type.as_deref(), &supported);
        let idea: IdeaPayload = serde_json::from_value(run.idea_payload.clone())?;

        let launched = self
            .launcher
            .launch(LaunchRequest {
                idea_version_id: run.idea_version_id.clone(),
                user_id: run.user_id.clone(),
                conversation_id: run.conversation_id.clone(),
                parent_run_id: Some(run.run_id.clone()),
                container_disk_gb: run.container_disk_gb,
                volume_disk_gb: run.volume_disk_gb,
                idea,
                gpu_preferences_override: Some(gpu_preferences),
            })
            .await?;

        self.store
            .update_run(
                &launched.run_id,
                RunPatch {
                    restart_count: Some(run.restart_count + 1),
                    ..Default::default()
                },
            )
            .await?;
        self.store
            .append_event(
                &run.run_id,
                "gpu_shortage_retry",
                serde_json::json!({ "retry_run_id": launched.run_id }),
                Utc::now(),
            )
            .await?;
        println!(
            "{} run={} retry_run={}",
            "🔁 Relaunched on alternate GPU".cyan(),
            run.run_id,
            launched.run_id
        );
        Ok(())
    }

    /// Drains every currently-unhandled GPU-shortage signal. Called from the
    /// worker's leader-elected reconciliation loop (§2.1) rather than from
    /// the webhook ingress path, so a slow relaunch never holds up the
    /// webhook response the pod is waiting on.
    pub async fn poll_and_handle_all(&self) -> anyhow::Result<usize> {
        let runs = self.store.list_unhandled_gpu_shortages().await?;
        let count = runs.len();
        for run in &runs {
            if let Err(err) = self.handle_shortage(run).await {
                eprintln!(
                    "{} run={} {err}",
                    "⚠️  GPU shortage handling failed:".yellow(),
                    run.run_id
                );
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_prior_gpu_uses_full_supported_list() {
        let supported = vec!["A100".to_string(), "H100".to_string()];
        let prefs = build_retry_gpu_preferences(None, &supported);
        assert_eq!(prefs, supported);
    }

    #[test]
    fn prior_gpu_still_supported_retries_with_only_that_gpu() {
        let supported = vec!["A100".to_string(), "H100".to_string()];
        let prefs = build_retry_gpu_preferences(Some("H100"), &supported);
        assert_eq!(prefs, vec!["H100".to_string()]);
    }

    #[test]
    fn prior_gpu_no_longer_supported_tries_it_first_then_rest() {
        let supported = vec!["A100".to_string(), "H100".to_string()];
        let prefs = build_retry_gpu_preferences(Some("V100"), &supported);
        assert_eq!(prefs, vec!["V100".to_string(), "A100".to_string(), "H100".to_string()]);
    }
}
