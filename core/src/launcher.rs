//! Component F: reserves a run id, generates a webhook credential, seeds the
//! run row, and asynchronously provisions the pod (§4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use owo_colors::OwoColorize;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use runforge_types::RunPatch;

use crate::billing::{BillingGuard, CreditsLedger};
use crate::pod_provider::PodProvider;
use crate::store::RunStore;

/// The idea payload baked into the pod's startup environment, using the
/// original implementation's exact key names (§4.6.1) since the pod's
/// startup script expects this shape on disk as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaPayload {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Short Hypothesis")]
    pub short_hypothesis: String,
    #[serde(rename = "Related Work")]
    pub related_work: String,
    #[serde(rename = "Abstract")]
    pub abstract_text: String,
    #[serde(rename = "Experiments")]
    pub experiments: String,
    #[serde(rename = "Expected Outcome")]
    pub expected_outcome: String,
    #[serde(rename = "Risk Factors and Limitations")]
    pub risk_factors_and_limitations: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub gpu_preferences: Vec<String>,
    pub pod_image: String,
    pub provisioning_deadline: Duration,
    pub pod_ready_poll_interval: Duration,
    pub pod_ready_deadline: Duration,
}

pub struct LaunchRequest {
    pub idea_version_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub parent_run_id: Option<String>,
    pub container_disk_gb: i32,
    pub volume_disk_gb: i32,
    pub idea: IdeaPayload,
    /// Overrides `PipelineConfig::gpu_preferences` for this launch only.
    /// Used by the GPU-shortage retry policy (§4.10) to relaunch on an
    /// alternate preference list without needing a second Launcher.
    pub gpu_preferences_override: Option<Vec<String>>,
}

pub struct LaunchedRun {
    pub run_id: String,
    pub webhook_token: String,
}

pub struct Launcher<S, P, L>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    L: CreditsLedger + 'static,
{
    store: Arc<S>,
    pod_provider: Arc<P>,
    billing: Arc<BillingGuard<L>>,
    config: PipelineConfig,
    webhook_public_url: String,
    /// Registered while a provisioning task is in flight so a user-stop
    /// request can cancel it (§4.6.1 — replaces the original's module-level
    /// `dict[str, threading.Event]`). Shared with the spawned provisioning
    /// task itself so it can deregister on completion.
    cancellations: Arc<DashMap<String, CancellationToken>>,
}

impl<S, P, L> Launcher<S, P, L>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    L: CreditsLedger + 'static,
{
    pub fn new(
        store: Arc<S>,
        pod_provider: Arc<P>,
        billing: Arc<BillingGuard<L>>,
        config: PipelineConfig,
        webhook_public_url: String,
    ) -> Self {
        Self {
            store,
            pod_provider,
            billing,
            config,
            webhook_public_url,
            cancellations: Arc::new(DashMap::new()),
        }
    }

    pub async fn launch(&self, req: LaunchRequest) -> anyhow::Result<LaunchedRun> {
        self.billing
            .enforce_minimum(&req.user_id, minimum_run_credits(), "launch_run")
            .await?;

        let run_id = generate_run_id();
        let webhook_token = generate_webhook_token();
        let webhook_token_hash = hash_token(&webhook_token);
        let start_deadline_at = Utc::now()
            + chrono::Duration::from_std(self.config.provisioning_deadline).unwrap_or_default();

        let idea_payload_json = serde_json::to_value(&req.idea)?;
        self.store
            .create_run(
                &run_id,
                &req.idea_version_id,
                &req.user_id,
                &req.conversation_id,
                req.parent_run_id.as_deref(),
                idea_payload_json,
                &webhook_token_hash,
                req.container_disk_gb,
                req.volume_disk_gb,
                start_deadline_at,
            )
            .await?;
        self.store
            .append_event(&run_id, "run_created", serde_json::json!({}), Utc::now())
            .await?;

        let token = CancellationToken::new();
        self.cancellations.insert(run_id.clone(), token.clone());

        let store = self.store.clone();
        let pod_provider = self.pod_provider.clone();
        let mut config = self.config.clone();
        if let Some(gpu_preferences) = req.gpu_preferences_override {
            config.gpu_preferences = gpu_preferences;
        }
        let webhook_public_url = self.webhook_public_url.clone();
        let run_id_for_task = run_id.clone();
        let webhook_token_for_task = webhook_token.clone();
        let idea = req.idea;
        let container_disk_gb = req.container_disk_gb;
        let volume_disk_gb = req.volume_disk_gb;

        let cancellations = self.cancellations.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                result = provision(
                    &store,
                    &pod_provider,
                    &config,
                    &run_id_for_task,
                    &webhook_public_url,
                    &webhook_token_for_task,
                    &idea,
                    container_disk_gb,
                    volume_disk_gb,
                ) => result,
                _ = token.cancelled() => {
                    println!("{} run={run_id_for_task}", "🚫 Provisioning cancelled by stop request".yellow());
                    return;
                }
            };

            // Provisioning settled on its own (success or failure, not a
            // stop-request cancellation) — this run is no longer cancellable
            // through `cancel_provisioning`.
            cancellations.remove(&run_id_for_task);

            if let Err(err) = result {
                eprintln!("{} run={run_id_for_task} {err}", "❌ Pod provisioning failed:".red());
                let _ = store
                    .update_run(
                        &run_id_for_task,
                        RunPatch {
                            status: Some(runforge_types::RunStatus::Failed),
                            error_message: Some(err.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = store
                    .append_event(
                        &run_id_for_task,
                        "run_provisioning_failed",
                        serde_json::json!({ "error": err.to_string() }),
                        Utc::now(),
                    )
                    .await;
            }
        });

        Ok(LaunchedRun { run_id, webhook_token })
    }

    /// Cancels an in-flight provisioning task for `run_id`, if one is
    /// registered. Returns whether a cancellation was actually delivered.
    pub fn cancel_provisioning(&self, run_id: &str) -> bool {
        if let Some((_, token)) = self.cancellations.remove(run_id) {
            token.cancel();
            true
        } else {
            false
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn provision<S: RunStore, P: PodProvider>(
    store: &S,
    pod_provider: &P,
    config: &PipelineConfig,
    run_id: &str,
    webhook_public_url: &str,
    webhook_token: &str,
    idea: &IdeaPayload,
    container_disk_gb: i32,
    volume_disk_gb: i32,
) -> anyhow::Result<()> {
    let pod_env = build_pod_env(run_id, webhook_public_url, webhook_token, idea)?;
    let startup_command = "bash /workspace/start_research_pipeline.sh";

    let created = pod_provider
        .create_pod(
            run_id,
            &config.pod_image,
            &config.gpu_preferences,
            &pod_env,
            startup_command,
            container_disk_gb,
            volume_disk_gb,
        )
        .await?;

    let ready = pod_provider
        .wait_for_pod_ready(
            &created.pod_id,
            config.pod_ready_poll_interval,
            config.pod_ready_deadline,
        )
        .await?;

    store
        .set_pod_identity(run_id, &created.pod_id, &created.pod_name, &created.gpu_type, created.cost_per_hour)
        .await?;
    store
        .append_event(
            run_id,
            "run_provisioned",
            serde_json::json!({
                "pod_id": created.pod_id,
                "gpu_type": created.gpu_type,
                "public_ip": ready.public_ip,
                "ssh_port": ready.ssh_port,
                "pod_host_id": ready.pod_host_id,
            }),
            Utc::now(),
        )
        .await?;
    println!(
        "{} run={run_id} pod={} gpu={}",
        "✅ Pod ready".green(),
        created.pod_id,
        created.gpu_type
    );
    Ok(())
}

/// Flat JSON idea file plus a YAML pipeline config, matching the pod's
/// startup expectations (§4.6.1).
fn build_pod_env(
    run_id: &str,
    webhook_public_url: &str,
    webhook_token: &str,
    idea: &IdeaPayload,
) -> anyhow::Result<HashMap<String, String>> {
    let idea_json = serde_json::to_string(idea)?;
    let pipeline_config_yaml = serde_yaml::to_string(&serde_json::json!({
        "run_id": run_id,
        "webhook_base_url": format!("{webhook_public_url}/research-pipeline/webhooks/{run_id}"),
    }))?;

    let mut env = HashMap::new();
    env.insert("RUN_ID".to_string(), run_id.to_string());
    env.insert(
        "TELEMETRY_WEBHOOK_URL".to_string(),
        format!("{webhook_public_url}/research-pipeline/webhooks/{run_id}"),
    );
    env.insert("TELEMETRY_WEBHOOK_TOKEN".to_string(), webhook_token.to_string());
    env.insert("IDEA_JSON".to_string(), idea_json);
    env.insert("PIPELINE_CONFIG_YAML".to_string(), pipeline_config_yaml);
    Ok(env)
}

fn generate_run_id() -> String {
    let mut bytes = [0u8; 5];
    rand::rng().fill_bytes(&mut bytes);
    format!("rp-{}", hex::encode(bytes))
}

fn generate_webhook_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn minimum_run_credits() -> rust_decimal::Decimal {
    rust_decimal::Decimal::new(100, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_expected_shape() {
        let id = generate_run_id();
        assert!(id.starts_with("rp-"));
        assert_eq!(id.len(), 13);
    }

    #[test]
    fn hash_token_is_deterministic_sha256() {
        let hash_a = hash_token("secret");
        let hash_b = hash_token("secret");
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a.len(), 64);
    }
}
