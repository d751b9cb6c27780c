mod args;
mod janitor;
mod leader;
mod termination;

use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3Builder, Credentials as S3Credentials, Region};
use aws_sdk_s3::Client as S3Client;
use clap::Parser;
use owo_colors::OwoColorize;
use uuid::Uuid;

use runforge_common::{db, metrics::maybe_spawn_metrics_server, redis as redis_pool, shutdown::shutdown_signal};
use runforge_core::{
    load_pricing_table, BillingGuard, GpuRetryPolicy, Launcher, PipelineConfig,
    PostgresCreditsLedger, PostgresRunStore, RunPodProvider, S3ObjectStore, SshRemoteShellAdapter,
};

use crate::args::WorkerArgs;
use crate::janitor::Janitor;
use crate::leader::{LeaseLock, LeaseLockParams};
use crate::termination::TerminationWorker;

fn build_s3_client(args: &runforge_common::args::ObjectStoreArgs) -> S3Client {
    let creds =
        S3Credentials::new(&args.aws_access_key_id, &args.aws_secret_access_key, None, None, "cli");
    let mut builder =
        S3Builder::new().credentials_provider(creds).region(Region::new(args.s3_region.clone()));
    if let Some(endpoint) = args.s3_endpoint.as_deref() {
        builder = builder.endpoint_url(endpoint.to_string());
    }
    let config = builder.force_path_style(true).behavior_version(BehaviorVersion::latest()).build();
    S3Client::from_conf(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    runforge_common::init();
    let args = WorkerArgs::parse();
    let worker_id = args.worker_id.clone().unwrap_or_else(|| format!("runforge-worker-{}", Uuid::new_v4()));

    let pg_pool = db::init_postgres(&args.postgres)?;
    db::ping(&pg_pool).await?;
    let redis_pool_handle = redis_pool::init_redis(&args.redis)?;
    redis_pool::ping(&redis_pool_handle).await?;

    let store = Arc::new(PostgresRunStore::new(pg_pool.clone()));
    let pod_provider = Arc::new(RunPodProvider::new(
        args.pod_provider.pod_provider_base_url.clone(),
        args.pod_provider.pod_provider_api_key.clone(),
        redis_pool_handle.clone(),
    ));
    let ledger = PostgresCreditsLedger::new(pg_pool);
    let pricing = load_pricing_table(&args.billing.pricing_config_path)?;
    let billing = Arc::new(BillingGuard::new(ledger, pricing));

    let s3_client = build_s3_client(&args.object_store);
    let object_store: Arc<dyn runforge_core::ObjectStore> = Arc::new(S3ObjectStore::new(
        s3_client,
        args.object_store.s3_bucket.clone(),
        args.object_store.s3_key_prefix.clone(),
    ));
    let remote_shell =
        Arc::new(SshRemoteShellAdapter::new(args.pod_provider.ssh_access_key.clone(), object_store));

    let pipeline_config = PipelineConfig {
        gpu_preferences: args.gpu_preferences.clone(),
        pod_image: args.pod_image.clone(),
        provisioning_deadline: Duration::from_secs(args.provisioning_deadline_secs),
        pod_ready_poll_interval: Duration::from_secs(args.pod_ready_poll_interval_secs),
        pod_ready_deadline: Duration::from_secs(args.pod_ready_deadline_secs),
    };
    let launcher = Arc::new(Launcher::new(
        store.clone(),
        pod_provider.clone(),
        billing,
        pipeline_config,
        args.webhook.webhook_public_url.clone(),
    ));
    let gpu_retry = Arc::new(GpuRetryPolicy::new(store.clone(), pod_provider.clone(), launcher));

    let termination_worker = Arc::new(TerminationWorker::new(
        store.clone(),
        pod_provider,
        remote_shell,
        worker_id.clone(),
        Duration::from_secs(args.termination_poll_interval_secs),
        args.termination_pool_size,
        args.termination_channel_capacity,
    ));

    let leadership = LeaseLock::new(
        redis_pool_handle,
        LeaseLockParams {
            holder_id: worker_id.clone(),
            lock_name: "janitor".to_string(),
            lease_ttl: Duration::from_secs(args.leader_lock_ttl_secs),
        },
    );
    let janitor = Arc::new(Janitor::new(
        store,
        gpu_retry,
        leadership,
        Duration::from_secs(args.reconcile_interval_secs),
        Duration::from_secs(args.leader_renew_interval_secs),
        termination_worker.wakeup_handle(),
    ));

    #[cfg(feature = "metrics")]
    maybe_spawn_metrics_server("worker");

    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_for_signal.cancel();
    });

    println!(
        "{} {}",
        "⚙️  runforge-worker starting, id=".green(),
        worker_id.green()
    );
    runforge_common::signal_ready();

    let termination_shutdown = shutdown.clone();
    let termination_task = tokio::spawn(termination_worker.run(termination_shutdown));
    let janitor_shutdown = shutdown.clone();
    let janitor_task = tokio::spawn(janitor.run(janitor_shutdown));

    let _ = tokio::join!(termination_task, janitor_task);
    Ok(())
}
