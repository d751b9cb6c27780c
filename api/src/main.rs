mod args;
mod auth;
mod routes;
mod state;
mod stream;
mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use owo_colors::OwoColorize;

use runforge_common::{cors, db, metrics::maybe_spawn_metrics_server, redis as redis_pool, shutdown::shutdown_signal};
use runforge_core::{
    load_pricing_table, BillingGuard, EventBus, Launcher, PipelineConfig, PostgresCreditsLedger,
    PostgresRunStore, RunPodProvider,
};

use crate::args::ApiArgs;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    runforge_common::init();
    let args = ApiArgs::parse();

    let pg_pool = db::init_postgres(&args.postgres)?;
    db::ping(&pg_pool).await?;
    let redis_pool_handle = redis_pool::init_redis(&args.redis)?;
    redis_pool::ping(&redis_pool_handle).await?;

    let store = Arc::new(PostgresRunStore::new(pg_pool.clone()));
    let pod_provider = Arc::new(RunPodProvider::new(
        args.pod_provider.pod_provider_base_url.clone(),
        args.pod_provider.pod_provider_api_key.clone(),
        redis_pool_handle,
    ));
    let ledger = PostgresCreditsLedger::new(pg_pool);
    let pricing = load_pricing_table(&args.billing.pricing_config_path)?;
    let billing = Arc::new(BillingGuard::new(ledger, pricing));

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
        billing.clone(),
        pipeline_config,
        args.webhook.webhook_public_url.clone(),
    ));
    let bus = Arc::new(EventBus::new());

    let app_state = AppState { store, billing, launcher, bus };

    #[cfg(feature = "metrics")]
    maybe_spawn_metrics_server("api");

    // Webhook ingress carries no CORS layer: it's machine-to-machine from the
    // pod, never a browser origin (§4.7.1). Run-management and stream
    // endpoints sit behind the dev CORS layer so a browser dashboard can call
    // them directly.
    let webhook_router = axum::Router::new()
        .nest("/research-pipeline/webhooks/{run_id}", webhooks::router())
        .with_state(app_state.clone());

    let public_router = axum::Router::new()
        .route("/research-pipeline/runs", axum::routing::post(routes::create_run))
        .route("/research-pipeline/runs/{run_id}/stop", axum::routing::post(routes::stop_run))
        .route("/research-pipeline/runs/{run_id}/stream", axum::routing::get(stream::stream_run))
        .route("/research-pipeline/runs/{run_id}/snapshot", axum::routing::get(stream::snapshot_run))
        .with_state(app_state)
        .layer(cors::dev());

    let app = axum::Router::new().merge(webhook_router).merge(public_router);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("{} {}", "🌐 runforge-api listening on".green(), addr.to_string().green());

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}
