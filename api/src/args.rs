use clap::Parser;

use runforge_common::args::{BillingArgs, PodProviderArgs, PostgresArgs, RedisArgs, WebhookArgs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ApiArgs {
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    pub port: u16,

    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[command(flatten)]
    pub postgres: PostgresArgs,
    #[command(flatten)]
    pub redis: RedisArgs,
    #[command(flatten)]
    pub pod_provider: PodProviderArgs,
    #[command(flatten)]
    pub webhook: WebhookArgs,
    #[command(flatten)]
    pub billing: BillingArgs,

    /// Pod container image used for every launched run.
    #[arg(long, env = "POD_IMAGE", required = true)]
    pub pod_image: String,
    #[arg(long, env = "GPU_PREFERENCES", value_delimiter = ',', required = true)]
    pub gpu_preferences: Vec<String>,
    #[arg(long, env = "PROVISIONING_DEADLINE_SECS", default_value_t = 600)]
    pub provisioning_deadline_secs: u64,
    #[arg(long, env = "POD_READY_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub pod_ready_poll_interval_secs: u64,
    #[arg(long, env = "POD_READY_DEADLINE_SECS", default_value_t = 300)]
    pub pod_ready_deadline_secs: u64,
}
