use clap::Parser;

use runforge_common::args::{
    BillingArgs, ObjectStoreArgs, PodProviderArgs, PostgresArgs, RedisArgs, WebhookArgs,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct WorkerArgs {
    /// Identity used as the lease holder for both the termination lease
    /// (§4.1) and the janitor leader lock (§2.1). Falls back to a random id
    /// so two replicas never collide by accident.
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

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
    #[command(flatten)]
    pub object_store: ObjectStoreArgs,

    /// Pod container image used when the GPU-shortage retry policy relaunches
    /// a run (the Launcher needs a `PipelineConfig` the same way the API
    /// process does, even though this process never handles `create_run`).
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

    #[arg(long, env = "TERMINATION_POOL_SIZE", default_value_t = 4)]
    pub termination_pool_size: usize,
    #[arg(long, env = "TERMINATION_CHANNEL_CAPACITY", default_value_t = 64)]
    pub termination_channel_capacity: usize,
    #[arg(long, env = "TERMINATION_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub termination_poll_interval_secs: u64,

    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value_t = 30)]
    pub reconcile_interval_secs: u64,
    #[arg(long, env = "LEADER_LOCK_TTL_SECS", default_value_t = 15)]
    pub leader_lock_ttl_secs: u64,
    #[arg(long, env = "LEADER_RENEW_INTERVAL_SECS", default_value_t = 5)]
    pub leader_renew_interval_secs: u64,
}
