use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,
    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,
    #[arg(long, env = "POSTGRES_DATABASE", required = true)]
    pub postgres_database: String,
    #[arg(long, env = "POSTGRES_USERNAME", required = true)]
    pub postgres_username: String,
    #[arg(long, env = "POSTGRES_PASSWORD", required = true)]
    pub postgres_password: String,
    #[arg(long, env = "POSTGRES_CA_CERT")]
    pub postgres_ca_cert: Option<String>,
    #[arg(long, env = "POSTGRES_SSL_MODE", default_value = "prefer")]
    pub postgres_ssl_mode: String,
}

impl PostgresArgs {
    pub fn url_redacted(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}",
            self.postgres_username, self.postgres_host, self.postgres_port, self.postgres_database
        )
    }
}

#[derive(Parser, Debug, Clone)]
pub struct RedisArgs {
    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,
    #[arg(long, env = "REDIS_USERNAME")]
    pub redis_username: Option<String>,
    #[arg(long, env = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,
    #[arg(long, env = "REDIS_PROTO", default_value = "redis")]
    pub redis_proto: String,
}

impl RedisArgs {
    pub fn url(&self) -> String {
        let auth = match (&self.redis_username, &self.redis_password) {
            (Some(u), Some(p)) => format!("{u}:{p}@"),
            (None, Some(p)) => format!(":{p}@"),
            _ => String::new(),
        };
        format!(
            "{}://{}{}:{}",
            self.redis_proto, auth, self.redis_host, self.redis_port
        )
    }

    pub fn url_redacted(&self) -> String {
        format!("{}://{}:{}", self.redis_proto, self.redis_host, self.redis_port)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ObjectStoreArgs {
    #[arg(long, env = "AWS_ACCESS_KEY_ID", required = true)]
    pub aws_access_key_id: String,
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", required = true)]
    pub aws_secret_access_key: String,
    #[arg(long, env = "S3_BUCKET", required = true)]
    pub s3_bucket: String,
    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,
    #[arg(long, env = "S3_KEY_PREFIX", default_value = "")]
    pub s3_key_prefix: String,
}

#[derive(Parser, Debug, Clone)]
pub struct PodProviderArgs {
    #[arg(long, env = "POD_PROVIDER_API_KEY", required = true)]
    pub pod_provider_api_key: String,
    #[arg(long, env = "POD_PROVIDER_BASE_URL", default_value = "https://api.runpod.io/v2")]
    pub pod_provider_base_url: String,
    #[arg(long, env = "RUNPOD_SSH_ACCESS_KEY", required = true)]
    pub ssh_access_key: String,
}

#[derive(Parser, Debug, Clone)]
pub struct WebhookArgs {
    /// Public base URL the pod uses to reach this control plane's webhook ingress.
    #[arg(long, env = "WEBHOOK_PUBLIC_URL", required = true)]
    pub webhook_public_url: String,
}

#[derive(Parser, Debug, Clone)]
pub struct BillingArgs {
    /// Path to the LLM token pricing table (YAML, a list of
    /// provider/model/price rows). Prices are operator-supplied input, never
    /// computed by this codebase.
    #[arg(long, env = "PRICING_CONFIG_PATH", required = true)]
    pub pricing_config_path: std::path::PathBuf,
}
