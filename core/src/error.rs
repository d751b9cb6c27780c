use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(#[from] tokio_postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

#[derive(Debug, Error)]
pub enum PodProviderError {
    #[error("pod not found")]
    NotFound,
    #[error("all GPU preferences exhausted")]
    Exhausted,
    #[error("timed out waiting for pod to become ready")]
    Timeout,
    #[error("pod provider backend error: {0}")]
    Backend(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum RemoteShellError {
    #[error("could not connect to pod at {host}:{port}")]
    ConnectionFailed { host: String, port: u16 },
    #[error("remote command failed (exit={exit_code:?}): {stderr}")]
    CommandFailed { exit_code: Option<i32>, stderr: String },
    #[error("skip-stage control port reported not-found")]
    NotFound,
    #[error("skip-stage already in progress in another state")]
    Conflict,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("user {user_id} has insufficient credits: needs {required}, action={action}")]
    InsufficientCredits {
        user_id: String,
        required: rust_decimal::Decimal,
        action: String,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A missing pricing entry is logged and the debit is skipped, not raised
/// (§4.5) — this is returned to the caller so *it* can decide to log, but it
/// is never propagated as an ingestion-ending error.
#[derive(Debug, Error)]
#[error("no pricing entry for provider={provider} model={model}")]
pub struct PricingMissing {
    pub provider: String,
    pub model: String,
}
