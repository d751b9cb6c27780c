pub mod billing;
pub mod error;
pub mod event_bus;
pub mod gpu_retry;
pub mod launcher;
pub mod object_store;
pub mod pod_provider;
pub mod remote_shell;
pub mod store;

pub use billing::{
    load_pricing_table, BillingGuard, CreditsLedger, PostgresCreditsLedger, PricingTable,
    TokenPricing,
};
pub use error::{BillingError, PodProviderError, PricingMissing, RemoteShellError, StoreError};
pub use event_bus::{EventBus, Subscription};
pub use gpu_retry::{build_retry_gpu_preferences, GpuRetryPolicy, MAX_GPU_RETRIES};
pub use launcher::{IdeaPayload, LaunchRequest, LaunchedRun, Launcher, PipelineConfig};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use pod_provider::{CreatedPod, GpuDisplayInfo, PodProvider, ReadyPod, RunPodProvider};
pub use remote_shell::{RemoteShellAdapter, SkipStageOutcome, SshRemoteShellAdapter};
pub use store::{PostgresRunStore, RunStore};
