pub mod events;
pub mod projections;
pub mod run;
pub mod stream;
pub mod termination;
pub mod webhooks;

pub use events::{
    DiskUsageEvent, GpuShortageEvent, PodBillingRecord, PodBillingSummary, RunEvent, TokenUsage,
    LOW_FREE_DISK_THRESHOLD_BYTES,
};
pub use projections::{
    BestNodeSelection, CodeExecution, HwStats, LlmReview, PaperGenerationProgress, RunArtifact,
    RunLog, StageProgress, StageSkipWindow, SubstageCompleted, SubstageSummary, TreeViz,
    VlmFigureReview,
};
pub use run::{Run, RunPatch, RunStatus};
pub use stream::{RunSnapshot, StreamFrame};
pub use termination::{
    Termination, TerminationStatus, MAX_TERMINATION_ATTEMPTS, TERMINATION_LEASE_SECONDS,
    TERMINATION_STUCK_SECONDS,
};
