use std::sync::Arc;

use runforge_core::{
    BillingGuard, EventBus, Launcher, PostgresCreditsLedger, PostgresRunStore, RunPodProvider,
};

pub type Store = PostgresRunStore;
pub type Provider = RunPodProvider;
pub type Ledger = PostgresCreditsLedger;
pub type AppLauncher = Launcher<Store, Provider, Ledger>;

/// Shared handles every handler needs. Cloning is cheap — every field is an
/// `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub billing: Arc<BillingGuard<Ledger>>,
    pub launcher: Arc<AppLauncher>,
    pub bus: Arc<EventBus>,
}
