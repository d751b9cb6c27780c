//! Leader-gated reconciliation loop: the stale-pending sweep (§4.1
//! supplemental) and the GPU-shortage retry trigger (component J, §4.10).
//! Only the replica currently holding the janitor lease runs this body;
//! every other replica still runs the termination feeder/pool (§5).

use std::sync::Arc;

use chrono::Utc;
use owo_colors::OwoColorize;
use tokio::sync::Notify;

use runforge_core::{CreditsLedger, GpuRetryPolicy, PodProvider, RunStore};

use crate::leader::{Lease, LeaseLock};

pub struct Janitor<S, P, L>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    L: CreditsLedger + 'static,
{
    store: Arc<S>,
    gpu_retry: Arc<GpuRetryPolicy<S, P, L>>,
    leadership: LeaseLock,
    reconcile_interval: std::time::Duration,
    renew_interval: std::time::Duration,
    /// The termination feeder's wakeup handle: a `gpu_shortage_exhausted`
    /// enqueue found by this poll shouldn't have to wait out the feeder's
    /// own poll interval (§4.9.1).
    termination_wakeup: Arc<Notify>,
}

impl<S, P, L> Janitor<S, P, L>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    L: CreditsLedger + 'static,
{
    pub fn new(
        store: Arc<S>,
        gpu_retry: Arc<GpuRetryPolicy<S, P, L>>,
        leadership: LeaseLock,
        reconcile_interval: std::time::Duration,
        renew_interval: std::time::Duration,
        termination_wakeup: Arc<Notify>,
    ) -> Self {
        Self { store, gpu_retry, leadership, reconcile_interval, renew_interval, termination_wakeup }
    }

    async fn sweep_stale_pending(&self) {
        let stale = match self.store.list_stale_pending(Utc::now()).await {
            Ok(ids) => ids,
            Err(err) => {
                eprintln!("{} {err}", "⚠️  list_stale_pending failed:".yellow());
                return;
            }
        };
        for run_id in stale {
            if let Err(err) = self.store.mark_stale_pending(&run_id).await {
                eprintln!(
                    "{} run={} {err}",
                    "⚠️  mark_stale_pending failed:".yellow(),
                    run_id
                );
            } else {
                println!("{} run={}", "🧹 Flipped stale pending run to failed".yellow(), run_id);
            }
        }
    }

    async fn reconcile_once(&self) {
        self.sweep_stale_pending().await;
        match self.gpu_retry.poll_and_handle_all().await {
            Ok(0) => {}
            Ok(n) => {
                println!("{} count={n}", "🔁 Handled GPU-shortage signals".cyan());
                // A shortage-exhausted run was just enqueued for termination
                // (or a retry's launch failure was) — wake the feeder rather
                // than let it sit idle for its own poll interval.
                self.termination_wakeup.notify_one();
            }
            Err(err) => eprintln!("{} {err}", "⚠️  GPU-shortage sweep failed:".yellow()),
        }
    }

    /// Runs `tick.tick()`-driven leader election indefinitely, mirroring the
    /// controller loop's `Option<JoinHandle<()>>` lifecycle: spawn a
    /// reconciliation task when leadership is newly acquired, abort it when
    /// lost, until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) {
        let mut tick = tokio::time::interval(self.renew_interval);
        let mut reconcile_tick = tokio::time::interval(self.reconcile_interval);
        let mut is_leader = false;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if is_leader {
                        self.leadership.release().await;
                    }
                    return;
                }
                _ = tick.tick() => {
                    let lease: Lease = match self.leadership.try_acquire_or_renew().await {
                        Ok(lease) => lease,
                        Err(err) => {
                            eprintln!("{} {err}", "⚠️  leader election renew/acquire failed:".red());
                            is_leader = false;
                            continue;
                        }
                    };
                    if lease.acquired_lease && !is_leader {
                        println!("{}", "👑 Acquired janitor leadership".green());
                    } else if !lease.acquired_lease && is_leader {
                        println!("{}", "📉 Lost janitor leadership".yellow());
                    }
                    is_leader = lease.acquired_lease;
                }
                _ = reconcile_tick.tick(), if is_leader => {
                    self.reconcile_once().await;
                }
            }
        }
    }
}
