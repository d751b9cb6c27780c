//! Component: lease-based dequeue of termination jobs (§4.9). Structured as
//! a feeder task plus a bounded worker pool, grounded directly in the
//! original implementation's `asyncio.Queue` + `asyncio.Semaphore` +
//! in-flight-set design (§4.9.1).

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use owo_colors::OwoColorize;
use tokio::sync::{mpsc, Notify, Semaphore};

use runforge_types::{
    PodBillingRecord, PodBillingSummary, Termination, MAX_TERMINATION_ATTEMPTS,
    TERMINATION_LEASE_SECONDS, TERMINATION_STUCK_SECONDS,
};

use runforge_core::{PodProvider, PodProviderError, RemoteShellAdapter, RunStore};

const TERMINATION_POLL_INTERVAL_FLOOR_SECS: u64 = 1;

pub struct TerminationWorker<S, P, R>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    R: RemoteShellAdapter + 'static,
{
    store: Arc<S>,
    pod_provider: Arc<P>,
    remote_shell: Arc<R>,
    worker_id: String,
    in_flight: Arc<DashSet<String>>,
    notify: Arc<Notify>,
    poll_interval: std::time::Duration,
    pool_size: usize,
    channel_capacity: usize,
}

impl<S, P, R> TerminationWorker<S, P, R>
where
    S: RunStore + 'static,
    P: PodProvider + 'static,
    R: RemoteShellAdapter + 'static,
{
    pub fn new(
        store: Arc<S>,
        pod_provider: Arc<P>,
        remote_shell: Arc<R>,
        worker_id: String,
        poll_interval: std::time::Duration,
        pool_size: usize,
        channel_capacity: usize,
    ) -> Self {
        Self {
            store,
            pod_provider,
            remote_shell,
            worker_id,
            in_flight: Arc::new(DashSet::new()),
            notify: Arc::new(Notify::new()),
            poll_interval: poll_interval.max(std::time::Duration::from_secs(
                TERMINATION_POLL_INTERVAL_FLOOR_SECS,
            )),
            pool_size: pool_size.max(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// A handle callers (e.g. the janitor) can use to wake the feeder
    /// immediately after enqueuing a job, instead of waiting out a poll
    /// tick — the direct analog of the original's module-level
    /// `asyncio.Event`.
    pub fn wakeup_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Runs the feeder loop plus its worker pool until `shutdown` fires.
    /// Every worker process runs this regardless of leadership — safety
    /// comes from the DB-level lease, not leader election (§5).
    pub async fn run(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) {
        let (tx, rx) = mpsc::channel::<Termination>(self.channel_capacity);
        let semaphore = Arc::new(Semaphore::new(self.pool_size));

        let pool_handle = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(this.run_pool(rx, semaphore, shutdown))
        };

        self.run_feeder(tx, shutdown).await;
        let _ = pool_handle.await;
    }

    async fn run_feeder(&self, tx: mpsc::Sender<Termination>, shutdown: tokio_util::sync::CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match self
                .store
                .claim_next_termination(
                    &self.worker_id,
                    TERMINATION_LEASE_SECONDS,
                    TERMINATION_STUCK_SECONDS,
                )
                .await
            {
                Ok(Some(job)) => {
                    if !self.in_flight.insert(job.run_id.clone()) {
                        // Already being processed by a worker task in this
                        // same process; the claim above merely refreshed
                        // its DB lease. Nothing more to do this tick.
                        continue;
                    }
                    if tx.send(job).await.is_err() {
                        return;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    eprintln!("{} {err}", "⚠️  claim_next_termination failed:".yellow());
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.notify.notified() => {}
            }
        }
    }

    async fn run_pool(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Termination>,
        semaphore: Arc<Semaphore>,
        shutdown: tokio_util::sync::CancellationToken,
    ) {
        let mut tasks = Vec::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                job = rx.recv() => {
                    let Some(job) = job else { break };
                    let permit = semaphore.clone().acquire_owned().await;
                    let this = self.clone();
                    tasks.push(tokio::spawn(async move {
                        let _permit = permit;
                        let run_id = job.run_id.clone();
                        if let Err(err) = this.process(job).await {
                            eprintln!(
                                "{} run={} {err}",
                                "⚠️  Termination job failed:".yellow(),
                                run_id
                            );
                        }
                        this.in_flight.remove(&run_id);
                    }));
                }
            }
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn reschedule_or_fail(&self, job: &Termination, err: impl std::fmt::Display) -> anyhow::Result<()> {
        let attempts = job.attempts + 1;
        let message = err.to_string();
        if attempts >= MAX_TERMINATION_ATTEMPTS {
            self.store.mark_termination_failed(&job.run_id, attempts, &message).await?;
            println!(
                "{} run={} attempts={}",
                "🛑 Termination exhausted retries".red(),
                job.run_id,
                attempts
            );
        } else {
            self.store.reschedule_termination(&job.run_id, attempts, &message).await?;
            println!(
                "{} run={} attempts={}",
                "🔁 Termination job rescheduled".yellow(),
                job.run_id,
                attempts
            );
        }
        Ok(())
    }

    async fn process(&self, job: Termination) -> anyhow::Result<()> {
        let run = self.store.get_run(&job.run_id).await?;

        if job.artifacts_uploaded_at.is_none() {
            match (run.public_ip.as_deref(), run.ssh_port) {
                (Some(host), Some(port)) => {
                    if let Err(err) = self
                        .remote_shell
                        .upload_artifacts(host, port as u16, &job.run_id, &job.trigger)
                        .await
                    {
                        self.reschedule_or_fail(&job, err).await?;
                        return Ok(());
                    }
                    self.store.mark_termination_artifacts_uploaded(&job.run_id).await?;
                }
                _ => {
                    // Pod never got far enough to have SSH access (or the
                    // run row hasn't caught up yet) — retry later rather than
                    // silently treating the upload as done.
                    self.reschedule_or_fail(&job, "run has no SSH info yet").await?;
                    return Ok(());
                }
            }
        }

        if let Some(pod_id) = run.pod_id.as_deref() {
            // Best-effort in-flight snapshot, independent of whether the
            // pod has actually been deleted yet (§3.1) — never blocks or
            // fails the job itself.
            if let Ok(Some(summary)) = self.pod_provider.get_billing_summary(pod_id).await {
                let _ = self
                    .store
                    .insert_pod_billing_summary(PodBillingSummary {
                        run_id: job.run_id.clone(),
                        amount_usd: summary.amount_usd,
                        time_billed_ms: summary.time_billed_ms,
                        observed_at: Utc::now(),
                    })
                    .await;
            }

            match self.pod_provider.delete_pod(pod_id).await {
                Ok(()) => {}
                Err(PodProviderError::NotFound) => {
                    // Resource already gone is success (§4.2).
                }
                Err(err) => {
                    self.reschedule_or_fail(&job, err).await?;
                    return Ok(());
                }
            }

            // Final billing read, now that the pod is confirmed gone. The
            // provider may still return a result for a short grace window
            // after deletion; absent a result, no PodBillingRecord is
            // emitted for this pod.
            if let Ok(Some(summary)) = self.pod_provider.get_billing_summary(pod_id).await {
                self.store
                    .insert_pod_billing_record(PodBillingRecord {
                        run_id: job.run_id.clone(),
                        amount_usd: summary.amount_usd,
                        time_billed_ms: summary.time_billed_ms,
                        records: summary.records,
                        context: job.trigger.clone(),
                        occurred_at: Utc::now(),
                    })
                    .await?;
            }
        }

        self.store.mark_termination_pod_terminated(&job.run_id).await?;
        self.store.mark_termination_terminated(&job.run_id, job.attempts + 1).await?;
        println!("{} run={}", "✅ Run terminated".green(), job.run_id);
        // No bus publish here: this process has no live SSE subscribers of
        // its own. The API process's stream handler discovers the terminal
        // status on its next heartbeat poll of the Run row (§4.8.1).
        Ok(())
    }
}
