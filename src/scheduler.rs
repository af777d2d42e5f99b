//! The `Cron` scheduler: public surface and the reconciliation loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::entry::{cmp_next, Entry};
use crate::error::CronError;
use crate::etcd_impls::{EtcdMutexBuilder, DEFAULT_ETCD_ENDPOINT};
use crate::job::{ErrorHandler, FuncCtx, Job};
use crate::schedule::{parse, Schedule};
use crate::traits::MutexBuilder;
use crate::worker::{self, FiringShared};

/// Recognized construction settings. Unset handlers default to log-only
/// implementations.
#[derive(Default)]
pub struct CronOptions {
    pub etcd_errors_handler: Option<ErrorHandler>,
    pub errors_handler: Option<ErrorHandler>,
    pub func_ctx: Option<FuncCtx>,
}

impl CronOptions {
    /// Handler for coordinator failures (mutex creation, non-timeout lock
    /// errors).
    pub fn with_etcd_errors_handler(
        mut self,
        handler: impl Fn(Job, anyhow::Error) + Send + Sync + 'static,
    ) -> Self {
        self.etcd_errors_handler = Some(Arc::new(handler));
        self
    }

    /// Handler for errors returned (or panics raised) by job bodies.
    pub fn with_errors_handler(
        mut self,
        handler: impl Fn(Job, anyhow::Error) + Send + Sync + 'static,
    ) -> Self {
        self.errors_handler = Some(Arc::new(handler));
        self
    }

    /// Derive a per-job cancellation token before each run.
    pub fn with_func_ctx(
        mut self,
        derive: impl Fn(CancellationToken, &Job) -> CancellationToken + Send + Sync + 'static,
    ) -> Self {
        self.func_ctx = Some(Arc::new(derive));
        self
    }
}

/// Requests serviced by the running loop between iterations.
enum Control {
    Snapshot(oneshot::Sender<Vec<Entry>>),
    Get {
        name: String,
        reply: oneshot::Sender<Option<Job>>,
    },
    ListByPrefix {
        prefix: String,
        reply: oneshot::Sender<Vec<Job>>,
    },
    Delete {
        name: String,
        reply: oneshot::Sender<Result<(), CronError>>,
    },
}

/// Keeps track of any number of entries, invoking the associated job as
/// specified by its schedule, with one execution per firing across the
/// cohort.
///
/// May be started, stopped, and inspected while running. While the loop
/// runs it exclusively owns the entry list; every public operation below
/// reaches it through a channel and is integrated between iterations.
pub struct Cron<B: MutexBuilder = EtcdMutexBuilder> {
    entries: Mutex<Vec<Entry>>,
    running: AtomicBool,
    add_tx: mpsc::Sender<Entry>,
    add_rx: Mutex<Option<mpsc::Receiver<Entry>>>,
    control_tx: mpsc::Sender<Control>,
    control_rx: Mutex<Option<mpsc::Receiver<Control>>>,
    stop: CancellationToken,
    shared: Arc<FiringShared<B>>,
}

impl Cron<EtcdMutexBuilder> {
    /// Create a scheduler against the default coordinator endpoint
    /// (`127.0.0.1:2379`).
    pub async fn new(options: CronOptions) -> Result<Self, CronError> {
        let builder = EtcdMutexBuilder::connect([DEFAULT_ETCD_ENDPOINT]).await?;
        Ok(Self::with_mutex_builder(builder, options))
    }
}

impl<B: MutexBuilder> Cron<B> {
    /// Create a scheduler with a custom coordinator.
    pub fn with_mutex_builder(builder: B, options: CronOptions) -> Self {
        let (add_tx, add_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::channel(1);
        let shared = Arc::new(FiringShared {
            builder,
            etcd_errors_handler: options
                .etcd_errors_handler
                .unwrap_or_else(default_etcd_errors_handler),
            errors_handler: options.errors_handler.unwrap_or_else(default_errors_handler),
            func_ctx: options.func_ctx,
        });
        Self {
            entries: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            add_tx,
            add_rx: Mutex::new(Some(add_rx)),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            stop: CancellationToken::new(),
            shared,
        }
    }

    /// Register a job, parsing its rhythm.
    ///
    /// While running, this returns once the entry is handed to the loop; it
    /// becomes visible to the *next* timer computation, not the current one.
    pub async fn add_job(&self, job: Job) -> Result<(), CronError> {
        let schedule = parse(&job.rhythm)?;
        self.schedule(schedule, job).await;
        Ok(())
    }

    /// Register a job on an explicit schedule, bypassing the rhythm parser.
    pub async fn schedule<S: Schedule + 'static>(&self, schedule: S, job: Job) {
        self.push_entry(Entry::new(Arc::new(schedule), job)).await;
    }

    async fn push_entry(&self, entry: Entry) {
        if !self.running.load(Ordering::SeqCst) {
            self.entries.lock().unwrap().push(entry);
            return;
        }
        if let Err(send) = self.add_tx.send(entry).await {
            // The loop already exited; behave as in the stopped state.
            self.entries.lock().unwrap().push(send.0);
        }
    }

    /// Remove the first job with the given name.
    pub async fn delete_job(&self, name: &str) -> Result<(), CronError> {
        if self.running.load(Ordering::SeqCst) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let cmd = Control::Delete {
                name: name.to_string(),
                reply: reply_tx,
            };
            if self.control_tx.send(cmd).await.is_ok() {
                if let Ok(result) = reply_rx.await {
                    return result;
                }
            }
        }
        delete_first_match(&mut self.entries.lock().unwrap(), name)
    }

    /// Retrieve the first job with the given name.
    pub async fn get_job(&self, name: &str) -> Option<Job> {
        if self.running.load(Ordering::SeqCst) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let cmd = Control::Get {
                name: name.to_string(),
                reply: reply_tx,
            };
            if self.control_tx.send(cmd).await.is_ok() {
                if let Ok(job) = reply_rx.await {
                    return job;
                }
            }
        }
        find_job(&self.entries.lock().unwrap(), name)
    }

    /// List every job whose name starts with `prefix`.
    pub async fn list_jobs_by_prefix(&self, prefix: &str) -> Vec<Job> {
        if self.running.load(Ordering::SeqCst) {
            let (reply_tx, reply_rx) = oneshot::channel();
            let cmd = Control::ListByPrefix {
                prefix: prefix.to_string(),
                reply: reply_tx,
            };
            if self.control_tx.send(cmd).await.is_ok() {
                if let Ok(jobs) = reply_rx.await {
                    return jobs;
                }
            }
        }
        jobs_with_prefix(&self.entries.lock().unwrap(), prefix)
    }

    /// A snapshot of the entry list, consistent with some loop iteration.
    pub async fn entries(&self) -> Vec<Entry> {
        if self.running.load(Ordering::SeqCst) {
            let (reply_tx, reply_rx) = oneshot::channel();
            if self
                .control_tx
                .send(Control::Snapshot(reply_tx))
                .await
                .is_ok()
            {
                if let Ok(snapshot) = reply_rx.await {
                    return snapshot;
                }
            }
        }
        self.entries.lock().unwrap().clone()
    }

    /// Start the scheduler loop in its own task. One-shot per instance.
    ///
    /// `ctx` propagates to every lock attempt and job invocation;
    /// cancelling it aborts in-flight work cooperatively. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, ctx: CancellationToken) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler already started");
            return;
        }
        let (Some(add_rx), Some(control_rx)) = (
            self.add_rx.lock().unwrap().take(),
            self.control_rx.lock().unwrap().take(),
        ) else {
            // No loop was launched, so the flag set above must not stand.
            self.running.store(false, Ordering::SeqCst);
            tracing::warn!("scheduler cannot be restarted");
            return;
        };
        let entries = std::mem::take(&mut *self.entries.lock().unwrap());
        let stop = self.stop.clone();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(run_loop(entries, add_rx, control_rx, stop, ctx, shared));
    }

    /// Stop the scheduler loop. Idempotent, and safe before `start`.
    ///
    /// In-flight firing workers are not cancelled; they run until their job
    /// body returns or the `start` context is cancelled.
    pub fn stop(&self) {
        self.stop.cancel();
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn run_loop<B: MutexBuilder>(
    mut entries: Vec<Entry>,
    mut add_rx: mpsc::Receiver<Entry>,
    mut control_rx: mpsc::Receiver<Control>,
    stop: CancellationToken,
    ctx: CancellationToken,
    shared: Arc<FiringShared<B>>,
) {
    let mut now = Utc::now();
    for entry in &mut entries {
        entry.next = entry.schedule.next(now);
    }
    tracing::info!(entries = entries.len(), "cron scheduler started");

    loop {
        entries.sort_by(|a, b| cmp_next(a.next, b.next));

        // With nothing scheduled, sleep years ahead; the select below still
        // services additions, inspections, and stop. Two years stays under
        // tokio's maximum sleep duration.
        let effective = entries
            .first()
            .and_then(|e| e.next)
            .unwrap_or_else(|| now + Duration::days(2 * 365));
        let wait = (effective - now).to_std().unwrap_or(StdDuration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                now = effective;
                // Fire every entry at the head of the sorted list that is
                // due at this same instant.
                for entry in entries.iter_mut() {
                    if entry.next != Some(effective) {
                        break;
                    }
                    entry.prev = entry.next;
                    entry.next = entry.schedule.next(effective);
                    worker::spawn_firing(
                        ctx.clone(),
                        Arc::clone(&shared),
                        entry.job.clone(),
                        effective,
                    );
                }
                continue;
            }
            Some(mut entry) = add_rx.recv() => {
                entry.next = entry.schedule.next(now);
                tracing::info!(job = %entry.job.name, "entry added");
                entries.push(entry);
            }
            Some(cmd) = control_rx.recv() => {
                handle_control(&mut entries, cmd);
            }
            _ = stop.cancelled() => {
                tracing::info!("cron scheduler stopped");
                return;
            }
        }

        now = Utc::now();
    }
}

fn handle_control(entries: &mut Vec<Entry>, cmd: Control) {
    match cmd {
        Control::Snapshot(reply) => {
            let _ = reply.send(entries.clone());
        }
        Control::Get { name, reply } => {
            let _ = reply.send(find_job(entries, &name));
        }
        Control::ListByPrefix { prefix, reply } => {
            let _ = reply.send(jobs_with_prefix(entries, &prefix));
        }
        Control::Delete { name, reply } => {
            let result = delete_first_match(entries, &name);
            if result.is_ok() {
                tracing::info!(job = %name, "entry removed");
            }
            let _ = reply.send(result);
        }
    }
}

fn find_job(entries: &[Entry], name: &str) -> Option<Job> {
    entries
        .iter()
        .find(|e| e.job.name == name)
        .map(|e| e.job.clone())
}

fn jobs_with_prefix(entries: &[Entry], prefix: &str) -> Vec<Job> {
    entries
        .iter()
        .filter(|e| e.job.name.starts_with(prefix))
        .map(|e| e.job.clone())
        .collect()
}

fn delete_first_match(entries: &mut Vec<Entry>, name: &str) -> Result<(), CronError> {
    match entries.iter().position(|e| e.job.name == name) {
        Some(idx) => {
            entries.remove(idx);
            Ok(())
        }
        None => Err(CronError::JobNotFound(name.to_string())),
    }
}

fn default_etcd_errors_handler() -> ErrorHandler {
    Arc::new(|job, err| {
        tracing::error!(job = %job.name, error = %err, "etcd error while handling job");
    })
}

fn default_errors_handler() -> ErrorHandler {
    Arc::new(|job, err| {
        tracing::error!(job = %job.name, error = %err, "error while handling job");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use crate::schedule::Every;

    fn entry(name: &str) -> Entry {
        Entry::new(
            Arc::new(Every::new(StdDuration::from_secs(60))),
            Job::new(name, "* * * * * ?", |_ctx| async { Ok(()) }),
        )
    }

    // ── registry helpers ──────────────────────────────────────────────────

    #[test]
    fn delete_removes_first_match_only() {
        let mut entries = vec![entry("dup"), entry("other"), entry("dup")];
        delete_first_match(&mut entries, "dup").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.job.name.as_str()).collect();
        assert_eq!(names, ["other", "dup"]);
    }

    #[test]
    fn delete_unknown_name_is_an_error() {
        let mut entries = vec![entry("known")];
        let err = delete_first_match(&mut entries, "ghost").unwrap_err();
        assert!(matches!(err, CronError::JobNotFound(_)));
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn find_job_returns_first_match() {
        let entries = vec![entry("a"), entry("b")];
        assert_eq!(find_job(&entries, "b").unwrap().name, "b");
        assert!(find_job(&entries, "c").is_none());
    }

    #[test]
    fn jobs_with_prefix_filters_by_name() {
        let entries = vec![entry("prefix_one"), entry("prefix_two"), entry("other")];
        let jobs = jobs_with_prefix(&entries, "prefix_");
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.name.starts_with("prefix_")));
    }

    // ── handle_control ────────────────────────────────────────────────────

    #[tokio::test]
    async fn snapshot_control_returns_a_copy() {
        let mut entries = vec![entry("a"), entry("b")];
        let (tx, rx) = oneshot::channel();
        handle_control(&mut entries, Control::Snapshot(tx));
        let mut snapshot = rx.await.unwrap();
        assert_eq!(snapshot.len(), 2);
        // Mutating the snapshot must not touch the registry.
        snapshot.clear();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn delete_control_replies_with_result() {
        let mut entries = vec![entry("gone")];
        let (tx, rx) = oneshot::channel();
        handle_control(
            &mut entries,
            Control::Delete {
                name: "gone".to_string(),
                reply: tx,
            },
        );
        assert!(rx.await.unwrap().is_ok());
        assert!(entries.is_empty());
    }
}
