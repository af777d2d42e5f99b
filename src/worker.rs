//! Per-firing workers: the critical section between the scheduler's timer
//! and the user's job body.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::job::{ErrorHandler, FuncCtx, Job};
use crate::traits::{DistributedMutex, MutexBuilder};

/// Hard deadline for acquiring a firing lock. Contention past this point
/// means another cohort member owns the firing.
pub(crate) const LOCK_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) const LOCK_KEY_PREFIX: &str = "etcd_cron";

/// Everything a firing worker needs besides the entry itself. Shared
/// between the loop and all workers it spawns.
pub(crate) struct FiringShared<B: MutexBuilder> {
    pub(crate) builder: B,
    pub(crate) etcd_errors_handler: ErrorHandler,
    pub(crate) errors_handler: ErrorHandler,
    pub(crate) func_ctx: Option<FuncCtx>,
}

/// The coordinator key serializing one firing across the cohort. Any two
/// members computing this for the same firing produce byte-identical
/// strings.
pub(crate) fn lock_key(job: &Job, effective: DateTime<Utc>) -> String {
    format!(
        "{LOCK_KEY_PREFIX}/{}/{}",
        job.canonical_name(),
        effective.timestamp()
    )
}

thread_local! {
    /// Backtrace recorded by the panic hook, read back once the unwind has
    /// been caught.
    static LAST_PANIC_BACKTRACE: Cell<Option<Backtrace>> = const { Cell::new(None) };
}

/// Record a backtrace at the panic site, while the panicking frames are
/// still live. `catch_unwind` alone cannot do this: by the time it returns,
/// the stack has already been unwound. The hook chains to the previous one
/// and stays installed for the life of the process.
fn install_panic_recorder() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            LAST_PANIC_BACKTRACE.with(|slot| slot.set(Some(Backtrace::force_capture())));
            previous(info);
        }));
    });
}

/// Spawn the worker for one `(job, effective)` firing.
pub(crate) fn spawn_firing<B: MutexBuilder>(
    ctx: CancellationToken,
    shared: Arc<FiringShared<B>>,
    job: Job,
    effective: DateTime<Utc>,
) {
    install_panic_recorder();
    tokio::spawn(async move {
        let firing = fire(ctx, &shared, &job, effective);
        if let Err(payload) = AssertUnwindSafe(firing).catch_unwind().await {
            // The hook and the catch run inside the same poll, on the same
            // thread, so the thread-local holds this panic's backtrace.
            let backtrace = LAST_PANIC_BACKTRACE
                .with(Cell::take)
                .unwrap_or_else(Backtrace::force_capture);
            let err = anyhow!(
                "job panicked: {}, stacktrace: {}",
                panic_message(payload.as_ref()),
                backtrace
            );
            dispatch(&shared.errors_handler, job, err);
        }
    });
}

async fn fire<B: MutexBuilder>(
    ctx: CancellationToken,
    shared: &FiringShared<B>,
    job: &Job,
    effective: DateTime<Utc>,
) {
    let ctx = match &shared.func_ctx {
        Some(derive) => derive(ctx, job),
        None => ctx,
    };

    let key = lock_key(job, effective);
    let mut mutex = match shared.builder.new_mutex(key.clone()).await {
        Ok(mutex) => mutex,
        Err(e) => {
            dispatch(
                &shared.etcd_errors_handler,
                job.clone(),
                anyhow::Error::new(e).context(format!(
                    "failed to create distributed mutex for job '{}'",
                    job.name
                )),
            );
            return;
        }
    };

    tracing::debug!(key = %mutex.key(), job = %job.name, "acquiring firing lock");
    tokio::select! {
        _ = ctx.cancelled() => return,
        acquired = tokio::time::timeout(LOCK_TIMEOUT, mutex.lock()) => match acquired {
            // Another cohort member owns this firing.
            Err(_elapsed) => return,
            Ok(Err(e)) => {
                dispatch(
                    &shared.etcd_errors_handler,
                    job.clone(),
                    anyhow::Error::new(e).context(format!("failed to lock mutex '{key}'")),
                );
                return;
            }
            Ok(Ok(())) => {}
        },
    }

    // No unlock on any path below: the lease TTL is the sole release
    // mechanism, so a slow executor cannot free the lock before safe time.
    if let Err(err) = job.run(ctx).await {
        dispatch(&shared.errors_handler, job.clone(), err);
    }
}

/// Invoke a handler in its own task so it cannot back-pressure the firing
/// path.
pub(crate) fn dispatch(handler: &ErrorHandler, job: Job, err: anyhow::Error) {
    let handler = Arc::clone(handler);
    tokio::spawn(async move { handler(job, err) });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
