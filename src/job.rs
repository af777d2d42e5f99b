use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// The job body: an async function from a cancellation token to a result.
pub type JobBody =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handler invoked (in its own task) with a job and the error it produced.
pub type ErrorHandler = Arc<dyn Fn(Job, anyhow::Error) + Send + Sync>;

/// Derives a per-job cancellation token from the scheduler's before each run.
pub type FuncCtx = Arc<dyn Fn(CancellationToken, &Job) -> CancellationToken + Send + Sync>;

/// A user-visible job descriptor.
///
/// Names are opaque and NOT deduplicated: two jobs with the same name
/// contend on the same firing lock and collapse to a single execution per
/// instant across the cohort.
#[derive(Clone)]
pub struct Job {
    /// Identifier used for lookup and, canonicalized, in lock keys.
    pub name: String,
    /// Cron-formatted rhythm (e.g. `0,10,30 1-5 0 * * *`), consumed only by
    /// the parser.
    pub rhythm: String,
    /// Routine body.
    pub func: JobBody,
}

impl Job {
    pub fn new<F, Fut>(name: impl Into<String>, rhythm: impl Into<String>, func: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            rhythm: rhythm.into(),
            func: Arc::new(move |ctx| func(ctx).boxed()),
        }
    }

    /// Invoke the job body.
    pub async fn run(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        (self.func)(ctx).await
    }

    /// Deterministic snake-cased form of the name used in lock keys:
    /// lowercased, with every character outside `[a-z0-9_]` replaced by `_`.
    pub fn canonical_name(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("rhythm", &self.rhythm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Job {
        Job::new(name, "* * * * * ?", |_ctx| async { Ok(()) })
    }

    #[test]
    fn canonical_name_collapses_equivalent_spellings() {
        assert_eq!(named("Foo Bar-1").canonical_name(), "foo_bar_1");
        assert_eq!(named("foo_bar_1").canonical_name(), "foo_bar_1");
        assert_eq!(named("FOO BAR 1").canonical_name(), "foo_bar_1");
    }

    #[test]
    fn canonical_name_is_stable_for_plain_names() {
        assert_eq!(named("backup").canonical_name(), "backup");
        assert_eq!(named("report_v2").canonical_name(), "report_v2");
    }

    #[test]
    fn canonical_name_replaces_punctuation_and_unicode() {
        assert_eq!(named("daily.report!").canonical_name(), "daily_report_");
        assert_eq!(named("Crème Brûlée").canonical_name(), "cr_me_br_l_e");
    }
}
