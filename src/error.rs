use thiserror::Error;

/// Errors surfaced synchronously by the public API.
///
/// Per-firing failures (coordinator errors, job errors, panics) never reach
/// the caller; they are routed to the configured handlers instead.
#[derive(Debug, Error)]
pub enum CronError {
    /// The job's rhythm could not be parsed.
    #[error("invalid rhythm '{rhythm}': {source}")]
    InvalidRhythm {
        rhythm: String,
        source: cron::error::Error,
    },

    /// No registered job carries the given name.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Failed to reach the default etcd coordinator.
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
}
