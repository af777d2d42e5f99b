use std::future::Future;

/// Mint lease-backed distributed mutexes by key.
///
/// One trait, one operation — implement this to replace the coordinator in
/// tests.
pub trait MutexBuilder: Send + Sync + Clone + 'static {
    type Mutex: DistributedMutex;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Bind a new mutex for `key` to a fresh lease session.
    fn new_mutex(
        &self,
        key: String,
    ) -> impl Future<Output = Result<Self::Mutex, Self::Error>> + Send;
}

/// A lease-backed lock serializing one firing across the cohort.
///
/// There is deliberately no unlock operation: lease expiry is the sole
/// release path, so a slow or crashed executor cannot free the lock before
/// safe time.
pub trait DistributedMutex: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The coordinator key, for diagnostics.
    fn key(&self) -> &str;

    /// Resolves once this caller holds the lock. Callers bound the wait by
    /// dropping the future (e.g. under `tokio::time::timeout`).
    fn lock(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
