//! Mock coordinator for unit and integration testing without a real etcd.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! etcd-cron = { path = "...", features = ["test-support"] }
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::traits::{DistributedMutex, MutexBuilder};

/// In-memory stand-in for the etcd coordinator.
///
/// The first `lock()` on a key wins and holds it for the rest of the test —
/// a lease that never expires within the test window. Later callers for the
/// same key park until the scheduler's lock deadline elapses, exactly like a
/// cohort member losing the race. Share one builder between scheduler
/// instances to simulate a cohort.
#[derive(Clone, Default)]
pub struct MockMutexBuilder {
    held: Arc<Mutex<HashSet<String>>>,
    fail_builds: Arc<AtomicBool>,
    fail_locks: Arc<AtomicBool>,
}

impl MockMutexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key locked so far.
    pub fn held_keys(&self) -> Vec<String> {
        self.held.lock().unwrap().iter().cloned().collect()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Simulate a coordinator outage — `new_mutex` will fail.
    pub fn fail_builds(&self) {
        self.fail_builds.store(true, Ordering::SeqCst);
    }

    /// Simulate a coordinator error on `lock`.
    pub fn fail_locks(&self) {
        self.fail_locks.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockCoordinatorError(pub &'static str);

impl std::fmt::Display for MockCoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockCoordinatorError {}

impl MutexBuilder for MockMutexBuilder {
    type Mutex = MockMutex;
    type Error = MockCoordinatorError;

    async fn new_mutex(&self, key: String) -> Result<MockMutex, MockCoordinatorError> {
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(MockCoordinatorError("coordinator unavailable"));
        }
        Ok(MockMutex {
            key,
            held: Arc::clone(&self.held),
            fail: self.fail_locks.load(Ordering::SeqCst),
        })
    }
}

pub struct MockMutex {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
    fail: bool,
}

impl DistributedMutex for MockMutex {
    type Error = MockCoordinatorError;

    fn key(&self) -> &str {
        &self.key
    }

    async fn lock(&mut self) -> Result<(), MockCoordinatorError> {
        if self.fail {
            return Err(MockCoordinatorError("lock rpc failed"));
        }
        if self.held.lock().unwrap().insert(self.key.clone()) {
            return Ok(());
        }
        // Held by another caller, and never released within a test.
        std::future::pending::<Result<(), MockCoordinatorError>>().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn first_lock_wins_second_parks_forever() {
        let builder = MockMutexBuilder::new();
        let mut first = builder.new_mutex("k/1".to_string()).await.unwrap();
        first.lock().await.unwrap();

        let mut second = builder.new_mutex("k/1".to_string()).await.unwrap();
        let contended = tokio::time::timeout(Duration::from_millis(50), second.lock()).await;
        assert!(contended.is_err(), "second holder must time out");
        assert_eq!(builder.held_count(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let builder = MockMutexBuilder::new();
        let mut a = builder.new_mutex("k/1".to_string()).await.unwrap();
        let mut b = builder.new_mutex("k/2".to_string()).await.unwrap();
        a.lock().await.unwrap();
        b.lock().await.unwrap();
        assert_eq!(builder.held_count(), 2);
    }

    #[tokio::test]
    async fn failure_toggles_surface_errors() {
        let builder = MockMutexBuilder::new();
        builder.fail_locks();
        let mut m = builder.new_mutex("k/1".to_string()).await.unwrap();
        assert!(m.lock().await.is_err());

        builder.fail_builds();
        assert!(builder.new_mutex("k/2".to_string()).await.is_err());
    }
}
