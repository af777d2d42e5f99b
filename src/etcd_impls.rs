//! Concrete coordinator implementation backed by etcd.

use std::time::Duration;

use etcd_client::{Client, LockClient, LockOptions};

use crate::traits::{DistributedMutex, MutexBuilder};

/// Default single-endpoint coordinator, a convenience for local development.
pub const DEFAULT_ETCD_ENDPOINT: &str = "127.0.0.1:2379";

/// Lease TTL for firing locks.
///
/// Large relative to the longest expected job duration and cohort clock
/// skew: a node that crashes mid-job leaves its lock lingering until expiry
/// rather than letting another member double-fire the same instant.
const LEASE_TTL: Duration = Duration::from_secs(600);

/// `MutexBuilder` backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdMutexBuilder {
    client: Client,
}

impl EtcdMutexBuilder {
    /// Connect to the etcd cluster at `endpoints`.
    pub async fn connect<E: AsRef<str>, S: AsRef<[E]>>(
        endpoints: S,
    ) -> Result<Self, etcd_client::Error> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self { client })
    }

    /// Wrap an already-connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl MutexBuilder for EtcdMutexBuilder {
    type Mutex = EtcdMutex;
    type Error = etcd_client::Error;

    async fn new_mutex(&self, key: String) -> Result<EtcdMutex, etcd_client::Error> {
        let mut client = self.client.clone();
        let lease = client.lease_grant(LEASE_TTL.as_secs() as i64, None).await?;
        Ok(EtcdMutex {
            lock: client.lock_client(),
            key,
            lease_id: lease.id(),
        })
    }
}

/// A single-use etcd lock bound to its own lease.
pub struct EtcdMutex {
    lock: LockClient,
    key: String,
    lease_id: i64,
}

impl DistributedMutex for EtcdMutex {
    type Error = etcd_client::Error;

    fn key(&self) -> &str {
        &self.key
    }

    async fn lock(&mut self) -> Result<(), etcd_client::Error> {
        let options = LockOptions::new().with_lease(self.lease_id);
        self.lock.lock(self.key.as_str(), Some(options)).await?;
        Ok(())
    }
}
