//! Page backend abstraction
//!
//! The backend owns page replicas: it stores page content durably with the
//! requested replication count and serves bytes back by physical location.
//! The version store only relies on the contract below, never on how
//! replicas are placed or transported.

use async_trait::async_trait;
use bytes::Bytes;
use pagestore_common::config::ClientConfig;
use pagestore_common::{Error, PageId, PageLocation, Result};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Replicated page storage consumed by the version store
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Store a page durably on `replication_count` replicas
    ///
    /// Must fail with [`Error::ReplicationFailure`] when fewer replicas could
    /// be written. Putting the same content under an already stored
    /// `page_id` returns the existing locations; different content (a retry
    /// of an update that never got published) replaces them.
    async fn put_page(
        &self,
        page_id: PageId,
        data: Bytes,
        replication_count: u32,
    ) -> Result<Vec<PageLocation>>;

    /// Locations of every replica of a stored page
    async fn page_locations(&self, page_id: PageId) -> Result<Vec<PageLocation>>;

    /// Bytes held at one location
    async fn page_bytes(&self, location: &PageLocation) -> Result<Bytes>;
}

/// Retry behaviour for replica reads
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    /// Extra passes over the replica set after transient failures
    pub retries: u32,
    /// Pause between passes
    pub backoff: Duration,
    /// Page fetches in flight per read
    pub max_concurrent_fetches: usize,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ReadPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            retries: config.read_retries,
            backoff: config.retry_backoff(),
            max_concurrent_fetches: config.max_concurrent_fetches.max(1),
        }
    }
}

/// Reads page bytes from any replica of a page
///
/// Replicas are tried in random order so that concurrent readers spread
/// over the replica set. Transient failures move on to the next replica;
/// once every replica failed the whole set is retried after a backoff,
/// up to `retries` extra passes.
#[derive(Clone)]
pub struct ReplicaReader {
    backend: Arc<dyn BackendClient>,
    policy: ReadPolicy,
}

impl ReplicaReader {
    /// Create a new replica reader
    pub fn new(backend: Arc<dyn BackendClient>, policy: ReadPolicy) -> Self {
        Self { backend, policy }
    }

    /// Get the read policy
    pub const fn policy(&self) -> &ReadPolicy {
        &self.policy
    }

    /// Read `length` bytes at `offset_in_page` of a stored page
    ///
    /// `replicas` are the page's full-content locations as last recorded.
    /// When none of them holds the page any more, the current locations are
    /// looked up in the backend and the read is attempted once more.
    pub async fn read_page(
        &self,
        page_id: PageId,
        replicas: &[PageLocation],
        offset_in_page: u64,
        length: u64,
    ) -> Result<Bytes> {
        let narrowed = narrow(replicas, offset_in_page, length);
        match self.read(&narrowed).await {
            Err(e) if e.is_not_found() => {
                debug!(
                    "Recorded replicas of {} are gone ({}), re-resolving through {}",
                    page_id,
                    e,
                    self.backend.name()
                );
                let current = self.backend.page_locations(page_id).await?;
                if current.as_slice() == replicas {
                    return Err(e);
                }
                self.read(&narrow(&current, offset_in_page, length)).await
            }
            other => other,
        }
    }

    /// Read the bytes at any one of `replicas`
    pub async fn read(&self, replicas: &[PageLocation]) -> Result<Bytes> {
        if replicas.is_empty() {
            return Err(Error::internal("page has no replicas"));
        }

        let mut last_error = None;
        for attempt in 0..=self.policy.retries {
            let mut order = replicas.to_vec();
            order.shuffle(&mut rand::thread_rng());

            let mut transient = false;
            for location in &order {
                match self.backend.page_bytes(location).await {
                    Ok(data) => return Ok(data),
                    Err(e) if e.is_retryable() => {
                        debug!("Replica {} unavailable: {}", location, e);
                        transient = true;
                        last_error = Some(e);
                    }
                    Err(e) if e.is_not_found() => {
                        debug!("Replica {} missing: {}", location, e);
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            // Missing replicas do not come back by waiting
            if !transient {
                break;
            }
            if attempt < self.policy.retries {
                warn!(
                    "All {} replicas failed (attempt {}/{}), retrying in {:?}",
                    replicas.len(),
                    attempt + 1,
                    self.policy.retries + 1,
                    self.policy.backoff
                );
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| Error::unavailable("no replica reachable")))
    }
}

fn narrow(replicas: &[PageLocation], offset_in_page: u64, length: u64) -> Vec<PageLocation> {
    replicas
        .iter()
        .map(|location| location.slice(offset_in_page, length))
        .collect()
}
