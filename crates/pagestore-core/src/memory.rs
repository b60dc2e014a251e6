//! In-memory page backend
//!
//! Reference implementation of [`BackendClient`] used by tests and the CLI.
//! Each provider is an append-only byte log addressed by `host:port`, so a
//! page replica's offset never changes once written. Replicas of a page go
//! to the highest-ranked available providers under rendezvous (HRW) hashing
//! of the page id.
//!
//! Providers can be taken down or made to fail reads to exercise the
//! replication and retry paths.

use crate::backend::BackendClient;
use async_trait::async_trait;
use bytes::Bytes;
use pagestore_common::config::BackendConfig;
use pagestore_common::{Error, PageId, PageLocation, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// First port used by [`MemoryBackend::with_providers`]
const BASE_PORT: u16 = 7001;

/// A single page provider
struct Provider {
    host: String,
    port: u16,
    endpoint: String,
    available: AtomicBool,
    /// Reads that will fail before the provider serves again
    failing_reads: AtomicU32,
    log: RwLock<Vec<u8>>,
    /// Log bytes below this offset were released by a drain
    released: AtomicU64,
}

impl Provider {
    fn new(host: String, port: u16) -> Self {
        let endpoint = format!("{host}:{port}");
        Self {
            host,
            port,
            endpoint,
            available: AtomicBool::new(true),
            failing_reads: AtomicU32::new(0),
            log: RwLock::new(Vec::new()),
            released: AtomicU64::new(0),
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Append bytes to the log and return where they landed
    fn append(&self, data: &[u8]) -> PageLocation {
        let mut log = self.log.write();
        let offset = log.len() as u64;
        log.extend_from_slice(data);
        PageLocation::new(self.host.clone(), self.port, offset, data.len() as u64)
    }

    /// Consume one injected read failure, if any are pending
    fn take_read_failure(&self) -> bool {
        self.failing_reads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Release everything written so far; offsets are never reused
    fn release_all(&self) {
        let log = self.log.read();
        self.released.store(log.len() as u64, Ordering::Release);
    }

    fn read(&self, location: &PageLocation) -> Result<Bytes> {
        let log = self.log.read();
        if location.offset < self.released.load(Ordering::Acquire) {
            return Err(Error::PageNotFound(format!(
                "{location} was released from {}",
                self.endpoint
            )));
        }
        let start = usize::try_from(location.offset).ok();
        let end = location
            .offset
            .checked_add(location.size)
            .and_then(|end| usize::try_from(end).ok());
        match (start, end) {
            (Some(start), Some(end)) if end <= log.len() => {
                Ok(Bytes::copy_from_slice(&log[start..end]))
            }
            _ => Err(Error::PageNotFound(format!(
                "{} beyond provider log of {} bytes",
                location,
                log.len()
            ))),
        }
    }
}

/// Registration of one stored page
struct StoredPage {
    /// xxh64 of the content, to tell a repeated put from a replacement
    checksum: u64,
    locations: Vec<PageLocation>,
}

/// In-memory replicated page backend
pub struct MemoryBackend {
    name: String,
    providers: Vec<Provider>,
    /// Replica locations per stored page
    pages: RwLock<HashMap<PageId, StoredPage>>,
    /// Shared by puts, exclusive for a drain
    placement: RwLock<()>,
}

impl MemoryBackend {
    /// Create a backend with the given `(host, port)` providers
    pub fn new(providers: impl IntoIterator<Item = (String, u16)>) -> Self {
        let providers: Vec<Provider> = providers
            .into_iter()
            .map(|(host, port)| Provider::new(host, port))
            .collect();
        info!("Memory backend with {} providers", providers.len());
        Self {
            name: "memory".to_string(),
            providers,
            pages: RwLock::new(HashMap::new()),
            placement: RwLock::new(()),
        }
    }

    /// Create a backend with `count` local providers on consecutive ports
    pub fn with_providers(count: u16) -> Self {
        Self::new((0..count).map(|i| ("127.0.0.1".to_string(), BASE_PORT + i)))
    }

    /// Create a backend from configured `host:port` provider addresses
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        if config.providers.is_empty() {
            return Err(Error::Configuration("no providers configured".into()));
        }

        let mut seen = HashSet::new();
        let mut providers = Vec::with_capacity(config.providers.len());
        for address in &config.providers {
            if !seen.insert(address.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate provider address: {address}"
                )));
            }
            providers.push(parse_endpoint(address)?);
        }
        Ok(Self::new(providers))
    }

    /// Number of providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Provider endpoints as `host:port`
    pub fn provider_endpoints(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.endpoint.clone()).collect()
    }

    /// Take a provider down or bring it back
    pub fn set_provider_available(&self, endpoint: &str, available: bool) -> Result<()> {
        let provider = self.provider_by_endpoint(endpoint)?;
        provider.available.store(available, Ordering::Release);
        info!("Provider {} available={}", endpoint, available);
        Ok(())
    }

    /// Make the next `count` reads from a provider fail as unavailable
    pub fn inject_read_failures(&self, endpoint: &str, count: u32) -> Result<()> {
        let provider = self.provider_by_endpoint(endpoint)?;
        provider.failing_reads.store(count, Ordering::Release);
        Ok(())
    }

    /// Injected read failures still pending on a provider
    pub fn pending_read_failures(&self, endpoint: &str) -> Option<u32> {
        self.provider_by_endpoint(endpoint)
            .ok()
            .map(|p| p.failing_reads.load(Ordering::Acquire))
    }

    /// Move every replica held by a provider to other available providers
    /// and release its log
    ///
    /// Each moved replica goes to the best-ranked available provider that
    /// does not already hold the page. Returns the number of pages moved.
    /// Locations recorded before the drain no longer resolve on the drained
    /// provider.
    pub fn drain_provider(&self, endpoint: &str) -> Result<usize> {
        let source = self.provider_by_endpoint(endpoint)?;
        let _placement = self.placement.write();
        let mut pages = self.pages.write();
        let mut moved = 0;

        for (page_id, stored) in pages.iter_mut() {
            let Some(slot) = stored
                .locations
                .iter()
                .position(|l| l.host == source.host && l.port == source.port)
            else {
                continue;
            };

            let data = source.read(&stored.locations[slot])?;
            let target = self
                .rank_providers(page_id)
                .into_iter()
                .find(|p| {
                    !std::ptr::eq(*p, source)
                        && p.is_available()
                        && !stored
                            .locations
                            .iter()
                            .any(|l| l.host == p.host && l.port == p.port)
                })
                .ok_or_else(|| Error::ReplicationFailure {
                    page: *page_id,
                    stored: stored.locations.len() - 1,
                    required: stored.locations.len(),
                })?;

            stored.locations[slot] = target.append(&data);
            debug!("Moved {} from {} to {}", page_id, endpoint, target.endpoint);
            moved += 1;
        }

        source.release_all();
        info!("Drained provider {}: {} pages moved", endpoint, moved);
        Ok(moved)
    }

    /// Number of pages stored
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// Total live bytes held by all providers (including every replica)
    pub fn stored_bytes(&self) -> u64 {
        self.providers
            .iter()
            .map(|p| {
                let written = p.log.read().len() as u64;
                written.saturating_sub(p.released.load(Ordering::Acquire))
            })
            .sum()
    }

    fn provider_by_endpoint(&self, endpoint: &str) -> Result<&Provider> {
        self.providers
            .iter()
            .find(|p| p.endpoint == endpoint)
            .ok_or_else(|| Error::invalid_argument(format!("unknown provider: {endpoint}")))
    }

    fn provider_at(&self, location: &PageLocation) -> Option<&Provider> {
        self.providers
            .iter()
            .find(|p| p.port == location.port && p.host == location.host)
    }

    fn all_available(&self, locations: &[PageLocation]) -> bool {
        locations
            .iter()
            .all(|l| self.provider_at(l).is_some_and(Provider::is_available))
    }

    /// Providers ordered by HRW score for this page, best first
    fn rank_providers(&self, page_id: &PageId) -> Vec<&Provider> {
        let page_hash = xxhash_rust::xxh64::xxh64(&page_id.to_key_bytes(), 0);
        let mut scored: Vec<(u64, &Provider)> = self
            .providers
            .iter()
            .map(|p| (xxhash_rust::xxh64::xxh64(p.endpoint.as_bytes(), page_hash), p))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, p)| p).collect()
    }
}

#[async_trait]
impl BackendClient for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_page(
        &self,
        page_id: PageId,
        data: Bytes,
        replication_count: u32,
    ) -> Result<Vec<PageLocation>> {
        let checksum = xxhash_rust::xxh64::xxh64(&data, 0);
        if let Some(existing) = self.pages.read().get(&page_id) {
            if existing.checksum != checksum {
                debug!("Replacing content of unpublished page {}", page_id);
            } else if self.all_available(&existing.locations) {
                debug!("Page {} already stored", page_id);
                return Ok(existing.locations.clone());
            } else {
                debug!("Page {} has replicas on unavailable providers, storing again", page_id);
            }
        }
        if replication_count == 0 {
            return Err(Error::invalid_argument("replication count must be positive"));
        }

        let _placement = self.placement.read();

        let required = replication_count as usize;
        let mut locations = Vec::with_capacity(required);
        for provider in self.rank_providers(&page_id) {
            if locations.len() == required {
                break;
            }
            if !provider.is_available() {
                debug!("Skipping unavailable provider {} for {}", provider.endpoint, page_id);
                continue;
            }
            locations.push(provider.append(&data));
        }

        if locations.len() < required {
            warn!(
                "Page {} reached {} of {} replicas",
                page_id,
                locations.len(),
                required
            );
            return Err(Error::ReplicationFailure {
                page: page_id,
                stored: locations.len(),
                required,
            });
        }

        self.pages.write().insert(
            page_id,
            StoredPage {
                checksum,
                locations: locations.clone(),
            },
        );
        Ok(locations)
    }

    async fn page_locations(&self, page_id: PageId) -> Result<Vec<PageLocation>> {
        self.pages
            .read()
            .get(&page_id)
            .map(|stored| stored.locations.clone())
            .ok_or_else(|| Error::PageNotFound(page_id.to_string()))
    }

    async fn page_bytes(&self, location: &PageLocation) -> Result<Bytes> {
        let provider = self
            .provider_at(location)
            .ok_or_else(|| Error::PageNotFound(format!("no provider at {}", location.endpoint())))?;

        if !provider.is_available() || provider.take_read_failure() {
            return Err(Error::unavailable(format!(
                "provider {} not responding",
                provider.endpoint
            )));
        }
        provider.read(location)
    }
}

/// Parse a `host:port` provider address
fn parse_endpoint(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::Configuration(format!("provider address without port: {address}")))?;
    if host.is_empty() {
        return Err(Error::Configuration(format!(
            "provider address without host: {address}"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| Error::Configuration(format!("invalid port in {address}: {e}")))?;
    Ok((host.to_string(), port))
}
