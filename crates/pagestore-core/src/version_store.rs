//! Version management for paged objects
//!
//! The version store owns every object's history. A history is a list of
//! committed sizes (one per version) plus a page record index:
//!
//! ```text
//! records (arena)          page_index
//! ┌───┬──────────────┐     page 0 → [(v1, #0), (v2, #2)]
//! │ 0 │ obj_1/p0@v1  │     page 1 → [(v1, #1)]
//! │ 1 │ obj_1/p1@v1  │     page 2 → [(v3, #3)]
//! │ 2 │ obj_1/p0@v2  │
//! │ 3 │ obj_1/p2@v3  │
//! └───┴──────────────┘
//! ```
//!
//! Each page keeps the ascending list of versions that wrote it. The latest
//! content of a page is the last entry; the content valid at an older
//! version is found by binary search over that page's own list, independent
//! of how many versions the object has.
//!
//! Updates are copy-on-write: a new version only records the pages it
//! touched. All new pages are stored in the backend before the version is
//! published, so readers never observe a partially written version.

use crate::backend::{BackendClient, ReadPolicy, ReplicaReader};
use crate::page_map::{PageMap, PageSlice};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::try_join_all;
use pagestore_common::{
    Error, ObjectId, ObjectInfo, PageId, PageIndex, PageLocation, Result, Version,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

/// One stored page as written by one version
#[derive(Debug, Clone)]
struct PageRecord {
    /// Backend key of the content
    page_id: PageId,
    /// Replica locations of the full page content
    locations: Vec<PageLocation>,
}

/// Committed state of one object
#[derive(Debug)]
struct ObjectHistory {
    /// Object size per version (index = version number)
    sizes: Vec<u64>,
    /// Arena of page records
    records: Vec<PageRecord>,
    /// Per page index: ascending (writing version, arena slot)
    page_index: Vec<Vec<(Version, usize)>>,
}

impl ObjectHistory {
    fn new() -> Self {
        Self {
            sizes: vec![0],
            records: Vec::new(),
            page_index: Vec::new(),
        }
    }

    fn latest(&self) -> Version {
        // sizes is never empty and bounded by the u32 version counter
        Version::new((self.sizes.len() - 1) as u32)
    }

    fn latest_size(&self) -> u64 {
        self.sizes.last().copied().unwrap_or_default()
    }

    fn size_at(&self, version: Version) -> Option<u64> {
        self.sizes.get(version.as_index()).copied()
    }

    /// Record holding `page` as of `version`
    fn record_at(&self, page: PageIndex, version: Version) -> Option<&PageRecord> {
        let history = self.page_index.get(usize::try_from(page).ok()?)?;
        let slot = match history.last() {
            Some(&(written, slot)) if written <= version => slot,
            _ => {
                let pos = history.partition_point(|&(written, _)| written <= version);
                history.get(pos.checked_sub(1)?)?.1
            }
        };
        self.records.get(slot)
    }

    /// Publish a new version with the given size and page records
    fn commit(&mut self, size: u64, records: Vec<(PageIndex, PageRecord)>) -> Result<Version> {
        let version = self
            .latest()
            .next()
            .ok_or_else(|| Error::internal("version counter exhausted"))?;

        for (page, record) in records {
            let page = usize::try_from(page)
                .map_err(|_| Error::internal(format!("page index {page} out of range")))?;
            if self.page_index.len() <= page {
                self.page_index.resize_with(page + 1, Vec::new);
            }
            let slot = self.records.len();
            self.records.push(record);
            self.page_index[page].push((version, slot));
        }
        self.sizes.push(size);

        Ok(version)
    }
}

/// An object: immutable parameters, writer token and committed history
struct ObjectEntry {
    id: ObjectId,
    page_map: PageMap,
    replication_count: u32,
    /// Held by the single writer allowed to advance the version counter
    writer: tokio::sync::Mutex<()>,
    history: RwLock<ObjectHistory>,
}

impl ObjectEntry {
    fn info_at(&self, version: Version, size: u64) -> ObjectInfo {
        ObjectInfo {
            id: self.id,
            page_size: self.page_map.page_size(),
            replication_count: self.replication_count,
            version,
            size,
        }
    }

    fn latest_info(&self) -> ObjectInfo {
        let history = self.history.read();
        self.info_at(history.latest(), history.latest_size())
    }
}

/// A page slice of a resolved range with the record valid at the queried
/// version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPage {
    /// Part of the page covered by the range
    pub slice: PageSlice,
    /// Backend key of the page content
    pub page_id: PageId,
    /// Replica locations of the full page content
    pub replicas: Vec<PageLocation>,
}

impl ResolvedPage {
    /// Replica locations narrowed to the covered slice
    pub fn slice_locations(&self) -> Vec<PageLocation> {
        self.replicas
            .iter()
            .map(|loc| loc.slice(self.slice.offset_in_page, self.slice.length))
            .collect()
    }
}

/// Owns object histories and applies copy-on-write updates
pub struct VersionStore {
    backend: Arc<dyn BackendClient>,
    reader: ReplicaReader,
    objects: DashMap<ObjectId, Arc<ObjectEntry>>,
    /// Next id handed out by `create`
    next_id: AtomicU32,
}

impl VersionStore {
    /// Create a version store over a backend with the default read policy
    pub fn new(backend: Arc<dyn BackendClient>) -> Self {
        Self::with_read_policy(backend, ReadPolicy::default())
    }

    /// Create a version store with a custom read policy
    pub fn with_read_policy(backend: Arc<dyn BackendClient>, policy: ReadPolicy) -> Self {
        Self {
            reader: ReplicaReader::new(backend.clone(), policy),
            backend,
            objects: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Reader used to fetch page bytes from replicas
    pub const fn reader(&self) -> &ReplicaReader {
        &self.reader
    }

    /// Number of objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Create a new empty object at version 0
    pub fn create(&self, page_size: u64, replication_count: u32) -> Result<ObjectInfo> {
        let id = self.allocate_id()?;
        self.create_with_id(id, page_size, replication_count)
    }

    /// Create a new empty object under an explicit id
    pub fn create_with_id(
        &self,
        id: ObjectId,
        page_size: u64,
        replication_count: u32,
    ) -> Result<ObjectInfo> {
        let entry = Self::new_entry(id, page_size, replication_count)?;
        let info = entry.latest_info();
        self.insert(entry)?;

        info!(
            "Created object {} (page_size={}, replication={})",
            id, page_size, replication_count
        );
        Ok(info)
    }

    /// Latest committed metadata of an object
    pub fn info(&self, id: ObjectId) -> Result<ObjectInfo> {
        Ok(self.entry(id)?.latest_info())
    }

    /// Metadata of an object as of `version`
    pub fn info_at(&self, id: ObjectId, version: Version) -> Result<ObjectInfo> {
        let entry = self.entry(id)?;
        let size = Self::committed_size(&entry, version)?;
        Ok(entry.info_at(version, size))
    }

    /// Highest committed version of an object
    pub fn latest(&self, id: ObjectId) -> Result<Version> {
        Ok(self.entry(id)?.history.read().latest())
    }

    /// Object size at `version`
    pub fn size(&self, id: ObjectId, version: Version) -> Result<u64> {
        let entry = self.entry(id)?;
        Self::committed_size(&entry, version)
    }

    /// Append `data` at the end of the object, producing a new version
    pub async fn append(&self, id: ObjectId, data: &[u8]) -> Result<Version> {
        let entry = self.entry(id)?;
        let _writer = entry.writer.lock().await;

        let (base, base_size) = {
            let history = entry.history.read();
            (history.latest(), history.latest_size())
        };
        let length = data.len() as u64;
        let new_size = base_size.checked_add(length).ok_or(Error::InvalidRange {
            offset: base_size,
            size: length,
        })?;
        let slices = entry.page_map.slices(base_size, length)?;

        let mut pages = Vec::with_capacity(slices.len());
        let mut consumed = 0usize;
        for slice in slices {
            let chunk = &data[consumed..consumed + slice.length as usize];
            consumed += chunk.len();

            let content = if slice.offset_in_page == 0 {
                Bytes::copy_from_slice(chunk)
            } else {
                // The trailing page is short: extend a copy of it
                let existing = self
                    .fetch_page(&entry, base, slice.page_index, slice.offset_in_page)
                    .await?;
                let mut page = BytesMut::with_capacity(existing.len() + chunk.len());
                page.extend_from_slice(&existing);
                page.extend_from_slice(chunk);
                page.freeze()
            };
            pages.push((slice.page_index, content));
        }

        let version = self.persist_and_commit(&entry, base, new_size, pages).await?;
        info!(
            "Appended {} bytes to object {}: version {}, size {}",
            length, id, version, new_size
        );
        Ok(version)
    }

    /// Overwrite bytes inside the committed size, producing a new version
    pub async fn write(&self, id: ObjectId, offset: u64, data: &[u8]) -> Result<Version> {
        let entry = self.entry(id)?;
        let _writer = entry.writer.lock().await;

        let (base, size) = {
            let history = entry.history.read();
            (history.latest(), history.latest_size())
        };
        let length = data.len() as u64;
        let slices = entry.page_map.slices(offset, length)?;
        if offset + length > size {
            return Err(Error::OutOfBounds {
                offset,
                size: length,
                limit: size,
            });
        }

        let mut pages = Vec::with_capacity(slices.len());
        let mut consumed = 0usize;
        for slice in slices {
            let chunk = &data[consumed..consumed + slice.length as usize];
            consumed += chunk.len();

            let page_len = entry.page_map.page_len(slice.page_index, size);
            let content = if slice.offset_in_page == 0 && slice.length == page_len {
                Bytes::copy_from_slice(chunk)
            } else {
                // Partially covered page: overlay onto a copy of the predecessor
                let existing = self
                    .fetch_page(&entry, base, slice.page_index, page_len)
                    .await?;
                let start = slice.offset_in_page as usize;
                let end = start + chunk.len();
                if end > existing.len() {
                    return Err(Error::internal(format!(
                        "page {} of object {} holds {} bytes, expected at least {}",
                        slice.page_index,
                        id,
                        existing.len(),
                        end
                    )));
                }
                let mut page = BytesMut::from(&existing[..]);
                page[start..end].copy_from_slice(chunk);
                page.freeze()
            };
            pages.push((slice.page_index, content));
        }

        let version = self.persist_and_commit(&entry, base, size, pages).await?;
        info!(
            "Wrote {} bytes at offset {} of object {}: version {}",
            length, offset, id, version
        );
        Ok(version)
    }

    /// Resolve a byte range at `version` to the page records holding it
    pub fn resolve_range(
        &self,
        id: ObjectId,
        version: Version,
        offset: u64,
        size: u64,
    ) -> Result<Vec<ResolvedPage>> {
        let entry = self.entry(id)?;
        let slices = entry.page_map.slices(offset, size)?;

        let history = entry.history.read();
        let limit = history.size_at(version).ok_or(Error::VersionNotFound {
            object_id: id,
            version,
        })?;
        if offset + size > limit {
            return Err(Error::OutOfBounds {
                offset,
                size,
                limit,
            });
        }

        slices
            .into_iter()
            .map(|slice| {
                let record = history.record_at(slice.page_index, version).ok_or_else(|| {
                    Error::internal(format!(
                        "page {} of object {} missing at version {}",
                        slice.page_index, id, version
                    ))
                })?;
                Ok(ResolvedPage {
                    slice,
                    page_id: record.page_id,
                    replicas: record.locations.clone(),
                })
            })
            .collect()
    }

    /// Create a new object sharing all pages of `source` at `version`
    ///
    /// The clone's version 1 holds the source content; no page bytes are
    /// copied. Later updates to either object are independent.
    pub fn clone_object(&self, source: ObjectId, version: Version) -> Result<ObjectInfo> {
        let source_entry = self.entry(source)?;

        let (size, records) = {
            let history = source_entry.history.read();
            let size = history.size_at(version).ok_or(Error::VersionNotFound {
                object_id: source,
                version,
            })?;
            let records = (0..source_entry.page_map.page_count(size))
                .map(|page| {
                    history
                        .record_at(page, version)
                        .map(|record| (page, record.clone()))
                        .ok_or_else(|| {
                            Error::internal(format!(
                                "page {page} of object {source} missing at version {version}"
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            (size, records)
        };

        let id = self.allocate_id()?;
        let entry = Self::new_entry(
            id,
            source_entry.page_map.page_size(),
            source_entry.replication_count,
        )?;
        let clone_version = entry.history.write().commit(size, records)?;
        let info = entry.info_at(clone_version, size);
        self.insert(entry)?;

        info!(
            "Cloned object {} at version {} into object {}",
            source, version, id
        );
        Ok(info)
    }

    fn allocate_id(&self) -> Result<ObjectId> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map(ObjectId::new)
            .map_err(|_| Error::internal("object id space exhausted"))
    }

    fn new_entry(id: ObjectId, page_size: u64, replication_count: u32) -> Result<ObjectEntry> {
        if replication_count == 0 {
            return Err(Error::invalid_argument("replication count must be positive"));
        }
        Ok(ObjectEntry {
            id,
            page_map: PageMap::new(page_size)?,
            replication_count,
            writer: tokio::sync::Mutex::new(()),
            history: RwLock::new(ObjectHistory::new()),
        })
    }

    fn insert(&self, entry: ObjectEntry) -> Result<()> {
        let id = entry.id;
        match self.objects.entry(id) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
                // Keep generated ids clear of explicitly chosen ones
                self.next_id
                    .fetch_max(id.as_u32().saturating_add(1), Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn entry(&self, id: ObjectId) -> Result<Arc<ObjectEntry>> {
        self.objects
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(Error::ObjectNotFound(id))
    }

    fn committed_size(entry: &ObjectEntry, version: Version) -> Result<u64> {
        entry
            .history
            .read()
            .size_at(version)
            .ok_or(Error::VersionNotFound {
                object_id: entry.id,
                version,
            })
    }

    /// Read the first `length` bytes (the full content) of a page as of
    /// `version`
    async fn fetch_page(
        &self,
        entry: &ObjectEntry,
        version: Version,
        page: PageIndex,
        length: u64,
    ) -> Result<Bytes> {
        let (page_id, replicas) = entry
            .history
            .read()
            .record_at(page, version)
            .map(|record| (record.page_id, record.locations.clone()))
            .ok_or_else(|| {
                Error::internal(format!(
                    "page {} of object {} missing at version {}",
                    page, entry.id, version
                ))
            })?;
        self.reader.read_page(page_id, &replicas, 0, length).await
    }

    /// Store new pages in the backend, then publish them as the next version
    ///
    /// Must be called with the object's writer token held. Nothing is
    /// published if any page fails to reach its replication count.
    async fn persist_and_commit(
        &self,
        entry: &ObjectEntry,
        base: Version,
        new_size: u64,
        pages: Vec<(PageIndex, Bytes)>,
    ) -> Result<Version> {
        let version = base
            .next()
            .ok_or_else(|| Error::internal("version counter exhausted"))?;

        let object_id = entry.id;
        let replication_count = entry.replication_count;
        let backend = &self.backend;
        let puts = pages.into_iter().map(move |(page, content)| {
            let page_id = PageId::new(object_id, page, version);
            async move {
                let locations = backend
                    .put_page(page_id, content, replication_count)
                    .await?;
                debug!("Stored {} on {} replicas", page_id, locations.len());
                Ok::<_, Error>((page, PageRecord { page_id, locations }))
            }
        });
        let records = try_join_all(puts).await?;

        let mut history = entry.history.write();
        if history.latest() != base {
            return Err(Error::internal(format!(
                "object {} advanced past version {} during an update",
                entry.id, base
            )));
        }
        history.commit(new_size, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn store_with(backend: Arc<dyn BackendClient>) -> VersionStore {
        VersionStore::with_read_policy(
            backend,
            ReadPolicy {
                retries: 1,
                backoff: Duration::from_millis(1),
                max_concurrent_fetches: 8,
            },
        )
    }

    fn store() -> VersionStore {
        store_with(Arc::new(MemoryBackend::with_providers(3)))
    }

    async fn read_all(store: &VersionStore, id: ObjectId, version: Version) -> Vec<u8> {
        let size = store.size(id, version).unwrap();
        let mut out = Vec::new();
        for page in store.resolve_range(id, version, 0, size).unwrap() {
            let data = store
                .reader()
                .read_page(
                    page.page_id,
                    &page.replicas,
                    page.slice.offset_in_page,
                    page.slice.length,
                )
                .await
                .unwrap();
            out.extend_from_slice(&data);
        }
        out
    }

    #[test]
    fn test_create() {
        let store = store();
        let info = store.create(1024, 2).unwrap();

        assert_eq!(info.id, ObjectId::new(1));
        assert_eq!(info.version, Version::INITIAL);
        assert_eq!(info.size, 0);
        assert_eq!(info.page_size, 1024);
        assert_eq!(info.replication_count, 2);
        assert_eq!(store.object_count(), 1);

        let second = store.create(1024, 1).unwrap();
        assert_eq!(second.id, ObjectId::new(2));
    }

    #[test]
    fn test_create_rejects_bad_parameters() {
        let store = store();
        assert!(matches!(store.create(0, 1), Err(Error::InvalidArgument(_))));
        assert!(matches!(store.create(1024, 0), Err(Error::InvalidArgument(_))));
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_create_with_existing_id() {
        let store = store();
        store.create_with_id(ObjectId::new(5), 1024, 1).unwrap();

        let result = store.create_with_id(ObjectId::new(5), 1024, 1);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        // Generated ids skip past explicit ones
        assert_eq!(store.create(1024, 1).unwrap().id, ObjectId::new(6));
    }

    #[tokio::test]
    async fn test_unknown_object() {
        let store = store();
        let id = ObjectId::new(99);
        assert!(matches!(store.latest(id), Err(Error::ObjectNotFound(_))));
        assert!(matches!(
            store.append(id, b"data").await,
            Err(Error::ObjectNotFound(_))
        ));
        assert!(matches!(
            store.write(id, 0, b"data").await,
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_append_versions_and_sizes() {
        let store = store();
        let id = store.create(1024, 1).unwrap().id;

        let v1 = store.append(id, &[1u8; 2048]).await.unwrap();
        let v2 = store.append(id, &[2u8; 100]).await.unwrap();

        assert_eq!(v1, Version::new(1));
        assert_eq!(v2, Version::new(2));
        assert_eq!(store.latest(id).unwrap(), v2);
        assert_eq!(store.size(id, Version::INITIAL).unwrap(), 0);
        assert_eq!(store.size(id, v1).unwrap(), 2048);
        assert_eq!(store.size(id, v2).unwrap(), 2148);
        assert!(matches!(
            store.size(id, Version::new(3)),
            Err(Error::VersionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_append_rejected() {
        let store = store();
        let id = store.create(1024, 1).unwrap().id;
        assert!(matches!(
            store.append(id, &[]).await,
            Err(Error::InvalidRange { .. })
        ));
        assert_eq!(store.latest(id).unwrap(), Version::INITIAL);
    }

    #[tokio::test]
    async fn test_info_at_past_versions() {
        let store = store();
        let id = store.create(16, 1).unwrap().id;
        store.append(id, &[1u8; 10]).await.unwrap();
        store.append(id, &[2u8; 30]).await.unwrap();

        let info = store.info_at(id, Version::new(1)).unwrap();
        assert_eq!(info.version, Version::new(1));
        assert_eq!(info.size, 10);
        assert_eq!(info.page_count(), 1);

        let latest = store.info(id).unwrap();
        assert_eq!(latest.version, Version::new(2));
        assert_eq!(latest.size, 40);

        assert!(matches!(
            store.info_at(id, Version::new(3)),
            Err(Error::VersionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unaligned_append_extends_trailing_page() {
        let store = store();
        let id = store.create(8, 1).unwrap().id;

        store.append(id, b"abc").await.unwrap();
        let v2 = store.append(id, b"defghijkl").await.unwrap();

        assert_eq!(read_all(&store, id, v2).await, b"abcdefghijkl");
        assert_eq!(read_all(&store, id, Version::new(1)).await, b"abc");

        // Page 0 was rewritten by v2, page 1 is new
        let pages = store.resolve_range(id, v2, 0, 12).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.page_id.version == v2));
    }

    #[tokio::test]
    async fn test_write_copy_on_write() {
        let store = store();
        let id = store.create(4, 1).unwrap().id;

        let v1 = store.append(id, b"aaaabbbbcccc").await.unwrap();
        let v2 = store.write(id, 5, b"XY").await.unwrap();

        assert_eq!(read_all(&store, id, v2).await, b"aaaabXYbcccc");
        assert_eq!(read_all(&store, id, v1).await, b"aaaabbbbcccc");
        assert_eq!(store.size(id, v2).unwrap(), 12);

        // Only page 1 was copied; pages 0 and 2 are shared with v1
        let pages = store.resolve_range(id, v2, 0, 12).unwrap();
        assert_eq!(pages[0].page_id.version, v1);
        assert_eq!(pages[1].page_id.version, v2);
        assert_eq!(pages[2].page_id.version, v1);
    }

    #[tokio::test]
    async fn test_write_spanning_pages_with_short_tail() {
        let store = store();
        let id = store.create(4, 1).unwrap().id;

        store.append(id, b"0123456789").await.unwrap();
        let v2 = store.write(id, 2, b"abcdefgh").await.unwrap();

        assert_eq!(read_all(&store, id, v2).await, b"01abcdefgh");
    }

    #[tokio::test]
    async fn test_write_out_of_bounds() {
        let store = store();
        let id = store.create(1024, 1).unwrap().id;
        store.append(id, &[0u8; 100]).await.unwrap();

        let err = store.write(id, 50, &[1u8; 51]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfBounds {
                offset: 50,
                size: 51,
                limit: 100
            }
        ));
        assert_eq!(store.latest(id).unwrap(), Version::new(1));

        // No implicit growth from an empty object either
        let empty = store.create(1024, 1).unwrap().id;
        assert!(matches!(
            store.write(empty, 0, b"x").await,
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_range_validation() {
        let store = store();
        let id = store.create(1024, 1).unwrap().id;
        let v1 = store.append(id, &[0u8; 2048]).await.unwrap();

        assert!(matches!(
            store.resolve_range(id, v1, 0, 0),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            store.resolve_range(id, v1, 1024, 1025),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            store.resolve_range(id, Version::new(7), 0, 1),
            Err(Error::VersionNotFound { .. })
        ));
        assert!(matches!(
            store.resolve_range(id, Version::INITIAL, 0, 1),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_range_pinned_versions() {
        let store = store();
        let id = store.create(2, 1).unwrap().id;
        store.append(id, b"aabbcc").await.unwrap();

        // Rewrite page 1 many times, leave pages 0 and 2 alone
        for i in 0..20u8 {
            store.write(id, 2, &[i, i]).await.unwrap();
        }
        let latest = store.latest(id).unwrap();
        assert_eq!(latest, Version::new(21));

        for version in 1..=21u32 {
            let pages = store.resolve_range(id, Version::new(version), 0, 6).unwrap();
            assert_eq!(pages[0].page_id.version, Version::new(1));
            assert_eq!(pages[1].page_id.version, Version::new(version));
            assert_eq!(pages[2].page_id.version, Version::new(1));
        }
    }

    #[tokio::test]
    async fn test_resolve_range_is_idempotent() {
        let store = store();
        let id = store.create(1024, 2).unwrap().id;
        let v1 = store.append(id, &[7u8; 3000]).await.unwrap();

        let first = store.resolve_range(id, v1, 100, 2500).unwrap();
        let second = store.resolve_range(id, v1, 100, 2500).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|p| p.replicas.len() == 2));
    }

    #[tokio::test]
    async fn test_replication_failure_publishes_nothing() {
        let backend = Arc::new(MemoryBackend::with_providers(2));
        let store = store_with(backend.clone());
        let id = store.create(1024, 2).unwrap().id;
        store.append(id, &[1u8; 1024]).await.unwrap();

        backend.set_provider_available("127.0.0.1:7002", false).unwrap();
        let err = store.append(id, &[2u8; 1024]).await.unwrap_err();
        assert!(matches!(err, Error::ReplicationFailure { .. }));
        assert_eq!(store.latest(id).unwrap(), Version::new(1));
        assert_eq!(store.size(id, Version::new(1)).unwrap(), 1024);

        // Retrying once the provider is back yields the next version, no gap
        backend.set_provider_available("127.0.0.1:7002", true).unwrap();
        let v2 = store.append(id, &[2u8; 1024]).await.unwrap();
        assert_eq!(v2, Version::new(2));
        assert_eq!(store.size(id, v2).unwrap(), 2048);
    }

    #[tokio::test]
    async fn test_write_replication_failure_publishes_nothing() {
        let backend = Arc::new(MemoryBackend::with_providers(2));
        let store = store_with(backend.clone());
        let id = store.create(1024, 2).unwrap().id;
        let v1 = store.append(id, &[1u8; 2048]).await.unwrap();

        // Partial overlay: page 0 is fetched from the surviving replica
        backend.set_provider_available("127.0.0.1:7002", false).unwrap();
        let err = store.write(id, 100, &[9u8; 50]).await.unwrap_err();
        assert!(matches!(err, Error::ReplicationFailure { .. }));
        assert_eq!(store.latest(id).unwrap(), v1);

        backend.set_provider_available("127.0.0.1:7002", true).unwrap();
        let v2 = store.write(id, 100, &[9u8; 50]).await.unwrap();
        assert_eq!(v2, Version::new(2));
        assert_eq!(store.size(id, v2).unwrap(), 2048);

        let data = read_all(&store, id, v2).await;
        assert!(data[..100].iter().all(|&b| b == 1));
        assert!(data[100..150].iter().all(|&b| b == 9));
        assert!(data[150..].iter().all(|&b| b == 1));
    }

    /// Backend whose puts wait for an admission
    struct GatedBackend {
        inner: MemoryBackend,
        gate: tokio::sync::Semaphore,
        puts_started: AtomicUsize,
    }

    impl GatedBackend {
        fn new(providers: u16) -> Self {
            Self {
                inner: MemoryBackend::with_providers(providers),
                gate: tokio::sync::Semaphore::new(0),
                puts_started: AtomicUsize::new(0),
            }
        }

        /// Let the next `puts` page puts through
        fn admit(&self, puts: usize) {
            self.gate.add_permits(puts);
        }
    }

    #[async_trait::async_trait]
    impl BackendClient for GatedBackend {
        fn name(&self) -> &str {
            "gated"
        }

        async fn put_page(
            &self,
            page_id: PageId,
            data: Bytes,
            replication_count: u32,
        ) -> Result<Vec<PageLocation>> {
            self.puts_started.fetch_add(1, Ordering::SeqCst);
            self.gate
                .acquire()
                .await
                .map_err(|_| Error::internal("gate closed"))?
                .forget();
            self.inner.put_page(page_id, data, replication_count).await
        }

        async fn page_locations(&self, page_id: PageId) -> Result<Vec<PageLocation>> {
            self.inner.page_locations(page_id).await
        }

        async fn page_bytes(&self, location: &PageLocation) -> Result<Bytes> {
            self.inner.page_bytes(location).await
        }
    }

    #[tokio::test]
    async fn test_dropped_update_leaves_object_unchanged() {
        let backend = Arc::new(GatedBackend::new(2));
        let store = store_with(backend.clone());
        let id = store.create(4, 1).unwrap().id;

        backend.admit(1);
        let v1 = store.append(id, b"aaaa").await.unwrap();

        // Both updates stall inside their page puts and are dropped there
        let append = tokio::time::timeout(
            Duration::from_millis(20),
            store.append(id, b"bbbbcccc"),
        )
        .await;
        assert!(append.is_err());
        let write = tokio::time::timeout(Duration::from_millis(20), store.write(id, 1, b"XY"))
            .await;
        assert!(write.is_err());
        assert_eq!(backend.puts_started.load(Ordering::SeqCst), 1 + 2 + 1);

        assert_eq!(store.latest(id).unwrap(), v1);
        assert_eq!(store.size(id, v1).unwrap(), 4);

        // The writer token was released and the next update takes v1 + 1
        backend.admit(1);
        let v2 = store.append(id, b"dddd").await.unwrap();
        assert_eq!(v2, Version::new(2));
        assert_eq!(read_all(&store, id, v2).await, b"aaaadddd");
    }

    #[test]
    fn test_object_id_space_exhausted() {
        let store = store();
        store
            .create_with_id(ObjectId::new(u32::MAX - 1), 1024, 1)
            .unwrap();
        assert!(matches!(store.create(1024, 1), Err(Error::Internal(_))));

        let other = VersionStore::new(Arc::new(MemoryBackend::with_providers(1)));
        other.create_with_id(ObjectId::new(u32::MAX), 1024, 1).unwrap();
        assert!(matches!(other.create(1024, 1), Err(Error::Internal(_))));
        assert!(matches!(
            other.clone_object(ObjectId::new(u32::MAX), Version::INITIAL),
            Err(Error::Internal(_))
        ));
        assert_eq!(other.object_count(), 1);
    }

    #[tokio::test]
    async fn test_clone_object() {
        let store = store();
        let source = store.create(4, 1).unwrap().id;
        let v1 = store.append(source, b"aaaabbbb").await.unwrap();
        store.append(source, b"cccc").await.unwrap();

        let clone = store.clone_object(source, v1).unwrap();
        assert_ne!(clone.id, source);
        assert_eq!(clone.version, Version::new(1));
        assert_eq!(clone.size, 8);
        assert_eq!(clone.page_size, 4);
        assert_eq!(read_all(&store, clone.id, clone.version).await, b"aaaabbbb");

        // Diverge both objects
        let cv2 = store.write(clone.id, 4, b"XXXX").await.unwrap();
        let sv3 = store.write(source, 0, b"YYYY").await.unwrap();
        assert_eq!(read_all(&store, clone.id, cv2).await, b"aaaaXXXX");
        assert_eq!(read_all(&store, source, sv3).await, b"YYYYbbbbcccc");
        assert_eq!(store.object_count(), 2);

        assert!(matches!(
            store.clone_object(source, Version::new(42)),
            Err(Error::VersionNotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_serialize() {
        let store = Arc::new(store());
        let id = store.create(16, 1).unwrap().id;

        let mut tasks = Vec::new();
        for writer in 0..8u8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    store.append(id, &[writer; 10]).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let latest = store.latest(id).unwrap();
        assert_eq!(latest, Version::new(80));
        for version in 0..=80u32 {
            assert_eq!(
                store.size(id, Version::new(version)).unwrap(),
                u64::from(version) * 10
            );
        }

        // Every append landed as one contiguous run of its writer's byte
        let data = read_all(&store, id, latest).await;
        let mut counts = [0usize; 8];
        for run in data.chunks(10) {
            assert!(run.iter().all(|&b| b == run[0]));
            counts[run[0] as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c == 10));
    }
}
