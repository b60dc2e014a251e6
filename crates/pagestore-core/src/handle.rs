//! Client handle bound to one object
//!
//! An [`ObjectHandle`] forwards every operation to the shared
//! [`VersionStore`] under its object id. It caches nothing but the object's
//! immutable parameters (page size and replication count): versions, sizes
//! and page locations are re-resolved on every call so that concurrent
//! writers are always observed consistently.

use crate::version_store::{ResolvedPage, VersionStore};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};
use pagestore_common::{ObjectId, ObjectInfo, PageLocations, Result, Version};
use std::sync::Arc;
use tracing::debug;

/// Handle to one versioned object
pub struct ObjectHandle {
    store: Arc<VersionStore>,
    id: ObjectId,
    page_size: u64,
    replication_count: u32,
}

impl ObjectHandle {
    /// Create a new object and bind a handle to it
    pub fn create(
        store: Arc<VersionStore>,
        page_size: u64,
        replication_count: u32,
    ) -> Result<Self> {
        let info = store.create(page_size, replication_count)?;
        Ok(Self::bind(store, &info))
    }

    /// Bind a handle to an existing object
    pub fn open(store: Arc<VersionStore>, id: ObjectId) -> Result<Self> {
        let info = store.info(id)?;
        Ok(Self::bind(store, &info))
    }

    fn bind(store: Arc<VersionStore>, info: &ObjectInfo) -> Self {
        debug!("Acquired handle for object {}", info.id);
        Self {
            store,
            id: info.id,
            page_size: info.page_size,
            replication_count: info.replication_count,
        }
    }

    /// Object id
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// Bytes per page
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Replicas per page
    pub const fn replication_count(&self) -> u32 {
        self.replication_count
    }

    /// Number of objects in the store
    pub fn object_count(&self) -> usize {
        self.store.object_count()
    }

    /// Highest committed version
    pub fn latest(&self) -> Result<Version> {
        self.store.latest(self.id)
    }

    /// Metadata as of the latest committed version
    pub fn info(&self) -> Result<ObjectInfo> {
        self.store.info(self.id)
    }

    /// Object size at `version`
    pub fn size(&self, version: Version) -> Result<u64> {
        self.store.size(self.id, version)
    }

    /// Append bytes at the end of the object
    pub async fn append(&self, data: &[u8]) -> Result<Version> {
        self.store.append(self.id, data).await
    }

    /// Overwrite bytes within the current size
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<Version> {
        self.store.write(self.id, offset, data).await
    }

    /// Read `size` bytes at `offset` as of `version`
    ///
    /// Pages are fetched concurrently and reassembled in order. A page whose
    /// recorded replicas have moved is re-located through the backend.
    pub async fn read(&self, offset: u64, size: u64, version: Version) -> Result<Bytes> {
        let pages = self.store.resolve_range(self.id, version, offset, size)?;
        let reader = self.store.reader();
        let limit = reader.policy().max_concurrent_fetches;

        let chunks: Vec<Bytes> = stream::iter(pages)
            .map(|page: ResolvedPage| async move {
                reader
                    .read_page(
                        page.page_id,
                        &page.replicas,
                        page.slice.offset_in_page,
                        page.slice.length,
                    )
                    .await
            })
            .buffered(limit)
            .try_collect()
            .await?;

        let mut out = BytesMut::with_capacity(usize::try_from(size).unwrap_or_default());
        for chunk in chunks {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Physical locations of `[offset, offset + size)` as of `version`
    ///
    /// One entry per page in page order, each listing every replica narrowed
    /// to the part of the page inside the range.
    pub fn locations(&self, offset: u64, size: u64, version: Version) -> Result<Vec<PageLocations>> {
        let pages = self.store.resolve_range(self.id, version, offset, size)?;
        Ok(pages
            .iter()
            .map(|page| PageLocations {
                page_index: page.slice.page_index,
                replicas: page.slice_locations(),
            })
            .collect())
    }

    /// Clone this object as of `version` into a new object
    pub fn clone_at(&self, version: Version) -> Result<Self> {
        let info = self.store.clone_object(self.id, version)?;
        Ok(Self::bind(self.store.clone(), &info))
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        debug!("Released handle for object {}", self.id);
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("page_size", &self.page_size)
            .field("replication_count", &self.replication_count)
            .finish_non_exhaustive()
    }
}
