//! Core type definitions for pagestore
//!
//! This module defines the identifiers and descriptors shared by the version
//! store, the object handle and the storage backends.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an object
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
pub struct ObjectId(u32);

impl ObjectId {
    /// Create from a raw id
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get as little-endian bytes (for hashing)
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// Version number of an object
///
/// Version 0 is the empty object produced by `create`. Every committed update
/// produces the next version.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[display("{_0}")]
pub struct Version(u32);

impl Version {
    /// Version of a freshly created object
    pub const INITIAL: Self = Self(0);

    /// Create from a raw version number
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version number
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Position of this version in a per-object history
    #[must_use]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// The version following this one, `None` on counter exhaustion
    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of a page within an object (page 0 holds bytes `[0, page_size)`)
pub type PageIndex = u64;

/// Storage key for the content of one page as written by one version
///
/// Page content is immutable: a later version that modifies the same page
/// index stores a new `PageId`, while unmodified pages keep referring to the
/// id of the version that last wrote them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    /// Object the page was written for
    pub object_id: ObjectId,
    /// Page index within that object
    pub page_index: PageIndex,
    /// Version that wrote this content
    pub version: Version,
}

impl PageId {
    #[must_use]
    pub const fn new(object_id: ObjectId, page_index: PageIndex, version: Version) -> Self {
        Self {
            object_id,
            page_index,
            version,
        }
    }

    /// Stable byte form used as a hashing key
    #[must_use]
    pub fn to_key_bytes(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..4].copy_from_slice(&self.object_id.to_le_bytes());
        key[4..12].copy_from_slice(&self.page_index.to_le_bytes());
        key[12..].copy_from_slice(&self.version.as_u32().to_le_bytes());
        key
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "obj_{}/page_{:08x}@v{}",
            self.object_id, self.page_index, self.version
        )
    }
}

/// Physical address of one replica of (a slice of) a page
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageLocation {
    /// Provider host
    pub host: String,
    /// Provider port
    pub port: u16,
    /// Byte offset within the provider's storage
    pub offset: u64,
    /// Number of bytes
    pub size: u64,
}

impl PageLocation {
    pub fn new(host: impl Into<String>, port: u16, offset: u64, size: u64) -> Self {
        Self {
            host: host.into(),
            port,
            offset,
            size,
        }
    }

    /// Provider endpoint as `host:port`
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Narrow this location to `length` bytes starting `offset_in_page`
    /// bytes into the replica.
    ///
    /// The caller guarantees `offset_in_page + length <= self.size`.
    #[must_use]
    pub fn slice(&self, offset_in_page: u64, length: u64) -> Self {
        debug_assert!(offset_in_page + length <= self.size);
        Self {
            host: self.host.clone(),
            port: self.port,
            offset: self.offset + offset_in_page,
            size: length,
        }
    }
}

impl fmt::Display for PageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{}, {}, {})",
            self.host, self.port, self.offset, self.size
        )
    }
}

/// Replica locations for one page covering part of a queried range
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLocations {
    /// Page index within the object
    pub page_index: PageIndex,
    /// One location per replica, narrowed to the queried slice
    pub replicas: Vec<PageLocation>,
}

/// Snapshot of an object's metadata at one version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object identifier
    pub id: ObjectId,
    /// Bytes per page
    pub page_size: u64,
    /// Physical copies kept per page
    pub replication_count: u32,
    /// Version this snapshot describes
    pub version: Version,
    /// Object size in bytes at `version`
    pub size: u64,
}

impl ObjectInfo {
    /// Number of pages holding data at this version
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.size.div_ceil(self.page_size)
    }
}
