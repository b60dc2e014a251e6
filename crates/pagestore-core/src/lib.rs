//! pagestore Core
//!
//! This crate implements a versioned, page-structured object store on top of
//! a replicated page backend. Objects are split into fixed-size pages; every
//! update publishes a new immutable version that shares all unmodified pages
//! with its predecessor (copy-on-write).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ObjectHandle   │  append / write / read / locations
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  VersionStore   │  per-object histories, page record index,
//! │  - PageMap      │  per-object writer serialization
//! │  - ReplicaReader│
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  BackendClient  │  replicated page put/get (e.g. MemoryBackend)
//! └─────────────────┘
//! ```

pub mod backend;
pub mod handle;
pub mod memory;
pub mod page_map;
pub mod version_store;

pub use backend::{BackendClient, ReadPolicy, ReplicaReader};
pub use handle::ObjectHandle;
pub use memory::MemoryBackend;
pub use page_map::{PageMap, PageSlice};
pub use version_store::{ResolvedPage, VersionStore};
