//! Page mapping for versioned objects
//!
//! Translates byte ranges of an object into per-page slices.

use pagestore_common::{Error, PageIndex, Result};

/// A range of bytes within one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlice {
    /// Page index within the object
    pub page_index: PageIndex,
    /// Byte offset within the page
    pub offset_in_page: u64,
    /// Number of bytes in this slice
    pub length: u64,
}

/// Maps byte ranges to pages
///
/// Objects are divided into fixed-size pages:
///
/// ```text
/// Object (page_size = 1 KB)
/// ├── Page 0:  bytes 0 - 1KB
/// ├── Page 1:  bytes 1KB - 2KB
/// │   ...
/// └── Page N:  bytes N KB - size   (may be short)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMap {
    page_size: u64,
}

impl PageMap {
    /// Create a page map for the given page size
    pub fn new(page_size: u64) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::invalid_argument("page size must be positive"));
        }
        Ok(Self { page_size })
    }

    /// Get the page size
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Convert a byte offset to the page holding it
    #[must_use]
    pub const fn page_of(&self, byte_offset: u64) -> PageIndex {
        byte_offset / self.page_size
    }

    /// First byte offset of a page
    #[must_use]
    pub const fn page_start(&self, page_index: PageIndex) -> u64 {
        page_index * self.page_size
    }

    /// Number of pages needed to hold `size_bytes`
    #[must_use]
    pub const fn page_count(&self, size_bytes: u64) -> u64 {
        size_bytes.div_ceil(self.page_size)
    }

    /// Number of bytes page `page_index` holds in an object of `object_size`
    #[must_use]
    pub fn page_len(&self, page_index: PageIndex, object_size: u64) -> u64 {
        let start = self.page_start(page_index);
        object_size.saturating_sub(start).min(self.page_size)
    }

    /// Convert a byte range to page slices
    ///
    /// Returns the ordered slices covering `[offset, offset + size)`. The
    /// indices are contiguous and the lengths sum to `size`.
    pub fn slices(&self, offset: u64, size: u64) -> Result<Vec<PageSlice>> {
        if size == 0 {
            return Err(Error::InvalidRange { offset, size });
        }
        let end = offset
            .checked_add(size)
            .ok_or(Error::InvalidRange { offset, size })?;

        let first_page = self.page_of(offset);
        let last_page = self.page_of(end - 1);

        let count = usize::try_from(last_page - first_page + 1)
            .map_err(|_| Error::InvalidRange { offset, size })?;
        let mut slices = Vec::with_capacity(count);

        for page_index in first_page..=last_page {
            let page_start = self.page_start(page_index);
            let page_end = page_start.saturating_add(self.page_size);

            // Intersection of [offset, end) and [page_start, page_end)
            let range_start = offset.max(page_start);
            let range_end = end.min(page_end);

            slices.push(PageSlice {
                page_index,
                offset_in_page: range_start - page_start,
                length: range_end - range_start,
            });
        }

        Ok(slices)
    }
}
