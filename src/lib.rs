//! Zstandard page-compression backend for RAM-backed block devices.
//!
//! This crate compresses and decompresses fixed-size 4KB pages on demand
//! for a swap-style block device: one shared compression context on the
//! write path, and a per-CPU pool of decompression slots on the read path
//! so page faults are served without a global lock. Codec workspaces are
//! sized deterministically from fixed parameters and obtained through a
//! two-tier allocator that fails fast instead of waiting on reclaim, and
//! creation either yields a fully wired instance or rolls back everything
//! it allocated.
//!
//! # Example
//!
//! ```
//! use zcomp_zstd::{ZcompBuilder, MAX_COMPRESSED_SIZE, PAGE_SIZE};
//!
//! let backend = ZcompBuilder::new().build().unwrap();
//!
//! let page = [0u8; PAGE_SIZE];
//! let mut buf = [0u8; MAX_COMPRESSED_SIZE];
//! let len = backend.compress(&page, &mut buf).unwrap();
//! assert!(len < PAGE_SIZE);
//!
//! let mut out = [0u8; PAGE_SIZE];
//! backend.decompress(&buf[..len], &mut out).unwrap();
//! assert_eq!(page, out);
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alloc;
mod backend;
pub mod codec;
mod error;
mod page;
pub mod pool;

pub use backend::{CompressionContext, ZcompBackend, BACKEND_NAME};
pub use codec::{CodecParams, PageCodec, ZstdCodec};
pub use error::{CodecStage, Error, Result};
pub use page::{CompressedPage, CompressionStats, MAX_COMPRESSED_SIZE, PAGE_SIZE};

use crate::alloc::{TieredAlloc, WorkspaceAlloc};

/// Builder for a backend instance.
///
/// By default the decompression pool is sized for every possible CPU on
/// the host and workspaces come from the production tiered allocator; both
/// can be overridden, which is also the hook for hosts whose topology is
/// known out of band.
#[derive(Debug, Clone, Default)]
pub struct ZcompBuilder {
    cpus: Option<usize>,
}

impl ZcompBuilder {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the possible-CPU discovery with a fixed slot count.
    #[must_use]
    pub fn cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus);
        self
    }

    /// Build a zstd backend with the production allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if any workspace allocation or engine construction
    /// fails. Failure rolls back everything allocated along the way; no
    /// partially-initialized instance is ever observable.
    pub fn build(self) -> Result<ZcompBackend<ZstdCodec>> {
        self.build_with(&TieredAlloc::new())
    }

    /// Build a zstd backend drawing workspaces from `alloc`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::build`].
    pub fn build_with(self, alloc: &dyn WorkspaceAlloc) -> Result<ZcompBackend<ZstdCodec>> {
        self.build_codec(ZstdCodec, alloc)
    }

    /// Build a backend around an arbitrary codec implementation.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::build`].
    pub fn build_codec<C: PageCodec>(
        self,
        codec: C,
        alloc: &dyn WorkspaceAlloc,
    ) -> Result<ZcompBackend<C>> {
        let cpus = self.cpus.unwrap_or_else(pool::possible_cpus);
        ZcompBackend::with_codec(codec, alloc, cpus)
    }
}
