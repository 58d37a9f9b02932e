//! Bounded two-tier workspace allocation.
//!
//! Codec workspaces are allocated while the host device may be under memory
//! pressure (swap-out and writeback paths), so allocation must fail fast
//! rather than wait on reclaim. Two tiers are tried in order:
//!
//! 1. **Direct**: a contiguous heap allocation through a fallible
//!    reservation. Refused outright above a size cap, since large contiguous
//!    requests are the ones that fail on a fragmented heap.
//! 2. **Mapped**: an anonymous virtual-memory mapping, more expensive to set
//!    up but far more likely to succeed for large regions.
//!
//! Both tiers hand back zero-initialized memory. The tier that satisfied a
//! request is recorded on the returned [`Workspace`] so each path can be
//! exercised deterministically. This only runs at backend creation, never on
//! the per-page compress/decompress paths.

use crate::{Error, Result};
use memmap2::MmapMut;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Largest request served from the direct heap tier.
const DIRECT_TIER_MAX: usize = 4 << 20;

/// Allocation tier that satisfied a workspace request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocTier {
    /// Contiguous heap allocation.
    Direct,
    /// Anonymous virtual-memory mapping.
    Mapped,
}

enum WorkspaceMem {
    Heap(Box<[u8]>),
    Mapped(MmapMut),
}

/// Decrements the owning allocator's outstanding-byte count when the
/// workspace is freed.
struct AllocToken {
    bytes: usize,
    outstanding: Arc<AtomicUsize>,
}

impl Drop for AllocToken {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(self.bytes, Ordering::Relaxed);
    }
}

/// An exclusively-owned, zero-initialized scratch region for one codec
/// engine.
///
/// Never resized after allocation; freed exactly once, by dropping the
/// owner. The engine constructed over a workspace and the workspace itself
/// are released together.
pub struct Workspace {
    mem: WorkspaceMem,
    tier: AllocTier,
    _token: AllocToken,
}

impl Workspace {
    /// Size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the region is empty (never true for a live workspace).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tier that satisfied this allocation.
    #[must_use]
    pub fn tier(&self) -> AllocTier {
        self.tier
    }

    /// Borrow the region.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.mem {
            WorkspaceMem::Heap(buf) => buf,
            WorkspaceMem::Mapped(map) => map,
        }
    }

    /// Borrow the region mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mem {
            WorkspaceMem::Heap(buf) => buf,
            WorkspaceMem::Mapped(map) => map,
        }
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("len", &self.len())
            .field("tier", &self.tier)
            .finish()
    }
}

/// Source of codec workspaces.
///
/// Implemented by [`TieredAlloc`] in production; tests substitute failing
/// allocators to drive rollback paths.
pub trait WorkspaceAlloc: Send + Sync {
    /// Allocate a zero-initialized workspace of exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocFailed`] when no tier can satisfy the request;
    /// the caller must not assume any partial allocation took place.
    fn alloc_zeroed(&self, size: usize) -> Result<Workspace>;
}

/// The production two-tier allocator.
///
/// Tracks bytes currently handed out, so teardown and rollback are
/// observable: after a failed creation call, [`Self::bytes_outstanding`]
/// returns to its prior value.
#[derive(Debug, Clone)]
pub struct TieredAlloc {
    direct_max: usize,
    outstanding: Arc<AtomicUsize>,
}

impl Default for TieredAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl TieredAlloc {
    /// Create an allocator with the default direct-tier cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_direct_max(DIRECT_TIER_MAX)
    }

    /// Create an allocator whose direct tier refuses requests above
    /// `direct_max` bytes. Mainly useful to force the mapped tier.
    #[must_use]
    pub fn with_direct_max(direct_max: usize) -> Self {
        Self { direct_max, outstanding: Arc::new(AtomicUsize::new(0)) }
    }

    /// Bytes currently held by live workspaces from this allocator.
    #[must_use]
    pub fn bytes_outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    fn token(&self, bytes: usize) -> AllocToken {
        self.outstanding.fetch_add(bytes, Ordering::Relaxed);
        AllocToken { bytes, outstanding: Arc::clone(&self.outstanding) }
    }

    fn try_direct(&self, size: usize) -> Option<Box<[u8]>> {
        if size > self.direct_max {
            return None;
        }
        let mut buf = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            return None;
        }
        buf.resize(size, 0);
        Some(buf.into_boxed_slice())
    }

    fn try_mapped(size: usize) -> Option<MmapMut> {
        MmapMut::map_anon(size).ok()
    }
}

impl WorkspaceAlloc for TieredAlloc {
    fn alloc_zeroed(&self, size: usize) -> Result<Workspace> {
        if size == 0 {
            return Err(Error::InvalidInput("workspace size must be non-zero".to_string()));
        }

        if let Some(buf) = self.try_direct(size) {
            return Ok(Workspace {
                mem: WorkspaceMem::Heap(buf),
                tier: AllocTier::Direct,
                _token: self.token(size),
            });
        }

        tracing::debug!(size, "direct tier refused workspace, trying mapped tier");
        if let Some(map) = Self::try_mapped(size) {
            return Ok(Workspace {
                mem: WorkspaceMem::Mapped(map),
                tier: AllocTier::Mapped,
                _token: self.token(size),
            });
        }

        Err(Error::AllocFailed { requested: size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_request_uses_direct_tier() {
        let alloc = TieredAlloc::new();
        let ws = alloc.alloc_zeroed(64 << 10).unwrap();
        assert_eq!(ws.tier(), AllocTier::Direct);
        assert_eq!(ws.len(), 64 << 10);
    }

    #[test]
    fn test_large_request_falls_back_to_mapped_tier() {
        let alloc = TieredAlloc::with_direct_max(16);
        let ws = alloc.alloc_zeroed(64 << 10).unwrap();
        assert_eq!(ws.tier(), AllocTier::Mapped);
        assert_eq!(ws.len(), 64 << 10);
    }

    #[test]
    fn test_workspace_is_zeroed_on_both_tiers() {
        let direct = TieredAlloc::new().alloc_zeroed(4096).unwrap();
        assert!(direct.as_slice().iter().all(|&b| b == 0));

        let mapped = TieredAlloc::with_direct_max(0).alloc_zeroed(4096).unwrap();
        assert_eq!(mapped.tier(), AllocTier::Mapped);
        assert!(mapped.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_workspace_is_writable() {
        let alloc = TieredAlloc::new();
        let mut ws = alloc.alloc_zeroed(4096).unwrap();
        ws.as_mut_slice()[0] = 0xFF;
        ws.as_mut_slice()[4095] = 0xFF;
        assert_eq!(ws.as_slice()[0], 0xFF);
    }

    #[test]
    fn test_zero_size_rejected() {
        let alloc = TieredAlloc::new();
        assert!(alloc.alloc_zeroed(0).is_err());
    }

    #[test]
    fn test_outstanding_accounting() {
        let alloc = TieredAlloc::new();
        assert_eq!(alloc.bytes_outstanding(), 0);

        let a = alloc.alloc_zeroed(1024).unwrap();
        let b = alloc.alloc_zeroed(2048).unwrap();
        assert_eq!(alloc.bytes_outstanding(), 3072);

        drop(a);
        assert_eq!(alloc.bytes_outstanding(), 2048);
        drop(b);
        assert_eq!(alloc.bytes_outstanding(), 0);
    }

    #[test]
    fn test_outstanding_shared_across_clones() {
        let alloc = TieredAlloc::new();
        let clone = alloc.clone();
        let ws = clone.alloc_zeroed(512).unwrap();
        assert_eq!(alloc.bytes_outstanding(), 512);
        drop(ws);
        assert_eq!(alloc.bytes_outstanding(), 0);
    }

    #[test]
    fn test_workspace_debug_omits_contents() {
        let alloc = TieredAlloc::new();
        let ws = alloc.alloc_zeroed(128).unwrap();
        let debug = format!("{ws:?}");
        assert!(debug.contains("Workspace"));
        assert!(debug.contains("128"));
    }
}
