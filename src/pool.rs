//! Per-CPU decompression context pool.
//!
//! Decompression sits on the page-fault read path and must be served
//! cheaply: instead of one engine behind a global lock, the pool keeps one
//! slot per possible CPU identifier and routes each call to the calling
//! CPU's slot. The per-slot mutex is the portable stand-in for CPU pinning:
//! the slot index is a locality hint, the lock is the exclusivity
//! guarantee, so a caller migrating CPUs mid-call stays correct.
//!
//! The table is sized for every *possible* CPU at creation, not just online
//! ones, so it remains valid regardless of which CPUs come online later.
//! CPUs added beyond that bound after creation share slots via the modulo
//! fallback; growing the table requires recreating the backend.

use crate::alloc::WorkspaceAlloc;
use crate::codec::PageCodec;
use crate::page::PAGE_SIZE;
use crate::{Error, Result};
use parking_lot::Mutex;

/// One decompression slot per possible CPU, each owning its engine and
/// workspace.
///
/// Either fully present (one valid slot per CPU) or never constructed:
/// partial initialization rolls back every slot built so far and the value
/// does not come into existence.
pub struct DecompressionPool<C: PageCodec> {
    slots: Box<[Mutex<C::DecompressEngine>]>,
}

impl<C: PageCodec> std::fmt::Debug for DecompressionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecompressionPool").finish_non_exhaustive()
    }
}

impl<C: PageCodec> DecompressionPool<C> {
    /// Build one slot per CPU identifier in `0..cpus`.
    ///
    /// # Errors
    ///
    /// Propagates the first allocation or engine-init failure; slots
    /// already built are dropped (workspaces freed) before returning.
    pub fn create(codec: &C, alloc: &dyn WorkspaceAlloc, cpus: usize) -> Result<Self> {
        if cpus == 0 {
            return Err(Error::InvalidInput("pool needs at least one slot".to_string()));
        }

        let bound = codec.decompress_workspace_bound();
        let mut slots = Vec::with_capacity(cpus);
        for cpu in 0..cpus {
            let workspace = alloc.alloc_zeroed(bound).map_err(|e| {
                tracing::debug!(cpu, "slot allocation failed, rolling back pool");
                e
            })?;
            let engine = codec.init_decompress(workspace)?;
            slots.push(Mutex::new(engine));
        }

        tracing::debug!(slots = cpus, workspace_bytes = bound, "decompression pool ready");
        Ok(Self { slots: slots.into_boxed_slice() })
    }

    /// Number of slots in the pool.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Decompress `src` into one page using the calling CPU's slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] or [`Error::CorruptedData`] from the codec;
    /// a failed page is reported, never silently delivered.
    pub fn decompress(&self, codec: &C, src: &[u8], dst: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let idx = current_cpu() % self.slots.len();
        // Holding the slot lock for the whole call is the exclusive-access
        // token; nothing else may race on this engine's mutable state.
        let mut engine = self.slots[idx].lock();
        codec.decompress(&mut engine, src, dst)
    }
}

/// Upper bound on CPU identifiers this host can ever bring online.
///
/// Reads the kernel's possible-CPU mask, falling back to the current
/// parallelism when sysfs is unavailable (non-Linux hosts, sandboxes).
#[must_use]
pub fn possible_cpus() -> usize {
    if let Some(n) = sysfs_possible_cpus() {
        return n;
    }
    std::thread::available_parallelism().map_or(1, usize::from)
}

fn sysfs_possible_cpus() -> Option<usize> {
    let raw = std::fs::read_to_string("/sys/devices/system/cpu/possible").ok()?;
    parse_cpu_range(raw.trim())
}

/// Parse a kernel cpulist (`"0"`, `"0-7"`, `"0-3,8-11"`) into a CPU count.
fn parse_cpu_range(raw: &str) -> Option<usize> {
    let last = raw.rsplit(['-', ',']).next()?;
    let max: usize = last.trim().parse().ok()?;
    Some(max + 1)
}

#[cfg(target_os = "linux")]
fn current_cpu() -> usize {
    // Racy by nature: the caller may migrate right after the read. The
    // slot lock keeps that safe; this only costs locality.
    let cpu = unsafe { libc::sched_getcpu() };
    usize::try_from(cpu).unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn current_cpu() -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{TieredAlloc, Workspace};
    use crate::codec::ZstdCodec;
    use crate::page::MAX_COMPRESSED_SIZE;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every request after a fixed number of successes; successes
    /// delegate to a real allocator so drops stay observable.
    struct QuotaAlloc {
        inner: TieredAlloc,
        remaining: AtomicUsize,
    }

    impl QuotaAlloc {
        fn new(allowed: usize) -> Self {
            Self { inner: TieredAlloc::new(), remaining: AtomicUsize::new(allowed) }
        }
    }

    impl WorkspaceAlloc for QuotaAlloc {
        fn alloc_zeroed(&self, size: usize) -> Result<Workspace> {
            if self.remaining.load(Ordering::Relaxed) == 0 {
                return Err(Error::AllocFailed { requested: size });
            }
            self.remaining.fetch_sub(1, Ordering::Relaxed);
            self.inner.alloc_zeroed(size)
        }
    }

    fn compress_page(page: &[u8; PAGE_SIZE]) -> Vec<u8> {
        let codec = ZstdCodec;
        let alloc = TieredAlloc::new();
        let ws = alloc
            .alloc_zeroed(codec.compress_workspace_bound(&codec.params()))
            .unwrap();
        let mut engine = codec.init_compress(ws).unwrap();
        let mut buf = vec![0u8; MAX_COMPRESSED_SIZE];
        let len = codec.compress(&mut engine, page, &mut buf).unwrap();
        buf.truncate(len);
        buf
    }

    #[test]
    fn test_pool_completeness() {
        let codec = ZstdCodec;
        let alloc = TieredAlloc::new();
        let pool = DecompressionPool::create(&codec, &alloc, 4).unwrap();
        assert_eq!(pool.slot_count(), 4);
        // One workspace per slot, full size each.
        assert_eq!(alloc.bytes_outstanding(), 4 * codec.decompress_workspace_bound());
    }

    #[test]
    fn test_pool_rejects_zero_slots() {
        let codec = ZstdCodec;
        let alloc = TieredAlloc::new();
        let err = DecompressionPool::create(&codec, &alloc, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_pool_rollback_on_slot_failure() {
        let codec = ZstdCodec;
        // First slot succeeds, second fails: everything built so far must
        // be rolled back and nothing remains allocated.
        let alloc = QuotaAlloc::new(1);
        let result = DecompressionPool::create(&codec, &alloc, 4);
        assert!(matches!(result, Err(Error::AllocFailed { .. })));
        assert_eq!(alloc.inner.bytes_outstanding(), 0);
    }

    #[test]
    fn test_pool_rollback_on_last_slot_failure() {
        let codec = ZstdCodec;
        let alloc = QuotaAlloc::new(3);
        let result = DecompressionPool::create(&codec, &alloc, 4);
        assert!(result.is_err());
        assert_eq!(alloc.inner.bytes_outstanding(), 0);
    }

    #[test]
    fn test_pool_drop_frees_all_slots() {
        let codec = ZstdCodec;
        let alloc = TieredAlloc::new();
        let pool = DecompressionPool::create(&codec, &alloc, 3).unwrap();
        assert!(alloc.bytes_outstanding() > 0);
        drop(pool);
        assert_eq!(alloc.bytes_outstanding(), 0);
    }

    #[test]
    fn test_pool_decompress_roundtrip() {
        let codec = ZstdCodec;
        let alloc = TieredAlloc::new();
        let pool = DecompressionPool::create(&codec, &alloc, 2).unwrap();

        let page = [0x42u8; PAGE_SIZE];
        let frame = compress_page(&page);

        let mut out = [0u8; PAGE_SIZE];
        pool.decompress(&codec, &frame, &mut out).unwrap();
        assert_eq!(page, out);
    }

    #[test]
    fn test_pool_decompress_surfaces_codec_error() {
        let codec = ZstdCodec;
        let alloc = TieredAlloc::new();
        let pool = DecompressionPool::create(&codec, &alloc, 1).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        let err = pool.decompress(&codec, &[0xDE, 0xAD, 0xBE, 0xEF], &mut out).unwrap_err();
        assert!(matches!(err, Error::Codec { .. }));
    }

    #[test]
    fn test_parse_cpu_range() {
        assert_eq!(parse_cpu_range("0"), Some(1));
        assert_eq!(parse_cpu_range("0-7"), Some(8));
        assert_eq!(parse_cpu_range("0-3,8-11"), Some(12));
        assert_eq!(parse_cpu_range("garbage"), None);
        assert_eq!(parse_cpu_range(""), None);
    }

    #[test]
    fn test_possible_cpus_nonzero() {
        assert!(possible_cpus() >= 1);
    }
}
