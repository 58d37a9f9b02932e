//! Backend facade: compression context, instance wiring, statistics.

use crate::alloc::WorkspaceAlloc;
use crate::codec::{PageCodec, ZstdCodec};
use crate::page::{CompressedPage, CompressionStats, MAX_COMPRESSED_SIZE, PAGE_SIZE};
use crate::pool::DecompressionPool;
use crate::{Error, Result, ZcompBuilder};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Name under which this backend registers with the dispatch framework.
pub const BACKEND_NAME: &str = "zstd";

/// The single compression context of a backend instance.
///
/// Provides no internal locking: `compress` takes `&mut self`, so a caller
/// embedding the context directly is responsible for serializing access
/// (one context per concurrent compression stream). [`ZcompBackend`] wraps
/// it in a mutex to serve the device's write path from shared references.
pub struct CompressionContext<C: PageCodec> {
    engine: C::CompressEngine,
}

impl<C: PageCodec> CompressionContext<C> {
    /// Size the workspace for the fixed parameters, allocate it, and
    /// construct the engine over it.
    ///
    /// # Errors
    ///
    /// Propagates allocation failure; on engine-init failure the workspace
    /// is freed before the error is returned.
    pub fn create(codec: &C, alloc: &dyn WorkspaceAlloc) -> Result<Self> {
        let params = codec.params();
        let workspace = alloc.alloc_zeroed(codec.compress_workspace_bound(&params))?;
        let engine = codec.init_compress(workspace)?;
        Ok(Self { engine })
    }

    /// Compress one page into `dst`, returning the frame length.
    ///
    /// # Errors
    ///
    /// See [`PageCodec::compress`].
    pub fn compress(&mut self, codec: &C, page: &[u8; PAGE_SIZE], dst: &mut [u8]) -> Result<usize> {
        codec.compress(&mut self.engine, page, dst)
    }
}

#[derive(Default)]
struct BackendStats {
    pages_compressed: AtomicU64,
    pages_incompressible: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    compress_time_ns: AtomicU64,
    decompress_time_ns: AtomicU64,
}

impl BackendStats {
    fn note_compress(&self, frame_len: Option<usize>, elapsed_ns: u64) {
        self.pages_compressed.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(PAGE_SIZE as u64, Ordering::Relaxed);
        if let Some(len) = frame_len {
            self.bytes_out.fetch_add(len as u64, Ordering::Relaxed);
        }
        self.compress_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    fn note_incompressible(&self) {
        self.pages_incompressible.fetch_add(1, Ordering::Relaxed);
    }

    fn note_decompress(&self, elapsed_ns: u64) {
        self.decompress_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CompressionStats {
        CompressionStats {
            pages_compressed: self.pages_compressed.load(Ordering::Relaxed),
            pages_incompressible: self.pages_incompressible.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            compress_time_ns: self.compress_time_ns.load(Ordering::Relaxed),
            decompress_time_ns: self.decompress_time_ns.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.pages_compressed.store(0, Ordering::Relaxed);
        self.pages_incompressible.store(0, Ordering::Relaxed);
        self.bytes_in.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        self.compress_time_ns.store(0, Ordering::Relaxed);
        self.decompress_time_ns.store(0, Ordering::Relaxed);
    }
}

/// One active backend instance.
///
/// Owns its compression context and its decompression slot table outright;
/// instances are independent of one another. Creation either yields a fully
/// wired instance or rolls back everything allocated along the failed path,
/// including this record itself. Dropping the instance is `destroy`: every
/// slot workspace and the compression workspace are freed exactly once, and
/// an instance whose creation failed before the pool step never existed, so
/// there is nothing to double-free.
pub struct ZcompBackend<C: PageCodec = ZstdCodec> {
    codec: C,
    cctx: Mutex<CompressionContext<C>>,
    pool: DecompressionPool<C>,
    stats: BackendStats,
}

impl ZcompBackend<ZstdCodec> {
    /// Create a zstd backend with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any workspace allocation or engine construction
    /// fails; nothing is left allocated in that case.
    pub fn create() -> Result<Self> {
        ZcompBuilder::new().build()
    }
}

impl<C: PageCodec> ZcompBackend<C> {
    /// Compression context first, pool second; either failure unwinds
    /// whatever was built before it.
    pub(crate) fn with_codec(codec: C, alloc: &dyn WorkspaceAlloc, cpus: usize) -> Result<Self> {
        let cctx = CompressionContext::create(&codec, alloc)?;
        let pool = DecompressionPool::create(&codec, alloc, cpus)?;
        Ok(Self { codec, cctx: Mutex::new(cctx), pool, stats: BackendStats::default() })
    }

    /// Compress one page into `dst`, returning the frame length.
    ///
    /// `dst` must hold at least [`MAX_COMPRESSED_SIZE`] bytes. Compression
    /// runs on the single shared context; concurrent callers serialize on
    /// it. A codec failure is non-fatal — callers typically store the page
    /// verbatim instead (see [`Self::compress_page`]).
    ///
    /// # Errors
    ///
    /// See [`PageCodec::compress`].
    pub fn compress(&self, page: &[u8; PAGE_SIZE], dst: &mut [u8]) -> Result<usize> {
        let start = Instant::now();
        let result = self.cctx.lock().compress(&self.codec, page, dst);
        self.stats
            .note_compress(result.as_ref().ok().copied(), start.elapsed().as_nanos() as u64);
        result
    }

    /// Decompress `src` into exactly one page via the calling CPU's slot.
    ///
    /// # Errors
    ///
    /// A codec failure here means the stored page cannot be recovered; it
    /// is surfaced to the caller, never papered over.
    pub fn decompress(&self, src: &[u8], dst: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let start = Instant::now();
        let result = self.pool.decompress(&self.codec, src, dst);
        self.stats.note_decompress(start.elapsed().as_nanos() as u64);
        result
    }

    /// Compress one page into a storable record, degrading to a verbatim
    /// copy when the page does not shrink or the codec fails on it.
    ///
    /// # Errors
    ///
    /// Only non-codec errors propagate (caller misuse); codec failures
    /// degrade to verbatim storage so no data is lost.
    pub fn compress_page(&self, page: &[u8; PAGE_SIZE]) -> Result<CompressedPage> {
        let mut buf = vec![0u8; MAX_COMPRESSED_SIZE];
        match self.compress(page, &mut buf) {
            Ok(len) if len < PAGE_SIZE => {
                buf.truncate(len);
                CompressedPage::compressed(buf)
            }
            Ok(_) => {
                self.stats.note_incompressible();
                Ok(CompressedPage::uncompressed(*page))
            }
            Err(Error::Codec { .. }) => {
                self.stats.note_incompressible();
                Ok(CompressedPage::uncompressed(*page))
            }
            Err(e) => Err(e),
        }
    }

    /// Recover the original page from a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptedData`] for a malformed verbatim record, or
    /// the codec/corruption error from [`Self::decompress`].
    pub fn decompress_page(&self, record: &CompressedPage) -> Result<[u8; PAGE_SIZE]> {
        let mut page = [0u8; PAGE_SIZE];
        if record.verbatim {
            if record.data.len() != PAGE_SIZE {
                return Err(Error::CorruptedData(format!(
                    "verbatim record has {} bytes, expected {PAGE_SIZE}",
                    record.data.len()
                )));
            }
            page.copy_from_slice(&record.data);
        } else {
            self.decompress(&record.data, &mut page)?;
        }
        Ok(page)
    }

    /// Number of decompression slots (one per possible CPU at creation).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.pool.slot_count()
    }

    /// Snapshot the instance statistics.
    #[must_use]
    pub fn stats(&self) -> CompressionStats {
        self.stats.snapshot()
    }

    /// Reset the instance statistics.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}
