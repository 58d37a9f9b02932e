//! Codec capability seam and the Zstandard implementation.
//!
//! The backend consumes its byte-stream codec as an opaque capability: a
//! deterministic parameter set, workspace sizing for those parameters,
//! engine construction over a caller-supplied workspace, and compress /
//! decompress over an engine. [`PageCodec`] is that seam; [`ZstdCodec`] is
//! the production implementation over the `zstd` crate.

use crate::alloc::Workspace;
use crate::page::{MAX_COMPRESSED_SIZE, PAGE_SIZE};
use crate::{CodecStage, Error, Result};
use zstd::zstd_safe::CParameter;

/// Fixed zstd compression level. Swap pages favor speed over ratio.
const ZSTD_LEVEL: i32 = 1;

/// Match-finder table footprint for the fast strategy at [`ZSTD_LEVEL`].
const CCTX_TABLE_BYTES: usize = 192 << 10;

/// Decompression context footprint (entropy tables plus block buffer).
const DCTX_BYTES: usize = 160 << 10;

/// Deterministic parameter set a codec operates under.
///
/// Derived from fixed constants, never from caller input, so every
/// workspace in the system has identical size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    /// Compression level.
    pub level: i32,
    /// Match window in bytes; equals the page size, as no match can reach
    /// past the single page being compressed.
    pub window_size: usize,
}

/// A page-at-a-time compression codec.
///
/// Engines own the workspace they were constructed over: the two are one
/// unit, freed together when the engine drops, and the engine is never
/// freed independently of its workspace.
pub trait PageCodec: Send + Sync {
    /// Live compression session.
    type CompressEngine: Send;
    /// Live decompression session.
    type DecompressEngine: Send;

    /// The fixed parameter set.
    fn params(&self) -> CodecParams;

    /// Minimum workspace size for a compression engine under `params`.
    fn compress_workspace_bound(&self, params: &CodecParams) -> usize;

    /// Minimum workspace size for a decompression engine.
    fn decompress_workspace_bound(&self) -> usize;

    /// Construct a compression engine over `workspace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineInit`] if the workspace is below the declared
    /// bound or the codec rejects construction; the workspace is released.
    fn init_compress(&self, workspace: Workspace) -> Result<Self::CompressEngine>;

    /// Construct a decompression engine over `workspace`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::init_compress`].
    fn init_decompress(&self, workspace: Workspace) -> Result<Self::DecompressEngine>;

    /// Compress one page into `dst`, returning the frame length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferTooSmall`] if `dst` is below
    /// [`MAX_COMPRESSED_SIZE`], or [`Error::Codec`] on codec failure.
    fn compress(
        &self,
        engine: &mut Self::CompressEngine,
        page: &[u8; PAGE_SIZE],
        dst: &mut [u8],
    ) -> Result<usize>;

    /// Decompress `src` into exactly one page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] on codec failure or
    /// [`Error::CorruptedData`] if the frame does not decode to one page.
    fn decompress(
        &self,
        engine: &mut Self::DecompressEngine,
        src: &[u8],
        dst: &mut [u8; PAGE_SIZE],
    ) -> Result<()>;
}

/// Zstandard codec with fixed parameters: level 1, one-page window, no
/// dictionary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

/// Compression engine: a zstd context pinned to the fixed parameters, plus
/// the workspace reservation fronting its memory footprint.
pub struct ZstdCompressEngine {
    cctx: zstd::bulk::Compressor<'static>,
    _workspace: Workspace,
}

/// Decompression engine; same relationship to its workspace as
/// [`ZstdCompressEngine`].
pub struct ZstdDecompressEngine {
    dctx: zstd::bulk::Decompressor<'static>,
    _workspace: Workspace,
}

impl std::fmt::Debug for ZstdCompressEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZstdCompressEngine").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ZstdDecompressEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZstdDecompressEngine").finish_non_exhaustive()
    }
}

/// Map a window size in bytes to zstd's window log.
fn window_log(window_size: usize) -> Result<u32> {
    if !window_size.is_power_of_two() {
        return Err(Error::InvalidInput(format!(
            "window size {window_size} is not a power of two"
        )));
    }
    let log = window_size.trailing_zeros();
    // zstd accepts window logs in [10, 31].
    if !(10..=31).contains(&log) {
        return Err(Error::InvalidInput(format!("window log {log} out of range")));
    }
    Ok(log)
}

impl PageCodec for ZstdCodec {
    type CompressEngine = ZstdCompressEngine;
    type DecompressEngine = ZstdDecompressEngine;

    fn params(&self) -> CodecParams {
        CodecParams { level: ZSTD_LEVEL, window_size: PAGE_SIZE }
    }

    fn compress_workspace_bound(&self, params: &CodecParams) -> usize {
        // Window, a block-sized staging area, and the match-finder tables.
        2 * params.window_size + CCTX_TABLE_BYTES
    }

    fn decompress_workspace_bound(&self) -> usize {
        self.params().window_size + DCTX_BYTES
    }

    fn init_compress(&self, workspace: Workspace) -> Result<ZstdCompressEngine> {
        let params = self.params();
        let bound = self.compress_workspace_bound(&params);
        if workspace.len() < bound {
            return Err(Error::EngineInit(format!(
                "compress workspace is {} bytes, engine needs {bound}",
                workspace.len()
            )));
        }

        let mut cctx = zstd::bulk::Compressor::new(params.level)
            .map_err(|e| Error::EngineInit(format!("compression context rejected: {e}")))?;
        cctx.set_parameter(CParameter::WindowLog(window_log(params.window_size)?))
            .map_err(|e| Error::EngineInit(format!("window log rejected: {e}")))?;

        Ok(ZstdCompressEngine { cctx, _workspace: workspace })
    }

    fn init_decompress(&self, workspace: Workspace) -> Result<ZstdDecompressEngine> {
        let bound = self.decompress_workspace_bound();
        if workspace.len() < bound {
            return Err(Error::EngineInit(format!(
                "decompress workspace is {} bytes, engine needs {bound}",
                workspace.len()
            )));
        }

        let dctx = zstd::bulk::Decompressor::new()
            .map_err(|e| Error::EngineInit(format!("decompression context rejected: {e}")))?;

        Ok(ZstdDecompressEngine { dctx, _workspace: workspace })
    }

    fn compress(
        &self,
        engine: &mut ZstdCompressEngine,
        page: &[u8; PAGE_SIZE],
        dst: &mut [u8],
    ) -> Result<usize> {
        if dst.len() < MAX_COMPRESSED_SIZE {
            return Err(Error::BufferTooSmall {
                needed: MAX_COMPRESSED_SIZE,
                available: dst.len(),
            });
        }

        match engine.cctx.compress_to_buffer(page.as_slice(), dst) {
            Ok(len) => Ok(len),
            Err(e) => {
                // Non-fatal: the caller may store the page verbatim.
                tracing::warn!(error = %e, "zstd page compression failed");
                Err(Error::Codec { stage: CodecStage::Compress, detail: e.to_string() })
            }
        }
    }

    fn decompress(
        &self,
        engine: &mut ZstdDecompressEngine,
        src: &[u8],
        dst: &mut [u8; PAGE_SIZE],
    ) -> Result<()> {
        let len = engine
            .dctx
            .decompress_to_buffer(src, dst.as_mut_slice())
            .map_err(|e| Error::Codec { stage: CodecStage::Decompress, detail: e.to_string() })?;

        if len != PAGE_SIZE {
            return Err(Error::CorruptedData(format!(
                "decompressed {len} bytes, expected {PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}
