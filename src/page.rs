//! Page types and compression statistics.

use crate::{Error, Result};

/// Standard memory page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Capacity the caller must provide for compressed output.
///
/// Compression is never assumed to shrink its input: near-incompressible
/// data plus codec framing can exceed one page, so the contract is two.
pub const MAX_COMPRESSED_SIZE: usize = 2 * PAGE_SIZE;

/// A page as held by the backing store: either a codec frame strictly
/// smaller than one page, or the original bytes stored verbatim.
#[derive(Debug, Clone)]
pub struct CompressedPage {
    /// Stored bytes (codec frame, or the page itself when verbatim).
    pub data: Vec<u8>,
    /// True when `data` is the uncompressed page.
    pub verbatim: bool,
}

impl CompressedPage {
    /// Create a record for a page that compressed below one page.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is empty or not smaller than a page;
    /// frames that large are stored verbatim instead.
    pub fn compressed(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() || data.len() >= PAGE_SIZE {
            return Err(Error::InvalidInput(format!(
                "compressed record must be 1..{PAGE_SIZE} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { data, verbatim: false })
    }

    /// Create a record for an incompressible page (stored verbatim).
    #[must_use]
    pub fn uncompressed(page: [u8; PAGE_SIZE]) -> Self {
        Self { data: page.to_vec(), verbatim: true }
    }

    /// Get the compression ratio (original / stored).
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.data.is_empty() {
            return 1.0;
        }
        PAGE_SIZE as f64 / self.data.len() as f64
    }

    /// Check whether the page was actually compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        !self.verbatim && self.data.len() < PAGE_SIZE
    }

    /// Get the space saved over storing the page verbatim, in bytes.
    #[must_use]
    pub fn bytes_saved(&self) -> usize {
        PAGE_SIZE.saturating_sub(self.data.len())
    }
}

/// Statistics for one backend instance.
#[derive(Debug, Clone, Default)]
pub struct CompressionStats {
    /// Total pages compressed.
    pub pages_compressed: u64,
    /// Total pages that did not shrink (or whose compression failed).
    pub pages_incompressible: u64,
    /// Total bytes before compression.
    pub bytes_in: u64,
    /// Total bytes after compression.
    pub bytes_out: u64,
    /// Total compression time in nanoseconds.
    pub compress_time_ns: u64,
    /// Total decompression time in nanoseconds.
    pub decompress_time_ns: u64,
}

impl CompressionStats {
    /// Create new empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the overall compression ratio.
    #[must_use]
    pub fn overall_ratio(&self) -> f64 {
        if self.bytes_out == 0 {
            return 1.0;
        }
        self.bytes_in as f64 / self.bytes_out as f64
    }

    /// Get compression throughput in bytes per second.
    #[must_use]
    pub fn compress_throughput(&self) -> f64 {
        if self.compress_time_ns == 0 {
            return 0.0;
        }
        self.bytes_in as f64 / (self.compress_time_ns as f64 / 1e9)
    }

    /// Get decompression throughput in bytes per second.
    #[must_use]
    pub fn decompress_throughput(&self) -> f64 {
        if self.decompress_time_ns == 0 {
            return 0.0;
        }
        self.bytes_in as f64 / (self.decompress_time_ns as f64 / 1e9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constants() {
        assert_eq!(PAGE_SIZE, 4096);
        assert_eq!(MAX_COMPRESSED_SIZE, 8192);
    }

    #[test]
    fn test_compressed_page_valid() {
        let data = vec![0u8; 100];
        let page = CompressedPage::compressed(data.clone()).unwrap();
        assert_eq!(page.data, data);
        assert!(page.is_compressed());
        assert_eq!(page.bytes_saved(), PAGE_SIZE - 100);
    }

    #[test]
    fn test_compressed_page_rejects_page_sized_frame() {
        let result = CompressedPage::compressed(vec![0u8; PAGE_SIZE]);
        assert!(result.is_err());
    }

    #[test]
    fn test_compressed_page_rejects_empty_frame() {
        let result = CompressedPage::compressed(Vec::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_uncompressed_page() {
        let page = CompressedPage::uncompressed([0xAB; PAGE_SIZE]);
        assert!(page.verbatim);
        assert!(!page.is_compressed());
        assert_eq!(page.data.len(), PAGE_SIZE);
        assert_eq!(page.bytes_saved(), 0);
    }

    #[test]
    fn test_compressed_page_ratio() {
        let page = CompressedPage::compressed(vec![0u8; 1024]).unwrap();
        assert!((page.ratio() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_compression_stats_default() {
        let stats = CompressionStats::new();
        assert_eq!(stats.pages_compressed, 0);
        assert!((stats.overall_ratio() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compression_stats_ratio() {
        let stats = CompressionStats { bytes_in: 4096, bytes_out: 1024, ..Default::default() };
        assert!((stats.overall_ratio() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_compression_stats_throughput() {
        let stats = CompressionStats {
            bytes_in: 1_000_000_000,
            compress_time_ns: 1_000_000_000,
            ..Default::default()
        };
        assert!((stats.compress_throughput() - 1e9).abs() < 1.0);
    }

    #[test]
    fn test_compression_stats_zero_throughput() {
        let stats = CompressionStats::default();
        assert!(stats.compress_throughput().abs() < f64::EPSILON);
        assert!(stats.decompress_throughput().abs() < f64::EPSILON);
    }
}
