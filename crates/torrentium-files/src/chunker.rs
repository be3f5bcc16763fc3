//! File chunking.

use crate::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use std::ops::Range;

/// Chunk a file into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size
    ///
    /// The size is clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    /// Get chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a file
    ///
    /// An empty file has zero chunks.
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Byte range covered by a chunk, `None` past the end
    pub fn chunk_range(&self, file_size: u64, index: u64) -> Option<Range<u64>> {
        if index >= self.chunk_count(file_size) {
            return None;
        }
        let start = index * self.chunk_size as u64;
        let end = (start + self.chunk_size as u64).min(file_size);
        Some(start..end)
    }

    /// Expected length of a chunk, `None` past the end
    pub fn chunk_len(&self, file_size: u64, index: u64) -> Option<usize> {
        self.chunk_range(file_size, index)
            .map(|r| (r.end - r.start) as usize)
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        let chunker = FileChunker::with_chunk_size(256 * 1024);
        assert_eq!(chunker.chunk_count(0), 0);
        assert_eq!(chunker.chunk_count(1), 1);
        assert_eq!(chunker.chunk_count(1024 * 1024), 4);
        assert_eq!(chunker.chunk_count(1024 * 1024 + 1), 5);
    }

    #[test]
    fn test_last_chunk_truncated() {
        let chunker = FileChunker::with_chunk_size(100);
        assert_eq!(chunker.chunk_range(250, 0), Some(0..100));
        assert_eq!(chunker.chunk_range(250, 2), Some(200..250));
        assert_eq!(chunker.chunk_len(250, 2), Some(50));
        assert_eq!(chunker.chunk_range(250, 3), None);
    }

    #[test]
    fn test_chunk_size_clamped() {
        assert_eq!(FileChunker::with_chunk_size(0).chunk_size(), 1);
        assert_eq!(
            FileChunker::with_chunk_size(usize::MAX).chunk_size(),
            MAX_CHUNK_SIZE
        );
    }
}
