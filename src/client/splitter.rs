//! Chunk splitter: partitions a file into fixed-size byte ranges.
//!
//! Planning is pure offset arithmetic; bytes are only read one range at a time.

use std::io::SeekFrom;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

/// Default size of one chunk (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// One contiguous slice of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes in the slice.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

/// How a file of `file_size` bytes is cut into chunks of `chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// # Panics
    /// If `chunk_size` is zero.
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be positive");
        Self {
            file_size,
            chunk_size,
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(file_size / chunk_size)`.
    pub fn total_chunks(&self) -> u32 {
        self.file_size.div_ceil(self.chunk_size) as u32
    }

    /// Ranges in index order; the last one may be shorter.
    pub fn ranges(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        (0..self.total_chunks()).map(move |index| {
            let start = u64::from(index) * self.chunk_size;
            let end = (start + self.chunk_size).min(self.file_size);
            ChunkRange { index, start, end }
        })
    }
}

/// Read exactly the bytes of `range` from `file`.
pub async fn read_range(file: &mut File, range: ChunkRange) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut buf = vec![0u8; range.size() as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn chunk_count_is_ceiling_division() {
        assert_eq!(ChunkPlan::new(12 * MIB, DEFAULT_CHUNK_SIZE).total_chunks(), 3);
        assert_eq!(ChunkPlan::new(10 * MIB, DEFAULT_CHUNK_SIZE).total_chunks(), 2);
        assert_eq!(ChunkPlan::new(1, DEFAULT_CHUNK_SIZE).total_chunks(), 1);
        assert_eq!(ChunkPlan::new(0, DEFAULT_CHUNK_SIZE).total_chunks(), 0);
    }

    #[test]
    fn ranges_cover_the_file_exactly_once() {
        let plan = ChunkPlan::new(23, 5);
        let ranges: Vec<_> = plan.ranges().collect();
        assert_eq!(ranges.len(), 5);
        assert_eq!(ranges[0], ChunkRange { index: 0, start: 0, end: 5 });
        assert_eq!(ranges[4], ChunkRange { index: 4, start: 20, end: 23 });
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ranges.iter().map(ChunkRange::size).sum::<u64>(), 23);
    }

    #[tokio::test]
    async fn reading_every_range_reproduces_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        let original: Vec<u8> = (0..10_007u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &original).unwrap();

        let mut file = File::open(&path).await.unwrap();
        let plan = ChunkPlan::new(original.len() as u64, 1_000);
        let mut rebuilt = Vec::new();
        for range in plan.ranges() {
            rebuilt.extend(read_range(&mut file, range).await.unwrap());
        }
        assert_eq!(rebuilt, original);
    }
}
