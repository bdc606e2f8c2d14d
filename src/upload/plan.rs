//! Partitioning a file into multipart byte ranges

use std::ops::Range;

/// One part of a multipart upload: bytes `[start, end)` of the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// 0-based position in the plan
    pub index: usize,
    /// 1-based part number sent to the server
    pub part_number: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// `ceil(total_size / max_chunk_size)`, or 0 when `max_chunk_size` is 0
pub fn chunk_count(total_size: u64, max_chunk_size: u64) -> u64 {
    if max_chunk_size == 0 {
        return 0;
    }
    total_size.div_ceil(max_chunk_size)
}

/// Contiguous ranges of `max_chunk_size` bytes; the last may be shorter.
pub fn plan_chunks(total_size: u64, max_chunk_size: u64) -> Vec<ChunkRange> {
    (0..chunk_count(total_size, max_chunk_size))
        .map(|index| {
            let start = index * max_chunk_size;
            ChunkRange {
                index: index as usize,
                part_number: (index + 1) as u32,
                start,
                end: (start + max_chunk_size).min(total_size),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uneven_partition() {
        let plan = plan_chunks(107, 50);
        let ranges: Vec<_> = plan.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(ranges, vec![(0, 50), (50, 100), (100, 107)]);
        let parts: Vec<_> = plan.iter().map(|c| c.part_number).collect();
        assert_eq!(parts, vec![1, 2, 3]);
        assert_eq!(plan[2].len(), 7);
    }

    #[test]
    fn test_even_partition() {
        let mib = 1024 * 1024;
        let plan = plan_chunks(60 * mib, 10 * mib);
        assert_eq!(plan.len(), 6);
        assert!(plan.iter().all(|c| c.len() == 10 * mib));
        assert_eq!(plan.last().unwrap().end, 60 * mib);
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let plan = plan_chunks(1_000_003, 4096);
        assert_eq!(plan.first().unwrap().start, 0);
        for pair in plan.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_eq!(pair[0].part_number + 1, pair[1].part_number);
        }
        assert_eq!(plan.last().unwrap().end, 1_000_003);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(plan_chunks(0, 50).is_empty());
        assert!(plan_chunks(100, 0).is_empty());
        assert_eq!(chunk_count(1, 50), 1);
    }
}
