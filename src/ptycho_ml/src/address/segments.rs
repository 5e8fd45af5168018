//! Destination segments for segmented reduction.
//!
//! Address rows are grouped by the pattern they write. After a stable
//! counting sort on the pattern index, the rows of one pattern form a
//! contiguous run, so a parallel backend can give each output frame exactly
//! one writer instead of scattering into shared memory.
//!
//! # Algorithm
//!
//! 1. **Histogram**: count rows per destination key
//! 2. **Exclusive prefix sum**: segment start offsets (CSR layout)
//! 3. **Scatter**: place row indices at their segment cursor, in row order

/// Rows grouped by destination key, one (possibly empty) segment per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSegments {
    /// Row indices, stably sorted by destination key.
    rows: Vec<u32>,
    /// Segment offsets into `rows`, length = number of keys + 1.
    offsets: Vec<u32>,
}

impl DestinationSegments {
    /// Group `keys` (one destination per row) into `num_keys` segments.
    ///
    /// Keys must already be validated to lie below `num_keys`.
    pub fn build(keys: &[u32], num_keys: usize) -> Self {
        let mut counts = vec![0u32; num_keys];
        for &key in keys {
            counts[key as usize] += 1;
        }

        let mut offsets = Vec::with_capacity(num_keys + 1);
        offsets.push(0u32);
        let mut sum = 0u32;
        for &count in &counts {
            sum += count;
            offsets.push(sum);
        }

        let mut cursor: Vec<u32> = offsets[..num_keys].to_vec();
        let mut rows = vec![0u32; keys.len()];
        for (row, &key) in keys.iter().enumerate() {
            let slot = &mut cursor[key as usize];
            rows[*slot as usize] = row as u32;
            *slot += 1;
        }

        Self { rows, offsets }
    }

    /// Number of destination keys (including empty segments).
    pub fn num_segments(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Row indices writing to `key`, in row order.
    pub fn segment(&self, key: usize) -> &[u32] {
        match (self.offsets.get(key), self.offsets.get(key + 1)) {
            (Some(&start), Some(&end)) => &self.rows[start as usize..end as usize],
            _ => &[],
        }
    }

    /// Length of every segment.
    pub fn lengths(&self) -> Vec<u32> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Keys with at least one row.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[1] > w[0])
            .map(|(key, _)| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let segments = DestinationSegments::build(&[], 3);
        assert_eq!(segments.num_segments(), 3);
        assert!(segments.segment(0).is_empty());
        assert_eq!(segments.occupied().count(), 0);
    }

    #[test]
    fn test_grouping_is_stable() {
        let keys = [2, 0, 2, 1, 0, 2];
        let segments = DestinationSegments::build(&keys, 4);

        assert_eq!(segments.segment(0), &[1, 4]);
        assert_eq!(segments.segment(1), &[3]);
        assert_eq!(segments.segment(2), &[0, 2, 5]);
        assert!(segments.segment(3).is_empty());
        assert_eq!(segments.lengths(), vec![2, 1, 3, 0]);
        assert_eq!(segments.occupied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_out_of_range_key_is_empty() {
        let segments = DestinationSegments::build(&[0, 0], 1);
        assert!(segments.segment(5).is_empty());
    }
}
