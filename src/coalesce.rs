//! Planning physical fetches for a set of requested byte ranges.
//!
//! Requested ranges are sorted by start and scanned once. A range joins the current group when
//! it starts no further than `merge_distance` bytes past the group's end; otherwise it opens a
//! new group. Each group becomes one physical fetch covering all of its members.
//!
//! ```
//! use async_range_reader::coalesce::FetchPlan;
//!
//! let plan = FetchPlan::new(&[0..100, 150..200, 10_000..10_100], 64).unwrap();
//! assert_eq!(plan.physical_ranges(), vec![0..200, 10_000..10_100]);
//! ```

use std::ops::Range;

use bytes::Bytes;

use crate::error::{RangeReaderError, RangeReaderResult};

/// A requested range served by some physical fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Position of this range in the caller's request.
    pub request_index: usize,
    /// The requested range.
    pub range: Range<u64>,
    /// Byte offset of `range.start` within the physical buffer.
    pub offset: u64,
}

impl Member {
    fn slice_range(&self) -> Range<usize> {
        let len = self.range.end - self.range.start;
        self.offset as usize..(self.offset + len) as usize
    }
}

/// One physical fetch and the requested ranges it satisfies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalRange {
    /// Range to fetch.
    pub range: Range<u64>,
    /// Requested ranges fully contained in `range`.
    pub members: Vec<Member>,
}

/// Output of coalescing: the physical fetches to issue, in ascending offset order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    physical: Vec<PhysicalRange>,
    requested: usize,
}

impl FetchPlan {
    /// Plan fetches for `ranges`.
    ///
    /// Order is not significant and ranges may overlap. Empty or inverted ranges are rejected.
    pub fn new(ranges: &[Range<u64>], merge_distance: u64) -> RangeReaderResult<Self> {
        if let Some(bad) = ranges.iter().find(|r| r.end <= r.start) {
            return Err(RangeReaderError::EmptyRange(bad.clone()));
        }

        let mut order = (0..ranges.len()).collect::<Vec<_>>();
        order.sort_by_key(|&i| (ranges[i].start, ranges[i].end));

        let mut physical: Vec<PhysicalRange> = Vec::new();
        let mut group: Option<(Range<u64>, Vec<usize>)> = None;
        for i in order {
            let range = &ranges[i];
            if let Some((current, indices)) = group
                .as_mut()
                .filter(|(current, _)| range.start <= current.end.saturating_add(merge_distance))
            {
                current.end = current.end.max(range.end);
                indices.push(i);
                continue;
            }
            if let Some((current, indices)) = group.take() {
                physical.push(Self::group(current, &indices, ranges));
            }
            group = Some((range.clone(), vec![i]));
        }
        if let Some((current, indices)) = group {
            physical.push(Self::group(current, &indices, ranges));
        }

        Ok(Self {
            physical,
            requested: ranges.len(),
        })
    }

    fn group(range: Range<u64>, indices: &[usize], ranges: &[Range<u64>]) -> PhysicalRange {
        let members = indices
            .iter()
            .map(|&request_index| Member {
                request_index,
                range: ranges[request_index].clone(),
                offset: ranges[request_index].start - range.start,
            })
            .collect();
        PhysicalRange { range, members }
    }

    /// The physical fetches with their members.
    pub fn physical(&self) -> &[PhysicalRange] {
        &self.physical
    }

    /// Just the byte ranges to fetch.
    pub fn physical_ranges(&self) -> Vec<Range<u64>> {
        self.physical.iter().map(|p| p.range.clone()).collect()
    }

    /// Number of requested ranges this plan serves.
    pub fn requested_len(&self) -> usize {
        self.requested
    }

    /// Total bytes to be fetched, including gap bytes between merged ranges.
    pub fn fetched_bytes(&self) -> u64 {
        self.physical
            .iter()
            .map(|p| p.range.end - p.range.start)
            .sum()
    }

    /// Lowest start to highest end over all requested ranges.
    pub fn span(&self) -> Option<Range<u64>> {
        let start = self.physical.first()?.range.start;
        let end = self.physical.iter().map(|p| p.range.end).max()?;
        Some(start..end)
    }

    /// Slice fetched buffers back into the requested ranges, in request order.
    ///
    /// `buffers` must hold one buffer per physical range, in plan order, each exactly as long as
    /// its range. Slices share memory with the physical buffers.
    pub fn demultiplex(&self, buffers: &[Bytes]) -> RangeReaderResult<Vec<Bytes>> {
        if buffers.len() != self.physical.len() {
            return Err(RangeReaderError::General(format!(
                "expected {} fetched buffers, got {}",
                self.physical.len(),
                buffers.len()
            )));
        }

        let mut out = vec![Bytes::new(); self.requested];
        for (physical, buffer) in self.physical.iter().zip(buffers) {
            let expected = physical.range.end - physical.range.start;
            if buffer.len() as u64 != expected {
                return Err(RangeReaderError::EndOfFile(expected, buffer.len() as u64));
            }
            for member in &physical.members {
                out[member.request_index] = buffer.slice(member.slice_range());
            }
        }
        Ok(out)
    }
}
