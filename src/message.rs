//! Message segmentation model shared by client and server.
//!
//! A message is a fixed number of independently allocated byte segments
//! whose sizes are derived from the total message size alone. Both peers
//! compute the same layout from the same configured total, which is the
//! only thing that keeps the unframed byte stream in sync.

use crate::error::AllocationError;
use std::io::{IoSlice, IoSliceMut};

/// Number of segments in every message.
pub const SEGMENT_COUNT: usize = 8;

/// Fill byte for a given segment index: `A` for segment 0, `B` for 1, ...
///
/// One constant per segment lets a test verify round-trip integrity
/// segment by segment.
pub const fn segment_pattern(index: usize) -> u8 {
    b'A' + index as u8
}

/// How a total message size splits into [`SEGMENT_COUNT`] segments.
///
/// The remainder of `total / 8` is distributed one byte at a time to the
/// lowest-indexed segments, so no two sizes differ by more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    sizes: [usize; SEGMENT_COUNT],
    total: usize,
}

impl SegmentLayout {
    /// Compute the layout for a total message size in bytes.
    ///
    /// Defined for any `total`, including totals below the segment count
    /// (trailing segments are then zero-sized).
    pub fn for_total(total: usize) -> Self {
        let base = total / SEGMENT_COUNT;
        let remainder = total % SEGMENT_COUNT;

        let mut sizes = [0usize; SEGMENT_COUNT];
        for (i, size) in sizes.iter_mut().enumerate() {
            *size = base + usize::from(i < remainder);
        }

        Self { sizes, total }
    }

    /// Total message size in bytes.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Per-segment sizes, in wire order.
    pub fn sizes(&self) -> &[usize; SEGMENT_COUNT] {
        &self.sizes
    }
}

/// An owned message: [`SEGMENT_COUNT`] independently allocated segments.
///
/// Allocated once per worker, refilled for every round trip, and released
/// when the worker drops it on any exit path.
#[derive(Debug)]
pub struct Message {
    segments: [Vec<u8>; SEGMENT_COUNT],
    total: usize,
}

impl Message {
    /// Allocate all segments for the given layout.
    ///
    /// Fails with [`AllocationError`] naming the first segment that could
    /// not be allocated; segments allocated before it are freed when the
    /// partially built array drops.
    pub fn allocate(layout: &SegmentLayout) -> Result<Self, AllocationError> {
        let mut segments: [Vec<u8>; SEGMENT_COUNT] = Default::default();

        for (i, &size) in layout.sizes().iter().enumerate() {
            let mut segment = Vec::new();
            segment
                .try_reserve_exact(size)
                .map_err(|_| AllocationError {
                    segment: i,
                    bytes: size,
                })?;
            segment.resize(size, 0);
            segments[i] = segment;
        }

        Ok(Self {
            segments,
            total: layout.total(),
        })
    }

    /// Total payload size in bytes.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Overwrite each segment with its fill byte (see [`segment_pattern`]).
    /// Idempotent.
    pub fn fill(&mut self) {
        for (i, segment) in self.segments.iter_mut().enumerate() {
            segment.fill(segment_pattern(i));
        }
    }

    /// Borrow one segment.
    pub fn segment(&self, index: usize) -> &[u8] {
        &self.segments[index]
    }

    /// Concatenate all segments into `buf` in wire order.
    ///
    /// `buf` must be exactly [`Self::total`] bytes.
    pub fn pack_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.total);
        let mut offset = 0;
        for segment in &self.segments {
            buf[offset..offset + segment.len()].copy_from_slice(segment);
            offset += segment.len();
        }
    }

    /// Split `buf` back into the segments in wire order.
    ///
    /// `buf` must be exactly [`Self::total`] bytes.
    pub fn unpack_from(&mut self, buf: &[u8]) {
        debug_assert_eq!(buf.len(), self.total);
        let mut offset = 0;
        for segment in &mut self.segments {
            let len = segment.len();
            segment.copy_from_slice(&buf[offset..offset + len]);
            offset += len;
        }
    }

    /// Scatter/gather descriptor over the segments, for vectored sends.
    pub fn io_slices(&self) -> [IoSlice<'_>; SEGMENT_COUNT] {
        self.segments.each_ref().map(|s| IoSlice::new(s))
    }

    /// Mutable scatter/gather descriptor, for vectored receives.
    pub fn io_slices_mut(&mut self) -> [IoSliceMut<'_>; SEGMENT_COUNT] {
        self.segments.each_mut().map(|s| IoSliceMut::new(s))
    }
}
