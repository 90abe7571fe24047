//! Splitting a partition listing into independently scannable segments.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest page the catalog returns for a single partition listing request.
///
/// Bounded requests at or below this size are cheaper to serve with one serial walk than to
/// coordinate across segments.
pub const GET_PARTITIONS_MAX_SIZE: usize = 1000;

/// Upper limit on segments the catalog service allows for one table.
pub const MAX_NUM_PARTITION_SEGMENTS: usize = 10;

/// One of `total` disjoint sub-ranges of a table's partitions, as divided by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    index: u32,
    total: u32,
}

impl Segment {
    pub fn try_new(index: u32, total: u32) -> Result<Self> {
        if total == 0 || index >= total || total as usize > MAX_NUM_PARTITION_SEGMENTS {
            return Err(Error::InvalidSegment { index, total });
        }
        Ok(Self { index, total })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn total(&self) -> u32 {
        self.total
    }
}

/// How many partitions a single call may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Budget {
    Unbounded,
    AtMost(NonZeroUsize),
}

impl Budget {
    /// Interpret a caller-supplied maximum, where zero or negative means "no limit".
    pub fn from_max(max: i64) -> Self {
        usize::try_from(max)
            .ok()
            .and_then(NonZeroUsize::new)
            .map_or(Self::Unbounded, Self::AtMost)
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::AtMost(n) => Some(n.get()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// One unsegmented paginated walk.
    Serial,
    /// Concurrent walks over this many segments.
    Parallel(usize),
}

/// Decides between a serial walk and a segmented parallel scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlanner {
    segment_count: usize,
}

impl SegmentPlanner {
    pub fn try_new(segment_count: usize) -> Result<Self> {
        if segment_count == 0 {
            return Err(Error::NoSegments);
        }
        if segment_count > MAX_NUM_PARTITION_SEGMENTS {
            return Err(Error::TooManySegments {
                configured: segment_count,
                max: MAX_NUM_PARTITION_SEGMENTS,
            });
        }
        Ok(Self { segment_count })
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn plan(&self, budget: Budget) -> ScanMode {
        match budget.limit() {
            Some(n) if n <= GET_PARTITIONS_MAX_SIZE => ScanMode::Serial,
            _ => ScanMode::Parallel(self.segment_count),
        }
    }

    /// The disjoint segments covering a whole table, in submission order.
    pub fn segments(&self) -> Vec<Segment> {
        // bounded by MAX_NUM_PARTITION_SEGMENTS at construction
        let total = self.segment_count as u32;
        (0..total).map(|index| Segment { index, total }).collect()
    }
}
