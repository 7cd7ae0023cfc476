//! Part size and concurrency selection for multipart transfers.

use crate::types::ByteRange;

pub const MIN_PART_SIZE: u64 = 100 * 1024;
pub const MAX_PART_COUNT: u64 = 10_000;

const MAX_IDEAL_PART_COUNT: u64 = MAX_PART_COUNT / 10;
const MIN_IDEAL_PART_COUNT: u64 = MAX_PART_COUNT / 500;
const MAX_IDEAL_PART_SIZE: u64 = 500 * 1024 * 1024;
const MIN_IDEAL_PART_SIZE: u64 = 1024 * 1024;

/// User-supplied values that take precedence over the computed ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOverrides {
    pub part_size: Option<u64>,
    pub parallel: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub part_size: u64,
    pub part_count: u64,
    pub worker_count: usize,
}

impl TransferPlan {
    /// Byte range of the 1-based `part_number` of an object of `size` bytes.
    pub fn part_range(&self, part_number: u64, size: u64) -> ByteRange {
        let start = (part_number - 1) * self.part_size;
        let end = (start + self.part_size).min(size).saturating_sub(1);
        ByteRange::new(start, end)
    }

    pub fn part_len(&self, part_number: u64, size: u64) -> u64 {
        let start = (part_number - 1) * self.part_size;
        (start + self.part_size).min(size).saturating_sub(start)
    }
}

fn part_count(size: u64, part_size: u64) -> u64 {
    if size == 0 { 1 } else { size.div_ceil(part_size) }
}

fn worker_count(part_count: u64) -> usize {
    match part_count {
        0..2 => 1,
        2..4 => 2,
        4..=20 => 4,
        21..=300 => 8,
        301..=500 => 10,
        _ => 12,
    }
}

fn compute_part_size(size: u64) -> (u64, u64) {
    let mut part_size = size.div_ceil(MAX_PART_COUNT).max(MIN_PART_SIZE);
    let mut count = part_count(size, part_size);

    while count > MAX_IDEAL_PART_COUNT && part_size < MAX_IDEAL_PART_SIZE {
        count /= 5;
        part_size = size.div_ceil(count);
    }

    while part_size < MIN_IDEAL_PART_SIZE && count > MIN_IDEAL_PART_COUNT {
        part_size *= 5;
        count = part_count(size, part_size);
    }

    // Rounding up the part size above may leave fewer parts than estimated.
    (part_size, part_count(size, part_size))
}

/// Chooses part size and worker count for an object of `size` bytes.
///
/// The part size never drops below [`MIN_PART_SIZE`] and never implies more
/// than [`MAX_PART_COUNT`] parts, even when overridden.
pub fn plan_transfer(size: u64, overrides: &PlanOverrides) -> TransferPlan {
    let (part_size, part_count) = match overrides.part_size {
        Some(part_size) => {
            let part_size = part_size
                .max(MIN_PART_SIZE)
                .max(size.div_ceil(MAX_PART_COUNT));
            (part_size, part_count(size, part_size))
        }
        None => compute_part_size(size),
    };

    let worker_count = overrides
        .parallel
        .filter(|parallel| *parallel > 0)
        .unwrap_or_else(|| worker_count(part_count));

    TransferPlan {
        part_size,
        part_count,
        worker_count,
    }
}
