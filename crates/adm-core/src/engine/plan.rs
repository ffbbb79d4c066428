//! Segment planning: split a known length across the planned thread count.

use crate::fetcher::SegmentSpan;

/// Plans `threads` contiguous closed intervals covering `[0, total_size - 1]`.
///
/// `segment_size = ceil(total_size / threads)`; the final segment absorbs the
/// remainder and may be shorter. Tiny files can need fewer segments than
/// threads, in which case the plan is truncated.
pub fn plan_segments(total_size: u64, threads: usize) -> Vec<SegmentSpan> {
    if total_size == 0 || threads == 0 {
        return Vec::new();
    }
    let threads = threads as u64;
    let segment_size = (total_size + threads - 1) / threads;

    let mut out = Vec::with_capacity(threads as usize);
    for i in 0..threads {
        let start = i * segment_size;
        if start >= total_size {
            break;
        }
        let end = ((i + 1) * segment_size - 1).min(total_size - 1);
        out.push(SegmentSpan {
            index: i as usize,
            start,
            end,
        });
    }
    out
}
