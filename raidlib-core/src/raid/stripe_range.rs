// vim: tw=80
//! Mapping of host ranges onto parity-relative extents

use crate::types::*;
use serde_derive::{Deserialize, Serialize};

/// Most extents that a single range can map onto
pub const MAX_PARITY_EXTENTS: usize = 2;

/// A contiguous range of parity-relative blocks.
///
/// Parity-relative addresses count blocks on a single member, so stripe `s`
/// occupies `[s * element_size, (s + 1) * element_size)`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
pub struct Extent {
    pub start_lba: LbaT,
    pub size: BlockCount,
}

impl Extent {
    pub fn new(start_lba: LbaT, size: BlockCount) -> Self {
        Extent{start_lba, size}
    }

    /// One past the last block of the extent
    pub fn end(&self) -> LbaT {
        self.start_lba + self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Determine which parity-relative blocks are touched by a host range.
///
/// Returns up to two extents.  The second is empty unless the access begins
/// in one element and ends in the following element of the same stripe
/// without overlapping its own starting offset, and `max_extents > 1`.  In
/// that case the first extent holds the tail and the second holds the head.
///
/// # Arguments
///
/// * `lba`                 - First host block of the access
/// * `blocks`              - Number of host blocks
/// * `blocks_per_element`  - Element size
/// * `data_disks`          - Data members per stripe
/// * `max_extents`         - How many extents the caller can accept
pub fn stripe_range(lba: LbaT, blocks: BlockCount,
                    blocks_per_element: ElementSize, data_disks: u16,
                    max_extents: usize) -> [Extent; MAX_PARITY_EXTENTS]
{
    let bpe = BlockCount::from(blocks_per_element);
    let blocks_per_stripe = BlockCount::from(data_disks) * bpe;
    let mut range = [Extent::default(); MAX_PARITY_EXTENTS];
    let mut remaining = blocks;

    let offset_in_element = lba % bpe;
    let offset_in_stripe = lba % blocks_per_stripe;
    let mut parity_start = bpe * (lba / blocks_per_stripe);
    let mut parity_count = bpe;

    if remaining <= bpe - offset_in_element {
        // Begins and ends within a single element
        parity_start += offset_in_element;
        parity_count = remaining;
    } else if bpe > blocks_per_stripe - offset_in_stripe {
        // Begins in the stripe's last element and continues into the next
        // stripe.  Only the accessed portion of this stripe is touched.
        parity_start += offset_in_element;
        parity_count -= offset_in_element;
    } else if remaining < bpe && max_extents > 1 {
        // Ends in the element after the one where it begins, without
        // reaching its own starting offset.  Two disjoint pieces.
        range[1].start_lba = parity_start + offset_in_element;
        range[1].size = parity_count - offset_in_element;
        parity_count = (remaining + lba) % bpe;
    }
    // Otherwise the first stripe is covered entirely.

    remaining -= remaining.min(blocks_per_stripe - offset_in_stripe);

    // Whole stripes
    parity_count += (remaining / blocks_per_stripe) * bpe;
    remaining %= blocks_per_stripe;

    // The final stripe.  Anything beyond its first element touches the whole
    // element width.
    parity_count += remaining.min(bpe);

    range[0] = Extent::new(parity_start, parity_count);
    range
}

// LCOV_EXCL_STOP
