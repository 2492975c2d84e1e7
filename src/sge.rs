//! Release tracking for the scatter-gather element ring.
//!
//! Aggregations consume SGE buffers out of order, so the ring producer cannot
//! chase a consumer index the way the other rings do. Instead a bitmap keeps
//! one bit per ring slot: a set bit means the slot is posted to the hardware,
//! a cleared bit means it was consumed and is waiting to be released. The
//! producer only moves over a fully cleared 64-slot word, so slots return to
//! the hardware strictly in ring order and in whole-word granularity even
//! when completions arrive scrambled.
//!
//! The two link slots at the end of each page are kept cleared. A word that
//! covers the end of a page therefore becomes zero once its usable slots are
//! consumed, and crediting the full 64 raw index steps for it is exactly the
//! distance the producer travels across the page boundary.

use alloc::vec;
use alloc::vec::Vec;

use crate::ring::RingLayout;

const BITS_PER_WORD: u16 = 64;

/// Out-of-order consumption tracker for one SGE ring.
pub struct SgeBitmap {
    mask: Vec<u64>,
    layout: RingLayout,
    last_max: u16,
}

impl SgeBitmap {
    /// Builds the tracker for a ring with the given layout, with every
    /// usable slot marked as posted.
    pub fn new(layout: RingLayout) -> SgeBitmap {
        debug_assert!(layout.total() % BITS_PER_WORD as u32 == 0);
        let words = (layout.total() / BITS_PER_WORD as u32) as usize;
        let mut bitmap = SgeBitmap {
            mask: vec![u64::MAX; words],
            layout,
            last_max: 0,
        };
        bitmap.clear_link_bits();
        bitmap
    }

    /// Marks one slot as consumed by an aggregation.
    ///
    /// `idx` is a raw ring index as carried in a completion's scatter list.
    pub fn mark_used(&mut self, idx: u16) {
        let pos = self.layout.mask(idx);
        self.mask[(pos / BITS_PER_WORD) as usize] &= !(1u64 << (pos % BITS_PER_WORD));
    }

    /// Releases every fully consumed word between the producer and the
    /// highest consumed slot, returning the raw index distance to add to the
    /// ring producer.
    ///
    /// `sge_prod` is the current free-running producer; `last_idx` is the
    /// last (highest) scatter-list entry of the completion being processed.
    /// A word with any posted slot left stops the scan, so release order
    /// always matches ring order.
    pub fn advance_window(&mut self, sge_prod: u16, last_idx: u16) -> u16 {
        self.update_last_max(last_idx);

        let elem_count = (self.layout.total() / BITS_PER_WORD as u32) as u16;
        let elem_mask = elem_count - 1;

        let mut last_elem = self.layout.mask(self.last_max) / BITS_PER_WORD;
        let first_elem = self.layout.mask(sge_prod) / BITS_PER_WORD;

        // The word holding the highest consumed slot may still be partial;
        // include the next one so a complete final word can drain, unless
        // that would wrap the scan onto its own start.
        if (last_elem + 1) & elem_mask != first_elem {
            last_elem = (last_elem + 1) & elem_mask;
        }

        let mut delta = 0u16;
        let mut i = first_elem;
        while i != last_elem {
            if self.mask[i as usize] != 0 {
                break;
            }
            self.mask[i as usize] = u64::MAX;
            delta += BITS_PER_WORD;
            i = (i + 1) & elem_mask;
        }

        if delta > 0 {
            self.clear_link_bits();
        }
        delta
    }

    // Tracks the highest scatter-list index seen, in free-running terms. The
    // signed comparison keeps the ordering correct across the 16-bit wrap.
    fn update_last_max(&mut self, idx: u16) {
        if (idx.wrapping_sub(self.last_max) as i16) > 0 {
            self.last_max = idx;
        }
    }

    // Link slots are never posted; their bits stay cleared so that page-end
    // words can drain completely.
    fn clear_link_bits(&mut self) {
        let per_page = self.layout.per_page();
        let reserved = self.layout.reserved_slots();
        for page in 0..self.layout.pages() {
            let base = (page as u32) * (per_page as u32);
            for slot in (per_page - reserved)..per_page {
                let pos = base + slot as u32;
                self.mask[(pos / BITS_PER_WORD as u32) as usize] &=
                    !(1u64 << (pos % BITS_PER_WORD as u32));
            }
        }
    }
}
