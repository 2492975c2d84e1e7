//! Paged descriptor chains shared by every ring of the device.
//!
//! Each ring is a chain of 4KB pages. The last [`RingEntry::RESERVED_SLOTS`]
//! entries of every page never carry data; the first of them holds a pointer
//! to the next page, which the chip follows on its own. Because of those
//! holes a ring index cannot simply be incremented: [`RingLayout::advance`]
//! steps an index so that it skips the reserved slots of each page.
//!
//! Ring indices are free-running 16-bit counters. They are published to the
//! hardware unmasked and wrap naturally at 65536; only address translation
//! applies the ring-size mask. The ring total therefore has to divide 65536,
//! which [`RingLayout`] assumes and the configuration layer enforces.

use core::mem::size_of;
use core::ptr;

use alloc::vec::Vec;

use crate::constants::BCM_PAGE_SIZE;
use crate::descriptor::RingEntry;
use crate::hal::BxeHal;
use crate::memory::Dma;
use crate::{BxeError, BxeResult};

/// Index arithmetic for one paged ring.
///
/// Pure math over the ring's geometry; owns no memory. Copies of the layout
/// are handed around freely wherever indices need to be stepped or masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pages: u16,
    per_page: u16,
    reserved: u16,
}

impl RingLayout {
    /// Builds a layout for `pages` pages of `per_page` entries each, with
    /// `reserved` trailing link slots per page.
    pub fn new(pages: u16, per_page: u16, reserved: u16) -> RingLayout {
        debug_assert!(pages.is_power_of_two());
        debug_assert!(per_page.is_power_of_two());
        debug_assert!(reserved < per_page);
        debug_assert!((pages as u32) * (per_page as u32) <= 65536);
        debug_assert!(reserved > 0 || (pages as u32) * (per_page as u32) < 65536);
        RingLayout {
            pages,
            per_page,
            reserved,
        }
    }

    /// Number of pages in the chain.
    pub fn pages(&self) -> u16 {
        self.pages
    }

    /// Entries per page, link slots included.
    pub fn per_page(&self) -> u16 {
        self.per_page
    }

    /// Link slots at the end of each page.
    pub fn reserved_slots(&self) -> u16 {
        self.reserved
    }

    /// Total entry count, link slots included.
    pub fn total(&self) -> u32 {
        (self.pages as u32) * (self.per_page as u32)
    }

    /// Entries that can actually carry data.
    pub fn usable(&self) -> u16 {
        (self.total() - (self.pages as u32) * (self.reserved as u32)) as u16
    }

    /// Reduces a free-running index to its position within the ring.
    pub fn mask(&self, idx: u16) -> u16 {
        idx & ((self.total() - 1) as u16)
    }

    /// Splits a free-running index into page and slot numbers.
    pub fn translate(&self, idx: u16) -> (usize, usize) {
        let masked = self.mask(idx);
        (
            (masked / self.per_page) as usize,
            (masked % self.per_page) as usize,
        )
    }

    /// Masked index as a dense `usize`, for indexing side tables.
    pub fn linear(&self, idx: u16) -> usize {
        self.mask(idx) as usize
    }

    /// Whether the index currently points at a reserved link slot.
    pub fn is_link_slot(&self, idx: u16) -> bool {
        (self.mask(idx) & (self.per_page - 1)) >= self.per_page - self.reserved
    }

    /// Steps a free-running index forward by one usable entry.
    ///
    /// When the step would land on the first reserved slot of a page the
    /// index jumps over all of them onto the next page. The result is never
    /// masked; it keeps counting past the ring size until it wraps at 65536.
    pub fn advance(&self, idx: u16) -> u16 {
        if self.reserved != 0
            && (idx & (self.per_page - 1)) == self.per_page - self.reserved - 1
        {
            idx.wrapping_add(self.reserved + 1)
        } else {
            idx.wrapping_add(1)
        }
    }

    /// Steps a free-running index forward by `n` usable entries.
    pub fn forward(&self, idx: u16, n: u16) -> u16 {
        let mut idx = idx;
        for _ in 0..n {
            idx = self.advance(idx);
        }
        idx
    }
}

/// A chain of DMA pages holding entries of type `T`.
///
/// Allocates one page-aligned DMA block per ring page, zeroes them and links
/// them into a circular chain through the reserved slots. Entries are then
/// addressed by free-running index through [`DescRing::entry`] and
/// [`DescRing::entry_mut`].
pub struct DescRing<T: RingEntry + Copy, H: BxeHal> {
    pages: Vec<Dma<T, H>>,
    layout: RingLayout,
}

impl<T: RingEntry + Copy, H: BxeHal> DescRing<T, H> {
    /// Allocates and links a ring of `num_pages` pages.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NoMemory`] - If a page allocation fails
    /// - [`BxeError::PageNotAligned`] - If the HAL returns a page that is not
    ///   4KB aligned; the chip requires naturally aligned ring pages
    pub fn allocate(num_pages: u16) -> BxeResult<DescRing<T, H>> {
        let per_page = (BCM_PAGE_SIZE / size_of::<T>()) as u16;
        let layout = RingLayout::new(num_pages, per_page, T::RESERVED_SLOTS);

        let mut pages = Vec::with_capacity(num_pages as usize);
        for _ in 0..num_pages {
            let dma = Dma::<T, H>::allocate(BCM_PAGE_SIZE, true)?;
            if dma.phys & (BCM_PAGE_SIZE - 1) != 0 {
                error!("ring page not page aligned: pa {:#x}", dma.phys);
                return Err(BxeError::PageNotAligned);
            }
            unsafe { ptr::write_bytes(dma.virt as *mut u8, 0, BCM_PAGE_SIZE) };
            pages.push(dma);
        }

        let mut ring = DescRing { pages, layout };
        ring.write_links();
        Ok(ring)
    }

    // Points the first reserved slot of each page at the next page, wrapping
    // the last page back to the first.
    fn write_links(&mut self) {
        if T::RESERVED_SLOTS == 0 {
            return;
        }
        let link_slot = (self.layout.per_page - T::RESERVED_SLOTS) as usize;
        for p in 0..self.pages.len() {
            let next = (p + 1) % self.pages.len();
            let next_phys = self.pages[next].phys as u64;
            let entry = unsafe { &mut *self.pages[p].virt.add(link_slot) };
            entry.write_link(next_phys);
        }
    }

    /// The ring's index arithmetic.
    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    /// The entry a free-running index currently points at.
    pub fn entry(&self, idx: u16) -> &T {
        let (page, slot) = self.layout.translate(idx);
        unsafe { &*self.pages[page].virt.add(slot) }
    }

    /// Mutable access to the entry a free-running index points at.
    pub fn entry_mut(&mut self, idx: u16) -> &mut T {
        let (page, slot) = self.layout.translate(idx);
        unsafe { &mut *self.pages[page].virt.add(slot) }
    }

    /// Physical address of ring page `page`.
    ///
    /// Page 0 is what slowpath commands hand to the firmware as the base of
    /// the chain.
    pub fn page_phys(&self, page: usize) -> usize {
        self.pages[page].phys
    }
}
