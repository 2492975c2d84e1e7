//! Hardware abstraction layer for the bxe driver.
//!
//! The driver itself never touches platform services directly. Everything the
//! surrounding system must provide (DMA memory, MMIO mappings and a clock) is
//! funneled through the [`BxeHal`] trait so the same driver core runs under
//! an OS kernel, a unikernel or a test harness.

use core::ptr::NonNull;
use core::time::Duration;

use crate::memory::PhysAddr;

/// Platform services required by the driver.
///
/// # Safety
///
/// Implementations must uphold the DMA and MMIO contracts below; the driver
/// hands the returned addresses to the device, which will read and write
/// them asynchronously.
///
/// - `dma_alloc` must return memory that stays mapped and physically stable
///   for the lifetime of the device.
/// - `mmio_phys_to_virt` must map device registers uncached.
/// - Address translations must be exact inverses of each other for any
///   region handed out by this trait.
pub unsafe trait BxeHal {
    /// Allocates DMA-capable memory of `size` bytes, page aligned.
    ///
    /// Returns the physical address and a CPU pointer to the same memory.
    fn dma_alloc(size: usize) -> (PhysAddr, NonNull<u8>);

    /// Releases memory previously obtained from [`BxeHal::dma_alloc`].
    ///
    /// Returns 0 on success.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the device no longer accesses the region.
    unsafe fn dma_dealloc(paddr: PhysAddr, vaddr: NonNull<u8>, size: usize) -> i32;

    /// Maps a physical MMIO region into the driver's address space.
    ///
    /// # Safety
    ///
    /// `paddr..paddr + size` must be a device register region owned by the
    /// caller.
    unsafe fn mmio_phys_to_virt(paddr: PhysAddr, size: usize) -> NonNull<u8>;

    /// Translates a virtual address inside a DMA or MMIO region back to its
    /// physical address.
    ///
    /// # Safety
    ///
    /// `vaddr` must point into a region handed out by this trait.
    unsafe fn mmio_virt_to_phys(vaddr: NonNull<u8>, size: usize) -> PhysAddr;

    /// Blocks the current context for `duration`.
    ///
    /// Used between polls while waiting for slowpath completions. Returns an
    /// error if the platform cannot wait (the driver treats that as a timed
    /// out poll).
    fn wait_until(duration: Duration) -> Result<(), &'static str>;

    /// Returns a monotonic millisecond timestamp.
    ///
    /// Drives the TX progress watchdog and slowpath command deadlines. The
    /// clock only has to be monotonic; its absolute value is never
    /// interpreted.
    fn timestamp_ms() -> u64;
}
