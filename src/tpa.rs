//! Per-context state for transparent packet aggregation.
//!
//! The chip coalesces TCP streams into large frames using a small number of
//! aggregation contexts per queue. Each context is backed by a [`TpaSlot`]
//! that owns exactly one buffer at all times: a clean spare while the context
//! is idle, or the head of the running aggregation while it is active.
//!
//! When an aggregation starts, the slot's spare takes the consumed buffer's
//! place on the RX ring and the consumed buffer parks in the slot together
//! with the start completion's metadata. When it stops, the receive path
//! first allocates a replacement spare and only then takes the head out for
//! delivery; if no replacement is available the aggregation is dropped and
//! the parked head is kept as the next spare, so the slot never loses its
//! buffer.

use crate::memory::Packet;

/// Life cycle of one aggregation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpaState {
    /// No aggregation running; the slot holds a clean spare buffer.
    Idle,
    /// An aggregation is in flight; the slot holds its head buffer.
    Active,
}

/// One aggregation context of a receive queue.
pub struct TpaSlot {
    state: TpaState,
    buffer: Option<Packet>,
    placement_offset: u8,
    len_on_bd: u16,
    vlan: Option<u16>,
    rss_hash: Option<u32>,
}

impl TpaSlot {
    /// Creates an idle slot holding `spare`.
    pub fn new(spare: Packet) -> TpaSlot {
        TpaSlot {
            state: TpaState::Idle,
            buffer: Some(spare),
            placement_offset: 0,
            len_on_bd: 0,
            vlan: None,
            rss_hash: None,
        }
    }

    /// Whether an aggregation is currently running in this context.
    pub fn is_active(&self) -> bool {
        self.state == TpaState::Active
    }

    /// Opens an aggregation: parks `head` in the slot and returns the buffer
    /// that should take its place on the RX ring.
    ///
    /// The caller records a protocol violation if the slot was already
    /// active; the swap still happens, matching the hardware's view that the
    /// new aggregation owns the context. In that case the returned buffer is
    /// the abandoned head and its contents are stale.
    pub fn start(
        &mut self,
        head: Packet,
        placement_offset: u8,
        len_on_bd: u16,
        vlan: Option<u16>,
        rss_hash: Option<u32>,
    ) -> Option<Packet> {
        let posted = self.buffer.take();
        self.buffer = Some(head);
        self.placement_offset = placement_offset;
        self.len_on_bd = len_on_bd;
        self.vlan = vlan;
        self.rss_hash = rss_hash;
        self.state = TpaState::Active;
        posted
    }

    /// Closes the aggregation: installs `spare` and hands back the head for
    /// delivery.
    ///
    /// Returns [`None`] without touching the slot if no aggregation was
    /// running; the unneeded `spare` simply drops back to its pool.
    pub fn stop(&mut self, spare: Packet) -> Option<Packet> {
        if !self.is_active() {
            return None;
        }
        self.state = TpaState::Idle;
        self.buffer.replace(spare)
    }

    /// Abandons the aggregation, keeping the parked head as the next spare.
    ///
    /// Used when no replacement buffer could be allocated at stop time.
    pub fn abort(&mut self) {
        self.state = TpaState::Idle;
    }

    /// Placement offset recorded from the start completion.
    pub fn placement_offset(&self) -> u8 {
        self.placement_offset
    }

    /// Bytes the chip placed into the head buffer, recorded at start time.
    ///
    /// The stop completion only carries the total length, so this is what
    /// determines how much of the total lives in the scatter list.
    pub fn len_on_bd(&self) -> u16 {
        self.len_on_bd
    }

    /// VLAN tag recorded from the start completion.
    pub fn vlan(&self) -> Option<u16> {
        self.vlan
    }

    /// RSS hash recorded from the start completion.
    pub fn rss_hash(&self) -> Option<u32> {
        self.rss_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BCM_PAGE_SIZE;
    use crate::hal::BxeHal;
    use crate::memory::{alloc_pkt, MemPool, PhysAddr};
    use alloc::sync::Arc;
    use core::ptr::NonNull;
    use core::time::Duration;

    struct TpaTestHal;

    unsafe impl BxeHal for TpaTestHal {
        fn dma_alloc(size: usize) -> (PhysAddr, NonNull<u8>) {
            let layout = core::alloc::Layout::from_size_align(size, BCM_PAGE_SIZE).unwrap();
            let ptr = unsafe { alloc::alloc::alloc(layout) };
            (ptr as usize, NonNull::new(ptr).unwrap())
        }

        unsafe fn dma_dealloc(_paddr: PhysAddr, vaddr: NonNull<u8>, size: usize) -> i32 {
            let layout = core::alloc::Layout::from_size_align(size, BCM_PAGE_SIZE).unwrap();
            alloc::alloc::dealloc(vaddr.as_ptr(), layout);
            0
        }

        unsafe fn mmio_phys_to_virt(paddr: PhysAddr, _size: usize) -> NonNull<u8> {
            NonNull::new(paddr as *mut u8).unwrap()
        }

        unsafe fn mmio_virt_to_phys(vaddr: NonNull<u8>, _size: usize) -> PhysAddr {
            vaddr.as_ptr() as usize
        }

        fn wait_until(_duration: Duration) -> Result<(), &'static str> {
            Ok(())
        }

        fn timestamp_ms() -> u64 {
            0
        }
    }

    fn test_pool() -> Arc<MemPool> {
        MemPool::allocate::<TpaTestHal>(16, 2048).unwrap()
    }

    #[test]
    fn test_start_swaps_spare_for_head() {
        let pool = test_pool();
        let spare = alloc_pkt(&pool, 1500).unwrap();
        let spare_ptr = spare.get_virt_addr();
        let mut slot = TpaSlot::new(spare);

        let head = alloc_pkt(&pool, 1500).unwrap();
        let posted = slot
            .start(head, 2, 1448, Some(100), Some(0xDEAD_BEEF))
            .unwrap();

        assert_eq!(posted.get_virt_addr(), spare_ptr);
        assert!(slot.is_active());
        assert_eq!(slot.placement_offset(), 2);
        assert_eq!(slot.len_on_bd(), 1448);
        assert_eq!(slot.vlan(), Some(100));
        assert_eq!(slot.rss_hash(), Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_stop_returns_head_and_installs_spare() {
        let pool = test_pool();
        let mut slot = TpaSlot::new(alloc_pkt(&pool, 1500).unwrap());

        let head = alloc_pkt(&pool, 1500).unwrap();
        let head_ptr = head.get_virt_addr();
        let _posted = slot.start(head, 0, 1448, None, None);

        let new_spare = alloc_pkt(&pool, 1500).unwrap();
        let new_spare_ptr = new_spare.get_virt_addr();
        let delivered = slot.stop(new_spare).unwrap();

        assert_eq!(delivered.get_virt_addr(), head_ptr);
        assert!(!slot.is_active());

        // The installed spare is what the next aggregation posts back.
        let posted = slot
            .start(alloc_pkt(&pool, 1500).unwrap(), 0, 64, None, None)
            .unwrap();
        assert_eq!(posted.get_virt_addr(), new_spare_ptr);
    }

    #[test]
    fn test_stop_when_idle_is_rejected() {
        let pool = test_pool();
        let spare = alloc_pkt(&pool, 1500).unwrap();
        let spare_ptr = spare.get_virt_addr();
        let mut slot = TpaSlot::new(spare);

        assert!(slot.stop(alloc_pkt(&pool, 1500).unwrap()).is_none());

        // The original spare survives the rejected stop.
        let posted = slot
            .start(alloc_pkt(&pool, 1500).unwrap(), 0, 64, None, None)
            .unwrap();
        assert_eq!(posted.get_virt_addr(), spare_ptr);
    }

    #[test]
    fn test_abort_keeps_head_as_spare() {
        let pool = test_pool();
        let mut slot = TpaSlot::new(alloc_pkt(&pool, 1500).unwrap());

        let head = alloc_pkt(&pool, 1500).unwrap();
        let head_ptr = head.get_virt_addr();
        let _posted = slot.start(head, 0, 1448, None, None);

        slot.abort();
        assert!(!slot.is_active());

        // The abandoned head is recycled as the next posted buffer.
        let posted = slot
            .start(alloc_pkt(&pool, 1500).unwrap(), 0, 64, None, None)
            .unwrap();
        assert_eq!(posted.get_virt_addr(), head_ptr);
    }

    #[test]
    fn test_double_start_recycles_old_head() {
        let pool = test_pool();
        let mut slot = TpaSlot::new(alloc_pkt(&pool, 1500).unwrap());

        let first_head = alloc_pkt(&pool, 1500).unwrap();
        let first_head_ptr = first_head.get_virt_addr();
        let _posted = slot.start(first_head, 0, 1448, None, None);
        assert!(slot.is_active());

        // A second start on an active slot hands the stale head back as the
        // posted buffer and the new aggregation takes over.
        let posted = slot
            .start(alloc_pkt(&pool, 1500).unwrap(), 1, 512, None, None)
            .unwrap();
        assert_eq!(posted.get_virt_addr(), first_head_ptr);
        assert!(slot.is_active());
        assert_eq!(slot.len_on_bd(), 512);
    }
}
