//! Interrupt management for the bxe driver.
//!
//! This module provides structures and configuration for interrupt handling
//! on BCM57710/57711 NICs. Interrupt support is optional and requires the
//! `irq` feature to be enabled.
//!
//! # Interrupt Types
//!
//! The controller supports two interrupt mechanisms:
//!
//! - **MSI (Message Signaled Interrupts)**: Single interrupt vector
//! - **MSI-X (Extended MSI)**: One vector per queue status block plus one for
//!   the default status block
//!
//! # Status Blocks
//!
//! Interrupts on this controller are edge notifications that a status block
//! changed; all actual event information travels through the status blocks
//! in host memory. Each queue pair has a fast path status block carrying the
//! hardware consumer indices of its rings, and the function has one default
//! status block carrying the slowpath consumer and the latched attention
//! bits. Servicing an interrupt means comparing those indices against the
//! driver's own, doing the indicated work and acknowledging the block's
//! running index back to the interrupt controller, which re-arms the vector.

use alloc::vec::Vec;

use crate::descriptor::{DefaultStatusBlock, FastPathStatusBlock};

/// The number of msi-x vectors this device can have.
/// One per fast path status block plus one for the default status block.
pub const BXE_MAX_MSIX_VECTORS: usize = 17;

/// Interrupt configuration for the bxe device.
///
/// This structure contains global interrupt settings for the device including
/// host-coalescing ticks, timeout, and per-queue configuration.
#[derive(Default)]
pub struct Interrupts {
    /// Whether interrupts are enabled for this device.
    pub interrupts_enabled: bool,
    /// Host-coalescing interval for RX indices in microseconds (0 leaves the
    /// firmware default in place).
    pub rx_ticks: u16,
    /// Host-coalescing interval for TX indices in microseconds (0 leaves the
    /// firmware default in place).
    pub tx_ticks: u16,
    /// The interrupt type (MSI or MSIX).
    pub interrupt_type: InterruptType,
    /// Interrupt timeout in milliseconds (-1 to disable timeout).
    pub timeout_ms: i16,
    /// Interrupt settings per queue.
    pub queues: Vec<InterruptsQueue>,
}

/// Per-queue interrupt configuration.
///
/// Controls whether interrupts are enabled for a specific queue pair's status
/// block.
pub struct InterruptsQueue {
    /// Whether the interrupt is enabled for this queue.
    pub interrupt_enabled: bool,
}

/// The type of interrupt mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptType {
    /// Message Signaled Interrupts (single vector).
    Msi,
    /// Extended MSI (one vector per status block).
    #[default]
    Msix,
}

/// Work indicated by a fast path status block change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbDelta {
    /// A receive-side index moved; the completion queue needs draining.
    pub rx: bool,
    /// The transmit completion index moved; descriptors can be reclaimed.
    pub tx: bool,
}

/// Change detector for one queue pair's fast path status block.
///
/// Keeps the last observed copy of the published consumer indices and
/// reports which side of the queue pair has new work. A repeated update
/// with unchanged indices reports nothing, so a spurious interrupt costs
/// one comparison and one acknowledgement.
#[derive(Default, Clone, Copy)]
pub struct SbTracker {
    rx_cq: u16,
    rx_bd: u16,
    tx_cq: u16,
}

impl SbTracker {
    /// Compares the block against the last observed state and remembers the
    /// new indices.
    pub fn update(&mut self, sb: &FastPathStatusBlock) -> SbDelta {
        let rx_cq = sb.rx_cq_cons();
        let rx_bd = sb.rx_bd_cons();
        let tx_cq = sb.tx_cq_cons();
        let delta = SbDelta {
            rx: rx_cq != self.rx_cq || rx_bd != self.rx_bd,
            tx: tx_cq != self.tx_cq,
        };
        self.rx_cq = rx_cq;
        self.rx_bd = rx_bd;
        self.tx_cq = tx_cq;
        delta
    }

    /// Last observed receive completion consumer.
    pub fn rx_cq(&self) -> u16 {
        self.rx_cq
    }

    /// Last observed transmit completion consumer.
    pub fn tx_cq(&self) -> u16 {
        self.tx_cq
    }
}

/// Work indicated by a default status block change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefSbDelta {
    /// The attention running index moved; latched attention bits changed.
    pub attention: bool,
    /// The slowpath running index moved; ramrod completions may be queued.
    pub slowpath: bool,
}

/// Change detector for the default status block.
///
/// Keeps the last serviced running indices so a repeated service pass with
/// no new events reports nothing to do.
#[derive(Default, Clone, Copy)]
pub struct DefSbTracker {
    attn_idx: u16,
    sp_idx: u16,
}

impl DefSbTracker {
    /// Compares the block against the last serviced state and remembers the
    /// new indices.
    pub fn update(&mut self, sb: &DefaultStatusBlock) -> DefSbDelta {
        let attn = sb.attn_bits_index.read();
        let sp = sb.running_index.read();
        let delta = DefSbDelta {
            attention: attn != self.attn_idx,
            slowpath: sp != self.sp_idx,
        };
        self.attn_idx = attn;
        self.sp_idx = sp;
        delta
    }

    /// The attention running index to acknowledge.
    pub fn attn_idx(&self) -> u16 {
        self.attn_idx
    }

    /// The slowpath running index to acknowledge.
    pub fn sp_idx(&self) -> u16 {
        self.sp_idx
    }
}

/// Attention bits that changed since the last service pass.
///
/// Attention lines carry link events and hardware error reports from the
/// controller's blocks. The driver surfaces them to the embedder rather than
/// decoding every source itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionEvent {
    /// The changed attention lines, one bit per source.
    pub bits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupts_default() {
        let interrupts = Interrupts::default();
        assert!(!interrupts.interrupts_enabled);
        assert_eq!(interrupts.interrupt_type, InterruptType::Msix);
        assert_eq!(interrupts.rx_ticks, 0);
        assert_eq!(interrupts.tx_ticks, 0);
        assert!(interrupts.queues.is_empty());
    }

    #[test]
    fn test_vector_budget_covers_default_block() {
        assert_eq!(BXE_MAX_MSIX_VECTORS, 16 + 1);
    }

    #[test]
    fn test_sb_tracker_splits_rx_and_tx_work() {
        let mut sb = FastPathStatusBlock::zeroed();
        let mut tracker = SbTracker::default();

        let delta = tracker.update(&sb);
        assert!(!delta.rx && !delta.tx);

        sb.index_values[crate::constants::HC_INDEX_ETH_RX_CQ_CONS].write(12);
        let delta = tracker.update(&sb);
        assert!(delta.rx);
        assert!(!delta.tx);

        sb.index_values[crate::constants::HC_INDEX_ETH_TX_CQ_CONS].write(4);
        let delta = tracker.update(&sb);
        assert!(!delta.rx);
        assert!(delta.tx);

        // The descriptor consumer alone also counts as receive work.
        sb.index_values[crate::constants::HC_INDEX_ETH_RX_BD_CONS].write(9);
        let delta = tracker.update(&sb);
        assert!(delta.rx && !delta.tx);

        assert_eq!(tracker.rx_cq(), 12);
        assert_eq!(tracker.tx_cq(), 4);
    }

    #[test]
    fn test_sb_tracker_is_idempotent() {
        let mut sb = FastPathStatusBlock::zeroed();
        sb.index_values[crate::constants::HC_INDEX_ETH_RX_CQ_CONS].write(7);
        sb.index_values[crate::constants::HC_INDEX_ETH_TX_CQ_CONS].write(7);

        let mut tracker = SbTracker::default();
        let first = tracker.update(&sb);
        assert!(first.rx && first.tx);

        let second = tracker.update(&sb);
        assert!(!second.rx && !second.tx);
    }

    #[test]
    fn test_def_sb_tracker_detects_changes() {
        let mut sb = DefaultStatusBlock::zeroed();
        let mut tracker = DefSbTracker::default();

        // A fresh block with zero indices looks already serviced.
        let delta = tracker.update(&sb);
        assert!(!delta.attention);
        assert!(!delta.slowpath);

        sb.running_index.write(1);
        let delta = tracker.update(&sb);
        assert!(!delta.attention);
        assert!(delta.slowpath);

        sb.attn_bits_index.write(1);
        let delta = tracker.update(&sb);
        assert!(delta.attention);
        assert!(!delta.slowpath);
    }

    #[test]
    fn test_def_sb_tracker_is_idempotent() {
        let mut sb = DefaultStatusBlock::zeroed();
        sb.running_index.write(5);
        sb.attn_bits_index.write(3);

        let mut tracker = DefSbTracker::default();
        let first = tracker.update(&sb);
        assert!(first.attention && first.slowpath);

        // Nothing new: a second pass reports no work.
        let second = tracker.update(&sb);
        assert!(!second.attention && !second.slowpath);
        assert_eq!(tracker.attn_idx(), 3);
        assert_eq!(tracker.sp_idx(), 5);
    }
}
