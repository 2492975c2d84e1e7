//! Hardware constants and tunables for the bxe driver.
//!
//! This module collects the ring geometry of the BCM57710/57711 descriptor
//! chains, the internal-memory and host-coalescing register offsets used by
//! the fast path, and the [`BxeConfig`] structure that carries every tunable
//! the driver accepts at initialization time.

use crate::{BxeError, BxeResult};

/// Size of one descriptor ring page in bytes.
///
/// Every descriptor chain is built from pages of this size, linked together
/// by next-page pointer records in the trailing slots of each page.
pub const BCM_PAGE_SIZE: usize = 4096;

/// RX buffer descriptors per ring page (8-byte entries).
pub const RX_BD_PER_PAGE: u16 = 512;
/// Trailing RX buffer descriptor slots reserved for the next-page pointer.
pub const RX_BD_NEXT_PAGE_SLOTS: u16 = 2;
/// Usable RX buffer descriptors per ring page.
pub const RX_BD_USABLE_PER_PAGE: u16 = RX_BD_PER_PAGE - RX_BD_NEXT_PAGE_SLOTS;

/// RX completion entries per ring page (64-byte entries).
pub const RCQ_PER_PAGE: u16 = 64;
/// Trailing RX completion slots reserved for the next-page pointer.
pub const RCQ_NEXT_PAGE_SLOTS: u16 = 1;
/// Usable RX completion entries per ring page.
pub const RCQ_USABLE_PER_PAGE: u16 = RCQ_PER_PAGE - RCQ_NEXT_PAGE_SLOTS;

/// TX buffer descriptors per ring page (16-byte entries).
pub const TX_BD_PER_PAGE: u16 = 256;
/// Trailing TX buffer descriptor slots reserved for the next-page pointer.
pub const TX_BD_NEXT_PAGE_SLOTS: u16 = 1;
/// Usable TX buffer descriptors per ring page.
pub const TX_BD_USABLE_PER_PAGE: u16 = TX_BD_PER_PAGE - TX_BD_NEXT_PAGE_SLOTS;

/// SGE descriptors per ring page (8-byte entries).
pub const SGE_PER_PAGE: u16 = 512;
/// Trailing SGE slots reserved for the next-page pointer.
pub const SGE_NEXT_PAGE_SLOTS: u16 = 2;
/// Usable SGE descriptors per ring page.
pub const SGE_USABLE_PER_PAGE: u16 = SGE_PER_PAGE - SGE_NEXT_PAGE_SLOTS;

/// Slowpath queue entries in its single ring page (16-byte entries).
///
/// The slowpath queue never chains to another page; its producer wraps in
/// place and the command credit bound keeps it from filling.
pub const SPQ_ENTRIES: u16 = 256;

/// Hardware descriptor fetch window in BDs.
///
/// The chip fetches at most this many TX descriptors per packet, which also
/// bounds the per-segment scatter list the LSO linearization check enforces.
pub const MAX_FETCH_BDS: u8 = 13;

/// Status block indices delivered in each fast path status block.
pub const HC_SB_MAX_INDICES: usize = 8;
/// Status block indices delivered in the default (slowpath) status block.
pub const HC_SP_SB_MAX_INDICES: usize = 16;

/// Fast path status block index carrying the RX completion-queue consumer.
pub const HC_INDEX_ETH_RX_CQ_CONS: usize = 1;
/// Fast path status block index carrying the RX buffer-descriptor consumer.
pub const HC_INDEX_ETH_RX_BD_CONS: usize = 2;
/// Fast path status block index carrying the TX packet consumer.
pub const HC_INDEX_ETH_TX_CQ_CONS: usize = 5;
/// Default status block index carrying the slowpath consumer.
pub const HC_SP_INDEX_ETH_DEF_CONS: usize = 7;

/// Running-index slot of the RX state machine in a fast path status block.
pub const SM_RX_ID: usize = 0;
/// Running-index slot of the TX state machine in a fast path status block.
pub const SM_TX_ID: usize = 1;

/// Storm identifier used when acknowledging TSTORM-owned indices.
pub const TSTORM_ID: u8 = 0;
/// Storm identifier used when acknowledging XSTORM-owned indices.
pub const XSTORM_ID: u8 = 1;
/// Storm identifier used when acknowledging CSTORM-owned indices.
pub const CSTORM_ID: u8 = 2;
/// Storm identifier used when acknowledging USTORM-owned indices.
pub const USTORM_ID: u8 = 3;
/// Storm identifier used when acknowledging the attention index.
pub const ATTENTION_ID: u8 = 4;

/// Interrupt-mode field value that re-enables the status block interrupt.
pub const IGU_INT_ENABLE: u8 = 0;
/// Interrupt-mode field value that masks the status block interrupt.
pub const IGU_INT_DISABLE: u8 = 1;
/// Interrupt-mode field value that leaves the interrupt state unchanged.
pub const IGU_INT_NOP: u8 = 2;

/// Status block id of the default (slowpath) status block.
pub const DEF_SB_ID: u8 = 16;

/// Base of the USTORM internal memory window in the register BAR.
pub(crate) const BAR_USTORM_INTMEM: usize = 0x40_0000;
/// Base of the CSTORM internal memory window in the register BAR.
pub(crate) const BAR_CSTORM_INTMEM: usize = 0x41_0000;
/// Base of the XSTORM internal memory window in the register BAR.
pub(crate) const BAR_XSTORM_INTMEM: usize = 0x42_0000;
/// Base of the TSTORM internal memory window in the register BAR.
pub(crate) const BAR_TSTORM_INTMEM: usize = 0x43_0000;

/// Host-coalescing command register block in the register BAR.
pub(crate) const HC_REG_COMMAND_REG: usize = 0x10_8180;
/// Offset of the interrupt-acknowledge register inside a command block.
pub(crate) const COMMAND_REG_INT_ACK: usize = 0x4;

/// Byte stride between per-connection doorbell cells in the doorbell BAR.
pub(crate) const DOORBELL_STRIDE: usize = 0x80;

/// USTORM internal memory offset of a client's RX producer block.
///
/// The block holds the three RX producers (completion, buffer, SGE) the
/// driver republishes after draining completions.
pub(crate) fn ustorm_rx_prods_offset(port: u8, client_id: u8) -> usize {
    BAR_USTORM_INTMEM + 0x1000 + (port as usize) * 0x680 + (client_id as usize) * 0x40
}

/// XSTORM internal memory offset of the slowpath queue page base.
pub(crate) fn xstorm_spq_page_base_offset(function: u8) -> usize {
    BAR_XSTORM_INTMEM + 0x9000 + (function as usize) * 0x10
}

/// XSTORM internal memory offset of the slowpath queue producer.
pub(crate) fn xstorm_spq_prod_offset(function: u8) -> usize {
    xstorm_spq_page_base_offset(function) + 0x8
}

/// Doorbell BAR offset of a connection's TX doorbell cell.
pub(crate) fn doorbell_offset(cid: u32) -> usize {
    (cid as usize) * DOORBELL_STRIDE
}

/// Host-coalescing interrupt-acknowledge register for a port.
pub(crate) fn hc_int_ack_offset(port: u8) -> usize {
    HC_REG_COMMAND_REG + (port as usize) * 32 + COMMAND_REG_INT_ACK
}

/// Runtime configuration for a [`crate::BxeDevice`].
///
/// All geometry and timing knobs the driver supports are carried in this
/// value and validated once at initialization. The defaults reproduce the
/// ring sizing of the production firmware interface: 8 RX pages, 64
/// completion pages (so every posted buffer can have an outstanding
/// completion with slack left for slowpath events), 16 TX pages and 2 SGE
/// pages per queue.
///
/// # Example
///
/// ```rust,ignore
/// let mut config = BxeConfig::default();
/// config.num_queues = 4;
/// config.mac_addr = [0x00, 0x10, 0x18, 0xab, 0xcd, 0xef];
/// let device = BxeDevice::<MyHal>::init(bar0, bar0_len, bar2, bar2_len, &pool, config)?;
/// ```
#[derive(Clone)]
pub struct BxeConfig {
    /// Number of RX/TX queue pairs to bring up.
    pub num_queues: u16,
    /// RX buffer descriptor ring pages per queue (power of two).
    pub rx_pages: u16,
    /// RX completion ring pages per queue (power of two).
    pub rcq_pages: u16,
    /// TX descriptor ring pages per queue (power of two).
    pub tx_pages: u16,
    /// SGE ring pages per queue (power of two).
    pub sge_pages: u16,
    /// RX buffers kept posted per queue. `0` selects the largest fill the
    /// ring and completion-queue geometry allow.
    pub rx_fill: u16,
    /// Data bytes of each posted RX buffer.
    pub rx_buf_len: u16,
    /// Whether transparent packet aggregation is enabled.
    pub tpa_enabled: bool,
    /// Aggregation contexts per queue.
    pub tpa_slots: u8,
    /// Maximum outstanding slowpath commands.
    pub spq_credits: u8,
    /// Hardware descriptor fetch window in BDs.
    pub max_fetch_bds: u8,
    /// Time budget for a slowpath command to complete, in milliseconds.
    pub ramrod_timeout_ms: u64,
    /// Poll interval while waiting for a slowpath completion, in milliseconds.
    pub ramrod_poll_ms: u64,
    /// TX progress watchdog expiry, in milliseconds.
    pub tx_watchdog_ms: u64,
    /// Station MAC address programmed through the slowpath channel.
    pub mac_addr: [u8; 6],
    /// Link speed reported to the embedder, in Mbit/s. Link negotiation
    /// itself happens outside this driver.
    pub link_speed_mbps: u16,
    /// Port index of this function on the controller.
    pub port: u8,
    /// PCI function index, stamped into slowpath commands.
    pub function: u8,
}

impl Default for BxeConfig {
    fn default() -> Self {
        BxeConfig {
            num_queues: 1,
            rx_pages: 8,
            rcq_pages: 64,
            tx_pages: 16,
            sge_pages: 2,
            rx_fill: 0,
            rx_buf_len: 1536,
            tpa_enabled: true,
            tpa_slots: 64,
            spq_credits: 8,
            max_fetch_bds: MAX_FETCH_BDS,
            ramrod_timeout_ms: 5000,
            ramrod_poll_ms: 1,
            tx_watchdog_ms: 5000,
            mac_addr: [0; 6],
            link_speed_mbps: 10_000,
            port: 0,
            function: 0,
        }
    }
}

impl BxeConfig {
    /// Usable RX buffer descriptors across the whole BD chain.
    pub fn rx_usable(&self) -> u16 {
        self.rx_pages * RX_BD_USABLE_PER_PAGE
    }

    /// Usable RX completion entries across the whole completion chain.
    pub fn rcq_usable(&self) -> u16 {
        self.rcq_pages * RCQ_USABLE_PER_PAGE
    }

    /// Usable TX buffer descriptors across the whole TX chain.
    pub fn tx_usable(&self) -> u16 {
        self.tx_pages * TX_BD_USABLE_PER_PAGE
    }

    /// Usable SGE descriptors across the whole SGE chain.
    pub fn sge_usable(&self) -> u16 {
        self.sge_pages * SGE_USABLE_PER_PAGE
    }

    /// The RX fill level selected by this configuration.
    ///
    /// An explicit `rx_fill` is used as-is; `0` picks the largest level that
    /// leaves the BD ring a free slot pair and the completion queue enough
    /// slack to absorb every outstanding slowpath completion.
    pub fn effective_rx_fill(&self) -> u16 {
        let bd_limit = self.rx_usable().saturating_sub(2);
        let cq_limit = self.rcq_usable().saturating_sub(self.spq_credits as u16);
        match self.rx_fill {
            0 => core::cmp::min(bd_limit, cq_limit),
            n => n,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BxeError::QueueNotAligned`] when a page count is zero or
    /// not a power of two, and [`BxeError::InvalidQueue`] when the queue
    /// count, fill level or aggregation parameters are out of range.
    pub fn validate(&self) -> BxeResult {
        for pages in [self.rx_pages, self.rcq_pages, self.tx_pages, self.sge_pages] {
            if pages == 0 || !pages.is_power_of_two() {
                error!("ring page counts must be non-zero powers of two");
                return Err(BxeError::QueueNotAligned);
            }
        }
        if self.num_queues == 0 || self.num_queues > 16 {
            error!("queue count {} out of range", self.num_queues);
            return Err(BxeError::InvalidQueue);
        }
        if self.tpa_slots == 0 || self.tpa_slots > 64 {
            error!("aggregation context count {} out of range", self.tpa_slots);
            return Err(BxeError::InvalidQueue);
        }
        if self.spq_credits == 0 {
            error!("slowpath credit count must be non-zero");
            return Err(BxeError::InvalidQueue);
        }
        if self.max_fetch_bds < 4 {
            error!("descriptor fetch window {} too small", self.max_fetch_bds);
            return Err(BxeError::InvalidQueue);
        }
        let fill = self.effective_rx_fill();
        if fill == 0
            || fill > self.rx_usable().saturating_sub(2)
            || fill > self.rcq_usable().saturating_sub(self.spq_credits as u16)
        {
            error!("rx fill level {fill} does not fit the ring geometry");
            return Err(BxeError::InvalidQueue);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_constants() {
        assert_eq!(RX_BD_PER_PAGE, 512);
        assert_eq!(RX_BD_USABLE_PER_PAGE, 510);
        assert_eq!(RCQ_PER_PAGE, 64);
        assert_eq!(RCQ_USABLE_PER_PAGE, 63);
        assert_eq!(TX_BD_PER_PAGE, 256);
        assert_eq!(TX_BD_USABLE_PER_PAGE, 255);
        assert_eq!(SGE_PER_PAGE, 512);
        assert_eq!(SGE_USABLE_PER_PAGE, 510);
        assert_eq!(SPQ_ENTRIES, 256);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BxeConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auto_fill_respects_completion_queue() {
        let config = BxeConfig::default();
        let fill = config.effective_rx_fill();
        assert!(fill <= config.rx_usable() - 2);
        assert!(fill <= config.rcq_usable() - config.spq_credits as u16);
        // 64 completion pages of 63 entries minus 8 slowpath credits
        assert_eq!(fill, 64 * 63 - 8);
    }

    #[test]
    fn test_invalid_page_counts_rejected() {
        let mut config = BxeConfig::default();
        config.rx_pages = 3;
        assert!(matches!(
            config.validate(),
            Err(BxeError::QueueNotAligned)
        ));

        let mut config = BxeConfig::default();
        config.tx_pages = 0;
        assert!(matches!(
            config.validate(),
            Err(BxeError::QueueNotAligned)
        ));
    }

    #[test]
    fn test_oversized_fill_rejected() {
        let mut config = BxeConfig::default();
        config.rx_fill = config.rx_usable(); // leaves no free slot pair
        assert!(matches!(config.validate(), Err(BxeError::InvalidQueue)));
    }

    #[test]
    fn test_producer_block_offsets_do_not_collide() {
        let a = ustorm_rx_prods_offset(0, 0);
        let b = ustorm_rx_prods_offset(0, 1);
        let c = ustorm_rx_prods_offset(1, 0);
        assert!(b - a >= 8, "client blocks must not overlap");
        assert!(c > ustorm_rx_prods_offset(0, 15));
    }
}
