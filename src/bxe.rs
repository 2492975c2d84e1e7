//! Device driver for BCM57710/57711 NICs.
//!
//! This module carries the fast path and the control path of the driver.
//! The fast path moves frames through per-queue descriptor rings: posted
//! receive buffers come back through a completion ring that multiplexes
//! plain frames, aggregated flows and slowpath acknowledgements, and
//! outbound frames are encoded into descriptor chains and reclaimed once
//! the chip reports them sent. The control path drives the firmware
//! through the slowpath command channel and the status blocks the chip
//! writes into host memory.

use core::ptr;
use core::time::Duration;

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::constants::{
    doorbell_offset, hc_int_ack_offset, ustorm_rx_prods_offset, xstorm_spq_page_base_offset,
    xstorm_spq_prod_offset, BxeConfig, ATTENTION_ID, BCM_PAGE_SIZE, DEF_SB_ID, IGU_INT_DISABLE,
    IGU_INT_ENABLE, IGU_INT_NOP, SM_RX_ID, USTORM_ID,
};
use crate::descriptor::{
    igu_ack_value, tx_doorbell_value, ChecksumStatus, CompletionType, DefaultStatusBlock,
    FastPathStatusBlock, RxBufferDescriptor, RxCompletion, SgeDescriptor, TxBd, CQE_SGL_ENTRIES,
    TX_BD_FLAGS_IPV6, TX_BD_FLAGS_IP_CSUM, TX_BD_FLAGS_IS_UDP, TX_BD_FLAGS_L4_CSUM,
    TX_BD_FLAGS_START_BD, TX_BD_FLAGS_SW_LSO, TX_BD_FLAGS_VLAN_TAG,
    TX_GENERAL_DATA_HDR_NBDS_MASK, TX_PARSE_IP_HDR_START_OFFSET_MASK,
    TX_PARSE_PSEUDO_CS_WITHOUT_LEN,
};
use crate::hal::BxeHal;
use crate::interrupts::{AttentionEvent, DefSbTracker, Interrupts, InterruptsQueue, SbTracker};
use crate::memory::{alloc_pkt, Dma, MemPool, Packet};
#[cfg(target_arch = "x86_64")]
use crate::memory::Prefetch;
use crate::ring::{DescRing, RingLayout};
use crate::sge::SgeBitmap;
use crate::sp::{FunctionState, QueueState, SlowpathChannel};
use crate::tpa::TpaSlot;
use crate::{BxeError, BxeResult, DeviceStats, NicDevice};

/// Completion budget of one service pass over a queue.
const SERVICE_RX_BUDGET: usize = 512;

// Words of layer 2 header ahead of the IP header.
const ETH_HDR_WORDS: u16 = 7;

/// The layer 4 protocol of a checksummed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Kind {
    /// Transmission Control Protocol.
    Tcp,
    /// User Datagram Protocol.
    Udp,
}

/// Segmentation parameters for a large-send frame.
///
/// The chip cuts the payload into segments of `mss` bytes and replays the
/// headers in front of each one, so it needs the pieces of the header it
/// must recompute per segment.
#[derive(Debug, Clone, Copy)]
pub struct LsoParams {
    /// Maximum segment size in bytes.
    pub mss: u16,
    /// Pseudo-header checksum seed for the replayed TCP header.
    pub tcp_pseudo_csum: u16,
    /// TCP flags of the original header.
    pub tcp_flags: u8,
    /// IP identification of the first segment.
    pub ip_id: u16,
    /// TCP sequence number of the first segment.
    pub tcp_send_seq: u32,
    /// Whether the frame is IPv6; changes the pseudo-checksum rules.
    pub ipv6: bool,
}

/// Offload work requested for an outbound frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct TxOffload {
    /// Insert the IPv4 header checksum.
    pub ip_csum: bool,
    /// Insert the layer 4 checksum for this protocol.
    pub l4_csum: Option<L4Kind>,
    /// VLAN tag for the chip to insert on the wire.
    pub vlan: Option<u16>,
    /// Segmentation parameters; `Some` marks the frame as large-send.
    pub lso: Option<LsoParams>,
    /// IP header length in 16-bit words.
    pub ip_hlen_w: u8,
    /// Total header length (layer 2 through layer 4) in 16-bit words.
    pub total_hlen_w: u16,
}

/// An outbound frame.
///
/// The head buffer carries the headers and any amount of payload; further
/// payload can ride in fragment buffers that the chip gathers while
/// fetching the descriptor chain.
pub struct TxFrame {
    /// First buffer of the frame, containing at least the headers.
    pub head: Packet,
    /// Additional payload buffers.
    pub frags: Vec<Packet>,
    /// Offloads to encode alongside the data.
    pub offload: TxOffload,
}

impl TxFrame {
    /// Creates a frame from a single buffer with no offloads.
    pub fn new(head: Packet) -> TxFrame {
        TxFrame {
            head,
            frags: Vec::new(),
            offload: TxOffload::default(),
        }
    }

    /// Total data length of the frame in bytes.
    pub fn total_len(&self) -> usize {
        self.head.len() + self.frags.iter().map(|f| f.len()).sum::<usize>()
    }

    /// Merges every fragment into the head buffer.
    ///
    /// Returns `false` when the combined data does not fit the head's pool
    /// entry; the frame is left partially merged and should be dropped.
    pub fn defragment(&mut self) -> bool {
        for frag in &self.frags {
            if !self.head.append_from(frag) {
                return false;
            }
        }
        self.frags.clear();
        true
    }
}

/// A received frame.
///
/// Small frames arrive in `head` alone. Aggregated flows spill into
/// `frags`, in order, so the payload is the concatenation of all buffers.
/// Checksum and VLAN information is decoded from the completion record,
/// never recomputed.
pub struct RxFrame {
    /// First buffer of the frame, trimmed to the data the chip placed.
    pub head: Packet,
    /// Spill buffers of an aggregated frame, in payload order.
    pub frags: Vec<Packet>,
    /// Total data length across all buffers.
    pub len: usize,
    /// Checksum verdict reported by the chip.
    pub csum: ChecksumStatus,
    /// VLAN tag stripped from the wire, if any.
    pub vlan: Option<u16>,
    /// RSS hash computed over the flow, if any.
    pub rss_hash: Option<u32>,
}

// Bookkeeping for one posted transmit frame, stored at its start
// descriptor's slot until the chip completes the packet.
struct TxRecord {
    nbd: u16,
    bytes: u64,
    frame: TxFrame,
}

struct RxQueue<H: BxeHal> {
    bd_ring: DescRing<RxBufferDescriptor, H>,
    rcq: DescRing<RxCompletion, H>,
    sge_ring: DescRing<SgeDescriptor, H>,
    sge_bitmap: SgeBitmap,
    status_block: Dma<FastPathStatusBlock, H>,
    tracker: SbTracker,
    bd_prod: u16,
    bd_cons: u16,
    comp_prod: u16,
    comp_cons: u16,
    sge_prod: u16,
    // One slot per ring entry, indexed by masked descriptor index.
    buffers: Vec<Option<Packet>>,
    sge_buffers: Vec<Option<Packet>>,
    tpa_slots: Vec<TpaSlot>,
    pool: Arc<MemPool>,
}

impl<H: BxeHal> RxQueue<H> {
    fn allocate(config: &BxeConfig, pool: &Arc<MemPool>) -> BxeResult<RxQueue<H>> {
        let bd_ring = DescRing::allocate(config.rx_pages)?;
        let rcq = DescRing::allocate(config.rcq_pages)?;
        let sge_ring: DescRing<SgeDescriptor, H> = DescRing::allocate(config.sge_pages)?;
        let status_block: Dma<FastPathStatusBlock, H> = Dma::allocate(BCM_PAGE_SIZE, true)?;
        unsafe { ptr::write_bytes(status_block.virt as *mut u8, 0, BCM_PAGE_SIZE) };

        let sge_bitmap = SgeBitmap::new(sge_ring.layout());
        let mut rxq = RxQueue {
            buffers: (0..bd_ring.layout().total()).map(|_| None).collect(),
            sge_buffers: (0..sge_ring.layout().total()).map(|_| None).collect(),
            bd_ring,
            rcq,
            sge_ring,
            sge_bitmap,
            status_block,
            tracker: SbTracker::default(),
            bd_prod: 0,
            bd_cons: 0,
            comp_prod: 0,
            comp_cons: 0,
            sge_prod: 0,
            tpa_slots: Vec::new(),
            pool: Arc::clone(pool),
        };

        // Post the programmed fill level. Every posted buffer is granted a
        // completion slot, so the completion producer moves in lockstep.
        let buf_len = config.rx_buf_len as usize;
        for _ in 0..config.effective_rx_fill() {
            let pkt = match alloc_pkt(pool, buf_len) {
                Some(pkt) => pkt,
                None => {
                    error!("buffer pool exhausted while filling the rx ring");
                    return Err(BxeError::NoMemory);
                }
            };
            let prod = rxq.bd_prod;
            post_rx_buffer(&mut rxq, prod, pkt);
            rxq.bd_prod = rxq.bd_ring.layout().advance(prod);
            rxq.comp_prod = rxq.rcq.layout().advance(rxq.comp_prod);
        }

        // Grant the whole spill ring up front; slots are recycled in place
        // as aggregations consume them.
        for _ in 0..config.sge_usable() {
            let pkt = match alloc_pkt(pool, buf_len) {
                Some(pkt) => pkt,
                None => {
                    error!("buffer pool exhausted while filling the spill ring");
                    return Err(BxeError::NoMemory);
                }
            };
            let prod = rxq.sge_prod;
            let lin = rxq.sge_ring.layout().linear(prod);
            rxq.sge_ring.entry_mut(prod).set_address(pkt.get_phys_addr() as u64);
            rxq.sge_buffers[lin] = Some(pkt);
            rxq.sge_prod = rxq.sge_ring.layout().advance(prod);
        }

        if config.tpa_enabled {
            for _ in 0..config.tpa_slots {
                let spare = match alloc_pkt(pool, buf_len) {
                    Some(pkt) => pkt,
                    None => {
                        error!("buffer pool exhausted while staging aggregation spares");
                        return Err(BxeError::NoMemory);
                    }
                };
                rxq.tpa_slots.push(TpaSlot::new(spare));
            }
        }

        Ok(rxq)
    }

    fn sb(&self) -> &FastPathStatusBlock {
        unsafe { &*self.status_block.virt }
    }
}

struct TxQueue<H: BxeHal> {
    ring: DescRing<TxBd, H>,
    bd_prod: u16,
    bd_cons: u16,
    // Packet counter mirrored against the status block's completion index.
    pkt_cons: u16,
    used: u16,
    full: bool,
    watchdog_deadline: Option<u64>,
    records: Vec<Option<TxRecord>>,
}

impl<H: BxeHal> TxQueue<H> {
    fn allocate(config: &BxeConfig) -> BxeResult<TxQueue<H>> {
        let ring = DescRing::allocate(config.tx_pages)?;
        Ok(TxQueue {
            records: (0..ring.layout().total()).map(|_| None).collect(),
            ring,
            bd_prod: 0,
            bd_cons: 0,
            pkt_cons: 0,
            used: 0,
            full: false,
            watchdog_deadline: None,
        })
    }
}

/// A BCM57710/57711 network device.
///
/// Owns the per-queue descriptor rings, the slowpath command channel and
/// the status blocks, and exposes the frame fast path through the
/// [`NicDevice`] trait. Bringing a device to a working state takes three
/// steps:
///
/// 1. [`BxeDevice::init`] validates the configuration and allocates every
///    ring and status block.
/// 2. [`BxeDevice::start_function`] walks the firmware through the
///    function start handshake.
/// 3. [`BxeDevice::open_queue`] opens each queue pair for traffic.
///
/// Teardown runs the same steps in reverse through
/// [`BxeDevice::close_queue`] and [`BxeDevice::stop_function`].
///
/// # Example
///
/// ```rust,ignore
/// let pool = MemPool::allocate::<MyHal>(4096, 2048)?;
/// let mut device = BxeDevice::<MyHal>::init(
///     bar0_addr, bar0_size, db_addr, db_size, &pool, BxeConfig::default(),
/// )?;
/// device.start_function()?;
/// device.open_queue(0)?;
/// ```
pub struct BxeDevice<H: BxeHal> {
    bar0: *mut u8,
    bar0_len: usize,
    doorbells: *mut u8,
    doorbells_len: usize,
    num_queues: u16,
    config: BxeConfig,
    rx_queues: Vec<RxQueue<H>>,
    tx_queues: Vec<Mutex<TxQueue<H>>>,
    sp: Mutex<SlowpathChannel<H>>,
    def_sb: Dma<DefaultStatusBlock, H>,
    def_tracker: DefSbTracker,
    attention: Option<AttentionEvent>,
    interrupts: Interrupts,
    stats: DeviceStats,
    violations_base: u64,
    unhealthy: bool,
    pool: Arc<MemPool>,
}

// The BAR mappings and ring pages are exclusively owned by the device.
unsafe impl<H: BxeHal> Send for BxeDevice<H> {}

impl<H: BxeHal> BxeDevice<H> {
    /// Initializes a device on an already mapped pair of BARs.
    ///
    /// Allocates the descriptor rings, fills the receive rings from `pool`,
    /// programs the ring bases into the chip and leaves the device with its
    /// function closed. Call [`BxeDevice::start_function`] and
    /// [`BxeDevice::open_queue`] afterwards to pass traffic.
    ///
    /// # Arguments
    ///
    /// * `bar0_addr` / `bar0_size` - Physical address and length of the
    ///   register BAR
    /// * `doorbell_bar_addr` / `doorbell_bar_size` - Physical address and
    ///   length of the doorbell BAR
    /// * `pool` - Memory pool backing receive buffers and spill pages
    /// * `config` - Validated by this call; see [`BxeConfig`]
    ///
    /// # Errors
    ///
    /// - [`BxeError::QueueNotAligned`] / [`BxeError::InvalidQueue`] - The
    ///   configuration is inconsistent
    /// - [`BxeError::NoMemory`] - DMA allocation failed or `pool` cannot
    ///   cover the programmed fill levels
    /// - [`BxeError::PageNotAligned`] - The HAL returned unaligned ring pages
    pub fn init(
        bar0_addr: usize,
        bar0_size: usize,
        doorbell_bar_addr: usize,
        doorbell_bar_size: usize,
        pool: &Arc<MemPool>,
        config: BxeConfig,
    ) -> BxeResult<Self> {
        config.validate()?;
        info!(
            "initializing bxe device: {} queue pairs, {} aggregation contexts per queue",
            config.num_queues,
            if config.tpa_enabled { config.tpa_slots } else { 0 }
        );

        let bar0 = unsafe { H::mmio_phys_to_virt(bar0_addr, bar0_size) }.as_ptr();
        let doorbells = unsafe { H::mmio_phys_to_virt(doorbell_bar_addr, doorbell_bar_size) }.as_ptr();

        let def_sb: Dma<DefaultStatusBlock, H> = Dma::allocate(BCM_PAGE_SIZE, true)?;
        unsafe { ptr::write_bytes(def_sb.virt as *mut u8, 0, BCM_PAGE_SIZE) };

        let sp = SlowpathChannel::allocate(config.num_queues, config.spq_credits, config.function)?;

        // Hand the command page to the firmware before anything is posted.
        let spq_base = sp.page_phys() as u64;
        let spq_cell = xstorm_spq_page_base_offset(config.function);
        write_reg32(bar0, bar0_size, spq_cell, spq_base as u32);
        write_reg32(bar0, bar0_size, spq_cell + 4, (spq_base >> 32) as u32);
        write_reg32(
            bar0,
            bar0_size,
            xstorm_spq_prod_offset(config.function),
            sp.prod() as u32,
        );

        let mut rx_queues = Vec::with_capacity(config.num_queues as usize);
        let mut tx_queues = Vec::with_capacity(config.num_queues as usize);
        for q in 0..config.num_queues {
            let rxq = RxQueue::allocate(&config, pool)?;
            publish_rx_producers(
                bar0,
                bar0_size,
                config.port,
                q as u8,
                rxq.bd_prod,
                rxq.comp_prod,
                rxq.sge_prod,
            );
            rx_queues.push(rxq);
            tx_queues.push(Mutex::new(TxQueue::allocate(&config)?));
        }

        let interrupts = Interrupts {
            queues: (0..config.num_queues)
                .map(|_| InterruptsQueue {
                    interrupt_enabled: false,
                })
                .collect(),
            ..Interrupts::default()
        };

        let num_queues = config.num_queues;
        let device = BxeDevice {
            bar0,
            bar0_len: bar0_size,
            doorbells,
            doorbells_len: doorbell_bar_size,
            num_queues,
            config,
            rx_queues,
            tx_queues,
            sp: Mutex::new(sp),
            def_sb,
            def_tracker: DefSbTracker::default(),
            attention: None,
            interrupts,
            stats: DeviceStats::default(),
            violations_base: 0,
            unhealthy: false,
            pool: Arc::clone(pool),
        };
        info!("bxe device ready, {} queue pairs", num_queues);
        Ok(device)
    }

    /// Whether a fatal condition was latched and the device needs an
    /// external reset.
    ///
    /// The latch is set by slowpath timeouts, transmit watchdog expiries
    /// and ring accounting corruption. It never clears; recovery is a full
    /// teardown and reinitialization by the embedder.
    pub fn needs_reset(&self) -> bool {
        self.unhealthy
    }

    /// Returns a snapshot of the driver statistics.
    pub fn read_stats(&self) -> DeviceStats {
        let mut stats = self.stats;
        stats.slowpath_violations = self.sp.lock().violations() - self.violations_base;
        stats
    }

    /// Takes the most recent attention event, if one is pending.
    ///
    /// Attention lines report link changes and hardware errors; decoding
    /// them is left to the embedder.
    pub fn take_attention(&mut self) -> Option<AttentionEvent> {
        self.attention.take()
    }

    /// Access to the interrupt configuration.
    pub fn interrupts_mut(&mut self) -> &mut Interrupts {
        &mut self.interrupts
    }

    /// Walks the firmware through the function start handshake.
    ///
    /// Blocks polling the slowpath channel until the acknowledgement
    /// arrives or the configured timeout expires.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - The function is not closed
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    /// - [`BxeError::RamrodTimeout`] - The firmware did not answer in time;
    ///   the device is unhealthy afterwards
    pub fn start_function(&mut self) -> BxeResult {
        let prod = self.sp.lock().begin_function_start()?;
        self.ring_spq_doorbell(prod);
        self.wait_sp(|sp| sp.function_state() == FunctionState::Open, "function start")?;
        info!("function started");
        Ok(())
    }

    /// Stops the function. Every queue must be closed first.
    ///
    /// # Errors
    ///
    /// Same shape as [`BxeDevice::start_function`].
    pub fn stop_function(&mut self) -> BxeResult {
        let prod = self.sp.lock().begin_function_stop()?;
        self.ring_spq_doorbell(prod);
        self.wait_sp(
            |sp| sp.function_state() == FunctionState::Closed,
            "function stop",
        )?;
        info!("function stopped");
        Ok(())
    }

    /// Opens `queue_id` for traffic.
    ///
    /// Posts the connection setup command carrying the queue's descriptor
    /// chain base and waits for its acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`BxeError::InvalidQueue`] - `queue_id` is out of range
    /// - [`BxeError::NotReady`] - The function is not open or the queue is
    ///   not closed
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    /// - [`BxeError::RamrodTimeout`] - The firmware did not answer in time
    pub fn open_queue(&mut self, queue_id: u16) -> BxeResult {
        self.check_queue(queue_id)?;
        let q = queue_id as usize;
        let bd_page = self.rx_queues[q].bd_ring.page_phys(0) as u64;
        let prod = self.sp.lock().begin_queue_open(q, bd_page)?;
        self.ring_spq_doorbell(prod);
        self.wait_sp(
            move |sp| sp.queue_state(q) == QueueState::Open,
            "connection setup",
        )?;
        info!("queue {} open", queue_id);
        Ok(())
    }

    /// Halts `queue_id`. The queue stops passing traffic but its context
    /// stays allocated until [`BxeDevice::delete_queue`] releases it.
    ///
    /// # Errors
    ///
    /// Same shape as [`BxeDevice::open_queue`].
    pub fn halt_queue(&mut self, queue_id: u16) -> BxeResult {
        self.check_queue(queue_id)?;
        let q = queue_id as usize;
        let prod = self.sp.lock().begin_queue_halt(q)?;
        self.ring_spq_doorbell(prod);
        self.wait_sp(
            move |sp| sp.queue_state(q) == QueueState::Halted,
            "queue halt",
        )
    }

    /// Releases the connection context of a halted queue.
    ///
    /// # Errors
    ///
    /// Same shape as [`BxeDevice::open_queue`].
    pub fn delete_queue(&mut self, queue_id: u16) -> BxeResult {
        self.check_queue(queue_id)?;
        let q = queue_id as usize;
        let prod = self.sp.lock().begin_queue_delete(q)?;
        self.ring_spq_doorbell(prod);
        self.wait_sp(
            move |sp| sp.queue_state(q) == QueueState::Closed,
            "context release",
        )
    }

    /// Fully closes `queue_id`: halt followed by context release.
    ///
    /// # Errors
    ///
    /// Same shape as [`BxeDevice::open_queue`].
    pub fn close_queue(&mut self, queue_id: u16) -> BxeResult {
        self.halt_queue(queue_id)?;
        self.delete_queue(queue_id)?;
        info!("queue {} closed", queue_id);
        Ok(())
    }

    /// Programs a new station address through the slowpath channel.
    ///
    /// Frames completing while this call polls for the acknowledgement are
    /// dropped and counted; run address updates with traffic quiesced or
    /// service queues from another vector.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - The function is not open or an update is
    ///   already pending
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    /// - [`BxeError::RamrodTimeout`] - The firmware did not answer in time
    pub fn set_mac_addr(&mut self, mac: [u8; 6]) -> BxeResult {
        let prod = self.sp.lock().begin_set_mac(mac)?;
        self.ring_spq_doorbell(prod);
        self.config.mac_addr = mac;
        self.wait_sp(|sp| !sp.mac_pending(), "station address update")?;
        info!(
            "station address set to {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        Ok(())
    }

    /// Asks the firmware for a statistics snapshot.
    ///
    /// Returns as soon as the command is posted; the acknowledgement is
    /// consumed by a later service pass.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - The function is not open or a snapshot is
    ///   already pending
    /// - [`BxeError::NoSpqCredit`] - No command credit is available
    pub fn trigger_stats_query(&mut self) -> BxeResult {
        let prod = self.sp.lock().begin_stats_query()?;
        self.ring_spq_doorbell(prod);
        Ok(())
    }

    /// Checks the transmit watchdog of `queue_id`.
    ///
    /// Reclaims any finished descriptors first, so the deadline only
    /// expires when the chip truly stopped making progress while work was
    /// outstanding.
    ///
    /// # Errors
    ///
    /// - [`BxeError::InvalidQueue`] - `queue_id` is out of range
    /// - [`BxeError::DeviceStalled`] - The watchdog expired; the device is
    ///   unhealthy afterwards
    pub fn check_tx_timeout(&mut self, queue_id: u16) -> BxeResult {
        self.check_queue(queue_id)?;
        self.tx_int(queue_id)?;
        let now = H::timestamp_ms();
        let txq = self.tx_queues[queue_id as usize].lock();
        let expired = txq.used > 0
            && matches!(txq.watchdog_deadline, Some(deadline) if now >= deadline);
        drop(txq);
        if expired {
            error!(
                "tx queue {} made no progress within {} ms",
                queue_id, self.config.tx_watchdog_ms
            );
            self.unhealthy = true;
            return Err(BxeError::DeviceStalled);
        }
        Ok(())
    }

    /// Services one queue pair's status block.
    ///
    /// Masks the vector, reclaims finished transmit descriptors and drains
    /// the completion ring if the block indicates work, then re-arms the
    /// vector with the latest running index as the final step. Received
    /// frames are handed to `deliver`.
    ///
    /// Safe to call from a worker at any time; a pass over an unchanged
    /// block only costs the acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`BxeError::InvalidQueue`] - `queue_id` is out of range
    /// - [`BxeError::DeviceStalled`] - Transmit reclaim found corrupted
    ///   accounting
    pub fn service_queue<F: FnMut(RxFrame)>(
        &mut self,
        queue_id: u16,
        mut deliver: F,
    ) -> BxeResult<usize> {
        self.check_queue(queue_id)?;
        let qi = queue_id as usize;
        self.ack_sb(queue_id as u8, USTORM_ID, 0, IGU_INT_DISABLE, false);

        let delta = {
            let rxq = &mut self.rx_queues[qi];
            let sb = unsafe { &*rxq.status_block.virt };
            rxq.tracker.update(sb)
        };

        if delta.tx {
            self.tx_int(queue_id)?;
        }
        let mut received = 0;
        if delta.rx {
            received = self.rx_int(queue_id, SERVICE_RX_BUDGET, &mut deliver);
        }

        // Drain first, re-arm last; a completion racing the ack raises a
        // fresh edge instead of being lost.
        let running = self.rx_queues[qi].sb().running(SM_RX_ID);
        self.ack_sb(queue_id as u8, USTORM_ID, running, IGU_INT_ENABLE, true);
        Ok(received)
    }

    /// Services the default status block.
    ///
    /// Surfaces attention events to the embedder and, when the slowpath
    /// index moved, drains the leading queue's completion ring where
    /// command acknowledgements arrive. Frames that complete during that
    /// drain are handed to `deliver`.
    ///
    /// # Errors
    ///
    /// Propagates transmit reclaim failures like [`BxeDevice::service_queue`].
    pub fn service_default<F: FnMut(RxFrame)>(&mut self, mut deliver: F) -> BxeResult<usize> {
        self.ack_sb(DEF_SB_ID, USTORM_ID, 0, IGU_INT_DISABLE, false);
        let sb = unsafe { &*self.def_sb.virt };
        let delta = self.def_tracker.update(sb);

        if delta.attention {
            let bits = sb.attention_pending();
            if bits != 0 {
                info!("attention lines {:#010x} routed to the embedder", bits);
                self.attention = Some(AttentionEvent { bits });
            }
            let attn_idx = self.def_tracker.attn_idx();
            self.ack_sb(DEF_SB_ID, ATTENTION_ID, attn_idx, IGU_INT_NOP, true);
        }

        let mut received = 0;
        if delta.slowpath {
            // Command acknowledgements ride the leading queue's ring.
            received = self.rx_int(0, SERVICE_RX_BUDGET, &mut deliver);
        }

        let sp_idx = self.def_tracker.sp_idx();
        self.ack_sb(DEF_SB_ID, USTORM_ID, sp_idx, IGU_INT_ENABLE, true);
        Ok(received)
    }

    /// Services every status block once.
    ///
    /// The single-vector entry point: walks all queue pairs and the
    /// default block. With one vector per block, call
    /// [`BxeDevice::service_queue`] / [`BxeDevice::service_default`] for
    /// the block behind the vector instead.
    ///
    /// # Errors
    ///
    /// Propagates the first service failure.
    pub fn handle_interrupt<F: FnMut(RxFrame)>(&mut self, mut deliver: F) -> BxeResult<usize> {
        let mut received = 0;
        for q in 0..self.num_queues {
            received += self.service_queue(q, &mut deliver)?;
        }
        received += self.service_default(&mut deliver)?;
        Ok(received)
    }

    /// Unmasks every status block vector.
    pub fn enable_interrupts(&mut self) {
        for q in 0..self.num_queues {
            let running = self.rx_queues[q as usize].sb().running(SM_RX_ID);
            self.ack_sb(q as u8, USTORM_ID, running, IGU_INT_ENABLE, true);
            if let Some(iq) = self.interrupts.queues.get_mut(q as usize) {
                iq.interrupt_enabled = true;
            }
        }
        let sp_idx = self.def_tracker.sp_idx();
        self.ack_sb(DEF_SB_ID, USTORM_ID, sp_idx, IGU_INT_ENABLE, true);
        self.interrupts.interrupts_enabled = true;
        info!(
            "interrupts enabled in {:?} mode, coalescing rx {} us tx {} us",
            self.interrupts.interrupt_type, self.interrupts.rx_ticks, self.interrupts.tx_ticks
        );
    }

    /// Masks every status block vector.
    pub fn disable_interrupts(&mut self) {
        for q in 0..self.num_queues {
            self.ack_sb(q as u8, USTORM_ID, 0, IGU_INT_DISABLE, false);
            if let Some(iq) = self.interrupts.queues.get_mut(q as usize) {
                iq.interrupt_enabled = false;
            }
        }
        self.ack_sb(DEF_SB_ID, USTORM_ID, 0, IGU_INT_DISABLE, false);
        self.interrupts.interrupts_enabled = false;
        info!("interrupts disabled");
    }

    // Drains the completion ring of `queue_id`, delivering at most `budget`
    // frames. Returns the number delivered. The hardware index is read once
    // at entry, bounding the loop.
    fn rx_int<F: FnMut(RxFrame)>(&mut self, queue_id: u16, budget: usize, deliver: &mut F) -> usize {
        let qi = queue_id as usize;
        let pool = Arc::clone(&self.pool);
        let buf_len = self.config.rx_buf_len as usize;

        let rxq = &mut self.rx_queues[qi];
        let cqe_layout = rxq.rcq.layout();
        let bd_layout = rxq.bd_ring.layout();

        let hw_comp_cons = rcq_hw_index(&cqe_layout, rxq.sb().rx_cq_cons());
        let span = hw_comp_cons.wrapping_sub(rxq.comp_cons);
        if span as u32 > cqe_layout.total() {
            error!(
                "completion index {:#x} outside the granted window",
                hw_comp_cons
            );
            self.unhealthy = true;
            return 0;
        }

        let mut delivered = 0usize;
        while rxq.comp_cons != hw_comp_cons && delivered < budget {
            let comp_cons = rxq.comp_cons;
            let cqe = *rxq.rcq.entry(comp_cons);

            match cqe.completion_type() {
                CompletionType::Ramrod => {
                    self.sp.lock().on_ramrod(
                        cqe.ramrod_conn_type(),
                        cqe.ramrod_cid(),
                        cqe.ramrod_cmd(),
                        cqe.ramrod_error(),
                    );
                }
                CompletionType::Frame => {
                    let bd_cons = rxq.bd_cons;
                    let bd_prod = rxq.bd_prod;
                    match rxq.buffers[bd_layout.linear(bd_cons)].take() {
                        Some(mut pkt) => {
                            #[cfg(target_arch = "x86_64")]
                            pkt.prefrtch(Prefetch::Time0);
                            if cqe.phy_decode_error() {
                                debug!("frame with decode error dropped");
                                post_rx_buffer(rxq, bd_prod, pkt);
                                self.stats.rx_dropped += 1;
                            } else {
                                match alloc_pkt(&pool, buf_len) {
                                    Some(fresh) => {
                                        post_rx_buffer(rxq, bd_prod, fresh);
                                        let pkt_len = cqe.pkt_len.read() as usize;
                                        pkt.trim_front(cqe.placement_offset.read() as usize);
                                        pkt.set_len(pkt_len);
                                        self.stats.rx_pkts += 1;
                                        self.stats.rx_bytes += pkt_len as u64;
                                        deliver(RxFrame {
                                            head: pkt,
                                            frags: Vec::new(),
                                            len: pkt_len,
                                            csum: cqe.checksum_status(),
                                            vlan: cqe.vlan(),
                                            rss_hash: cqe.rss(),
                                        });
                                        delivered += 1;
                                    }
                                    None => {
                                        debug!("rx pool empty, reusing the buffer");
                                        post_rx_buffer(rxq, bd_prod, pkt);
                                        self.stats.rx_dropped += 1;
                                    }
                                }
                            }
                            rxq.bd_cons = bd_layout.advance(bd_cons);
                            rxq.bd_prod = bd_layout.advance(bd_prod);
                        }
                        None => {
                            error!("rx descriptor {} had no buffer", bd_layout.linear(bd_cons));
                            self.unhealthy = true;
                            break;
                        }
                    }
                }
                CompletionType::StartAggregation => {
                    let bd_cons = rxq.bd_cons;
                    let bd_prod = rxq.bd_prod;
                    match rxq.buffers[bd_layout.linear(bd_cons)].take() {
                        Some(head) => {
                            let slot_idx = cqe.queue_index.read() as usize;
                            if slot_idx >= rxq.tpa_slots.len() {
                                error!("aggregation start on unknown context {}", slot_idx);
                                self.stats.rx_dropped += 1;
                                post_rx_buffer(rxq, bd_prod, head);
                            } else {
                                if rxq.tpa_slots[slot_idx].is_active() {
                                    error!("aggregation start on busy context {}", slot_idx);
                                    self.stats.rx_dropped += 1;
                                }
                                let posted = rxq.tpa_slots[slot_idx].start(
                                    head,
                                    cqe.placement_offset.read(),
                                    cqe.len_on_bd.read(),
                                    cqe.vlan(),
                                    cqe.rss(),
                                );
                                match posted {
                                    Some(pkt) => post_rx_buffer(rxq, bd_prod, pkt),
                                    None => {
                                        error!("aggregation context {} held no spare", slot_idx);
                                        self.unhealthy = true;
                                        break;
                                    }
                                }
                            }
                            rxq.bd_cons = bd_layout.advance(bd_cons);
                            rxq.bd_prod = bd_layout.advance(bd_prod);
                        }
                        None => {
                            error!("rx descriptor {} had no buffer", bd_layout.linear(bd_cons));
                            self.unhealthy = true;
                            break;
                        }
                    }
                }
                CompletionType::StopAggregation => {
                    let slot_idx = cqe.queue_index.read() as usize;
                    if slot_idx >= rxq.tpa_slots.len() || !rxq.tpa_slots[slot_idx].is_active() {
                        error!("aggregation stop on idle context {}", slot_idx);
                        self.stats.rx_dropped += 1;
                    } else {
                        match finish_aggregation(rxq, &pool, buf_len, &cqe) {
                            Some(frame) => {
                                self.stats.rx_pkts += 1;
                                self.stats.tpa_frames += 1;
                                self.stats.rx_bytes += frame.len as u64;
                                deliver(frame);
                                delivered += 1;
                            }
                            None => self.stats.rx_dropped += 1,
                        }
                    }
                }
            }

            rxq.comp_cons = cqe_layout.advance(comp_cons);
            rxq.comp_prod = cqe_layout.advance(rxq.comp_prod);
        }

        // Republish all three producers in one batched write.
        publish_rx_producers(
            self.bar0,
            self.bar0_len,
            self.config.port,
            queue_id as u8,
            rxq.bd_prod,
            rxq.comp_prod,
            rxq.sge_prod,
        );

        self.stats.slowpath_violations = self.sp.lock().violations() - self.violations_base;
        delivered
    }

    // Reclaims finished transmit descriptors of `queue_id`.
    fn tx_int(&mut self, queue_id: u16) -> BxeResult {
        let qi = queue_id as usize;
        let hw_pkt_cons = self.rx_queues[qi].sb().tx_cq_cons();
        let mut txq = self.tx_queues[qi].lock();
        let layout = txq.ring.layout();

        let span = hw_pkt_cons.wrapping_sub(txq.pkt_cons);
        if span as u32 > layout.total() {
            error!(
                "tx completion index {:#x} outside the granted window",
                hw_pkt_cons
            );
            self.unhealthy = true;
            return Err(BxeError::DeviceStalled);
        }

        let mut progressed = false;
        while txq.pkt_cons != hw_pkt_cons {
            let slot = layout.mask(txq.bd_cons) as usize;
            match txq.records[slot].take() {
                Some(record) => {
                    txq.bd_cons = layout.forward(txq.bd_cons, record.nbd);
                    txq.used -= record.nbd;
                    self.stats.tx_pkts += 1;
                    self.stats.tx_bytes += record.bytes;
                    // Dropping the record returns its buffers to the pool.
                }
                None => {
                    error!("tx completion without a record at slot {}", slot);
                    self.unhealthy = true;
                    return Err(BxeError::DeviceStalled);
                }
            }
            txq.pkt_cons = txq.pkt_cons.wrapping_add(1);
            progressed = true;
        }

        if progressed {
            let avail = layout.usable() - txq.used;
            if txq.full && avail as usize >= self.config.max_fetch_bds as usize + 4 {
                txq.full = false;
                debug!("tx queue {} has room again", queue_id);
            }
            txq.watchdog_deadline = if txq.used == 0 {
                None
            } else {
                Some(H::timestamp_ms().saturating_add(self.config.tx_watchdog_ms))
            };
        }
        Ok(())
    }

    // Writes the slowpath producer so the chip fetches newly posted
    // commands.
    fn ring_spq_doorbell(&self, prod: u16) {
        write_reg32(
            self.bar0,
            self.bar0_len,
            xstorm_spq_prod_offset(self.config.function),
            prod as u32,
        );
    }

    // Writes one acknowledgement record to the interrupt controller.
    fn ack_sb(&self, sb_id: u8, storm: u8, index: u16, op: u8, update: bool) {
        let value = igu_ack_value(sb_id, storm, index, op, update);
        write_reg32(
            self.bar0,
            self.bar0_len,
            hc_int_ack_offset(self.config.port),
            value,
        );
    }

    // Polls the slowpath channel until `done` holds or the configured
    // timeout expires. Pumps the leading queue so acknowledgements are
    // observed while interrupts are not being serviced; frames completing
    // during the pump are dropped and counted.
    fn wait_sp<P>(&mut self, done: P, what: &str) -> BxeResult
    where
        P: Fn(&SlowpathChannel<H>) -> bool,
    {
        let deadline = H::timestamp_ms().saturating_add(self.config.ramrod_timeout_ms);
        loop {
            let swallowed = self.rx_int(0, SERVICE_RX_BUDGET, &mut |frame| drop(frame));
            if swallowed > 0 {
                self.stats.rx_dropped += swallowed as u64;
                debug!("dropped {} frames while polling the slowpath", swallowed);
            }
            if done(&self.sp.lock()) {
                return Ok(());
            }
            if H::timestamp_ms() >= deadline {
                error!(
                    "{} not acknowledged within {} ms",
                    what, self.config.ramrod_timeout_ms
                );
                self.unhealthy = true;
                return Err(BxeError::RamrodTimeout);
            }
            let _ = H::wait_until(Duration::from_millis(self.config.ramrod_poll_ms));
        }
    }

    fn check_queue(&self, queue_id: u16) -> BxeResult {
        if queue_id >= self.num_queues {
            error!("queue {} out of range", queue_id);
            return Err(BxeError::InvalidQueue);
        }
        Ok(())
    }
}

impl<H: BxeHal> NicDevice<H> for BxeDevice<H> {
    fn get_driver_name(&self) -> &str {
        "bxe"
    }

    fn get_mac_addr(&self) -> [u8; 6] {
        self.config.mac_addr
    }

    fn reset_stats(&mut self) {
        self.violations_base = self.sp.lock().violations();
        self.stats = DeviceStats::default();
    }

    fn get_link_speed(&self) -> u16 {
        match self.sp.lock().function_state() {
            FunctionState::Open => self.config.link_speed_mbps,
            _ => 0,
        }
    }

    fn recycle_tx_buffers(&mut self, queue_id: u16) -> BxeResult {
        self.check_queue(queue_id)?;
        self.tx_int(queue_id)
    }

    fn receive_packets<F>(&mut self, queue_id: u16, packet_nums: usize, mut f: F) -> BxeResult<usize>
    where
        F: FnMut(RxFrame),
    {
        if !self.can_receive(queue_id)? {
            return Err(BxeError::NotReady);
        }
        Ok(self.rx_int(queue_id, packet_nums, &mut f))
    }

    fn send(&mut self, queue_id: u16, frame: TxFrame) -> BxeResult {
        self.check_queue(queue_id)?;
        if self.sp.lock().queue_state(queue_id as usize) != QueueState::Open {
            debug!("send on queue {} before it is open", queue_id);
            return Err(BxeError::NotReady);
        }

        let mut frame = frame;
        if needs_defragment(&frame, self.config.max_fetch_bds as usize) {
            debug!(
                "tx frame too scattered, merging {} fragments",
                frame.frags.len()
            );
            if !frame.defragment() {
                error!(
                    "tx frame of {} bytes does not fit one buffer, dropped",
                    frame.total_len()
                );
                self.stats.tx_dropped += 1;
                return Ok(());
            }
        }
        let nbd = 2 + frame.frags.len() as u16;
        let total_len = frame.total_len();

        let mut txq = self.tx_queues[queue_id as usize].lock();
        let layout = txq.ring.layout();
        let avail = layout.usable() - txq.used;
        if (avail as usize) < nbd as usize + 2 {
            txq.full = true;
            debug!(
                "tx queue {} full: {} slots left, {} needed",
                queue_id, avail, nbd
            );
            return Err(BxeError::QueueFull);
        }

        let first_bd = txq.bd_prod;
        let mut bd_prod = first_bd;

        {
            let start = txq.ring.entry_mut(bd_prod).as_start_mut();
            start.set_address(frame.head.get_phys_addr() as u64);
            start.nbd.write(nbd);
            start.nbytes.write(frame.head.len() as u16);
            start.general_data.write(1 & TX_GENERAL_DATA_HDR_NBDS_MASK);

            let mut flags = TX_BD_FLAGS_START_BD;
            if frame.offload.ip_csum {
                flags |= TX_BD_FLAGS_IP_CSUM;
            }
            match frame.offload.l4_csum {
                Some(L4Kind::Tcp) => flags |= TX_BD_FLAGS_L4_CSUM,
                Some(L4Kind::Udp) => flags |= TX_BD_FLAGS_L4_CSUM | TX_BD_FLAGS_IS_UDP,
                None => {}
            }
            if let Some(vlan) = frame.offload.vlan {
                start.vlan_or_ethertype.write(vlan);
                flags |= TX_BD_FLAGS_VLAN_TAG;
            }
            if let Some(lso) = frame.offload.lso {
                flags |= TX_BD_FLAGS_SW_LSO;
                if lso.ipv6 {
                    flags |= TX_BD_FLAGS_IPV6;
                }
            }
            start.bd_flags.write(flags);
        }
        bd_prod = layout.advance(bd_prod);

        {
            let parse = txq.ring.entry_mut(bd_prod).as_parse_mut();
            parse.clear();
            let mut global = ETH_HDR_WORDS & TX_PARSE_IP_HDR_START_OFFSET_MASK;
            parse.ip_hlen_w.write(frame.offload.ip_hlen_w);
            parse.total_hlen_w.write(frame.offload.total_hlen_w);
            if let Some(lso) = frame.offload.lso {
                parse.lso_mss.write(lso.mss);
                parse.tcp_pseudo_csum.write(lso.tcp_pseudo_csum);
                parse.tcp_flags.write(lso.tcp_flags);
                parse.ip_id.write(lso.ip_id);
                parse.tcp_send_seq.write(lso.tcp_send_seq);
                if lso.ipv6 {
                    global |= TX_PARSE_PSEUDO_CS_WITHOUT_LEN;
                }
            }
            parse.global_data.write(global);
        }
        bd_prod = layout.advance(bd_prod);

        for frag in &frame.frags {
            let data = txq.ring.entry_mut(bd_prod).as_data_mut();
            data.set_address(frag.get_phys_addr() as u64);
            data.nbytes.write(frag.len() as u16);
            data.total_pkt_bytes.write(total_len as u16);
            bd_prod = layout.advance(bd_prod);
        }

        let was_empty = txq.used == 0;
        txq.records[layout.mask(first_bd) as usize] = Some(TxRecord {
            nbd,
            bytes: total_len as u64,
            frame,
        });
        txq.used += nbd;
        txq.bd_prod = bd_prod;
        if was_empty {
            txq.watchdog_deadline =
                Some(H::timestamp_ms().saturating_add(self.config.tx_watchdog_ms));
        }

        write_reg32(
            self.doorbells,
            self.doorbells_len,
            doorbell_offset(queue_id as u32),
            tx_doorbell_value(bd_prod),
        );
        debug!(
            "tx queue {}: {} descriptors posted, prod {}",
            queue_id, nbd, bd_prod
        );
        Ok(())
    }

    fn can_receive(&self, queue_id: u16) -> BxeResult<bool> {
        self.check_queue(queue_id)?;
        let rxq = &self.rx_queues[queue_id as usize];
        let hw = rcq_hw_index(&rxq.rcq.layout(), rxq.sb().rx_cq_cons());
        Ok(hw != rxq.comp_cons)
    }

    fn can_send(&self, queue_id: u16) -> BxeResult<bool> {
        self.check_queue(queue_id)?;
        let txq = self.tx_queues[queue_id as usize].lock();
        let avail = txq.ring.layout().usable() - txq.used;
        Ok(!txq.full && avail as usize >= self.config.max_fetch_bds as usize + 4)
    }
}

// Writes a posted buffer's address at `idx` and files it in the shadow
// table.
fn post_rx_buffer<H: BxeHal>(rxq: &mut RxQueue<H>, idx: u16, pkt: Packet) {
    let lin = rxq.bd_ring.layout().linear(idx);
    rxq.bd_ring
        .entry_mut(idx)
        .set_address(pkt.get_phys_addr() as u64);
    rxq.buffers[lin] = Some(pkt);
}

// Closes an aggregation: collects the spill buffers named by the stop
// completion, reposts replacements in place and assembles the frame.
// Returns None when the frame had to be dropped; spill slots are still
// marked consumed so producer accounting survives.
fn finish_aggregation<H: BxeHal>(
    rxq: &mut RxQueue<H>,
    pool: &Arc<MemPool>,
    buf_len: usize,
    cqe: &RxCompletion,
) -> Option<RxFrame> {
    let slot_idx = cqe.queue_index.read() as usize;
    let pkt_len = cqe.pkt_len.read() as usize;
    let len_on_bd = rxq.tpa_slots[slot_idx].len_on_bd() as usize;
    let sge_layout = rxq.sge_ring.layout();

    let spill = pkt_len.saturating_sub(len_on_bd);
    let frag_count = if spill == 0 {
        0
    } else {
        (spill + buf_len - 1) / buf_len
    };

    let mut ok = frag_count <= CQE_SGL_ENTRIES;
    if !ok {
        error!(
            "aggregation of {} bytes names {} spill buffers, completion carries {}",
            pkt_len, frag_count, CQE_SGL_ENTRIES
        );
    }

    let walk = frag_count.min(CQE_SGL_ENTRIES);
    let mut frags = Vec::with_capacity(walk);
    let mut remaining = spill;
    let mut last_raw = 0u16;
    for i in 0..walk {
        let raw = cqe.sgl_entry(i);
        last_raw = raw;
        let lin = sge_layout.linear(raw);
        rxq.sge_bitmap.mark_used(raw);
        let frag_len = remaining.min(buf_len);
        remaining -= frag_len;

        // Replacement first; on failure the old buffer stays posted and the
        // frame is dropped, but the slot accounting still moves.
        match alloc_pkt(pool, buf_len) {
            Some(fresh) => {
                rxq.sge_ring
                    .entry_mut(raw)
                    .set_address(fresh.get_phys_addr() as u64);
                match rxq.sge_buffers[lin].replace(fresh) {
                    Some(mut frag) => {
                        frag.set_len(frag_len);
                        frags.push(frag);
                    }
                    None => {
                        error!("spill slot {} had no buffer", lin);
                        ok = false;
                    }
                }
            }
            None => {
                debug!("no replacement spill buffer, dropping the aggregation");
                ok = false;
            }
        }
    }

    if walk > 0 {
        let delta = rxq.sge_bitmap.advance_window(rxq.sge_prod, last_raw);
        rxq.sge_prod = rxq.sge_prod.wrapping_add(delta);
    }

    let head = if ok {
        match alloc_pkt(pool, buf_len) {
            Some(spare) => rxq.tpa_slots[slot_idx].stop(spare),
            None => {
                debug!("no spare for the aggregation context, dropping");
                rxq.tpa_slots[slot_idx].abort();
                None
            }
        }
    } else {
        rxq.tpa_slots[slot_idx].abort();
        None
    };

    let mut head = head?;
    head.trim_front(rxq.tpa_slots[slot_idx].placement_offset() as usize);
    head.set_len(len_on_bd);
    Some(RxFrame {
        head,
        frags,
        len: pkt_len,
        // Aggregation only runs over flows the chip already validated.
        csum: ChecksumStatus::Validated,
        vlan: rxq.tpa_slots[slot_idx].vlan(),
        rss_hash: rxq.tpa_slots[slot_idx].rss_hash(),
    })
}

// The chip fetches descriptor chains through a bounded window; every
// window of a large-send frame must cover at least one full segment or
// the frame needs fewer, larger fragments.
fn needs_defragment(frame: &TxFrame, max_fetch_bds: usize) -> bool {
    let window = max_fetch_bds - 3;
    if frame.frags.len() < window {
        return false;
    }
    let lso = match frame.offload.lso {
        Some(lso) => lso,
        // Too scattered for the fetch window.
        None => return true,
    };

    let mss = lso.mss as usize;
    let hlen = (frame.offload.total_hlen_w as usize) * 2;
    let head_payload = frame.head.len().saturating_sub(hlen);

    // The first window also covers the payload riding in the head buffer.
    let mut wnd_sum: usize = head_payload
        + frame
            .frags
            .iter()
            .take(window - 1)
            .map(|f| f.len())
            .sum::<usize>();
    if head_payload > 0 {
        if wnd_sum < mss {
            return true;
        }
        wnd_sum -= head_payload;
    }

    let mut start = 0;
    while start + window <= frame.frags.len() {
        wnd_sum += frame.frags[start + window - 1].len();
        if wnd_sum < mss {
            return true;
        }
        wnd_sum -= frame.frags[start].len();
        start += 1;
    }
    false
}

// The chip can publish a completion index resting on a link slot; the
// software consumer skips those, so nudge the value onto the next page.
fn rcq_hw_index(layout: &RingLayout, raw: u16) -> u16 {
    if raw & (layout.per_page() - 1) == layout.per_page() - 1 {
        raw.wrapping_add(1)
    } else {
        raw
    }
}

// Batched producer update: completion and descriptor producers share the
// first word, the spill producer rides in the second.
fn publish_rx_producers(
    bar0: *mut u8,
    bar0_len: usize,
    port: u8,
    client: u8,
    bd_prod: u16,
    comp_prod: u16,
    sge_prod: u16,
) {
    let base = ustorm_rx_prods_offset(port, client);
    write_reg32(
        bar0,
        bar0_len,
        base,
        (comp_prod as u32) | ((bd_prod as u32) << 16),
    );
    write_reg32(bar0, bar0_len, base + 4, sge_prod as u32);
}

fn write_reg32(bar: *mut u8, len: usize, offset: usize, value: u32) {
    assert!(offset + 4 <= len, "memory access out of bounds");
    unsafe { ptr::write_volatile(bar.add(offset) as *mut u32, value) };
}
