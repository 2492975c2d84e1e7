//! # bxe-driver
//!
//! A `no_std` driver implementation for Broadcom NetXtreme II BCM57710/57711
//! 10 Gigabit Ethernet NICs.
//!
//! This crate provides a safe, low-level driver for the BCM57710 family
//! ("Everest") of network interface cards. It is designed to be used in
//! embedded and bare-metal environments where the standard library is not
//! available.
//!
//! ## Features
//!
//! - `no_std` compatible - works without the standard library
//! - Multi-queue support with one status block per queue pair
//! - Transparent packet aggregation (TPA) of received TCP streams
//! - Checksum offload and hardware segmentation on transmit
//! - Slowpath command channel driving the queue and function life cycles
//! - Memory pool management for efficient packet buffer allocation
//! - Zero-copy packet handling
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use bxe_driver::{BxeConfig, BxeDevice, BxeHal, MemPool, NicDevice, TxFrame};
//!
//! // First, implement the BxeHal trait for your platform
//! struct MyHal;
//!
//! unsafe impl BxeHal for MyHal {
//!     // Implement required methods...
//! }
//!
//! // Initialize the device
//! let pool = MemPool::allocate::<MyHal>(4096, 2048)?;
//! let mut config = BxeConfig::default();
//! config.mac_addr = [0x00, 0x10, 0x18, 0xab, 0xcd, 0xef];
//! let mut device = BxeDevice::<MyHal>::init(
//!     bar0_addr,
//!     bar0_size,
//!     doorbell_bar_addr,
//!     doorbell_bar_size,
//!     &pool,
//!     config,
//! )?;
//!
//! // Bring up the function and the first queue pair
//! device.start_function()?;
//! device.open_queue(0)?;
//!
//! // Send and receive packets
//! let frame = TxFrame::new(alloc_pkt(&pool, packet_size).unwrap());
//! device.send(0, frame)?;
//!
//! device.receive_packets(0, 32, |frame| {
//!     // Handle received frame
//! })?;
//! ```
//!
//! ## Hardware Abstraction Layer (HAL)
//!
//! This driver requires the user to implement the [`BxeHal`] trait, which provides
//! platform-specific operations such as:
//! - DMA memory allocation/deallocation
//! - MMIO address translation
//! - Timing/waiting operations
//!
//! ## Platform Support
//!
//! The bxe driver supports the NetXtreme II 10GbE controllers including:
//! - BCM57710
//! - BCM57711
//! - BCM57711E
//!
//! ## Interrupt Modes
//!
//! The driver supports three operation modes:
//! - **Polling mode** (default): No interrupts, the driver continuously polls
//!   the status blocks for new events
//! - **MSI mode**: Message Signaled Interrupts (with `irq` feature)
//! - **MSI-X mode**: Extended MSI with one vector per status block (with `irq` feature)

#![no_std]
#![deny(warnings)]
#![deny(missing_docs)]
#![allow(dead_code)]

mod bxe;
pub mod constants;
pub mod descriptor;
mod hal;
pub mod interrupts;
pub mod memory;
pub mod ring;
pub mod sge;
pub mod sp;
pub mod tpa;

extern crate alloc;
#[macro_use]
extern crate log;

pub use bxe::{BxeDevice, L4Kind, LsoParams, RxFrame, TxFrame, TxOffload};
pub use constants::BxeConfig;
pub use descriptor::ChecksumStatus;
pub use hal::BxeHal;

pub use memory::{alloc_pkt, MemPool, Packet, PhysAddr, PACKET_HEADROOM};

/// Vendor ID for Broadcom.
pub const BCM_VEND: u16 = 0x14E4;

/// Device ID for the BCM57710, used to identify the device from the PCI space.
pub const BCM57710: u16 = 0x164E;

/// Device ID for the BCM57711.
pub const BCM57711: u16 = 0x164F;

/// Device ID for the BCM57711E.
pub const BCM57711E: u16 = 0x1650;

/// Error type for bxe driver operations.
///
/// This enum represents the various error conditions that can occur when
/// interacting with the bxe device.
#[derive(Debug)]
pub enum BxeError {
    /// The queue size is not aligned (not a power of 2).
    ///
    /// Hardware descriptor rings require page counts that are powers of 2 so
    /// that free-running indices mask cleanly.
    QueueNotAligned,
    /// There are not enough descriptors available in the queue.
    ///
    /// The transmit or receive queue is full. The caller should retry later
    /// after processing pending packets.
    QueueFull,
    /// No memory available.
    ///
    /// The memory pool is exhausted or DMA allocation failed.
    NoMemory,
    /// The allocated page is not properly aligned.
    ///
    /// DMA memory must be aligned to page boundaries.
    PageNotAligned,
    /// The device is not ready for the requested operation.
    ///
    /// The target queue or the function is not in the state the operation
    /// requires, or a previous control operation is still in flight.
    NotReady,
    /// Invalid queue ID.
    ///
    /// The specified `queue_id` does not exist on this device.
    InvalidQueue,
    /// No slowpath command credit available.
    ///
    /// The maximum number of control commands is already outstanding. The
    /// caller should service completions and retry.
    NoSpqCredit,
    /// A slowpath command was not acknowledged in time.
    ///
    /// The firmware failed to answer a control command within the configured
    /// timeout. The device is considered unhealthy afterwards.
    RamrodTimeout,
    /// The device stopped making progress.
    ///
    /// A transmit watchdog expiry or an index regression was detected; the
    /// device needs to be reset by the embedder.
    DeviceStalled,
}

/// Result type for bxe driver functions.
///
/// A type alias for `Result` with [`BxeError`] as the error type.
pub type BxeResult<T = ()> = Result<T, BxeError>;

/// Generic network device interface.
///
/// This trait provides a common interface for network device drivers, allowing
/// protocol stacks to be implemented independently of the specific NIC hardware.
/// It is inspired by the ixy driver approach and provides methods for:
///
/// - Device identification and configuration
/// - Packet transmission and reception
/// - Queue management
/// - Statistics tracking
///
/// # Example
///
/// ```rust,ignore
/// use bxe_driver::{BxeDevice, NicDevice};
///
/// let mut device = BxeDevice::<MyHal>::init(...)?;
///
/// // Check device info
/// println!("Driver: {}", device.get_driver_name());
/// println!("MAC: {:02x?}", device.get_mac_addr());
/// println!("Speed: {} Mbit/s", device.get_link_speed());
///
/// // Send and receive
/// while device.can_receive(0)? {
///     device.receive_packets(0, 32, |frame| {
///         // Process frame
///     })?;
/// }
/// ```
pub trait NicDevice<H: BxeHal> {
    /// Returns the driver's name.
    ///
    /// This is a simple string identifier such as "bxe" or "virtio".
    fn get_driver_name(&self) -> &str;

    /// Returns the MAC (Ethernet) address of this device.
    ///
    /// Returns a 6-byte array representing the layer 2 address.
    fn get_mac_addr(&self) -> [u8; 6];

    /// Resets the driver's statistics counters.
    ///
    /// Clears all packet and byte counters maintained by the driver.
    /// This affects the values returned by subsequent statistics reads.
    fn reset_stats(&mut self);

    /// Returns the link speed of the network card.
    ///
    /// Returns the current link speed in Mbit/s (e.g., 10000 for 10GbE).
    /// Returns 0 if the link is down.
    fn get_link_speed(&self) -> u16;

    /// Polls the transmit queue for completed packets and frees their buffers.
    ///
    /// This method reclaims transmit descriptors that have been completed by
    /// the hardware and returns their packet buffers to the memory pool.
    ///
    /// # Arguments
    ///
    /// * `queue_id` - The transmit queue ID to clean
    ///
    /// # Errors
    ///
    /// Returns [`BxeError::InvalidQueue`] if `queue_id` is out of range.
    fn recycle_tx_buffers(&mut self, queue_id: u16) -> BxeResult;

    /// Receives up to `packet_nums` packets from the network.
    ///
    /// This method receives packets from the specified queue and invokes the
    /// closure `f` for each received packet. Using a closure avoids dynamic
    /// memory allocation and allows the caller to handle packets efficiently.
    ///
    /// # Arguments
    ///
    /// * `queue_id` - The receive queue ID to read from
    /// * `packet_nums` - Maximum number of packets to receive
    /// * `f` - Closure called for each received packet with the [`RxFrame`]
    ///
    /// # Returns
    ///
    /// Returns the number of packets actually received.
    ///
    /// # Errors
    ///
    /// - [`BxeError::NotReady`] - No packets are currently available
    /// - [`BxeError::InvalidQueue`] - `queue_id` is out of range
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let count = device.receive_packets(0, 32, |frame| {
    ///     let data: &[u8] = &frame.head;
    ///     // Handle packet data
    /// })?;
    /// println!("Received {} packets", count);
    /// ```
    fn receive_packets<F>(&mut self, queue_id: u16, packet_nums: usize, f: F) -> BxeResult<usize>
    where
        F: FnMut(RxFrame);

    /// Sends a packet to the network.
    ///
    /// Queues the packet for transmission on the specified queue. The actual
    /// transmission happens asynchronously in the hardware.
    ///
    /// # Arguments
    ///
    /// * `queue_id` - The transmit queue ID to send on
    /// * `frame` - The frame to send
    ///
    /// # Errors
    ///
    /// - [`BxeError::QueueFull`] - The transmit queue has no available descriptors
    /// - [`BxeError::InvalidQueue`] - `queue_id` is out of range
    /// - [`BxeError::NotReady`] - The queue has not been opened
    fn send(&mut self, queue_id: u16, frame: TxFrame) -> BxeResult;

    /// Checks whether a packet can be received from the specified queue.
    ///
    /// Returns `true` if at least one completion is waiting in the receive
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns [`BxeError::InvalidQueue`] if `queue_id` is out of range.
    fn can_receive(&self, queue_id: u16) -> BxeResult<bool>;

    /// Checks whether a packet can be sent on the specified queue.
    ///
    /// Returns `true` if the transmit queue has room for a full-sized
    /// descriptor chain.
    ///
    /// # Errors
    ///
    /// Returns [`BxeError::InvalidQueue`] if `queue_id` is out of range.
    fn can_send(&self, queue_id: u16) -> BxeResult<bool>;
}

/// Network device statistics.
///
/// Holds counters for sent and received packets and bytes, plus the drop
/// and aggregation counters specific to this driver. All counters are
/// maintained in software while completions are processed.
#[derive(Default, Copy, Clone)]
pub struct DeviceStats {
    /// Number of received packets.
    pub rx_pkts: u64,
    /// Number of transmitted packets.
    pub tx_pkts: u64,
    /// Number of received bytes.
    pub rx_bytes: u64,
    /// Number of transmitted bytes.
    pub tx_bytes: u64,
    /// Number of received frames dropped (errors or buffer shortage).
    pub rx_dropped: u64,
    /// Number of transmit requests dropped.
    pub tx_dropped: u64,
    /// Number of aggregated frames delivered by TPA.
    pub tpa_frames: u64,
    /// Number of slowpath protocol violations observed.
    pub slowpath_violations: u64,
}

impl core::fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "rx_pkts: {}, tx_pkts: {}, rx_bytes: {}, tx_bytes: {}, rx_dropped: {}, tx_dropped: {}, tpa_frames: {}, slowpath_violations: {}",
            self.rx_pkts,
            self.tx_pkts,
            self.rx_bytes,
            self.tx_bytes,
            self.rx_dropped,
            self.tx_dropped,
            self.tpa_frames,
            self.slowpath_violations
        )
    }
}
