//! Descriptor and wire-record layouts for the BCM57710/57711 fast path.
//!
//! Everything the chip reads or writes through DMA is defined here: the RX
//! buffer and SGE descriptors, the 64-byte RX completion entry (one cell,
//! four hardware views), the TX descriptor family, the slowpath command
//! element and the status blocks. All multi-byte fields are little-endian,
//! which matches the host byte order on every supported target.
//!
//! Each record exposes its raw fields as [`Volatile`] values plus accessor
//! methods for the packed ones, so both the driver and the test harness can
//! read and write entries exactly the way the hardware does.

use bit_field::BitField;
use num_enum::FromPrimitive;
use volatile::Volatile;

/// An entry type that can live in a paged descriptor chain.
///
/// The trailing [`RingEntry::RESERVED_SLOTS`] entries of every ring page are
/// never handed to the data path; the first of them carries the next-page
/// pointer record written through [`RingEntry::write_link`].
pub trait RingEntry {
    /// Trailing entries of each page reserved for the next-page pointer.
    const RESERVED_SLOTS: u16;

    /// Writes the next-page pointer record into this entry.
    fn write_link(&mut self, next_page: u64);
}

/// RX buffer descriptor: one DMA address the chip fills with frame data.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct RxBufferDescriptor {
    /// Low 32 bits of the buffer's physical address.
    pub addr_lo: Volatile<u32>,
    /// High 32 bits of the buffer's physical address.
    pub addr_hi: Volatile<u32>,
}

impl RxBufferDescriptor {
    /// Points this descriptor at a buffer.
    pub fn set_address(&mut self, addr: u64) {
        self.addr_lo.write(addr as u32);
        self.addr_hi.write((addr >> 32) as u32);
    }

    /// Returns the buffer address held by this descriptor.
    pub fn address(&self) -> u64 {
        (self.addr_lo.read() as u64) | ((self.addr_hi.read() as u64) << 32)
    }
}

impl RingEntry for RxBufferDescriptor {
    const RESERVED_SLOTS: u16 = 2;

    fn write_link(&mut self, next_page: u64) {
        self.set_address(next_page);
    }
}

/// Scatter-gather element descriptor: a spill buffer for aggregated frames.
///
/// Same wire shape as [`RxBufferDescriptor`], but posted on the separate SGE
/// ring and consumed out of order through the completion scatter lists.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct SgeDescriptor {
    /// Low 32 bits of the buffer's physical address.
    pub addr_lo: Volatile<u32>,
    /// High 32 bits of the buffer's physical address.
    pub addr_hi: Volatile<u32>,
}

impl SgeDescriptor {
    /// Points this element at a buffer.
    pub fn set_address(&mut self, addr: u64) {
        self.addr_lo.write(addr as u32);
        self.addr_hi.write((addr >> 32) as u32);
    }

    /// Returns the buffer address held by this element.
    pub fn address(&self) -> u64 {
        (self.addr_lo.read() as u64) | ((self.addr_hi.read() as u64) << 32)
    }
}

impl RingEntry for SgeDescriptor {
    const RESERVED_SLOTS: u16 = 2;

    fn write_link(&mut self, next_page: u64) {
        self.set_address(next_page);
    }
}

/// The two type bits of a completion entry.
pub const CQE_TYPE_MASK: u8 = 0x3;
/// PHY decode error reported with the frame.
pub const CQE_PHY_DECODE_ERROR: u8 = 1 << 3;
/// The IP checksum of the frame was wrong.
pub const CQE_IP_CSUM_ERROR: u8 = 1 << 4;
/// The TCP/UDP checksum of the frame was wrong.
pub const CQE_L4_CSUM_ERROR: u8 = 1 << 5;
/// Error indication of a slowpath completion (same bit position, ramrod view).
pub const CQE_RAMROD_ERROR: u8 = 1 << 2;

/// The RSS hash field of the completion is valid.
pub const CQE_RSS_HASH_VALID: u8 = 1 << 3;
/// The frame was received as broadcast.
pub const CQE_BROADCAST: u8 = 1 << 4;
/// The destination MAC matched the station address.
pub const CQE_MAC_MATCH: u8 = 1 << 5;
/// The chip skipped IP checksum validation for this frame.
pub const CQE_IP_CSUM_NO_VALIDATION: u8 = 1 << 6;
/// The chip skipped TCP/UDP checksum validation for this frame.
pub const CQE_L4_CSUM_NO_VALIDATION: u8 = 1 << 7;

/// Parsing flag: a VLAN tag was stripped from the frame.
pub const PARSING_FLAGS_VLAN: u16 = 1 << 1;
/// Parsing flag: an inner (QinQ) VLAN tag was present.
pub const PARSING_FLAGS_EXTRA_VLAN: u16 = 1 << 2;
/// Parsing flag field: layer-3 protocol above Ethernet (0 unknown, 1 IPv4, 2 IPv6).
pub const PARSING_FLAGS_OVER_ETH_MASK: u16 = 0x3 << 3;
/// Parsing flag field: layer-4 protocol above IP (0 unknown, 1 TCP, 2 UDP).
pub const PARSING_FLAGS_OVER_IP_MASK: u16 = 0x3 << 7;

/// Scatter-list entries carried by one completion.
pub const CQE_SGL_ENTRIES: usize = 8;

/// The role of a receive completion entry.
///
/// Decoded from the two type bits every view of the completion shares.
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompletionType {
    /// A single-buffer frame completion.
    #[num_enum(default)]
    Frame = 0,
    /// A slowpath command completion.
    Ramrod = 1,
    /// An aggregation opened on one of the per-queue contexts.
    StartAggregation = 2,
    /// An aggregation closed; the scatter list is valid.
    StopAggregation = 3,
}

/// Hardware checksum verdict delivered with a receive completion.
///
/// The driver never recomputes checksums; it only translates what the chip
/// already decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    /// Both IP and L4 checksums were validated good.
    Validated,
    /// The IP header checksum was wrong.
    BadIp,
    /// The TCP/UDP checksum was wrong.
    BadL4,
    /// The chip did not validate this frame (unsupported protocol).
    Unknown,
}

/// One 64-byte RX completion entry.
///
/// The chip writes four different record shapes into the same cell: frame,
/// slowpath, aggregation-start and aggregation-stop completions all share it,
/// and the ring's next-page record overlays its first two words. The fields
/// below use the frame view's names; the other views are reached through the
/// `ramrod_*` and aggregation accessors, which read the same bytes under
/// their alternate meaning.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct RxCompletion {
    /// Completion type bits and error flags.
    pub type_error_flags: Volatile<u8>,
    /// Status flags (RSS, match and checksum-validation bits). The ramrod
    /// view carries the connection type in this byte.
    pub status_flags: Volatile<u8>,
    /// Aggregation context index for TPA completions.
    pub queue_index: Volatile<u8>,
    /// Bytes of padding the chip placed before the frame data.
    pub placement_offset: Volatile<u8>,
    /// RSS hash of the frame. The ramrod view carries the packed connection
    /// and command word here.
    pub rss_hash: Volatile<u32>,
    /// Stripped VLAN tag. The aggregation-stop view carries the coalesced
    /// segment count here.
    pub vlan_tag: Volatile<u16>,
    /// Total frame length in bytes.
    pub pkt_len: Volatile<u16>,
    /// Bytes placed into the head buffer.
    pub len_on_bd: Volatile<u16>,
    /// Protocol parsing flags.
    pub parsing_flags: Volatile<u16>,
    /// Scatter list of SGE ring indices holding the frame's spill buffers.
    /// The ramrod view carries its echo word in the first two entries.
    pub sgl: [Volatile<u16>; 8],
    /// Padding up to the 64-byte cell size.
    pub reserved: [Volatile<u32>; 8],
}

impl RxCompletion {
    /// Returns an all-zero completion entry.
    pub fn zeroed() -> Self {
        RxCompletion {
            type_error_flags: Volatile::new(0),
            status_flags: Volatile::new(0),
            queue_index: Volatile::new(0),
            placement_offset: Volatile::new(0),
            rss_hash: Volatile::new(0),
            vlan_tag: Volatile::new(0),
            pkt_len: Volatile::new(0),
            len_on_bd: Volatile::new(0),
            parsing_flags: Volatile::new(0),
            sgl: [Volatile::new(0); 8],
            reserved: [Volatile::new(0); 8],
        }
    }

    /// Decodes the two type bits shared by every view.
    pub fn completion_type(&self) -> CompletionType {
        CompletionType::from(self.type_error_flags.read() & CQE_TYPE_MASK)
    }

    /// Sets the type bits, preserving the remaining flags.
    pub fn set_completion_type(&mut self, kind: CompletionType) {
        let flags = self.type_error_flags.read() & !CQE_TYPE_MASK;
        self.type_error_flags.write(flags | kind as u8);
    }

    /// Whether the PHY reported a decode error for this frame.
    pub fn phy_decode_error(&self) -> bool {
        self.type_error_flags.read() & CQE_PHY_DECODE_ERROR != 0
    }

    /// Translates the checksum flag bits into a verdict.
    pub fn checksum_status(&self) -> ChecksumStatus {
        let errors = self.type_error_flags.read();
        let status = self.status_flags.read();
        if status & (CQE_IP_CSUM_NO_VALIDATION | CQE_L4_CSUM_NO_VALIDATION) != 0 {
            ChecksumStatus::Unknown
        } else if errors & CQE_IP_CSUM_ERROR != 0 {
            ChecksumStatus::BadIp
        } else if errors & CQE_L4_CSUM_ERROR != 0 {
            ChecksumStatus::BadL4
        } else {
            ChecksumStatus::Validated
        }
    }

    /// Returns the stripped VLAN tag, if the parser saw one.
    pub fn vlan(&self) -> Option<u16> {
        if self.parsing_flags.read() & PARSING_FLAGS_VLAN != 0 {
            Some(self.vlan_tag.read())
        } else {
            None
        }
    }

    /// Returns the RSS hash, if the chip computed one.
    pub fn rss(&self) -> Option<u32> {
        if self.status_flags.read() & CQE_RSS_HASH_VALID != 0 {
            Some(self.rss_hash.read())
        } else {
            None
        }
    }

    /// Scatter-list entry `i` as a raw SGE ring index.
    pub fn sgl_entry(&self, i: usize) -> u16 {
        self.sgl[i].read()
    }

    /// Connection id of a slowpath completion (ramrod view).
    pub fn ramrod_cid(&self) -> u32 {
        self.rss_hash.read().get_bits(0..24)
    }

    /// Command id of a slowpath completion (ramrod view).
    pub fn ramrod_cmd(&self) -> u8 {
        self.rss_hash.read().get_bits(24..32) as u8
    }

    /// Connection type of a slowpath completion (ramrod view).
    pub fn ramrod_conn_type(&self) -> u8 {
        self.status_flags.read()
    }

    /// Whether the firmware flagged the slowpath command as failed.
    pub fn ramrod_error(&self) -> bool {
        self.type_error_flags.read() & CQE_RAMROD_ERROR != 0
    }

    /// The 64-bit payload echoed back with a slowpath completion.
    pub fn ramrod_data(&self) -> u64 {
        let lo = (self.vlan_tag.read() as u32) | ((self.pkt_len.read() as u32) << 16);
        let hi = (self.len_on_bd.read() as u32) | ((self.parsing_flags.read() as u32) << 16);
        (lo as u64) | ((hi as u64) << 32)
    }

    /// Encodes a slowpath completion into this cell.
    pub fn set_ramrod(&mut self, conn_type: u8, cid: u32, cmd: u8) {
        self.type_error_flags.write(CompletionType::Ramrod as u8);
        self.status_flags.write(conn_type);
        let mut word = 0u32;
        word.set_bits(0..24, cid & 0xFF_FFFF);
        word.set_bits(24..32, cmd as u32);
        self.rss_hash.write(word);
    }

    /// Segments coalesced into the aggregation (aggregation-stop view).
    pub fn coalesced_segments(&self) -> u16 {
        self.vlan_tag.read()
    }
}

impl RingEntry for RxCompletion {
    const RESERVED_SLOTS: u16 = 1;

    // The next-page record overlays the first two words of the cell.
    fn write_link(&mut self, next_page: u64) {
        let lo = next_page as u32;
        self.type_error_flags.write(lo as u8);
        self.status_flags.write((lo >> 8) as u8);
        self.queue_index.write((lo >> 16) as u8);
        self.placement_offset.write((lo >> 24) as u8);
        self.rss_hash.write((next_page >> 32) as u32);
    }
}

/// TX flag: offload the IP header checksum.
pub const TX_BD_FLAGS_IP_CSUM: u8 = 1 << 0;
/// TX flag: offload the L4 checksum.
pub const TX_BD_FLAGS_L4_CSUM: u8 = 1 << 1;
/// TX flag: insert the VLAN tag carried in the start descriptor.
pub const TX_BD_FLAGS_VLAN_TAG: u8 = 1 << 2;
/// TX flag: first descriptor of a packet.
pub const TX_BD_FLAGS_START_BD: u8 = 1 << 4;
/// TX flag: the L4 protocol is UDP rather than TCP.
pub const TX_BD_FLAGS_IS_UDP: u8 = 1 << 5;
/// TX flag: segment this packet in hardware.
pub const TX_BD_FLAGS_SW_LSO: u8 = 1 << 6;
/// TX flag: the network protocol is IPv6.
pub const TX_BD_FLAGS_IPV6: u8 = 1 << 7;

/// Field in the start descriptor's general data: descriptors holding headers.
pub const TX_GENERAL_DATA_HDR_NBDS_MASK: u8 = 0xF;

/// First descriptor of every transmitted packet.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct TxStartBd {
    /// Low 32 bits of the head buffer's physical address.
    pub addr_lo: Volatile<u32>,
    /// High 32 bits of the head buffer's physical address.
    pub addr_hi: Volatile<u32>,
    /// Total descriptors the packet occupies, including this one.
    pub nbd: Volatile<u16>,
    /// Bytes carried by the head buffer.
    pub nbytes: Volatile<u16>,
    /// VLAN tag to insert, or the frame's ethertype.
    pub vlan_or_ethertype: Volatile<u16>,
    /// Per-packet flag bits (`TX_BD_FLAGS_*`).
    pub bd_flags: Volatile<u8>,
    /// Header descriptor count and addressing mode bits.
    pub general_data: Volatile<u8>,
}

impl TxStartBd {
    /// Points this descriptor at the packet's head buffer.
    pub fn set_address(&mut self, addr: u64) {
        self.addr_lo.write(addr as u32);
        self.addr_hi.write((addr >> 32) as u32);
    }

    /// Returns the head buffer address.
    pub fn address(&self) -> u64 {
        (self.addr_lo.read() as u64) | ((self.addr_hi.read() as u64) << 32)
    }
}

/// Continuation descriptor carrying one extra fragment of a packet.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct TxDataBd {
    /// Low 32 bits of the fragment's physical address.
    pub addr_lo: Volatile<u32>,
    /// High 32 bits of the fragment's physical address.
    pub addr_hi: Volatile<u32>,
    /// Total packet length in bytes, repeated on every descriptor.
    pub total_pkt_bytes: Volatile<u16>,
    /// Bytes carried by this fragment.
    pub nbytes: Volatile<u16>,
    /// Unused tail of the 16-byte cell.
    pub reserved: [Volatile<u8>; 4],
}

impl TxDataBd {
    /// Points this descriptor at a fragment buffer.
    pub fn set_address(&mut self, addr: u64) {
        self.addr_lo.write(addr as u32);
        self.addr_hi.write((addr >> 32) as u32);
    }
}

/// Parse-descriptor field: start of the IP header in 16-bit words.
pub const TX_PARSE_IP_HDR_START_OFFSET_MASK: u16 = 0xF;
/// Parse-descriptor flag: compute the TCP pseudo checksum without the length.
pub const TX_PARSE_PSEUDO_CS_WITHOUT_LEN: u16 = 1 << 6;

/// Second descriptor of every packet: protocol geometry for the offload engines.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct TxParseBd {
    /// IP header offset and global parse flags.
    pub global_data: Volatile<u16>,
    /// TCP flag byte, copied into every generated segment header.
    pub tcp_flags: Volatile<u8>,
    /// IP header length in 16-bit words.
    pub ip_hlen_w: Volatile<u8>,
    /// Total header length in 16-bit words.
    pub total_hlen_w: Volatile<u16>,
    /// TCP pseudo-header checksum seed.
    pub tcp_pseudo_csum: Volatile<u16>,
    /// Segment size for hardware segmentation.
    pub lso_mss: Volatile<u16>,
    /// IP identification seed for generated segments.
    pub ip_id: Volatile<u16>,
    /// TCP sequence number of the first generated segment.
    pub tcp_send_seq: Volatile<u32>,
}

impl TxParseBd {
    /// Clears every field; a zeroed parse descriptor requests no offload.
    pub fn clear(&mut self) {
        self.global_data.write(0);
        self.tcp_flags.write(0);
        self.ip_hlen_w.write(0);
        self.total_hlen_w.write(0);
        self.tcp_pseudo_csum.write(0);
        self.lso_mss.write(0);
        self.ip_id.write(0);
        self.tcp_send_seq.write(0);
    }
}

/// Next-page pointer record of the TX chain.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct TxNextBd {
    /// Low 32 bits of the next page's physical address.
    pub addr_lo: Volatile<u32>,
    /// High 32 bits of the next page's physical address.
    pub addr_hi: Volatile<u32>,
    /// Unused tail of the 16-byte cell.
    pub reserved: [Volatile<u8>; 8],
}

/// One 16-byte TX chain cell.
///
/// Every slot of the TX ring is one of four record shapes depending on its
/// position in a packet; the encoder picks the view as it walks the chain.
/// All views are exactly 16 bytes and every bit pattern is valid for each,
/// so the view accessors are safe to use on any cell.
#[repr(C)]
#[derive(Clone, Copy)]
pub union TxBd {
    /// First descriptor of a packet.
    pub start: TxStartBd,
    /// Fragment continuation descriptor.
    pub data: TxDataBd,
    /// Protocol geometry descriptor.
    pub parse: TxParseBd,
    /// Next-page pointer record.
    pub next: TxNextBd,
}

impl TxBd {
    /// Views this cell as a start descriptor.
    pub fn as_start_mut(&mut self) -> &mut TxStartBd {
        unsafe { &mut self.start }
    }

    /// Views this cell as a fragment descriptor.
    pub fn as_data_mut(&mut self) -> &mut TxDataBd {
        unsafe { &mut self.data }
    }

    /// Views this cell as a parse descriptor.
    pub fn as_parse_mut(&mut self) -> &mut TxParseBd {
        unsafe { &mut self.parse }
    }

    /// Reads this cell as a start descriptor.
    pub fn as_start(&self) -> &TxStartBd {
        unsafe { &self.start }
    }
}

impl RingEntry for TxBd {
    const RESERVED_SLOTS: u16 = 1;

    fn write_link(&mut self, next_page: u64) {
        let next = unsafe { &mut self.next };
        next.addr_lo.write(next_page as u32);
        next.addr_hi.write((next_page >> 32) as u32);
    }
}

/// Slowpath connection type for regular Ethernet queue commands.
pub const ETH_CONNECTION_TYPE: u8 = 0;
/// Slowpath connection type for function-wide commands.
pub const NONE_CONNECTION_TYPE: u8 = 8;

/// One slowpath command element.
///
/// Sixteen bytes: a packed connection/command header followed by eight bytes
/// of command payload. The firmware consumes elements in order and answers
/// each with a ramrod completion on the RX completion queue.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct SlowpathElement {
    /// Connection id (24 bits) and command id (8 bits).
    pub conn_and_cmd_data: Volatile<u32>,
    /// Connection type (low byte) and originating function (high byte).
    pub spe_type: Volatile<u16>,
    /// Reserved header tail.
    pub reserved: Volatile<u16>,
    /// Low half of the command payload.
    pub data_lo: Volatile<u32>,
    /// High half of the command payload.
    pub data_hi: Volatile<u32>,
}

impl SlowpathElement {
    /// Fills in a complete command element.
    pub fn prepare(&mut self, cid: u32, cmd: u8, conn_type: u8, function: u8, data: u64) {
        let mut word = 0u32;
        word.set_bits(0..24, cid & 0xFF_FFFF);
        word.set_bits(24..32, cmd as u32);
        self.conn_and_cmd_data.write(word);
        self.spe_type
            .write((conn_type as u16) | ((function as u16) << 8));
        self.reserved.write(0);
        self.data_lo.write(data as u32);
        self.data_hi.write((data >> 32) as u32);
    }

    /// Connection id this element targets.
    pub fn cid(&self) -> u32 {
        self.conn_and_cmd_data.read().get_bits(0..24)
    }

    /// Command id this element carries.
    pub fn cmd_id(&self) -> u8 {
        self.conn_and_cmd_data.read().get_bits(24..32) as u8
    }

    /// Command payload.
    pub fn data(&self) -> u64 {
        (self.data_lo.read() as u64) | ((self.data_hi.read() as u64) << 32)
    }
}

impl RingEntry for SlowpathElement {
    const RESERVED_SLOTS: u16 = 0;

    fn write_link(&mut self, _next_page: u64) {}
}

/// Per-queue status block, written by the chip and read by the driver.
///
/// Carries the hardware-side consumer indices of the queue pair plus one
/// running index per state machine, used to acknowledge the block.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct FastPathStatusBlock {
    /// Hardware consumer indices (`HC_INDEX_*` selects the meaning).
    pub index_values: [Volatile<u16>; 8],
    /// Running index per state machine (RX, TX).
    pub running_index: [Volatile<u16>; 2],
    /// Padding up to the 64-byte block size.
    pub reserved: [Volatile<u32>; 11],
}

impl FastPathStatusBlock {
    /// Returns an all-zero status block.
    pub fn zeroed() -> Self {
        FastPathStatusBlock {
            index_values: [Volatile::new(0); 8],
            running_index: [Volatile::new(0); 2],
            reserved: [Volatile::new(0); 11],
        }
    }

    /// The RX completion-queue consumer published by the chip.
    pub fn rx_cq_cons(&self) -> u16 {
        self.index_values[crate::constants::HC_INDEX_ETH_RX_CQ_CONS].read()
    }

    /// The RX buffer-descriptor consumer published by the chip.
    pub fn rx_bd_cons(&self) -> u16 {
        self.index_values[crate::constants::HC_INDEX_ETH_RX_BD_CONS].read()
    }

    /// The TX packet consumer published by the chip.
    pub fn tx_cq_cons(&self) -> u16 {
        self.index_values[crate::constants::HC_INDEX_ETH_TX_CQ_CONS].read()
    }

    /// The running index of one state machine.
    pub fn running(&self, sm: usize) -> u16 {
        self.running_index[sm].read()
    }
}

/// The default status block: attention bits plus slowpath indices.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DefaultStatusBlock {
    /// Latched attention bits.
    pub attn_bits: Volatile<u32>,
    /// Acknowledged attention bits.
    pub attn_bits_ack: Volatile<u32>,
    /// Identifier of this status block.
    pub status_block_id: Volatile<u8>,
    /// Reserved byte.
    pub reserved0: Volatile<u8>,
    /// Attention running index.
    pub attn_bits_index: Volatile<u16>,
    /// Reserved word.
    pub reserved1: Volatile<u32>,
    /// Hardware consumer indices of the control sub-channels.
    pub index_values: [Volatile<u16>; 16],
    /// Slowpath running index.
    pub running_index: Volatile<u16>,
    /// Reserved tail.
    pub reserved2: Volatile<u16>,
    /// Reserved tail.
    pub reserved3: Volatile<u32>,
}

impl DefaultStatusBlock {
    /// Returns an all-zero status block.
    pub fn zeroed() -> Self {
        DefaultStatusBlock {
            attn_bits: Volatile::new(0),
            attn_bits_ack: Volatile::new(0),
            status_block_id: Volatile::new(0),
            reserved0: Volatile::new(0),
            attn_bits_index: Volatile::new(0),
            reserved1: Volatile::new(0),
            index_values: [Volatile::new(0); 16],
            running_index: Volatile::new(0),
            reserved2: Volatile::new(0),
            reserved3: Volatile::new(0),
        }
    }

    /// The slowpath consumer published by the chip.
    pub fn sp_index(&self) -> u16 {
        self.index_values[crate::constants::HC_SP_INDEX_ETH_DEF_CONS].read()
    }

    /// Attention bits that changed since the last acknowledgement.
    pub fn attention_pending(&self) -> u32 {
        self.attn_bits.read() ^ self.attn_bits_ack.read()
    }
}

/// Doorbell header bit: this is a normal-priority database doorbell.
pub const DOORBELL_HDR_DB_TYPE: u8 = 1 << 1;

/// Packs a TX producer update for a connection's doorbell cell.
pub fn tx_doorbell_value(bd_prod: u16) -> u32 {
    (DOORBELL_HDR_DB_TYPE as u32) | ((bd_prod as u32) << 16)
}

/// Packs a status block acknowledgement for the interrupt controller.
///
/// The low half carries the last-seen running index; the high half selects
/// the status block, the storm whose index is being acknowledged, whether
/// the index value should be latched, and the new interrupt mask state.
pub fn igu_ack_value(sb_id: u8, storm_id: u8, index: u16, int_mode: u8, update: bool) -> u32 {
    let mut flags = 0u16;
    flags.set_bits(0..5, sb_id as u16);
    flags.set_bits(5..8, storm_id as u16);
    flags.set_bit(8, update);
    flags.set_bits(9..11, int_mode as u16);
    (index as u32) | ((flags as u32) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{IGU_INT_DISABLE, IGU_INT_ENABLE, USTORM_ID};
    use core::mem::size_of;

    #[test]
    fn test_record_sizes() {
        assert_eq!(size_of::<RxBufferDescriptor>(), 8);
        assert_eq!(size_of::<SgeDescriptor>(), 8);
        assert_eq!(size_of::<RxCompletion>(), 64);
        assert_eq!(size_of::<TxStartBd>(), 16);
        assert_eq!(size_of::<TxDataBd>(), 16);
        assert_eq!(size_of::<TxParseBd>(), 16);
        assert_eq!(size_of::<TxNextBd>(), 16);
        assert_eq!(size_of::<TxBd>(), 16);
        assert_eq!(size_of::<SlowpathElement>(), 16);
        assert_eq!(size_of::<FastPathStatusBlock>(), 64);
        assert_eq!(size_of::<DefaultStatusBlock>(), 56);
    }

    #[test]
    fn test_rx_descriptor_address_split() {
        let mut desc = RxBufferDescriptor {
            addr_lo: Volatile::new(0),
            addr_hi: Volatile::new(0),
        };
        desc.set_address(0x0000_0012_DEAD_B000);
        assert_eq!(desc.addr_lo.read(), 0xDEAD_B000);
        assert_eq!(desc.addr_hi.read(), 0x12);
        assert_eq!(desc.address(), 0x0000_0012_DEAD_B000);
    }

    #[test]
    fn test_completion_type_decoding() {
        let mut cqe = RxCompletion::zeroed();
        assert_eq!(cqe.completion_type(), CompletionType::Frame);

        cqe.set_completion_type(CompletionType::StartAggregation);
        assert_eq!(cqe.completion_type(), CompletionType::StartAggregation);

        // Type decode must ignore the error flag bits above the type field.
        cqe.type_error_flags
            .write(CompletionType::StopAggregation as u8 | CQE_IP_CSUM_ERROR);
        assert_eq!(cqe.completion_type(), CompletionType::StopAggregation);
    }

    #[test]
    fn test_checksum_verdicts() {
        let mut cqe = RxCompletion::zeroed();
        assert_eq!(cqe.checksum_status(), ChecksumStatus::Validated);

        cqe.type_error_flags.write(CQE_IP_CSUM_ERROR);
        assert_eq!(cqe.checksum_status(), ChecksumStatus::BadIp);

        cqe.type_error_flags.write(CQE_L4_CSUM_ERROR);
        assert_eq!(cqe.checksum_status(), ChecksumStatus::BadL4);

        // No-validation wins over the error bits.
        cqe.status_flags.write(CQE_L4_CSUM_NO_VALIDATION);
        assert_eq!(cqe.checksum_status(), ChecksumStatus::Unknown);
    }

    #[test]
    fn test_vlan_requires_parsing_flag() {
        let mut cqe = RxCompletion::zeroed();
        cqe.vlan_tag.write(0x0123);
        assert_eq!(cqe.vlan(), None);

        cqe.parsing_flags.write(PARSING_FLAGS_VLAN);
        assert_eq!(cqe.vlan(), Some(0x0123));
    }

    #[test]
    fn test_ramrod_view_overlays_frame_fields() {
        let mut cqe = RxCompletion::zeroed();
        cqe.set_ramrod(NONE_CONNECTION_TYPE, 0x00_0017, 4);

        assert_eq!(cqe.completion_type(), CompletionType::Ramrod);
        assert_eq!(cqe.ramrod_conn_type(), NONE_CONNECTION_TYPE);
        assert_eq!(cqe.ramrod_cid(), 0x17);
        assert_eq!(cqe.ramrod_cmd(), 4);
        assert!(!cqe.ramrod_error());

        // The packed word lives in the frame view's hash field.
        assert_eq!(cqe.rss_hash.read(), (4 << 24) | 0x17);
    }

    #[test]
    fn test_ramrod_data_spans_frame_length_fields() {
        let mut cqe = RxCompletion::zeroed();
        cqe.vlan_tag.write(0x2211);
        cqe.pkt_len.write(0x4433);
        cqe.len_on_bd.write(0x6655);
        cqe.parsing_flags.write(0x8877);
        assert_eq!(cqe.ramrod_data(), 0x8877_6655_4433_2211);
    }

    #[test]
    fn test_completion_link_record_overlay() {
        let mut cqe = RxCompletion::zeroed();
        cqe.write_link(0x0000_0042_ABCD_E000);
        assert_eq!(cqe.type_error_flags.read(), 0x00);
        assert_eq!(cqe.status_flags.read(), 0xE0);
        assert_eq!(cqe.queue_index.read(), 0xCD);
        assert_eq!(cqe.placement_offset.read(), 0xAB);
        assert_eq!(cqe.rss_hash.read(), 0x42);
    }

    #[test]
    fn test_tx_views_share_the_cell() {
        let mut bd = TxBd {
            next: TxNextBd {
                addr_lo: Volatile::new(0),
                addr_hi: Volatile::new(0),
                reserved: [Volatile::new(0); 8],
            },
        };

        let start = bd.as_start_mut();
        start.set_address(0x1_0000_2000);
        start.nbd.write(3);
        start.nbytes.write(1514);
        start.bd_flags.write(TX_BD_FLAGS_START_BD | TX_BD_FLAGS_L4_CSUM);

        assert_eq!(bd.as_start().address(), 0x1_0000_2000);
        assert_eq!(bd.as_start().nbd.read(), 3);
        assert_eq!(
            bd.as_start().bd_flags.read(),
            TX_BD_FLAGS_START_BD | TX_BD_FLAGS_L4_CSUM
        );
    }

    #[test]
    fn test_slowpath_element_packing() {
        let mut spe = SlowpathElement {
            conn_and_cmd_data: Volatile::new(0),
            spe_type: Volatile::new(0),
            reserved: Volatile::new(0xFFFF),
            data_lo: Volatile::new(0),
            data_hi: Volatile::new(0),
        };
        spe.prepare(5, 1, ETH_CONNECTION_TYPE, 2, 0xAABB_CCDD_1122_3344);

        assert_eq!(spe.cid(), 5);
        assert_eq!(spe.cmd_id(), 1);
        assert_eq!(spe.spe_type.read(), (2 << 8) | ETH_CONNECTION_TYPE as u16);
        assert_eq!(spe.reserved.read(), 0);
        assert_eq!(spe.data(), 0xAABB_CCDD_1122_3344);
    }

    #[test]
    fn test_igu_ack_packing() {
        let value = igu_ack_value(3, USTORM_ID, 0x1234, IGU_INT_ENABLE, true);
        assert_eq!(value & 0xFFFF, 0x1234);
        let flags = (value >> 16) as u16;
        assert_eq!(flags & 0x1F, 3);
        assert_eq!((flags >> 5) & 0x7, USTORM_ID as u16);
        assert_eq!((flags >> 8) & 0x1, 1);
        assert_eq!((flags >> 9) & 0x3, IGU_INT_ENABLE as u16);

        let masked = igu_ack_value(16, USTORM_ID, 0, IGU_INT_DISABLE, false);
        let flags = (masked >> 16) as u16;
        assert_eq!(flags & 0x1F, 16);
        assert_eq!((flags >> 8) & 0x1, 0);
        assert_eq!((flags >> 9) & 0x3, IGU_INT_DISABLE as u16);
    }

    #[test]
    fn test_tx_doorbell_packing() {
        let value = tx_doorbell_value(0xBEEF);
        assert_eq!(value >> 16, 0xBEEF);
        assert_eq!(value as u8, DOORBELL_HDR_DB_TYPE);
    }
}
