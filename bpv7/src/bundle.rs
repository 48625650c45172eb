/*!
The `Bundle` structure: primary-block fields, state unpacked from
known extension blocks, the received and API-injected block lists, and
the per-link transmission lists built for sending.
*/

use super::*;
use drift_codec::{decode, encode};
use std::collections::HashMap;

/// Bundle processing control flags.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BundleFlags {
    /// This bundle is a fragment of a larger bundle.
    pub is_fragment: bool,
    /// The payload is an administrative record.
    pub is_admin_record: bool,
    /// The bundle must not be fragmented.
    pub do_not_fragment: bool,
    /// The destination application is asked to acknowledge.
    pub app_ack_requested: bool,
    /// Status reports should carry the time of the reported event.
    pub report_status_time: bool,
    /// Report on reception.
    pub receipt_report_requested: bool,
    /// Report on forwarding.
    pub forward_report_requested: bool,
    /// Report on delivery.
    pub delivery_report_requested: bool,
    /// Report on deletion.
    pub delete_report_requested: bool,
    /// Any unrecognised flag bits, preserved for re-emission.
    pub unrecognised: Option<u64>,
}

impl BundleFlags {
    /// True if any status report is requested.
    pub fn any_report_requested(&self) -> bool {
        self.receipt_report_requested
            || self.forward_report_requested
            || self.delivery_report_requested
            || self.delete_report_requested
    }
}

impl From<u64> for BundleFlags {
    fn from(value: u64) -> Self {
        let mut flags = Self::default();
        let mut unrecognised = value;

        if (value & (1 << 0)) != 0 {
            flags.is_fragment = true;
            unrecognised &= !(1 << 0);
        }
        if (value & (1 << 1)) != 0 {
            flags.is_admin_record = true;
            unrecognised &= !(1 << 1);
        }
        if (value & (1 << 2)) != 0 {
            flags.do_not_fragment = true;
            unrecognised &= !(1 << 2);
        }
        if (value & (1 << 5)) != 0 {
            flags.app_ack_requested = true;
            unrecognised &= !(1 << 5);
        }
        if (value & (1 << 6)) != 0 {
            flags.report_status_time = true;
            unrecognised &= !(1 << 6);
        }
        if (value & (1 << 14)) != 0 {
            flags.receipt_report_requested = true;
            unrecognised &= !(1 << 14);
        }
        if (value & (1 << 16)) != 0 {
            flags.forward_report_requested = true;
            unrecognised &= !(1 << 16);
        }
        if (value & (1 << 17)) != 0 {
            flags.delivery_report_requested = true;
            unrecognised &= !(1 << 17);
        }
        if (value & (1 << 18)) != 0 {
            flags.delete_report_requested = true;
            unrecognised &= !(1 << 18);
        }

        if unrecognised != 0 {
            flags.unrecognised = Some(unrecognised);
        }
        flags
    }
}

impl From<&BundleFlags> for u64 {
    fn from(value: &BundleFlags) -> Self {
        let mut flags = value.unrecognised.unwrap_or(0);
        if value.is_fragment {
            flags |= 1 << 0;
        }
        if value.is_admin_record {
            flags |= 1 << 1;
        }
        if value.do_not_fragment {
            flags |= 1 << 2;
        }
        if value.app_ack_requested {
            flags |= 1 << 5;
        }
        if value.report_status_time {
            flags |= 1 << 6;
        }
        if value.receipt_report_requested {
            flags |= 1 << 14;
        }
        if value.forward_report_requested {
            flags |= 1 << 16;
        }
        if value.delivery_report_requested {
            flags |= 1 << 17;
        }
        if value.delete_report_requested {
            flags |= 1 << 18;
        }
        flags
    }
}

impl encode::ToCbor for BundleFlags {
    fn to_cbor(&self, encoder: &mut encode::Encoder) {
        encoder.emit_uint(u64::from(self))
    }
}

impl decode::FromCbor for BundleFlags {
    type Error = decode::Error;

    fn from_cbor(reader: &mut decode::Reader) -> Result<Self, Self::Error> {
        reader.read_uint().map(Into::into)
    }
}

/// Fragmentation metadata from the primary block.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FragmentInfo {
    /// Offset of this fragment's payload within the original payload.
    pub offset: u64,
    /// Total length of the original application data unit.
    pub total_adu_length: u64,
}

/// Hop-count block state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HopInfo {
    pub limit: u64,
    pub count: u64,
}

impl HopInfo {
    pub fn exceeded(&self) -> bool {
        self.count > self.limit
    }
}

/// Multicast routing state accumulated from IMC extension blocks.
#[derive(Debug, Default, Clone)]
pub struct ImcState {
    /// Destination node numbers from the IMC destinations block.
    pub dest_nodes: Vec<u64>,
    /// Regions whose routers have already expanded this bundle.
    pub processed_regions: Vec<u64>,
    /// Nodes that have already handled this bundle.
    pub processed_by_nodes: Vec<u64>,
    pub sync_request: bool,
    pub sync_reply: bool,
    pub is_proxy_petition: bool,
    pub is_router_node: bool,
    /// Set when the outgoing bundle is an administrative briefing.
    pub is_briefing: bool,
}

impl ImcState {
    /// Records a region as processed, keeping the set deduplicated.
    pub fn add_processed_region(&mut self, region: u64) {
        if !self.processed_regions.contains(&region) {
            self.processed_regions.push(region);
        }
    }

    /// Records a node as processed, keeping the set deduplicated.
    pub fn add_processed_by_node(&mut self, node: u64) {
        if !self.processed_by_nodes.contains(&node) {
            self.processed_by_nodes.push(node);
        }
    }

    pub fn add_dest_node(&mut self, node: u64) {
        if !self.dest_nodes.contains(&node) {
            self.dest_nodes.push(node);
        }
    }
}

/// A block injected through the application interface, carried
/// verbatim into every transmission.
#[derive(Debug, Clone)]
pub struct ApiBlock {
    pub block_type: u64,
    pub flags: block::BlockFlags,
    pub crc_type: crc::CrcType,
    pub data: Vec<u8>,
}

/// A bundle: the unit of transfer.
#[derive(Default, Debug, Clone)]
pub struct Bundle {
    pub flags: BundleFlags,
    /// CRC type of the primary block.
    pub crc_type: crc::CrcType,
    pub source: eid::Eid,
    pub destination: eid::Eid,
    pub report_to: eid::Eid,
    /// The node this bundle was received from, from the previous-node block.
    pub previous_hop: eid::Eid,
    pub creation: creation_timestamp::CreationTimestamp,
    pub lifetime_millis: u64,
    pub fragment: Option<FragmentInfo>,

    /// The out-of-band payload reference.
    pub payload: payload::PayloadRef,

    // Unpacked from extension blocks
    pub age_millis: Option<u64>,
    pub hop_count: Option<HopInfo>,
    pub imc: ImcState,

    /// Blocks in reception order. The primary block is first.
    pub recv_blocks: Vec<block::BlockInfo>,
    /// Bytes received ahead of a block whose type is not yet decodable.
    pub recv_pending: Vec<u8>,
    /// Blocks injected via the API, appended to every transmission.
    pub api_blocks: Vec<ApiBlock>,
    /// Per-link transmission lists built by `prepare_blocks`.
    pub xmit_blocks: HashMap<String, transmission::XmitBlocks>,

    /// Highest block number seen so far; fresh blocks number above it.
    pub highest_block_number: u64,

    /// When reception of this bundle began, for age accounting.
    pub received_at: Option<std::time::Instant>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundle's current age in milliseconds: the received bundle-age
    /// value plus the time it has spent at this node.
    pub fn current_age_millis(&self) -> u64 {
        let resident = self
            .received_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.age_millis.unwrap_or(0) + resident
    }

    /// True once the whole bundle, break byte included, has been consumed.
    pub fn reception_complete(&self) -> bool {
        self.recv_blocks
            .last()
            .map(|b| b.block_type == block::block_type::PAYLOAD && b.complete)
            .unwrap_or(false)
    }
}
