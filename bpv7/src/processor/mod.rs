/*!
Per-block-type protocol handling.

Every block type is handled by a [`BlockProcessor`]: `consume` drives
the streaming decode of received bytes, `validate` checks a fully
received block, and the `prepare`/`generate`/`finalize`/`produce`
pipeline builds and emits transmission block lists. A [`Registry`]
maps wire type codes to processors, with unrecognised types falling
through to the [`unknown`] processor that preserves their bytes
verbatim.
*/

use super::*;
use block::{BlockFlags, BlockInfo, block_type};
use bundle::Bundle;
use drift_codec::decode::Reader;
use error::CaptureFieldErr;
use link::Link;
use payload::PayloadStore;
use status_report::ReasonCode;
use std::collections::BTreeMap;
use std::sync::Arc;
use transmission::{XmitBlock, XmitBlocks};

mod bundle_age;
mod hop_count;
mod imc_destinations;
mod imc_state;
mod payload_block;
mod previous_node;
mod primary;
mod unknown;

pub use bundle_age::BundleAgeProcessor;
pub use hop_count::HopCountProcessor;
pub use imc_destinations::ImcDestinationsProcessor;
pub use imc_state::ImcStateProcessor;
pub use payload_block::PayloadProcessor;
pub use previous_node::PreviousNodeProcessor;
pub use primary::PrimaryProcessor;
pub use unknown::UnknownProcessor;

/// Which list a block being prepared came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOwner {
    /// A block from the received list.
    Received,
    /// A block injected through the API.
    Api,
    /// No source block; the processor decides whether the link needs one.
    Processor,
}

/// Protocol handling for one block type.
pub trait BlockProcessor: Send + Sync {
    /// The wire type code this processor handles.
    fn block_type(&self) -> u64;

    /// Adds this processor's block to an outgoing list, at the correct
    /// position: received blocks append after the primary, the payload
    /// is always last. A processor that has nothing to add returns Ok.
    fn prepare(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        source: Option<&BlockInfo>,
        link: &Link,
        owner: ListOwner,
    ) -> Result<(), Error> {
        let _ = link;
        let Some(source) = source else {
            // Nothing to add on a last-chance call by default
            return Ok(());
        };
        let _ = owner;
        xmit.blocks.push(XmitBlock {
            block_type: source.block_type,
            number: source.number,
            flags: source.flags.clone(),
            crc_type: source.crc_type,
            source: Some(source.clone()),
            api_data: None,
            bytes: Vec::new(),
            data_length: 0,
        });
        let _ = bundle;
        Ok(())
    }

    /// Lays out the block's wire bytes, computing the CRC after the
    /// full CBOR layout and overwriting the placeholder.
    fn generate(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        idx: usize,
        link: &Link,
        last: bool,
    ) -> Result<(), Error>;

    /// Back-to-front pass after all blocks have been generated, for
    /// block types whose contents depend on later blocks.
    fn finalize(
        &self,
        _bundle: &Bundle,
        _xmit: &mut XmitBlocks,
        _idx: usize,
        _link: &Link,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Consumes a chunk of received data, buffering partial input and
    /// retrying as more arrives. Returns the number of bytes consumed;
    /// `block.complete` signals the block is done.
    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        data: &[u8],
        store: &dyn PayloadStore,
    ) -> Result<usize, Error>;

    /// Validates a fully received block. `Ok(Some(reason))` requests a
    /// reception status report; `Err(reason)` deletes the bundle.
    fn validate(
        &self,
        _bundle: &Bundle,
        _block: &BlockInfo,
    ) -> Result<Option<ReasonCode>, ReasonCode> {
        Ok(None)
    }

    /// Recovers decoded bundle state from a block reloaded out of the
    /// durable store. Processors that unpack block data into bundle
    /// fields re-run that decode here.
    fn reload(&self, _bundle: &mut Bundle, _block: &BlockInfo) -> Result<(), Error> {
        Ok(())
    }

    /// Copies bytes of the generated block from `offset` into `buf`.
    fn produce(
        &self,
        bundle: &Bundle,
        block: &XmitBlock,
        offset: usize,
        buf: &mut [u8],
        store: &dyn PayloadStore,
    ) -> Result<usize, Error> {
        let _ = (bundle, store);
        let n = core::cmp::min(buf.len(), block.bytes.len().saturating_sub(offset));
        if n == 0 {
            return Ok(0);
        }
        buf[..n].copy_from_slice(&block.bytes[offset..offset + n]);
        Ok(n)
    }
}

/// The block-type registry. Initialized during startup and read-only
/// thereafter.
pub struct Registry {
    processors: BTreeMap<u64, Arc<dyn BlockProcessor>>,
    unknown: Arc<dyn BlockProcessor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

impl Registry {
    /// An empty registry with only the unknown-type fallback.
    pub fn new() -> Self {
        Self {
            processors: BTreeMap::new(),
            unknown: Arc::new(UnknownProcessor),
        }
    }

    /// A registry with all standard processors installed.
    pub fn standard() -> Self {
        let mut r = Self::new();
        r.register(Arc::new(PrimaryProcessor));
        r.register(Arc::new(PayloadProcessor));
        r.register(Arc::new(PreviousNodeProcessor));
        r.register(Arc::new(BundleAgeProcessor));
        r.register(Arc::new(HopCountProcessor));
        r.register(Arc::new(ImcDestinationsProcessor));
        r.register(Arc::new(ImcStateProcessor));
        r
    }

    /// Registers a processor for its block type. Registering the same
    /// type twice is a programming error.
    pub fn register(&mut self, processor: Arc<dyn BlockProcessor>) {
        let block_type = processor.block_type();
        if self.processors.insert(block_type, processor).is_some() {
            panic!("Duplicate block processor registration for type {block_type}");
        }
    }

    /// The processor for a type code, falling back to the unknown
    /// processor.
    pub fn find(&self, block_type: u64) -> &Arc<dyn BlockProcessor> {
        self.processors.get(&block_type).unwrap_or(&self.unknown)
    }

    /// All registered processors in type-code order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BlockProcessor>> {
        self.processors.values()
    }
}

/// The decoded preamble of a memory-resident canonical block.
pub(crate) struct DecodedCanonical {
    pub block_type: u64,
    pub number: u64,
    pub flags: BlockFlags,
    pub crc_type: crc::CrcType,
    pub data_offset: usize,
    pub data_length: usize,
    pub crc_length: usize,
    pub total_length: usize,
}

/// Decodes one complete canonical block from the front of `buf`,
/// validating the CRC. Fails with an EOF error until the whole block
/// is present.
pub(crate) fn decode_canonical(buf: &[u8]) -> Result<DecodedCanonical, Error> {
    let mut reader = Reader::new(buf);
    let count = reader
        .read_array(5, 6)
        .map_field_err("canonical block array")?;

    let block_type = reader.read_uint().map_field_err("block type code")?;
    let number = reader.read_uint().map_field_err("block number")?;
    match (number, block_type) {
        (1, block_type::PAYLOAD) => {}
        (0, _) | (1, _) | (_, block_type::PRIMARY) | (_, block_type::PAYLOAD) => {
            return Err(Error::InvalidBlockNumber(number, block_type));
        }
        _ => {}
    }
    let flags: BlockFlags = reader
        .read_uint()
        .map_field_err("block processing control flags")?
        .into();
    let crc_type_code = reader.read_uint().map_field_err("CRC type")?;
    let crc_type: crc::CrcType = crc_type_code.try_into()?;

    match (count, crc_type) {
        (5, crc::CrcType::None) => {}
        (6, crc::CrcType::Crc16X25) | (6, crc::CrcType::Crc32Castagnoli) => {}
        _ => return Err(Error::InvalidBlockArraySize(count, crc_type_code)),
    }

    let data = reader.read_bytes().map_field_err("block data")?;
    let (data_offset, data_length) = (data.start, data.len());

    let mut crc_length = 0;
    if crc_type != crc::CrcType::None {
        let crc_field_start = reader.offset();
        let value = reader.read_bytes().map_field_err("CRC value")?;
        if value.len() != crc_type.value_len() {
            return Err(crc::Error::InvalidLength(value.len()).into());
        }
        crc_length = reader.offset() - crc_field_start;
        crc::check_crc(crc_type, &buf[..reader.offset()], value)?;
    }

    Ok(DecodedCanonical {
        block_type,
        number,
        flags,
        crc_type,
        data_offset,
        data_length,
        crc_length,
        total_length: reader.offset(),
    })
}

/// Applies a decoded preamble to the block bookkeeping.
pub(crate) fn apply_canonical(block: &mut BlockInfo, decoded: &DecodedCanonical) {
    block.block_type = decoded.block_type;
    block.number = decoded.number;
    block.flags = decoded.flags.clone();
    block.crc_type = decoded.crc_type;
    block.data_offset = decoded.data_offset;
    block.data_length = decoded.data_length;
    block.crc_length = decoded.crc_length;
}

/// The shared chunk-accumulation logic of `consume`.
///
/// `decode` attempts a full decode against the bytes supplied so far
/// and returns the block's total length on success. On an EOF outcome
/// the new chunk is buffered into the block's contents and the whole
/// chunk reported consumed; on success exactly the bytes needed to
/// finish the block are committed and `block.complete` is set.
pub(crate) fn consume_chunked<F>(
    block: &mut BlockInfo,
    data: &[u8],
    mut decode: F,
) -> Result<usize, Error>
where
    F: FnMut(&mut BlockInfo, &[u8]) -> Result<usize, Error>,
{
    debug_assert!(!block.complete);

    let prev_consumed = block.contents.len();
    if prev_consumed == 0 {
        match decode(block, data) {
            Ok(block_len) => {
                block.contents.extend_from_slice(&data[..block_len]);
                block.complete = true;
                Ok(block_len)
            }
            Err(e) if e.is_eof() => {
                block.contents.extend_from_slice(data);
                Ok(data.len())
            }
            Err(e) => Err(e),
        }
    } else {
        // Join the previously buffered bytes with the new chunk in a
        // temporary and re-decode; on success commit only the new bytes
        // the block still needed.
        let mut temp = Vec::with_capacity(prev_consumed + data.len());
        temp.extend_from_slice(&block.contents);
        temp.extend_from_slice(data);

        match decode(block, &temp) {
            Ok(block_len) => {
                block
                    .contents
                    .extend_from_slice(&data[..block_len - prev_consumed]);
                block.complete = true;
                Ok(block_len - prev_consumed)
            }
            Err(e) if e.is_eof() => {
                block.contents.extend_from_slice(data);
                Ok(data.len())
            }
            Err(e) => Err(e),
        }
    }
}

/// Lays out a complete canonical block: 5- or 6-element array with the
/// CRC computed over the zero-filled placeholder and appended last.
pub(crate) fn encode_canonical(
    block_type: u64,
    number: u64,
    flags: &BlockFlags,
    crc_type: crc::CrcType,
    data: &[u8],
) -> Vec<u8> {
    let body = drift_codec::encode::emit_array(
        Some(if crc_type == crc::CrcType::None { 5 } else { 6 }),
        |a| {
            a.emit_uint(block_type);
            a.emit_uint(number);
            a.emit(flags);
            a.emit(&crc_type);
            a.emit_bytes(data);
            if crc_type != crc::CrcType::None {
                a.skip_value();
            }
        },
    );
    crc::append_crc_value(crc_type, body)
}

/// The standard consume for canonical blocks that fit in memory:
/// chunk-accumulate, then hand the completed data to `on_complete`.
pub(crate) fn consume_canonical<F>(
    bundle: &mut Bundle,
    block: &mut BlockInfo,
    data: &[u8],
    on_complete: F,
) -> Result<usize, Error>
where
    F: FnOnce(&mut Bundle, &BlockInfo) -> Result<(), Error>,
{
    let consumed = consume_chunked(block, data, |block, buf| {
        let decoded = decode_canonical(buf)?;
        apply_canonical(block, &decoded);
        Ok(decoded.total_length)
    })?;

    if block.complete {
        bundle.highest_block_number = core::cmp::max(bundle.highest_block_number, block.number);
        on_complete(bundle, block)?;
    }
    Ok(consumed)
}
