/*!
Outbound block-list assembly.

For each outgoing link a bundle gets its own transmission block list:
`prepare_blocks` chooses and orders the blocks, `generate_blocks` lays
out their bytes (generate in list order, then finalize back-to-front),
and `produce` copies wire bytes out on demand, framing the whole
bundle in the indefinite-length array header and trailing break byte.
*/

use super::*;
use block::{BlockInfo, block_type};
use bundle::Bundle;
use link::Link;
use payload::PayloadStore;
use processor::{ListOwner, Registry};

/// One block of an outgoing bundle.
#[derive(Debug, Clone)]
pub struct XmitBlock {
    pub block_type: u64,
    pub number: u64,
    pub flags: block::BlockFlags,
    pub crc_type: crc::CrcType,
    /// The received block this derives from, when forwarding.
    pub source: Option<BlockInfo>,
    /// Raw block data for API-injected blocks.
    pub api_data: Option<Vec<u8>>,
    /// Generated wire bytes. For the payload block this is only the
    /// preamble; the data bytes stream from the payload store.
    pub bytes: Vec<u8>,
    /// Payload only: the number of data bytes that follow `bytes`.
    pub data_length: usize,
}

impl XmitBlock {
    /// Total wire length of this block.
    pub fn full_length(&self) -> usize {
        self.bytes.len() + self.data_length
    }
}

/// The transmission block list for one link.
#[derive(Debug, Default, Clone)]
pub struct XmitBlocks {
    pub link: String,
    pub blocks: Vec<XmitBlock>,
    /// Set by `generate_blocks`: the full bundle length on the wire.
    pub total_length: usize,
}

impl XmitBlocks {
    pub fn new(link: &str) -> Self {
        Self {
            link: link.to_string(),
            blocks: Vec::new(),
            total_length: 0,
        }
    }

    pub fn contains_type(&self, block_type: u64) -> bool {
        self.blocks.iter().any(|b| b.block_type == block_type)
    }
}

/// Builds the outgoing block list for `link` and stores it in the
/// bundle's per-link map.
///
/// Received blocks go first (primary up front), then API-injected
/// blocks, then every registered processor gets a last-chance
/// `prepare` to insert link-requested blocks. The payload lands last
/// and block numbers are assigned above the highest received number.
pub fn prepare_blocks(bundle: &mut Bundle, registry: &Registry, link: &Link) -> Result<(), Error> {
    let mut xmit = XmitBlocks::new(&link.name);

    // Received blocks, in reception order. A fragment's blocks after
    // the payload belong to the original bundle, not the fragment.
    let recv_blocks = std::mem::take(&mut bundle.recv_blocks);
    let mut seen_payload = false;
    for block in &recv_blocks {
        if seen_payload && bundle.flags.is_fragment {
            continue;
        }
        if block.block_type == block_type::PAYLOAD {
            seen_payload = true;
        }
        registry.find(block.block_type).prepare(
            bundle,
            &mut xmit,
            Some(block),
            link,
            ListOwner::Received,
        )?;
    }
    bundle.recv_blocks = recv_blocks;

    // Locally-originated bundles still need a primary and payload
    if !xmit.contains_type(block_type::PRIMARY) {
        registry.find(block_type::PRIMARY).prepare(
            bundle,
            &mut xmit,
            None,
            link,
            ListOwner::Processor,
        )?;
    }
    if !xmit.contains_type(block_type::PAYLOAD) {
        registry.find(block_type::PAYLOAD).prepare(
            bundle,
            &mut xmit,
            None,
            link,
            ListOwner::Processor,
        )?;
    }

    // API-injected blocks travel verbatim
    for api in &bundle.api_blocks {
        xmit.blocks.push(XmitBlock {
            block_type: api.block_type,
            number: 0,
            flags: api.flags.clone(),
            crc_type: api.crc_type,
            source: None,
            api_data: Some(api.data.clone()),
            bytes: Vec::new(),
            data_length: 0,
        });
    }

    // Last-chance pass over every registered processor
    for proc in registry.iter() {
        proc.prepare(bundle, &mut xmit, None, link, ListOwner::Processor)?;
    }

    // The payload block is always last
    if let Some(pos) = xmit
        .blocks
        .iter()
        .position(|b| b.block_type == block_type::PAYLOAD)
        && pos != xmit.blocks.len() - 1
    {
        let payload = xmit.blocks.remove(pos);
        xmit.blocks.push(payload);
    }

    // Assign numbers to fresh blocks, above everything received
    let mut next_number = core::cmp::max(bundle.highest_block_number, 1);
    for block in &mut xmit.blocks {
        if block.number == 0 && block.block_type != block_type::PRIMARY {
            next_number += 1;
            block.number = next_number;
        }
    }

    bundle.xmit_blocks.insert(link.name.clone(), xmit);
    Ok(())
}

/// Generates the wire bytes for a prepared block list: `generate` in
/// list order, `finalize` in reverse order. Returns the total bundle
/// length, framing bytes included.
pub fn generate_blocks(
    bundle: &mut Bundle,
    registry: &Registry,
    link: &Link,
) -> Result<usize, Error> {
    let mut xmit = bundle
        .xmit_blocks
        .remove(&link.name)
        .ok_or_else(|| Error::NoXmitBlocks(link.name.clone()))?;

    let count = xmit.blocks.len();
    for idx in 0..count {
        let last = idx == count - 1;
        if let Some(api_data) = xmit.blocks[idx].api_data.take() {
            let block = &mut xmit.blocks[idx];
            block.bytes = processor::encode_canonical(
                block.block_type,
                block.number,
                &block.flags,
                block.crc_type,
                &api_data,
            );
            block.api_data = Some(api_data);
        } else {
            let block_type = xmit.blocks[idx].block_type;
            registry
                .find(block_type)
                .generate(bundle, &mut xmit, idx, link, last)?;
        }
    }

    for idx in (0..count).rev() {
        let block_type = xmit.blocks[idx].block_type;
        registry
            .find(block_type)
            .finalize(bundle, &mut xmit, idx, link)?;
    }

    // The outer indefinite-length array header and its break byte
    let mut total = 2usize;
    for block in &xmit.blocks {
        total += block.full_length();
    }
    xmit.total_length = total;

    bundle.xmit_blocks.insert(link.name.clone(), xmit);
    Ok(total)
}

/// Copies up to `buf.len()` bytes of the laid-out bundle starting at
/// `offset`. Returns the byte count and whether the final byte (the
/// trailing break) has now been produced.
pub fn produce(
    bundle: &Bundle,
    registry: &Registry,
    link: &Link,
    store: &dyn PayloadStore,
    offset: usize,
    buf: &mut [u8],
) -> Result<(usize, bool), Error> {
    let xmit = bundle
        .xmit_blocks
        .get(&link.name)
        .ok_or_else(|| Error::NoXmitBlocks(link.name.clone()))?;

    let total = xmit.total_length;
    let mut produced = 0usize;
    let mut pos = offset;

    // The array header byte
    if pos == 0 && produced < buf.len() {
        buf[produced] = 0x9F;
        produced += 1;
        pos += 1;
    }

    // Block regions
    let mut region_start = 1usize;
    for block in &xmit.blocks {
        let region_end = region_start + block.full_length();
        if produced == buf.len() {
            break;
        }
        if pos < region_end {
            let rel = pos - region_start;
            let want = core::cmp::min(buf.len() - produced, block.full_length() - rel);
            let n = registry.find(block.block_type).produce(
                bundle,
                block,
                rel,
                &mut buf[produced..produced + want],
                store,
            )?;
            produced += n;
            pos += n;
            if n < want {
                // Short read from the payload store; report what we have
                return Ok((produced, false));
            }
        }
        region_start = region_end;
    }

    // The trailing break byte
    if pos == total - 1 && produced < buf.len() {
        buf[produced] = 0xFF;
        produced += 1;
        pos += 1;
    }

    Ok((produced, pos == total))
}

/// The full wire length of the bundle as prepared for `link`.
pub fn total_length(bundle: &Bundle, link: &Link) -> Result<usize, Error> {
    bundle
        .xmit_blocks
        .get(&link.name)
        .map(|x| x.total_length)
        .ok_or_else(|| Error::NoXmitBlocks(link.name.clone()))
}
