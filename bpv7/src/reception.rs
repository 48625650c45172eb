/*!
Inbound bundle assembly.

Bytes arriving from a convergence layer are fed to a [`Receiver`],
which drives the per-block processors over the stream:

```text
START          -> outer indefinite-array header (0x9f) -> PRIMARY_PENDING
PRIMARY_PENDING-> primary processor until complete     -> BLOCK_PENDING
BLOCK_PENDING  -> peek first array element for type    -> dispatch
               -> payload complete (incl. break byte)  -> DONE
```

A processor may consume less than it was given (block finished),
everything (needs more), or fail (abort the bundle). Partial-block
state survives across calls, so any chunking of the stream decodes
identically.
*/

use super::*;
use block::{BlockInfo, block_type};
use bundle::Bundle;
use drift_codec::decode::Reader;
use error::CaptureFieldErr;
use payload::PayloadStore;
use processor::Registry;
use status_report::ReasonCode;
use tracing::error;

/// Drives block processors over a received byte stream.
pub struct Receiver<'a> {
    registry: &'a Registry,
    store: &'a dyn PayloadStore,
}

/// Reads the block type from the first element of the next block's
/// array without committing the cursor.
fn peek_block_type(data: &[u8]) -> Result<u64, Error> {
    let mut reader = Reader::new(data);
    reader.read_array(5, 6).map_field_err("block array")?;
    reader.read_uint().map_field_err("block type code")
}

impl<'a> Receiver<'a> {
    pub fn new(registry: &'a Registry, store: &'a dyn PayloadStore) -> Self {
        Self { registry, store }
    }

    /// Consumes a chunk of a bundle's byte stream.
    ///
    /// Returns the bytes consumed and whether the bundle is complete.
    /// Consuming less than `data.len()` without completion never
    /// happens; a protocol error aborts the bundle.
    pub fn consume(&self, bundle: &mut Bundle, data: &[u8]) -> Result<(usize, bool), Error> {
        let origlen = data.len();
        let mut data = data;

        // First call: the stream must open with the indefinite-length
        // array header
        if bundle.recv_blocks.is_empty() {
            let Some(first) = data.first() else {
                return Ok((0, false));
            };
            if *first != 0x9F {
                error!("Bundle does not start with 0x9f: {first:#04x}");
                return Err(Error::InvalidBundleArray);
            }
            data = &data[1..];
            bundle.received_at = Some(std::time::Instant::now());
            bundle.recv_blocks.push(BlockInfo::new(block_type::PRIMARY));
        }

        while !data.is_empty() {
            // Bytes stashed while the next block's type was still
            // undecodable are rejoined with the new chunk
            let joined;
            let view: &[u8] = if bundle.recv_pending.is_empty() {
                data
            } else {
                joined = [bundle.recv_pending.as_slice(), data].concat();
                &joined
            };

            // A finished block means these bytes open a new one; peek
            // its type code to pick the processor
            if bundle
                .recv_blocks
                .last()
                .map(|b| b.complete)
                .unwrap_or(false)
            {
                match peek_block_type(view) {
                    Ok(block_type) => {
                        bundle.recv_blocks.push(BlockInfo::new(block_type));
                    }
                    Err(e) if e.is_eof() => {
                        bundle.recv_pending.extend_from_slice(data);
                        return Ok((origlen, false));
                    }
                    Err(e) => return Err(e),
                }
            }

            let idx = bundle.recv_blocks.len() - 1;
            let mut block = std::mem::take(&mut bundle.recv_blocks[idx]);
            let processor = self.registry.find(block.block_type).clone();
            let result = processor.consume(bundle, &mut block, view, self.store);
            bundle.recv_blocks[idx] = block;
            let cc = result?;

            // Consumption is counted against the caller's chunk; the
            // stashed bytes were counted when they arrived
            let pending = bundle.recv_pending.len();
            bundle.recv_pending.clear();
            data = &data[cc - pending..];

            let block = &bundle.recv_blocks[idx];
            if block.complete {
                // Block numbers are unique per bundle
                if bundle.recv_blocks[..idx]
                    .iter()
                    .any(|b| b.number == block.number)
                {
                    return Err(Error::DuplicateBlockNumber(block.number));
                }
                if block.block_type == block_type::PAYLOAD {
                    return Ok((origlen - data.len(), true));
                }
            } else {
                debug_assert!(data.is_empty());
            }
        }

        Ok((origlen - data.len(), false))
    }

    /// Validates an assembled bundle.
    ///
    /// `Ok(Some(reason))` requests a reception status report;
    /// `Err(reason)` means the bundle must be deleted with that reason.
    pub fn validate(&self, bundle: &mut Bundle) -> Result<Option<ReasonCode>, ReasonCode> {
        // A bundle is at least a primary and a payload block
        if bundle.recv_blocks.len() < 2 {
            return Err(ReasonCode::BlockUnintelligible);
        }

        if bundle.recv_blocks[0].block_type != block_type::PRIMARY {
            return Err(ReasonCode::BlockUnintelligible);
        }

        // A trailing block that never got as far as its preamble is
        // silently dropped if the bundle is otherwise valid
        if let Some(last) = bundle.recv_blocks.last()
            && !last.complete
            && last.data_offset == 0
        {
            bundle.recv_blocks.pop();
            if bundle.recv_blocks.len() < 2 {
                return Err(ReasonCode::BlockUnintelligible);
            }
        }

        let payload_blocks = bundle
            .recv_blocks
            .iter()
            .filter(|b| b.block_type == block_type::PAYLOAD)
            .count();
        if payload_blocks != 1 {
            return Err(ReasonCode::BlockUnintelligible);
        }
        if bundle
            .recv_blocks
            .last()
            .map(|b| b.block_type != block_type::PAYLOAD)
            .unwrap_or(true)
        {
            return Err(ReasonCode::BlockUnintelligible);
        }

        let mut reception_reason = None;
        for block in &bundle.recv_blocks {
            match self.registry.find(block.block_type).validate(bundle, block) {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    reception_reason.get_or_insert(reason);
                }
                Err(reason) => return Err(reason),
            }
        }
        Ok(reception_reason)
    }
}

/// Rebuilds a bundle's decoded state after its blocks have been
/// reloaded from the durable store, by handing every complete block
/// back to its processor.
pub fn reload(bundle: &mut Bundle, registry: &Registry) -> Result<(), Error> {
    let recv_blocks = std::mem::take(&mut bundle.recv_blocks);
    let result = recv_blocks
        .iter()
        .filter(|b| b.complete)
        .try_for_each(|block| registry.find(block.block_type).reload(bundle, block));
    bundle.recv_blocks = recv_blocks;
    result
}

/// The wire length of a fully received bundle: the sum of the block
/// lengths plus the outer array header and break bytes.
pub fn total_length(bundle: &Bundle) -> usize {
    bundle
        .recv_blocks
        .iter()
        .map(|b| b.full_length())
        .sum::<usize>()
        + 2
}
