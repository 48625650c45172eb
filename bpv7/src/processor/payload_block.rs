/*!
The payload block. Unlike every other block its data is never
memory-resident: only the preamble lands in the contents buffer, and
the payload bytes stream to the payload store by offset as they
arrive. After the payload come the CRC bytes (recorded, not verified,
as the data is no longer contiguous in memory) and then the bundle's
trailing break byte, which this processor consumes.
*/

use super::*;

/// Per-read ceiling for streaming payload bytes out of the store.
const PRODUCE_CHUNK_CAP: usize = 10 * 1024 * 1024;

pub struct PayloadProcessor;

struct PayloadHeader {
    flags: BlockFlags,
    crc_type: crc::CrcType,
    header_length: usize,
    payload_length: u64,
}

fn decode_payload_header(buf: &[u8]) -> Result<PayloadHeader, Error> {
    let mut reader = Reader::new(buf);
    let count = reader
        .read_array(5, 6)
        .map_field_err("payload block array")?;

    let block_type = reader.read_uint().map_field_err("block type code")?;
    if block_type != block_type::PAYLOAD {
        return Err(Error::InvalidBlockNumber(1, block_type));
    }
    let number = reader.read_uint().map_field_err("block number")?;
    if number != 1 {
        return Err(Error::InvalidBlockNumber(number, block_type::PAYLOAD));
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

    let payload_length = reader.read_bytes_header().map_field_err("payload length")?;

    Ok(PayloadHeader {
        flags,
        crc_type,
        header_length: reader.offset(),
        payload_length,
    })
}

impl BlockProcessor for PayloadProcessor {
    fn block_type(&self) -> u64 {
        block_type::PAYLOAD
    }

    fn prepare(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        source: Option<&BlockInfo>,
        _link: &Link,
        _owner: ListOwner,
    ) -> Result<(), Error> {
        if xmit.contains_type(block_type::PAYLOAD) {
            return Ok(());
        }
        // CRC type is forced to None on emit: the payload is not
        // memory-resident when the CRC would have to be computed.
        xmit.blocks.push(XmitBlock {
            block_type: block_type::PAYLOAD,
            number: 1,
            flags: source.map(|s| s.flags.clone()).unwrap_or_default(),
            crc_type: crc::CrcType::None,
            source: source.cloned(),
            api_data: None,
            bytes: Vec::new(),
            data_length: bundle.payload.length as usize,
        });
        Ok(())
    }

    fn generate(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        idx: usize,
        _link: &Link,
        _last: bool,
    ) -> Result<(), Error> {
        let block = &mut xmit.blocks[idx];
        let mut e = drift_codec::encode::Encoder::new();
        // Definite 5-element array whose final element, the payload byte
        // string, is emitted as a bare header; the content bytes are
        // produced from the payload store.
        e.emit_raw(&[(4u8 << 5) | 5]);
        e.emit_uint(block_type::PAYLOAD);
        e.emit_uint(1);
        e.emit(&block.flags);
        e.emit(&crc::CrcType::None);
        e.emit_bytes_header(bundle.payload.length);

        block.bytes = e.build();
        block.data_length = bundle.payload.length as usize;
        Ok(())
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        data: &[u8],
        store: &dyn PayloadStore,
    ) -> Result<usize, Error> {
        let mut consumed = 0usize;
        let mut data = data;

        if block.data_offset == 0 {
            // Still assembling the preamble
            let prev_consumed = block.contents.len();
            let joined;
            let buf = if prev_consumed == 0 {
                data
            } else {
                let mut temp = Vec::with_capacity(prev_consumed + data.len());
                temp.extend_from_slice(&block.contents);
                temp.extend_from_slice(data);
                joined = temp;
                &joined
            };

            match decode_payload_header(buf) {
                Ok(header) => {
                    block.block_type = block_type::PAYLOAD;
                    block.number = 1;
                    block.flags = header.flags;
                    block.crc_type = header.crc_type;
                    block.data_offset = header.header_length;
                    block.data_length = header.payload_length as usize;
                    block.crc_length = header.crc_type.field_len();
                    block
                        .contents
                        .extend_from_slice(&data[..header.header_length - prev_consumed]);
                    consumed += header.header_length - prev_consumed;

                    bundle.payload.length = header.payload_length;
                    bundle.highest_block_number = core::cmp::max(bundle.highest_block_number, 1);
                    if bundle.payload.handle.is_none() {
                        bundle.payload.handle = Some(store.create()?);
                    }
                }
                Err(e) if e.is_eof() => {
                    block.contents.extend_from_slice(data);
                    return Ok(consumed + data.len());
                }
                Err(e) => return Err(e),
            }
            data = &data[consumed..];
        }

        // The contents buffer holds exactly the preamble from here on
        debug_assert_eq!(block.contents.len(), block.data_offset);

        if data.is_empty() {
            return Ok(consumed);
        }

        // Stream payload bytes to the store by offset
        if bundle.payload.bytes_received < bundle.payload.length {
            let remainder = (bundle.payload.length - bundle.payload.bytes_received) as usize;
            let tocopy = core::cmp::min(data.len(), remainder);
            let handle = bundle.payload.handle.expect("payload handle not allocated");
            store.write(handle, bundle.payload.bytes_received, &data[..tocopy])?;
            bundle.payload.bytes_received += tocopy as u64;
            consumed += tocopy;
            data = &data[tocopy..];
        }

        if data.is_empty() {
            return Ok(consumed);
        }

        // Accumulate the CRC field bytes; the payload is no longer in
        // contiguous memory so the value is recorded, not verified
        if block.crc_bytes.len() < block.crc_length {
            let remainder = block.crc_length - block.crc_bytes.len();
            let tocopy = core::cmp::min(data.len(), remainder);
            block.crc_bytes.extend_from_slice(&data[..tocopy]);
            consumed += tocopy;
            data = &data[tocopy..];
        }

        if data.is_empty() {
            return Ok(consumed);
        }

        // Nothing left but the break byte that closes the bundle
        if data[0] != 0xFF {
            return Err(Error::InvalidCbor(
                drift_codec::decode::Error::MissingBreak(data[0]),
            ));
        }
        consumed += 1;
        block.complete = true;

        Ok(consumed)
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _block: &BlockInfo,
    ) -> Result<Option<ReasonCode>, ReasonCode> {
        if bundle.payload.bytes_received < bundle.payload.length {
            // A short payload is only salvageable by reactive
            // fragmentation
            if bundle.flags.do_not_fragment || bundle.payload.bytes_received == 0 {
                return Err(ReasonCode::BlockUnintelligible);
            }
        }
        Ok(None)
    }

    fn produce(
        &self,
        bundle: &Bundle,
        block: &XmitBlock,
        offset: usize,
        buf: &mut [u8],
        store: &dyn PayloadStore,
    ) -> Result<usize, Error> {
        let mut produced = 0usize;
        let mut offset = offset;

        if offset < block.bytes.len() {
            let n = core::cmp::min(buf.len(), block.bytes.len() - offset);
            buf[..n].copy_from_slice(&block.bytes[offset..offset + n]);
            produced += n;
            offset += n;
        }
        if produced == buf.len() {
            return Ok(produced);
        }

        if block.data_length == 0 {
            return Ok(produced);
        }
        let payload_offset = (offset - block.bytes.len()) as u64;
        let want = core::cmp::min(buf.len() - produced, PRODUCE_CHUNK_CAP);
        let handle = bundle.payload.handle.ok_or(Error::PayloadStore(
            payload::Error::NoSuchPayload(u64::MAX),
        ))?;
        let n = store.read(handle, payload_offset, &mut buf[produced..produced + want])?;
        Ok(produced + n)
    }
}
