/*!
The hop-count block: a two-element array `[limit, count]`. Forwarders
increment the count; a bundle whose count exceeds its limit is
dropped.
*/

use super::*;
use bundle::HopInfo;
use error::CaptureFieldErr;

pub struct HopCountProcessor;

fn decode_data(bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
    let mut reader = Reader::new(block.data());
    reader.read_array(2, 2).map_field_err("hop count array")?;
    bundle.hop_count = Some(HopInfo {
        limit: reader.read_uint().map_field_err("hop limit")?,
        count: reader.read_uint().map_field_err("hop count")?,
    });
    Ok(())
}

impl BlockProcessor for HopCountProcessor {
    fn block_type(&self) -> u64 {
        block_type::HOP_COUNT
    }

    fn prepare(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        source: Option<&BlockInfo>,
        link: &Link,
        owner: ListOwner,
    ) -> Result<(), Error> {
        match owner {
            ListOwner::Received | ListOwner::Api => {
                if let Some(source) = source {
                    xmit.blocks.push(XmitBlock {
                        block_type: block_type::HOP_COUNT,
                        number: source.number,
                        flags: source.flags.clone(),
                        crc_type: source.crc_type,
                        source: Some(source.clone()),
                        api_data: None,
                        bytes: Vec::new(),
                        data_length: 0,
                    });
                }
                Ok(())
            }
            ListOwner::Processor => {
                if link.add_hop_count.is_some()
                    && bundle.hop_count.is_none()
                    && !xmit.contains_type(block_type::HOP_COUNT)
                {
                    xmit.blocks.push(XmitBlock {
                        block_type: block_type::HOP_COUNT,
                        number: 0,
                        flags: BlockFlags::default(),
                        crc_type: crc::CrcType::Crc32Castagnoli,
                        source: None,
                        api_data: None,
                        bytes: Vec::new(),
                        data_length: 0,
                    });
                }
                Ok(())
            }
        }
    }

    fn generate(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        idx: usize,
        link: &Link,
        _last: bool,
    ) -> Result<(), Error> {
        let hop = bundle.hop_count.unwrap_or(HopInfo {
            limit: link.add_hop_count.unwrap_or(0),
            count: 0,
        });
        let data = drift_codec::encode::emit_array(Some(2), |a| {
            a.emit_uint(hop.limit);
            a.emit_uint(hop.count);
        });
        let block = &mut xmit.blocks[idx];
        block.bytes = encode_canonical(
            block_type::HOP_COUNT,
            block.number,
            &block.flags,
            block.crc_type,
            &data,
        );
        Ok(())
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        data: &[u8],
        _store: &dyn PayloadStore,
    ) -> Result<usize, Error> {
        consume_canonical(bundle, block, data, decode_data)
    }

    fn reload(&self, bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
        decode_data(bundle, block)
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _block: &BlockInfo,
    ) -> Result<Option<ReasonCode>, ReasonCode> {
        if let Some(hop) = &bundle.hop_count
            && hop.exceeded()
        {
            return Err(ReasonCode::HopLimitExceeded);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::MemoryPayloadStore;

    #[test]
    fn round_trip() {
        let data = drift_codec::encode::emit_array(Some(2), |a| {
            a.emit_uint(30);
            a.emit_uint(4);
        });
        let bytes = encode_canonical(
            block_type::HOP_COUNT,
            3,
            &BlockFlags::default(),
            crc::CrcType::Crc32Castagnoli,
            &data,
        );

        let mut bundle = Bundle::new();
        let mut block = BlockInfo::new(block_type::HOP_COUNT);
        let store = MemoryPayloadStore::new();
        let n = HopCountProcessor
            .consume(&mut bundle, &mut block, &bytes, &store)
            .unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(bundle.hop_count, Some(HopInfo { limit: 30, count: 4 }));
        assert!(
            HopCountProcessor
                .validate(&bundle, &block)
                .is_ok()
        );
    }

    #[test]
    fn exceeded_limit_fails_validation() {
        let mut bundle = Bundle::new();
        bundle.hop_count = Some(HopInfo { limit: 3, count: 4 });
        let block = BlockInfo::new(block_type::HOP_COUNT);
        assert!(matches!(
            HopCountProcessor.validate(&bundle, &block),
            Err(ReasonCode::HopLimitExceeded)
        ));
    }
}
