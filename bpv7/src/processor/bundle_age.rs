/*!
The bundle-age block: a single unsigned integer carrying the bundle's
age in milliseconds, required when the source node has no clock.
*/

use super::*;
use error::CaptureFieldErr;

pub struct BundleAgeProcessor;

fn decode_data(bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
    let mut reader = Reader::new(block.data());
    bundle.age_millis = Some(reader.read_uint().map_field_err("bundle age")?);
    Ok(())
}

impl BlockProcessor for BundleAgeProcessor {
    fn block_type(&self) -> u64 {
        block_type::BUNDLE_AGE
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
                        block_type: block_type::BUNDLE_AGE,
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
                // Last-chance: insert a fresh block when the link asks
                // for one, the bundle has none, and the source is
                // clockless
                if link.add_bundle_age
                    && bundle.age_millis.is_none()
                    && !bundle.creation.is_clocked()
                    && !xmit.contains_type(block_type::BUNDLE_AGE)
                {
                    xmit.blocks.push(XmitBlock {
                        block_type: block_type::BUNDLE_AGE,
                        number: 0, // assigned when the list is sealed
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
        _link: &Link,
        _last: bool,
    ) -> Result<(), Error> {
        // Read the age once and hold it for the whole layout: its CBOR
        // width could change between reads otherwise
        let age = bundle.current_age_millis();
        let block = &mut xmit.blocks[idx];
        block.bytes = encode_canonical(
            block_type::BUNDLE_AGE,
            block.number,
            &block.flags,
            block.crc_type,
            &drift_codec::encode::emit(&age),
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::MemoryPayloadStore;

    #[test]
    fn consume_whole_and_chunked() {
        let bytes = encode_canonical(
            block_type::BUNDLE_AGE,
            2,
            &BlockFlags::default(),
            crc::CrcType::Crc16X25,
            &drift_codec::encode::emit(&300_000u64),
        );
        let store = MemoryPayloadStore::new();

        // Single call
        let mut bundle = Bundle::new();
        let mut block = BlockInfo::new(block_type::BUNDLE_AGE);
        let n = BundleAgeProcessor
            .consume(&mut bundle, &mut block, &bytes, &store)
            .unwrap();
        assert_eq!(n, bytes.len());
        assert!(block.complete);
        assert_eq!(bundle.age_millis, Some(300_000));
        assert_eq!(block.full_length(), bytes.len());

        // One byte at a time must decode identically
        let mut bundle = Bundle::new();
        let mut block = BlockInfo::new(block_type::BUNDLE_AGE);
        for (i, b) in bytes.iter().enumerate() {
            let n = BundleAgeProcessor
                .consume(&mut bundle, &mut block, core::slice::from_ref(b), &store)
                .unwrap();
            assert_eq!(n, 1, "byte {i}");
            assert_eq!(block.complete, i == bytes.len() - 1);
        }
        assert_eq!(bundle.age_millis, Some(300_000));
        assert_eq!(block.contents, bytes);
    }
}
