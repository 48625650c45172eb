/*!
Fallback handling for unrecognised block types: the received bytes are
preserved verbatim and re-emitted unchanged, honoring the block's own
processing flags.
*/

use super::*;

pub struct UnknownProcessor;

impl BlockProcessor for UnknownProcessor {
    fn block_type(&self) -> u64 {
        // Never registered under a real type code; reached only through
        // the registry fallback
        u64::MAX
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit: &mut XmitBlocks,
        source: Option<&BlockInfo>,
        _link: &Link,
        _owner: ListOwner,
    ) -> Result<(), Error> {
        let Some(source) = source else {
            return Ok(());
        };
        // An unknown block whose flags ask for discard-on-failure is
        // not forwarded
        if source.flags.delete_block_on_failure {
            return Ok(());
        }
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
        Ok(())
    }

    fn generate(
        &self,
        _bundle: &Bundle,
        xmit: &mut XmitBlocks,
        idx: usize,
        _link: &Link,
        _last: bool,
    ) -> Result<(), Error> {
        // Verbatim copy of the received encoding
        let block = &mut xmit.blocks[idx];
        block.bytes = block
            .source
            .as_ref()
            .map(|s| s.contents.clone())
            .unwrap_or_default();
        Ok(())
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        data: &[u8],
        _store: &dyn PayloadStore,
    ) -> Result<usize, Error> {
        consume_canonical(bundle, block, data, |_, _| Ok(()))
    }

    fn validate(
        &self,
        _bundle: &Bundle,
        block: &BlockInfo,
    ) -> Result<Option<ReasonCode>, ReasonCode> {
        if block.flags.delete_bundle_on_failure {
            return Err(ReasonCode::BlockUnsupported);
        }
        if block.flags.report_on_failure {
            return Ok(Some(ReasonCode::BlockUnsupported));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::MemoryPayloadStore;

    #[test]
    fn preserves_bytes_verbatim() {
        let bytes = encode_canonical(
            99,
            5,
            &BlockFlags::default(),
            crc::CrcType::Crc16X25,
            b"opaque",
        );

        let mut bundle = Bundle::new();
        let mut block = BlockInfo::new(99);
        let store = MemoryPayloadStore::new();
        let n = UnknownProcessor
            .consume(&mut bundle, &mut block, &bytes, &store)
            .unwrap();
        assert_eq!(n, bytes.len());
        assert!(block.complete);
        assert_eq!(block.contents, bytes);
        assert_eq!(block.data(), b"opaque");

        // Re-emission copies the received encoding untouched
        let link = Link::new("clb", eid::Eid::Null);
        let mut xmit = XmitBlocks::new("clb");
        UnknownProcessor
            .prepare(&bundle, &mut xmit, Some(&block), &link, ListOwner::Received)
            .unwrap();
        UnknownProcessor
            .generate(&bundle, &mut xmit, 0, &link, false)
            .unwrap();
        assert_eq!(xmit.blocks[0].bytes, bytes);
    }

    #[test]
    fn delete_bundle_flag_fails_validation() {
        let mut block = BlockInfo::new(99);
        block.flags.delete_bundle_on_failure = true;
        assert!(matches!(
            UnknownProcessor.validate(&Bundle::new(), &block),
            Err(ReasonCode::BlockUnsupported)
        ));
    }
}
