/*!
The previous-node block: the EID of the node the bundle was received
from. Received copies are consumed for routing state but never
propagated; a fresh block carrying the local node's EID is inserted
only when the outgoing link requests it.
*/

use super::*;
use eid::Eid;
use error::CaptureFieldErr;

pub struct PreviousNodeProcessor;

fn decode_data(bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
    let mut reader = Reader::new(block.data());
    bundle.previous_hop = reader
        .read::<Eid>()
        .map_err(Error::from)
        .map_field_err("previous node EID")?;
    Ok(())
}

impl BlockProcessor for PreviousNodeProcessor {
    fn block_type(&self) -> u64 {
        block_type::PREVIOUS_NODE
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit: &mut XmitBlocks,
        source: Option<&BlockInfo>,
        link: &Link,
        owner: ListOwner,
    ) -> Result<(), Error> {
        match owner {
            // Received previous-node blocks stop here
            ListOwner::Received | ListOwner::Api => Ok(()),
            ListOwner::Processor => {
                if link.add_previous_node
                    && source.is_none()
                    && !xmit.contains_type(block_type::PREVIOUS_NODE)
                {
                    xmit.blocks.push(XmitBlock {
                        block_type: block_type::PREVIOUS_NODE,
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
        _bundle: &Bundle,
        xmit: &mut XmitBlocks,
        idx: usize,
        link: &Link,
        _last: bool,
    ) -> Result<(), Error> {
        let data = drift_codec::encode::emit(&link.local_eid);
        let block = &mut xmit.blocks[idx];
        block.bytes = encode_canonical(
            block_type::PREVIOUS_NODE,
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::MemoryPayloadStore;

    #[test]
    fn consume_records_previous_hop() {
        let eid: Eid = "ipn:977000.0".parse().unwrap();
        let bytes = encode_canonical(
            block_type::PREVIOUS_NODE,
            2,
            &BlockFlags::default(),
            crc::CrcType::None,
            &drift_codec::encode::emit(&eid),
        );

        let mut bundle = Bundle::new();
        let mut block = BlockInfo::new(block_type::PREVIOUS_NODE);
        let store = MemoryPayloadStore::new();
        let n = PreviousNodeProcessor
            .consume(&mut bundle, &mut block, &bytes, &store)
            .unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(bundle.previous_hop, eid);
    }

    #[test]
    fn received_blocks_not_propagated() {
        let bundle = Bundle::new();
        let link = Link::new("clb", Eid::Null);
        let mut xmit = XmitBlocks::new("clb");
        let source = BlockInfo::new(block_type::PREVIOUS_NODE);
        PreviousNodeProcessor
            .prepare(&bundle, &mut xmit, Some(&source), &link, ListOwner::Received)
            .unwrap();
        assert!(xmit.blocks.is_empty());
    }
}
