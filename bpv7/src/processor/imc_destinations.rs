/*!
The experimental IMC destinations block: an array of unsigned node
numbers naming the multicast destinations a router has expanded for
this bundle.
*/

use super::*;
use error::CaptureFieldErr;

pub struct ImcDestinationsProcessor;

fn decode_data(bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
    let mut reader = Reader::new(block.data());
    let count = reader
        .read_array(0, u64::MAX)
        .map_field_err("IMC destinations array")?;
    for _ in 0..count {
        let node = reader.read_uint().map_field_err("IMC destination node")?;
        bundle.imc.add_dest_node(node);
    }
    Ok(())
}

impl BlockProcessor for ImcDestinationsProcessor {
    fn block_type(&self) -> u64 {
        block_type::IMC_DESTINATIONS
    }

    fn prepare(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        source: Option<&BlockInfo>,
        _link: &Link,
        owner: ListOwner,
    ) -> Result<(), Error> {
        match owner {
            ListOwner::Received | ListOwner::Api => {
                if let Some(source) = source {
                    xmit.blocks.push(XmitBlock {
                        block_type: block_type::IMC_DESTINATIONS,
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
                // Multicast bundles that gained destinations locally get
                // a fresh block
                if matches!(bundle.destination, eid::Eid::Imc { .. })
                    && !bundle.imc.dest_nodes.is_empty()
                    && !xmit.contains_type(block_type::IMC_DESTINATIONS)
                {
                    xmit.blocks.push(XmitBlock {
                        block_type: block_type::IMC_DESTINATIONS,
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
        _link: &Link,
        _last: bool,
    ) -> Result<(), Error> {
        let data = drift_codec::encode::emit_array(Some(bundle.imc.dest_nodes.len()), |a| {
            for node in &bundle.imc.dest_nodes {
                a.emit_uint(*node);
            }
        });
        let block = &mut xmit.blocks[idx];
        block.bytes = encode_canonical(
            block_type::IMC_DESTINATIONS,
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
