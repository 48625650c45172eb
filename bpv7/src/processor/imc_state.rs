/*!
The experimental IMC state block: `[format_version, format_array]`.

Three formats, selected by the shape of the bundle being emitted:

- format 0, regular multicast bundles: `[processed_regions,
  processed_by_nodes]`, both arrays of node/region numbers.
- format 1, group petitions to `imc:0.0`: `[processed_regions,
  sync_request, is_proxy, proxy_processed_by_nodes]`.
- format 2, administrative briefings: `[sync_request, sync_reply,
  is_router]`.

Recipients merge the processed-region and processed-by-node sets to
stop multicast loops. An unknown format version is a protocol error.
*/

use super::*;
use error::CaptureFieldErr;

pub struct ImcStateProcessor;

fn decode_state(bundle: &mut Bundle, reader: &mut Reader) -> Result<(), Error> {
    reader.read_array(2, 2).map_field_err("IMC state array")?;
    let format = reader.read_uint().map_field_err("IMC state format version")?;
    match format {
        0 => {
            reader
                .read_array(2, 2)
                .map_field_err("IMC state v0 array")?;
            read_uint_array(reader, "processed regions", |v| {
                bundle.imc.add_processed_region(v)
            })?;
            read_uint_array(reader, "processed-by nodes", |v| {
                bundle.imc.add_processed_by_node(v)
            })?;
        }
        1 => {
            reader
                .read_array(4, 4)
                .map_field_err("IMC state v1 array")?;
            read_uint_array(reader, "processed regions", |v| {
                bundle.imc.add_processed_region(v)
            })?;
            bundle.imc.sync_request = reader.read_bool().map_field_err("sync request")?;
            bundle.imc.is_proxy_petition = reader.read_bool().map_field_err("proxy petition")?;
            read_uint_array(reader, "proxy processed-by nodes", |v| {
                bundle.imc.add_processed_by_node(v)
            })?;
        }
        2 => {
            reader
                .read_array(3, 3)
                .map_field_err("IMC state v2 array")?;
            bundle.imc.sync_request = reader.read_bool().map_field_err("sync request")?;
            bundle.imc.sync_reply = reader.read_bool().map_field_err("sync reply")?;
            bundle.imc.is_router_node = reader.read_bool().map_field_err("router flag")?;
            bundle.imc.is_briefing = true;
        }
        v => return Err(Error::InvalidImcFormat(v)),
    }
    Ok(())
}

fn read_uint_array(
    reader: &mut Reader,
    field: &'static str,
    mut each: impl FnMut(u64),
) -> Result<(), Error> {
    let count = reader.read_array(0, u64::MAX).map_field_err(field)?;
    for _ in 0..count {
        each(reader.read_uint().map_field_err(field)?);
    }
    Ok(())
}

fn encode_state(bundle: &Bundle) -> Vec<u8> {
    drift_codec::encode::emit_array(Some(2), |a| {
        if bundle.imc.is_briefing {
            a.emit_uint(2);
            a.emit_array(Some(3), |a| {
                a.emit_bool(bundle.imc.sync_request);
                a.emit_bool(bundle.imc.sync_reply);
                a.emit_bool(bundle.imc.is_router_node);
            });
        } else if bundle.destination.is_imc_group_petition() {
            a.emit_uint(1);
            a.emit_array(Some(4), |a| {
                emit_uint_array(a, &bundle.imc.processed_regions);
                a.emit_bool(bundle.imc.sync_request);
                a.emit_bool(bundle.imc.is_proxy_petition);
                emit_uint_array(a, &bundle.imc.processed_by_nodes);
            });
        } else {
            a.emit_uint(0);
            a.emit_array(Some(2), |a| {
                emit_uint_array(a, &bundle.imc.processed_regions);
                emit_uint_array(a, &bundle.imc.processed_by_nodes);
            });
        }
    })
}

fn emit_uint_array(a: &mut drift_codec::encode::Array, values: &[u64]) {
    a.emit_array(Some(values.len()), |a| {
        for v in values {
            a.emit_uint(*v);
        }
    })
}

impl BlockProcessor for ImcStateProcessor {
    fn block_type(&self) -> u64 {
        block_type::IMC_STATE
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
                        block_type: block_type::IMC_STATE,
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
                let wanted = bundle.imc.is_briefing
                    || matches!(bundle.destination, eid::Eid::Imc { .. });
                if wanted && !xmit.contains_type(block_type::IMC_STATE) {
                    xmit.blocks.push(XmitBlock {
                        block_type: block_type::IMC_STATE,
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
        let data = encode_state(bundle);
        let block = &mut xmit.blocks[idx];
        block.bytes = encode_canonical(
            block_type::IMC_STATE,
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
        consume_canonical(bundle, block, data, |bundle, block| {
            decode_state(bundle, &mut Reader::new(block.data()))
        })
    }

    fn reload(&self, bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
        decode_state(bundle, &mut Reader::new(block.data()))
    }
}
