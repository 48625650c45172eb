/*!
The primary block: an 8- to 11-element array carrying the version,
flags, CRC type, the three EIDs, the creation timestamp, the lifetime
and optionally the fragment fields and CRC. There is exactly one per
bundle, first, with implicit block number 0.
*/

use super::*;
use bundle::{BundleFlags, FragmentInfo};
use creation_timestamp::CreationTimestamp;
use eid::Eid;

pub struct PrimaryProcessor;

#[derive(Debug)]
struct DecodedPrimary {
    flags: BundleFlags,
    crc_type: crc::CrcType,
    destination: Eid,
    source: Eid,
    report_to: Eid,
    creation: CreationTimestamp,
    lifetime_millis: u64,
    fragment: Option<FragmentInfo>,
    crc_length: usize,
    total_length: usize,
}

fn decode_primary(buf: &[u8]) -> Result<DecodedPrimary, Error> {
    let mut reader = Reader::new(buf);
    let count = reader
        .read_array(8, 11)
        .map_field_err("primary block array")?;

    let version = reader.read_uint().map_field_err("version")?;
    if version != 7 {
        return Err(Error::InvalidVersion(version));
    }

    let flags: BundleFlags = reader
        .read_uint()
        .map_field_err("bundle processing control flags")?
        .into();
    let crc_type_code = reader.read_uint().map_field_err("CRC type")?;
    let crc_type: crc::CrcType = crc_type_code.try_into()?;

    // The element count implies the trailing fields; a mismatch with
    // the flags is a protocol error.
    let expected = 8
        + if flags.is_fragment { 2 } else { 0 }
        + if crc_type == crc::CrcType::None { 0 } else { 1 };
    if count != expected {
        return Err(if count < 10 && flags.is_fragment || count >= 10 && !flags.is_fragment {
            Error::InvalidFragmentInfo
        } else {
            Error::InvalidBlockArraySize(count, crc_type_code)
        });
    }

    let destination = reader
        .read::<Eid>()
        .map_err(Error::from)
        .map_field_err("destination EID")?;
    let source = reader
        .read::<Eid>()
        .map_err(Error::from)
        .map_field_err("source EID")?;
    let report_to = reader
        .read::<Eid>()
        .map_err(Error::from)
        .map_field_err("report-to EID")?;
    let creation = reader
        .read::<CreationTimestamp>()
        .map_field_err("creation timestamp")?;
    let lifetime_millis = reader.read_uint().map_field_err("lifetime")?;

    let fragment = if flags.is_fragment {
        Some(FragmentInfo {
            offset: reader.read_uint().map_field_err("fragment offset")?,
            total_adu_length: reader
                .read_uint()
                .map_field_err("total application data unit length")?,
        })
    } else {
        None
    };

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

    Ok(DecodedPrimary {
        flags,
        crc_type,
        destination,
        source,
        report_to,
        creation,
        lifetime_millis,
        fragment,
        crc_length,
        total_length: reader.offset(),
    })
}

fn apply_primary(bundle: &mut Bundle, decoded: DecodedPrimary) {
    bundle.flags = decoded.flags;
    bundle.crc_type = decoded.crc_type;
    bundle.destination = decoded.destination;
    bundle.source = decoded.source;
    bundle.report_to = decoded.report_to;
    bundle.creation = decoded.creation;
    bundle.lifetime_millis = decoded.lifetime_millis;
    bundle.fragment = decoded.fragment;
}

/// Emits the primary block for `bundle`, CRC included.
pub(crate) fn emit_primary(bundle: &Bundle) -> Vec<u8> {
    let count = 8
        + if bundle.fragment.is_some() { 2 } else { 0 }
        + if bundle.crc_type == crc::CrcType::None {
            0
        } else {
            1
        };
    let body = drift_codec::encode::emit_array(Some(count), |a| {
        a.emit_uint(7);
        a.emit(&bundle.flags);
        a.emit(&bundle.crc_type);
        a.emit(&bundle.destination);
        a.emit(&bundle.source);
        a.emit(&bundle.report_to);
        a.emit(&bundle.creation);
        a.emit_uint(bundle.lifetime_millis);
        if let Some(fragment) = &bundle.fragment {
            a.emit_uint(fragment.offset);
            a.emit_uint(fragment.total_adu_length);
        }
        if bundle.crc_type != crc::CrcType::None {
            a.skip_value();
        }
    });
    crc::append_crc_value(bundle.crc_type, body)
}

impl BlockProcessor for PrimaryProcessor {
    fn block_type(&self) -> u64 {
        block_type::PRIMARY
    }

    fn prepare(
        &self,
        bundle: &Bundle,
        xmit: &mut XmitBlocks,
        _source: Option<&BlockInfo>,
        _link: &Link,
        _owner: ListOwner,
    ) -> Result<(), Error> {
        // Always regenerated from the bundle fields, always first
        if xmit.contains_type(block_type::PRIMARY) {
            return Ok(());
        }
        xmit.blocks.insert(
            0,
            XmitBlock {
                block_type: block_type::PRIMARY,
                number: 0,
                flags: BlockFlags::default(),
                crc_type: bundle.crc_type,
                source: None,
                api_data: None,
                bytes: Vec::new(),
                data_length: 0,
            },
        );
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
        xmit.blocks[idx].bytes = emit_primary(bundle);
        Ok(())
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        data: &[u8],
        _store: &dyn PayloadStore,
    ) -> Result<usize, Error> {
        let consumed = consume_chunked(block, data, |block, buf| {
            let decoded = decode_primary(buf)?;
            block.block_type = block_type::PRIMARY;
            block.number = 0;
            block.crc_type = decoded.crc_type;
            block.data_offset = 0;
            block.data_length = decoded.total_length - decoded.crc_length;
            block.crc_length = decoded.crc_length;
            Ok(decoded.total_length)
        })?;

        if block.complete {
            apply_primary(bundle, decode_primary(&block.contents)?);
        }
        Ok(consumed)
    }

    fn reload(&self, bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
        apply_primary(bundle, decode_primary(&block.contents)?);
        Ok(())
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _block: &BlockInfo,
    ) -> Result<Option<ReasonCode>, ReasonCode> {
        // Administrative bundles must not request status reports
        if bundle.flags.is_admin_record && bundle.flags.any_report_requested() {
            return Err(ReasonCode::BlockUnintelligible);
        }

        // An anonymous source may not request reports or be fragmented
        if bundle.source.is_null()
            && (bundle.flags.is_fragment
                || !bundle.flags.do_not_fragment
                || bundle.flags.any_report_requested())
        {
            return Err(ReasonCode::BlockUnintelligible);
        }

        if !bundle.destination.is_valid() || !bundle.source.is_valid() {
            return Err(ReasonCode::DestinationEndpointUnintelligible);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bundle() -> Bundle {
        Bundle {
            source: "ipn:1.1".parse().unwrap(),
            destination: "ipn:2.1".parse().unwrap(),
            report_to: Eid::Null,
            creation: CreationTimestamp {
                time_millis: 1000,
                seqno: 0,
            },
            lifetime_millis: 86_400_000,
            crc_type: crc::CrcType::Crc32Castagnoli,
            ..Default::default()
        }
    }

    #[test]
    fn emit_decode_round_trip() {
        let bundle = test_bundle();
        let bytes = emit_primary(&bundle);
        let decoded = decode_primary(&bytes).unwrap();
        assert_eq!(decoded.source, bundle.source);
        assert_eq!(decoded.destination, bundle.destination);
        assert_eq!(decoded.creation, bundle.creation);
        assert_eq!(decoded.lifetime_millis, bundle.lifetime_millis);
        assert_eq!(decoded.total_length, bytes.len());
        assert!(decoded.fragment.is_none());
    }

    #[test]
    fn corrupt_crc_rejected() {
        let mut bytes = emit_primary(&test_bundle());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode_primary(&bytes),
            Err(Error::InvalidCrc(crc::Error::IncorrectCrc))
        ));
    }

    #[test]
    fn truncation_is_eof() {
        let bytes = emit_primary(&test_bundle());
        for cut in 0..bytes.len() {
            assert!(
                decode_primary(&bytes[..cut]).unwrap_err().is_eof(),
                "cut at {cut}"
            );
        }
        assert!(decode_primary(&bytes).is_ok());
    }

    #[test]
    fn fragment_fields() {
        let mut bundle = test_bundle();
        bundle.flags.is_fragment = true;
        bundle.fragment = Some(FragmentInfo {
            offset: 10,
            total_adu_length: 100,
        });
        let bytes = emit_primary(&bundle);
        let decoded = decode_primary(&bytes).unwrap();
        assert_eq!(decoded.fragment, bundle.fragment);
    }

    #[test]
    fn wrong_version_rejected() {
        let body = drift_codec::encode::emit_array(Some(8), |a| {
            a.emit_uint(6);
            a.emit_uint(0);
            a.emit_uint(0);
            a.emit(&Eid::Null);
            a.emit(&Eid::Null);
            a.emit(&Eid::Null);
            a.emit(&CreationTimestamp::default());
            a.emit_uint(0);
        });
        assert!(matches!(
            decode_primary(&body),
            Err(Error::InvalidVersion(6))
        ));
    }
}
