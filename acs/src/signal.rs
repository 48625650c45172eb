/*!
The aggregate custody signal payload codec.

```text
1 byte  admin type (4) << 4 | flags
1 byte  success << 7 | reason & 0x7f
SDNV*   (diff_to_prev_right, length_of_fill)+   in left-edge order
```

Parsing reconstructs the absolute runs by accumulating the deltas, and
defends against malicious payloads: a run can neither start at custody
id zero, overflow a 64-bit accumulator, nor acknowledge ids beyond
what this node has actually issued (a single crafted entry could
otherwise wipe every custody bundle and pin the daemon in a
near-endless release loop).
*/

use drift_bpv7::status_report::CustodyReason;
use drift_codec::sdnv;
use std::collections::BTreeMap;
use thiserror::Error;

/// Administrative record type code for aggregate custody signals.
pub const ADMIN_AGGREGATE_CUSTODY_SIGNAL: u8 = 4;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Aggregate custody signal payload too short")]
    TooShort,

    #[error("Not an aggregate custody signal: admin type {0}")]
    WrongAdminType(u8),

    #[error("Aggregate custody signal with no entries")]
    Empty,

    #[error("Custody id zero is never issued")]
    ZeroCustodyId,

    #[error("Fill length overflows a 64-bit accumulator")]
    FillOverflow,

    #[error("Acknowledges custody ids beyond those issued")]
    BeyondIssued,

    #[error(transparent)]
    BadSdnv(#[from] sdnv::Error),
}

/// A decoded aggregate custody signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcsData {
    pub succeeded: bool,
    pub reason: CustodyReason,
    /// Acknowledged runs: left edge to length of fill.
    pub entries: BTreeMap<u64, u64>,
}

impl AcsData {
    /// Every custody id covered, in ascending order.
    pub fn iter_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries
            .iter()
            .flat_map(|(left, fill)| (*left..left + fill))
    }
}

/// Encodes the payload for a pending accumulation. Entries emit in
/// left-edge order as delta pairs.
pub fn encode_acs(pacs: &super::pending::PendingAcs) -> Vec<u8> {
    let mut payload = Vec::with_capacity(pacs.payload_length());
    payload.push(ADMIN_AGGREGATE_CUSTODY_SIGNAL << 4);
    payload.push(((pacs.succeeded as u8) << 7) | (u8::from(pacs.reason) & 0x7f));

    for entry in pacs.entries().values() {
        sdnv::encode(entry.diff_to_prev_right, &mut payload);
        sdnv::encode(entry.length_of_fill, &mut payload);
    }
    payload
}

/// Parses and validates an aggregate custody signal payload.
/// `last_custody_id` is the highest id this node has issued.
pub fn parse_acs(payload: &[u8], last_custody_id: u64) -> Result<AcsData, Error> {
    let Some(&admin) = payload.first() else {
        return Err(Error::TooShort);
    };
    if admin >> 4 != ADMIN_AGGREGATE_CUSTODY_SIGNAL {
        return Err(Error::WrongAdminType(admin >> 4));
    }

    let Some(&status) = payload.get(1) else {
        return Err(Error::TooShort);
    };
    let succeeded = status >> 7 != 0;
    let reason = CustodyReason::from(status & 0x7f);

    let mut entries = BTreeMap::new();
    let mut rest = &payload[2..];
    let mut right_edge = 0u64;
    while !rest.is_empty() {
        let (diff, n) = sdnv::decode(rest)?;
        rest = &rest[n..];
        let (fill, n) = sdnv::decode(rest)?;
        rest = &rest[n..];

        let left_edge = right_edge.checked_add(diff).ok_or(Error::FillOverflow)?;
        if left_edge == 0 {
            return Err(Error::ZeroCustodyId);
        }
        if fill == 0 || fill > u64::MAX - left_edge + 1 {
            return Err(Error::FillOverflow);
        }
        if left_edge > last_custody_id || fill > last_custody_id - left_edge + 1 {
            return Err(Error::BeyondIssued);
        }

        entries.insert(left_edge, fill);
        right_edge = left_edge + (fill - 1);
    }

    if entries.is_empty() {
        return Err(Error::Empty);
    }
    Ok(AcsData {
        succeeded,
        reason,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_bpv7::eid::Eid;

    fn pacs_with(ids: &[u64]) -> super::super::pending::PendingAcs {
        let mut pacs = super::super::pending::PendingAcs::new(
            1,
            Eid::Null,
            true,
            CustodyReason::NoAdditionalInformation,
        );
        for id in ids {
            pacs.add_custody_id(*id);
        }
        pacs
    }

    #[test]
    fn encode_parse_round_trip() {
        let pacs = pacs_with(&[1, 2, 3, 10, 11, 40]);
        let payload = encode_acs(&pacs);
        assert_eq!(payload.len(), pacs.payload_length());

        let data = parse_acs(&payload, 100).unwrap();
        assert!(data.succeeded);
        assert_eq!(data.reason, CustodyReason::NoAdditionalInformation);
        assert_eq!(
            data.entries,
            BTreeMap::from([(1, 3), (10, 2), (40, 1)])
        );
        assert_eq!(
            data.iter_ids().collect::<Vec<_>>(),
            vec![1, 2, 3, 10, 11, 40]
        );
    }

    #[test]
    fn failure_signal_carries_reason() {
        let mut pacs = pacs_with(&[7]);
        pacs.succeeded = false;
        pacs.reason = CustodyReason::DepletedStorage;
        let payload = encode_acs(&pacs);
        assert_eq!(payload[1], u8::from(CustodyReason::DepletedStorage));

        let data = parse_acs(&payload, 10).unwrap();
        assert!(!data.succeeded);
        assert_eq!(data.reason, CustodyReason::DepletedStorage);
    }

    #[test]
    fn wrong_admin_type_rejected() {
        let payload = [1u8 << 4, 0x80, 0x01, 0x01];
        assert!(matches!(
            parse_acs(&payload, 100),
            Err(Error::WrongAdminType(1))
        ));
    }

    #[test]
    fn zero_left_edge_rejected() {
        // diff 0 from initial right edge 0 gives custody id 0
        let payload = [ADMIN_AGGREGATE_CUSTODY_SIGNAL << 4, 0x80, 0x00, 0x01];
        assert!(matches!(parse_acs(&payload, 100), Err(Error::ZeroCustodyId)));
    }

    #[test]
    fn empty_signal_rejected() {
        let payload = [ADMIN_AGGREGATE_CUSTODY_SIGNAL << 4, 0x80];
        assert!(matches!(parse_acs(&payload, 100), Err(Error::Empty)));
    }

    #[test]
    fn acknowledging_beyond_issued_rejected() {
        // left edge 1, fill 1000, but only 10 ids ever issued
        let mut payload = vec![ADMIN_AGGREGATE_CUSTODY_SIGNAL << 4, 0x80];
        drift_codec::sdnv::encode(1, &mut payload);
        drift_codec::sdnv::encode(1000, &mut payload);
        assert!(matches!(parse_acs(&payload, 10), Err(Error::BeyondIssued)));

        // A single malicious entry covering nearly the whole id space
        let mut payload = vec![ADMIN_AGGREGATE_CUSTODY_SIGNAL << 4, 0x80];
        drift_codec::sdnv::encode(1, &mut payload);
        drift_codec::sdnv::encode(u64::MAX, &mut payload);
        assert!(parse_acs(&payload, 1000).is_err());
    }

    #[test]
    fn truncated_sdnv_rejected() {
        let payload = [ADMIN_AGGREGATE_CUSTODY_SIGNAL << 4, 0x80, 0x81];
        assert!(matches!(parse_acs(&payload, 100), Err(Error::BadSdnv(_))));
    }
}
