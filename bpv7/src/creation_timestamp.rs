/*!
Bundle creation timestamps: a DTN millisecond time paired with a
per-source sequence number that disambiguates bundles created within
the same millisecond.
*/

use drift_codec::{decode, encode};
use std::sync::atomic::{AtomicU64, Ordering};

// DTN time epoch (2000-01-01T00:00:00Z) as a Unix timestamp
const DTN_EPOCH_SECS: u64 = 946_684_800;

#[derive(Default, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreationTimestamp {
    pub time_millis: u64,
    pub seqno: u64,
}

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);
static SEQNO: AtomicU64 = AtomicU64::new(0);

impl CreationTimestamp {
    /// A timestamp for a bundle created now, with a sequence number
    /// that increments within a single millisecond and resets when the
    /// clock moves on.
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(DTN_EPOCH_SECS * 1000);

        let prev = LAST_MILLIS.swap(millis, Ordering::Relaxed);
        let seqno = if prev == millis {
            SEQNO.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            SEQNO.store(0, Ordering::Relaxed);
            0
        };
        Self {
            time_millis: millis,
            seqno,
        }
    }

    /// A zero time means the source has no clock; receivers must rely
    /// on the bundle-age block instead.
    pub fn is_clocked(&self) -> bool {
        self.time_millis != 0
    }
}

impl encode::ToCbor for CreationTimestamp {
    fn to_cbor(&self, encoder: &mut encode::Encoder) {
        encoder.emit_array(Some(2), |a| {
            a.emit_uint(self.time_millis);
            a.emit_uint(self.seqno);
        })
    }
}

impl decode::FromCbor for CreationTimestamp {
    type Error = decode::Error;

    fn from_cbor(reader: &mut decode::Reader) -> Result<Self, Self::Error> {
        let start = reader.offset();
        let inner = |reader: &mut decode::Reader| {
            reader.read_array(2, 2)?;
            Ok(Self {
                time_millis: reader.read_uint()?,
                seqno: reader.read_uint()?,
            })
        };
        inner(reader).map_err(|e| {
            reader.seek(start);
            e
        })
    }
}

impl std::fmt::Display for CreationTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.time_millis, self.seqno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn cbor_round_trip() {
        let ts = CreationTimestamp {
            time_millis: 1000,
            seqno: 0,
        };
        let bytes = encode::emit(&ts);
        assert_eq!(bytes, hex!("821903e800"));
        assert_eq!(decode::parse::<CreationTimestamp>(&bytes).unwrap(), ts);
    }

    #[test]
    fn sequence_numbers_distinct() {
        let a = CreationTimestamp::now();
        let b = CreationTimestamp::now();
        assert!(b > a);
    }
}
