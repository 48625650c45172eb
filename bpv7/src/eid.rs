/*!
Endpoint identifiers.

An EID is a tagged union over the `dtn`, `ipn` and `imc` schemes,
encoded on the wire as a two-element CBOR array `[scheme-code, ssp]`.
The sentinel `dtn:none` encodes as `[1, 0]`.
*/

use drift_codec::{decode, encode};
use thiserror::Error;

const DTN_SCHEME: u64 = 1;
const IPN_SCHEME: u64 = 2;
// Experimental scheme code used for interplanetary multicast
const IMC_SCHEME: u64 = 4;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported EID scheme code {0}")]
    UnsupportedScheme(u64),

    #[error("Invalid dtn scheme EID: {0}")]
    DtnInvalid(String),

    #[error("Invalid {0} scheme node/service pair")]
    InvalidSsp(&'static str),

    #[error(transparent)]
    InvalidCbor(#[from] decode::Error),
}

impl Error {
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::InvalidCbor(e) if e.is_eof())
    }
}

#[derive(Default, Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Eid {
    /// The null endpoint, `dtn:none`.
    #[default]
    Null,
    /// A `dtn:` scheme EID; the stored string is the scheme-specific part.
    Dtn(String),
    /// An `ipn:` scheme EID.
    Ipn { node: u64, service: u64 },
    /// An `imc:` multicast EID keyed by group number.
    Imc { group: u64, service: u64 },
}

impl Eid {
    pub fn is_null(&self) -> bool {
        matches!(self, Eid::Null)
    }

    /// Scheme-aware validity: the null endpoint is valid, `dtn` SSPs
    /// must be non-empty, and numeric schemes are valid by construction.
    pub fn is_valid(&self) -> bool {
        match self {
            Eid::Dtn(ssp) => !ssp.is_empty() && ssp != "none",
            _ => true,
        }
    }

    /// True for the administrative multicast group destination `imc:0.0`.
    pub fn is_imc_group_petition(&self) -> bool {
        matches!(self, Eid::Imc { group: 0, service: 0 })
    }
}

impl encode::ToCbor for Eid {
    fn to_cbor(&self, encoder: &mut encode::Encoder) {
        encoder.emit_array(Some(2), |a| match self {
            Eid::Null => {
                a.emit_uint(DTN_SCHEME);
                a.emit_uint(0);
            }
            Eid::Dtn(ssp) => {
                a.emit_uint(DTN_SCHEME);
                a.emit_text(ssp);
            }
            Eid::Ipn { node, service } => {
                a.emit_uint(IPN_SCHEME);
                a.emit_array(Some(2), |a| {
                    a.emit_uint(*node);
                    a.emit_uint(*service);
                });
            }
            Eid::Imc { group, service } => {
                a.emit_uint(IMC_SCHEME);
                a.emit_array(Some(2), |a| {
                    a.emit_uint(*group);
                    a.emit_uint(*service);
                });
            }
        })
    }
}

impl decode::FromCbor for Eid {
    type Error = Error;

    fn from_cbor(reader: &mut decode::Reader) -> Result<Self, Self::Error> {
        let start = reader.offset();
        let inner = |reader: &mut decode::Reader| {
            reader.read_array(2, 2)?;
            match reader.read_uint()? {
                DTN_SCHEME => {
                    // dtn:none is the uint 0; anything else is text
                    match reader.read_uint() {
                        Ok(0) => Ok(Eid::Null),
                        Ok(v) => Err(Error::DtnInvalid(format!("dtn:{v}"))),
                        Err(decode::Error::IncorrectType(_, 3)) => {
                            Ok(Eid::Dtn(reader.read_text()?.to_string()))
                        }
                        Err(e) => Err(e.into()),
                    }
                }
                IPN_SCHEME => {
                    reader.read_array(2, 2)?;
                    Ok(Eid::Ipn {
                        node: reader.read_uint()?,
                        service: reader.read_uint()?,
                    })
                }
                IMC_SCHEME => {
                    reader.read_array(2, 2)?;
                    Ok(Eid::Imc {
                        group: reader.read_uint()?,
                        service: reader.read_uint()?,
                    })
                }
                scheme => Err(Error::UnsupportedScheme(scheme)),
            }
        };
        inner(reader).map_err(|e| {
            reader.seek(start);
            e
        })
    }
}

impl std::str::FromStr for Eid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(ssp) = s.strip_prefix("dtn:") {
            if ssp == "none" {
                Ok(Eid::Null)
            } else if ssp.is_empty() {
                Err(Error::DtnInvalid(s.to_string()))
            } else {
                Ok(Eid::Dtn(ssp.to_string()))
            }
        } else if let Some(ssp) = s.strip_prefix("ipn:") {
            let (node, service) = split_numeric_ssp(ssp).ok_or(Error::InvalidSsp("ipn"))?;
            Ok(Eid::Ipn { node, service })
        } else if let Some(ssp) = s.strip_prefix("imc:") {
            let (group, service) = split_numeric_ssp(ssp).ok_or(Error::InvalidSsp("imc"))?;
            Ok(Eid::Imc { group, service })
        } else {
            Err(Error::DtnInvalid(s.to_string()))
        }
    }
}

fn split_numeric_ssp(ssp: &str) -> Option<(u64, u64)> {
    let (a, b) = ssp.split_once('.')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

impl std::fmt::Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Eid::Null => f.write_str("dtn:none"),
            Eid::Dtn(ssp) => write!(f, "dtn:{ssp}"),
            Eid::Ipn { node, service } => write!(f, "ipn:{node}.{service}"),
            Eid::Imc { group, service } => write!(f, "imc:{group}.{service}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn str_round_trip() {
        for s in ["dtn:none", "dtn://node/svc", "ipn:1.1", "imc:42.7"] {
            let eid: Eid = s.parse().unwrap();
            assert_eq!(eid.to_string(), s);
        }
        assert!("dtn:".parse::<Eid>().is_err());
        assert!("ipn:1".parse::<Eid>().is_err());
        assert!("tcp:1.2".parse::<Eid>().is_err());
    }

    #[test]
    fn cbor_forms() {
        assert_eq!(encode::emit(&Eid::Null), hex!("820100"));
        assert_eq!(
            encode::emit(&Eid::Ipn {
                node: 2,
                service: 1
            }),
            hex!("8202820201")
        );
    }

    #[test]
    fn cbor_round_trip() {
        for eid in [
            Eid::Null,
            Eid::Dtn("//node/svc".to_string()),
            Eid::Ipn {
                node: 977000,
                service: 3,
            },
            Eid::Imc {
                group: 0,
                service: 0,
            },
        ] {
            let bytes = encode::emit(&eid);
            assert_eq!(decode::parse::<Eid>(&bytes).unwrap(), eid);
        }
    }

    #[test]
    fn unsupported_scheme() {
        // [3, 0]
        assert!(matches!(
            decode::parse::<Eid>(&hex!("820300")),
            Err(Error::UnsupportedScheme(3))
        ));
    }

    #[test]
    fn eof_resets_cursor() {
        let bytes = encode::emit(&Eid::Ipn {
            node: 977000,
            service: 3,
        });
        let mut r = decode::Reader::new(&bytes[..4]);
        assert!(r.read::<Eid>().unwrap_err().is_eof());
        assert_eq!(r.offset(), 0);
    }
}
