use super::decode::*;
use hex_literal::hex;

#[test]
fn uints() {
    assert_eq!(parse::<u64>(&hex!("00")).unwrap(), 0);
    assert_eq!(parse::<u64>(&hex!("17")).unwrap(), 23);
    assert_eq!(parse::<u64>(&hex!("1818")).unwrap(), 24);
    assert_eq!(parse::<u64>(&hex!("190100")).unwrap(), 256);
    assert_eq!(parse::<u64>(&hex!("1a05265c00")).unwrap(), 86400000);
    assert_eq!(
        parse::<u64>(&hex!("1bffffffffffffffff")).unwrap(),
        u64::MAX
    );
}

#[test]
fn uint_narrowing() {
    assert_eq!(parse::<u8>(&hex!("18ff")).unwrap(), 255);
    assert!(matches!(
        parse::<u8>(&hex!("190100")),
        Err(Error::TryFromIntError(_))
    ));
}

#[test]
fn eof_signalling() {
    // Truncated 2-byte uint argument
    let mut r = Reader::new(&hex!("19 01"));
    assert!(matches!(r.read_uint(), Err(Error::NeedMoreData(1))));
    // Cursor unchanged, retry with full data succeeds
    assert_eq!(r.offset(), 0);

    let mut r = Reader::new(&hex!("190100"));
    assert_eq!(r.read_uint().unwrap(), 256);
    assert_eq!(r.offset(), 3);

    // Truncated byte string body
    let mut r = Reader::new(&hex!("44 0102"));
    assert!(matches!(r.read_bytes(), Err(Error::NeedMoreData(2))));
    assert_eq!(r.offset(), 0);

    // Empty input
    let mut r = Reader::new(&[]);
    assert!(matches!(r.read_uint(), Err(Error::NeedMoreData(1))));
}

#[test]
fn byte_strings() {
    let data = hex!("426869");
    let mut r = Reader::new(&data);
    let range = r.read_bytes().unwrap();
    assert_eq!(&data[range], b"hi");
    assert_eq!(r.remaining(), 0);

    // Header-only read leaves the cursor at the content
    let mut r = Reader::new(&data);
    assert_eq!(r.read_bytes_header().unwrap(), 2);
    assert_eq!(r.offset(), 1);
}

#[test]
fn text_strings() {
    let mut r = Reader::new(&hex!("6449455446"));
    assert_eq!(r.read_text().unwrap(), "IETF");

    // Indefinite-length strings are a protocol error
    let mut r = Reader::new(&hex!("7f6161ff"));
    assert!(matches!(r.read_text(), Err(Error::IndefiniteLength)));
    let mut r = Reader::new(&hex!("5f4101ff"));
    assert!(matches!(r.read_bytes(), Err(Error::IndefiniteLength)));
}

#[test]
fn arrays() {
    let mut r = Reader::new(&hex!("820102"));
    assert_eq!(r.read_array(2, 2).unwrap(), 2);
    assert_eq!(r.read_uint().unwrap(), 1);
    assert_eq!(r.read_uint().unwrap(), 2);

    // Count outside permitted range
    let mut r = Reader::new(&hex!("820102"));
    assert!(matches!(
        r.read_array(3, 4),
        Err(Error::InvalidArrayLength(2, 3, 4))
    ));
    assert_eq!(r.offset(), 0);
}

#[test]
fn open_array_and_break() {
    let mut r = Reader::new(&hex!("9f01ff"));
    r.read_open_array().unwrap();
    assert_eq!(r.read_uint().unwrap(), 1);
    r.read_break().unwrap();
    assert_eq!(r.remaining(), 0);

    let mut r = Reader::new(&hex!("8101"));
    assert!(matches!(
        r.read_open_array(),
        Err(Error::IncorrectType(_, 4))
    ));

    let mut r = Reader::new(&hex!("00"));
    assert!(matches!(r.read_break(), Err(Error::MissingBreak(0))));
}

#[test]
fn type_mismatches() {
    let mut r = Reader::new(&hex!("426869"));
    assert!(matches!(r.read_uint(), Err(Error::IncorrectType(_, 2))));
    assert_eq!(r.offset(), 0);

    let mut r = Reader::new(&hex!("00"));
    assert!(matches!(r.read_bytes(), Err(Error::IncorrectType(_, 0))));
    assert!(matches!(r.read_bool(), Err(Error::IncorrectType(_, 0))));
}

#[test]
fn reserved_minor_values() {
    for b in [0x1c, 0x1d, 0x1e] {
        let data = [b, 0, 0, 0];
        let mut r = Reader::new(&data);
        assert!(matches!(r.read_uint(), Err(Error::InvalidMinorValue(_))));
    }
}

#[test]
fn bools() {
    assert!(!parse::<bool>(&hex!("f4")).unwrap());
    assert!(parse::<bool>(&hex!("f5")).unwrap());
    assert!(matches!(
        parse::<bool>(&hex!("f6")),
        Err(Error::InvalidSimpleValue(22))
    ));
}

#[test]
fn header_widths_round_trip() {
    // Values at each header-width boundary
    for v in [23u64, 24, 255, 256, 65535, 65536, u32::MAX as u64, u64::MAX] {
        let bytes = super::encode::emit(&v);
        assert_eq!(parse::<u64>(&bytes).unwrap(), v);
    }
}
