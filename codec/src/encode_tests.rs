use super::encode::*;
use hex_literal::hex;

#[test]
fn uints() {
    assert_eq!(emit(&0u64), hex!("00"));
    assert_eq!(emit(&23u64), hex!("17"));
    assert_eq!(emit(&24u64), hex!("1818"));
    assert_eq!(emit(&255u64), hex!("18ff"));
    assert_eq!(emit(&256u64), hex!("190100"));
    assert_eq!(emit(&1000u64), hex!("1903e8"));
    assert_eq!(emit(&86400000u64), hex!("1a05265c00"));
    assert_eq!(emit(&u64::MAX), hex!("1bffffffffffffffff"));
}

#[test]
fn bools() {
    assert_eq!(emit(&false), hex!("f4"));
    assert_eq!(emit(&true), hex!("f5"));
}

#[test]
fn strings() {
    let mut e = Encoder::new();
    e.emit_bytes(b"hi".as_slice());
    assert_eq!(e.build(), hex!("426869"));

    let mut e = Encoder::new();
    e.emit_text("IETF");
    assert_eq!(e.build(), hex!("6449455446"));

    let mut e = Encoder::new();
    let r = e.emit_bytes(&[0u8; 4]);
    assert_eq!(r, 1..5);
}

#[test]
fn definite_arrays() {
    let bytes = emit_array(Some(2), |a| {
        a.emit_uint(1);
        a.emit_uint(2);
    });
    assert_eq!(bytes, hex!("820102"));

    // 24-element header widens
    let bytes = emit_array(Some(25), |a| {
        for i in 0..25u64 {
            a.emit_uint(i);
        }
    });
    assert_eq!(bytes[0..2], hex!("9819"));
}

#[test]
fn indefinite_arrays() {
    let bytes = emit_array(None, |a| {
        a.emit_uint(1);
        a.emit_text("a");
    });
    assert_eq!(bytes, hex!("9f016161ff"));
}

#[test]
#[should_panic(expected = "short of items")]
fn short_array_panics() {
    emit_array(Some(3), |a| {
        a.emit_uint(1);
    });
}

#[test]
#[should_panic(expected = "Too many items")]
fn long_array_panics() {
    emit_array(Some(1), |a| {
        a.emit_uint(1);
        a.emit_uint(2);
    });
}

#[test]
fn nested() {
    // [2, [2, 1]] -- an ipn EID
    let bytes = emit_array(Some(2), |a| {
        a.emit_uint(2);
        a.emit_array(Some(2), |a| {
            a.emit_uint(2);
            a.emit_uint(1);
        });
    });
    assert_eq!(bytes, hex!("8202820201"));
}

#[test]
fn raw_splice() {
    let inner = emit_array(Some(1), |a| a.emit_uint(7));
    let mut e = Encoder::new();
    e.emit_array(None, |a| {
        a.emit_raw(&inner);
    });
    assert_eq!(e.build(), hex!("9f8107ff"));
}
