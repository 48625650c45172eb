use drift_bpv7::block::block_type;
use drift_bpv7::bundle::Bundle;
use drift_bpv7::creation_timestamp::CreationTimestamp;
use drift_bpv7::eid::Eid;
use drift_bpv7::link::Link;
use drift_bpv7::payload::{MemoryPayloadStore, PayloadStore};
use drift_bpv7::processor::Registry;
use drift_bpv7::reception::{self, Receiver};
use drift_bpv7::status_report::ReasonCode;
use drift_bpv7::transmission;
use drift_bpv7::{Error, crc};
use hex_literal::hex;

// ipn:1.1 -> ipn:2.1, creation (1000, 0), lifetime 86400000 ms,
// payload "hi", CRC-32C on the primary block, none on the payload
const MINIMAL_BUNDLE: [u8; 42] = hex!(
    "9f"
    "8907000282028202018202820101820100821903e8001a05265c00441dc570d4"
    "8501010000426869"
    "ff"
);

fn minimal_bundle(store: &dyn PayloadStore) -> Bundle {
    let mut bundle = Bundle::new();
    bundle.source = "ipn:1.1".parse().unwrap();
    bundle.destination = "ipn:2.1".parse().unwrap();
    bundle.report_to = Eid::Null;
    bundle.creation = CreationTimestamp {
        time_millis: 1000,
        seqno: 0,
    };
    bundle.lifetime_millis = 86_400_000;
    bundle.crc_type = crc::CrcType::Crc32Castagnoli;

    let handle = store.create().unwrap();
    store.write(handle, 0, b"hi").unwrap();
    bundle.payload.handle = Some(handle);
    bundle.payload.length = 2;
    bundle.payload.bytes_received = 2;
    bundle
}

fn emit(bundle: &mut Bundle, registry: &Registry, link: &Link, store: &dyn PayloadStore) -> Vec<u8> {
    transmission::prepare_blocks(bundle, registry, link).unwrap();
    let total = transmission::generate_blocks(bundle, registry, link).unwrap();

    let mut out = vec![0u8; total];
    let (n, last) = transmission::produce(bundle, registry, link, store, 0, &mut out).unwrap();
    assert_eq!(n, total);
    assert!(last);
    out
}

#[test]
fn golden_minimal_bundle() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let link = Link::new("clb", Eid::Null);

    let mut bundle = minimal_bundle(&store);
    let out = emit(&mut bundle, &registry, &link, &store);
    assert_eq!(out, MINIMAL_BUNDLE);
}

#[test]
fn golden_produce_in_pieces() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let link = Link::new("clb", Eid::Null);

    let mut bundle = minimal_bundle(&store);
    transmission::prepare_blocks(&mut bundle, &registry, &link).unwrap();
    let total = transmission::generate_blocks(&mut bundle, &registry, &link).unwrap();
    assert_eq!(total, MINIMAL_BUNDLE.len());
    assert_eq!(
        transmission::total_length(&bundle, &link).unwrap(),
        MINIMAL_BUNDLE.len()
    );

    // Pull the bytes out in awkward sizes
    for chunk in [1usize, 3, 7, 41] {
        let mut out = Vec::new();
        let mut last = false;
        while !last {
            let mut buf = vec![0u8; chunk];
            let (n, l) =
                transmission::produce(&bundle, &registry, &link, &store, out.len(), &mut buf)
                    .unwrap();
            out.extend_from_slice(&buf[..n]);
            last = l;
        }
        assert_eq!(out, MINIMAL_BUNDLE, "chunk size {chunk}");
    }
}

#[test]
fn golden_decode() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let receiver = Receiver::new(&registry, &store);

    let mut bundle = Bundle::new();
    let (consumed, complete) = receiver.consume(&mut bundle, &MINIMAL_BUNDLE).unwrap();
    assert_eq!(consumed, MINIMAL_BUNDLE.len());
    assert!(complete);

    assert_eq!(bundle.source, "ipn:1.1".parse().unwrap());
    assert_eq!(bundle.destination, "ipn:2.1".parse().unwrap());
    assert_eq!(bundle.report_to, Eid::Null);
    assert_eq!(bundle.creation.time_millis, 1000);
    assert_eq!(bundle.creation.seqno, 0);
    assert_eq!(bundle.lifetime_millis, 86_400_000);
    assert_eq!(bundle.payload.length, 2);
    assert_eq!(bundle.payload.bytes_received, 2);

    let mut payload = [0u8; 2];
    store
        .read(bundle.payload.handle.unwrap(), 0, &mut payload)
        .unwrap();
    assert_eq!(&payload, b"hi");

    // Sum of block lengths plus the two framing bytes
    assert_eq!(reception::total_length(&bundle), MINIMAL_BUNDLE.len());
    assert!(receiver.validate(&mut bundle).unwrap().is_none());
}

#[test]
fn byte_at_a_time() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let receiver = Receiver::new(&registry, &store);

    let mut bundle = Bundle::new();
    for (i, b) in MINIMAL_BUNDLE.iter().enumerate() {
        let (consumed, complete) = receiver
            .consume(&mut bundle, core::slice::from_ref(b))
            .unwrap();
        assert_eq!(consumed, 1, "byte {i}");
        assert_eq!(complete, i == MINIMAL_BUNDLE.len() - 1, "byte {i}");
    }

    assert_eq!(bundle.source, "ipn:1.1".parse().unwrap());
    let mut payload = [0u8; 2];
    store
        .read(bundle.payload.handle.unwrap(), 0, &mut payload)
        .unwrap();
    assert_eq!(&payload, b"hi");
}

#[test]
fn random_chunking_decodes_identically() {
    use rand::RngExt;

    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let receiver = Receiver::new(&registry, &store);
    let mut rng = rand::rng();

    for _ in 0..50 {
        let mut bundle = Bundle::new();
        let mut fed = 0usize;
        let mut complete = false;
        while fed < MINIMAL_BUNDLE.len() {
            let n = rng.random_range(1..=MINIMAL_BUNDLE.len() - fed);
            let (consumed, c) = receiver
                .consume(&mut bundle, &MINIMAL_BUNDLE[fed..fed + n])
                .unwrap();
            assert_eq!(consumed, n);
            fed += n;
            complete = c;
        }
        assert!(complete);
        assert_eq!(bundle.destination, "ipn:2.1".parse().unwrap());
        assert_eq!(bundle.payload.bytes_received, 2);
    }
}

#[test]
fn multi_block_round_trip() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let local: Eid = "ipn:10.0".parse().unwrap();
    let mut link = Link::new("clb", local.clone());
    link.add_previous_node = true;
    link.add_hop_count = Some(30);

    let mut bundle = minimal_bundle(&store);
    let out = emit(&mut bundle, &registry, &link, &store);

    // Round-trip through reception
    let rx_store = MemoryPayloadStore::new();
    let receiver = Receiver::new(&registry, &rx_store);
    let mut rx = Bundle::new();
    let (consumed, complete) = receiver.consume(&mut rx, &out).unwrap();
    assert_eq!(consumed, out.len());
    assert!(complete);
    assert!(receiver.validate(&mut rx).unwrap().is_none());

    assert_eq!(rx.previous_hop, local);
    assert_eq!(rx.hop_count.unwrap().limit, 30);
    assert_eq!(rx.hop_count.unwrap().count, 0);
    assert_eq!(rx.source, bundle.source);
    assert_eq!(reception::total_length(&rx), out.len());

    // 4 blocks: primary, previous-node, hop-count, payload; payload last
    assert_eq!(rx.recv_blocks.len(), 4);
    assert_eq!(
        rx.recv_blocks.last().unwrap().block_type,
        block_type::PAYLOAD
    );
    // Block numbers unique, fresh ones above the payload's
    let mut numbers: Vec<u64> = rx.recv_blocks.iter().map(|b| b.number).collect();
    numbers.sort_unstable();
    numbers.dedup();
    assert_eq!(numbers.len(), 4);
}

#[test]
fn corrupted_crc_aborts_bundle() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let receiver = Receiver::new(&registry, &store);

    let mut bytes = MINIMAL_BUNDLE;
    // Flip a bit inside the primary block's CRC value
    bytes[30] ^= 0x01;
    let mut bundle = Bundle::new();
    assert!(matches!(
        receiver.consume(&mut bundle, &bytes),
        Err(Error::InvalidCrc(crc::Error::IncorrectCrc))
    ));
}

#[test]
fn missing_break_is_protocol_error() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let receiver = Receiver::new(&registry, &store);

    let mut bytes = MINIMAL_BUNDLE;
    let last = bytes.len() - 1;
    bytes[last] = 0x00;
    let mut bundle = Bundle::new();
    assert!(receiver.consume(&mut bundle, &bytes).is_err());
}

#[test]
fn bad_first_byte_rejected() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let receiver = Receiver::new(&registry, &store);

    let mut bundle = Bundle::new();
    assert!(matches!(
        receiver.consume(&mut bundle, &hex!("8f00")),
        Err(Error::InvalidBundleArray)
    ));
}

#[test]
fn reactive_fragmentation_preconditions() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();

    // Deliver only the first 30 bytes: payload header seen, data short
    let receiver = Receiver::new(&registry, &store);
    let mut bundle = Bundle::new();
    let (consumed, complete) = receiver.consume(&mut bundle, &MINIMAL_BUNDLE[..40]).unwrap();
    assert_eq!(consumed, 40);
    assert!(!complete);
    assert!(bundle.payload.bytes_received < bundle.payload.length);

    // Salvageable: do-not-fragment is clear and some bytes arrived
    assert!(receiver.validate(&mut bundle).is_ok());

    // With do-not-fragment set the bundle must be deleted
    bundle.flags.do_not_fragment = true;
    assert!(matches!(
        receiver.validate(&mut bundle),
        Err(ReasonCode::BlockUnintelligible)
    ));

    // With no payload bytes at all it is unsalvageable either way
    let mut starved = Bundle::new();
    let (_, complete) = receiver.consume(&mut starved, &MINIMAL_BUNDLE[..38]).unwrap();
    assert!(!complete);
    assert_eq!(starved.payload.bytes_received, 0);
    assert!(matches!(
        receiver.validate(&mut starved),
        Err(ReasonCode::BlockUnintelligible)
    ));
}

#[test]
fn payload_header_widths_round_trip() {
    let registry = Registry::standard();
    let link = Link::new("clb", Eid::Null);

    // Payload sizes chosen so the CBOR byte-string header is 1, 2, 3
    // and 5 bytes wide
    for size in [23usize, 24, 256, 65_536] {
        let store = MemoryPayloadStore::new();
        let mut bundle = minimal_bundle(&store);
        let handle = bundle.payload.handle.unwrap();
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        store.write(handle, 0, &data).unwrap();
        bundle.payload.length = size as u64;
        bundle.payload.bytes_received = size as u64;

        let out = emit(&mut bundle, &registry, &link, &store);

        let rx_store = MemoryPayloadStore::new();
        let receiver = Receiver::new(&registry, &rx_store);
        let mut rx = Bundle::new();
        let (consumed, complete) = receiver.consume(&mut rx, &out).unwrap();
        assert_eq!(consumed, out.len(), "payload size {size}");
        assert!(complete);
        assert_eq!(rx.payload.length, size as u64);

        let mut readback = vec![0u8; size];
        rx_store
            .read(rx.payload.handle.unwrap(), 0, &mut readback)
            .unwrap();
        assert_eq!(readback, data, "payload size {size}");
    }
}

#[test]
fn reload_rebuilds_decoded_state() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let local: Eid = "ipn:10.0".parse().unwrap();
    let mut link = Link::new("clb", local.clone());
    link.add_previous_node = true;
    link.add_hop_count = Some(12);

    let mut bundle = minimal_bundle(&store);
    let out = emit(&mut bundle, &registry, &link, &store);

    let rx_store = MemoryPayloadStore::new();
    let receiver = Receiver::new(&registry, &rx_store);
    let mut rx = Bundle::new();
    receiver.consume(&mut rx, &out).unwrap();

    // Wipe the unpacked state, as if only the block list came back
    // from the durable store
    rx.previous_hop = Eid::Null;
    rx.hop_count = None;
    rx.source = Eid::Null;
    rx.lifetime_millis = 0;

    reception::reload(&mut rx, &registry).unwrap();
    assert_eq!(rx.previous_hop, local);
    assert_eq!(rx.hop_count.unwrap().limit, 12);
    assert_eq!(rx.source, "ipn:1.1".parse().unwrap());
    assert_eq!(rx.lifetime_millis, 86_400_000);
}

#[test]
fn unknown_block_preserved_through_forwarding() {
    let store = MemoryPayloadStore::new();
    let registry = Registry::standard();
    let link = Link::new("clb", Eid::Null);

    // Inject an opaque API block of an unregistered type
    let mut bundle = minimal_bundle(&store);
    bundle.api_blocks.push(drift_bpv7::bundle::ApiBlock {
        block_type: 99,
        flags: Default::default(),
        crc_type: crc::CrcType::Crc16X25,
        data: b"opaque-data".to_vec(),
    });
    let out = emit(&mut bundle, &registry, &link, &store);

    // Receive it
    let rx_store = MemoryPayloadStore::new();
    let receiver = Receiver::new(&registry, &rx_store);
    let mut rx = Bundle::new();
    let (_, complete) = receiver.consume(&mut rx, &out).unwrap();
    assert!(complete);
    let unknown = rx
        .recv_blocks
        .iter()
        .find(|b| b.block_type == 99)
        .expect("unknown block dropped");
    assert_eq!(unknown.data(), b"opaque-data");

    // Forward it: the unknown block's bytes ride along verbatim
    let fwd = emit(&mut rx, &registry, &link, &rx_store);
    let receiver2 = Receiver::new(&registry, &rx_store);
    let mut rx2 = Bundle::new();
    let (_, complete) = receiver2.consume(&mut rx2, &fwd).unwrap();
    assert!(complete);
    assert_eq!(
        rx2.recv_blocks
            .iter()
            .find(|b| b.block_type == 99)
            .unwrap()
            .data(),
        b"opaque-data"
    );
}
