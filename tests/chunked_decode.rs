//! Decoding across arbitrary chunk boundaries.

mod common;

use common::*;
use gridwire::protocol::system::{RecoveryAckMessage, RECOVERY_ACK_TYPE};
use gridwire::{DirectParser, Message, Parser, ReaderLimits, Session, SessionId, WireError};
use proptest::prelude::*;
use uuid::Uuid;

/// Feed `chunks` in order, draining each before the next arrives.
fn decode_chunks(parser: &DirectParser, chunks: &[&[u8]]) -> Vec<Box<dyn Message>> {
    let mut session = Session::new(SessionId(1));
    let mut out = Vec::new();
    for chunk in chunks {
        let mut buf: &[u8] = chunk;
        while let Some(msg) = parser.decode(&mut session, &mut buf).unwrap() {
            out.push(msg);
        }
        assert!(buf.is_empty(), "decoder left bytes behind");
    }
    assert!(!session.has_in_flight());
    assert!(session.reader().map_or(true, |r| r.is_clean()));
    out
}

/// Attachment of a generated shape: a recovery ack or null.
type Ack = Option<i64>;

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    IntShort(IntShort),
    Text(Text),
    Shape {
        name: Option<String>,
        origin: Point,
        extent: Point,
        ack: Ack,
        flags: u16,
    },
    Batch {
        ids: Option<Vec<i64>>,
        labels: Option<Vec<Option<String>>>,
        acks: Option<Vec<Ack>>,
    },
}

fn ack_wire(wire: Wire, ack: Ack) -> Wire {
    match ack {
        Some(received) => wire.i8(RECOVERY_ACK_TYPE).i64(received),
        None => wire.i8(i8::MIN),
    }
}

fn ack_of(msg: &Option<Box<dyn Message>>) -> Ack {
    msg.as_ref().map(|m| {
        m.downcast_ref::<RecoveryAckMessage>()
            .expect("attachment is a recovery ack")
            .received
    })
}

impl Sent {
    fn encode(&self) -> Vec<u8> {
        match self {
            Sent::IntShort(m) => int_short(m.int, m.short),
            Sent::Text(m) => text(m.name.as_deref(), m.blob.as_deref(), m.id, m.weight),
            Sent::Shape {
                name,
                origin,
                extent,
                ack,
                flags,
            } => {
                let wire = Wire::new()
                    .i8(SHAPE_TYPE)
                    .string(name.as_deref())
                    .i32(origin.x)
                    .i32(origin.y)
                    .i32(extent.x)
                    .i32(extent.y);
                ack_wire(wire, *ack).u16(*flags).build()
            }
            Sent::Batch { ids, labels, acks } => {
                let mut wire = Wire::new().i8(BATCH_TYPE);
                wire = match ids {
                    Some(ids) => ids.iter().fold(wire.i32(ids.len() as i32), |w, id| w.i64(*id)),
                    None => wire.i32(-1),
                };
                wire = match labels {
                    Some(labels) => labels
                        .iter()
                        .fold(wire.i32(labels.len() as i32), |w, l| w.string(l.as_deref())),
                    None => wire.i32(-1),
                };
                wire = match acks {
                    Some(acks) => acks
                        .iter()
                        .fold(wire.i32(acks.len() as i32), |w, a| ack_wire(w, *a)),
                    None => wire.i32(-1),
                };
                wire.build()
            }
        }
    }

    fn from_decoded(msg: &dyn Message) -> Sent {
        if let Some(m) = msg.downcast_ref::<IntShort>() {
            return Sent::IntShort(m.clone());
        }
        if let Some(m) = msg.downcast_ref::<Text>() {
            return Sent::Text(m.clone());
        }
        if let Some(m) = msg.downcast_ref::<Shape>() {
            return Sent::Shape {
                name: m.name.clone(),
                origin: m.origin.clone(),
                extent: m.extent.clone(),
                ack: ack_of(&m.attachment),
                flags: m.flags,
            };
        }
        if let Some(m) = msg.downcast_ref::<Batch>() {
            return Sent::Batch {
                ids: m.ids.clone(),
                labels: m.labels.clone(),
                acks: m.acks.as_ref().map(|acks| acks.iter().map(ack_of).collect()),
            };
        }
        panic!("unexpected message {:?}", msg);
    }
}

#[test]
fn test_three_chunk_scenario() {
    let parser = parser();
    let mut session = Session::new(SessionId(1));
    let chunks: [&[u8]; 3] = [&[1], &[0x01, 0x00], &[0x00, 0x00, 0x00, 0x00]];

    let mut buf = chunks[0];
    assert!(parser.decode(&mut session, &mut buf).unwrap().is_none());
    let mut buf = chunks[1];
    assert!(parser.decode(&mut session, &mut buf).unwrap().is_none());
    let mut buf = chunks[2];
    let msg = parser.decode(&mut session, &mut buf).unwrap().unwrap();

    assert_eq!(msg.downcast_ref::<IntShort>(), Some(&IntShort { int: 1, short: 0 }));
    assert!(buf.is_empty());
}

#[test]
fn test_one_message_per_call() {
    let parser = parser();
    let mut session = Session::new(SessionId(1));
    let mut bytes = int_short(7, 8);
    bytes.extend(int_short(9, 10));

    let mut buf: &[u8] = &bytes;
    let first = parser.decode(&mut session, &mut buf).unwrap().unwrap();
    assert_eq!(first.downcast_ref::<IntShort>(), Some(&IntShort { int: 7, short: 8 }));
    assert_eq!(buf.len(), 7);

    let second = parser.decode(&mut session, &mut buf).unwrap().unwrap();
    assert_eq!(second.downcast_ref::<IntShort>(), Some(&IntShort { int: 9, short: 10 }));
    assert!(parser.decode(&mut session, &mut buf).unwrap().is_none());
}

#[test]
fn test_nested_shape_byte_at_a_time() {
    let parser = parser();
    let bytes = shape_with_ack("square", (1, -2), (30, 40), 123);
    let chunks: Vec<&[u8]> = bytes.chunks(1).collect();

    let decoded = decode_chunks(&parser, &chunks);
    assert_eq!(decoded.len(), 1);
    let shape = decoded[0].downcast_ref::<Shape>().unwrap();
    assert_eq!(shape.name.as_deref(), Some("square"));
    assert_eq!(shape.origin, Point { x: 1, y: -2 });
    assert_eq!(shape.extent, Point { x: 30, y: 40 });
    assert_eq!(shape.flags, 0xBEEF);
    let ack = shape.attachment.as_ref().unwrap();
    assert_eq!(
        ack.downcast_ref::<RecoveryAckMessage>(),
        Some(&RecoveryAckMessage { received: 123 })
    );
}

#[test]
fn test_null_fields() {
    let parser = parser();
    let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
    let bytes = text(None, None, id, 2.5);

    let decoded = decode_chunks(&parser, &[&bytes[..3], &bytes[3..]]);
    let msg = decoded[0].downcast_ref::<Text>().unwrap();
    assert_eq!(msg.name, None);
    assert_eq!(msg.blob, None);
    assert_eq!(msg.id, id);
    assert_eq!(msg.weight, 2.5);
}

#[test]
fn test_null_attachment() {
    let parser = parser();
    let bytes = Wire::new()
        .i8(SHAPE_TYPE)
        .string(Some(""))
        .i32(0)
        .i32(0)
        .i32(0)
        .i32(0)
        .i8(i8::MIN)
        .u16(1)
        .build();

    let decoded = decode_chunks(&parser, &[bytes.as_slice()]);
    let shape = decoded[0].downcast_ref::<Shape>().unwrap();
    assert_eq!(shape.name.as_deref(), Some(""));
    assert!(shape.attachment.is_none());
    assert_eq!(shape.flags, 1);
}

#[test]
fn test_unknown_nested_tag_fails() {
    let parser = parser();
    let mut session = Session::new(SessionId(1));
    let bytes = Wire::new()
        .i8(SHAPE_TYPE)
        .string(None)
        .i32(0)
        .i32(0)
        .i32(0)
        .i32(0)
        .i8(100)
        .build();

    let mut buf: &[u8] = &bytes;
    assert!(matches!(
        parser.decode(&mut session, &mut buf),
        Err(WireError::UnknownType { tag: 100 })
    ));
}

#[test]
fn test_length_limit_enforced() {
    let parser = DirectParser::with_limits(factory(), ReaderLimits { max_array_len: 4 });
    let mut session = Session::new(SessionId(1));
    let bytes = text(Some("too long"), None, Uuid::nil(), 0.0);

    let mut buf: &[u8] = &bytes;
    assert!(matches!(
        parser.decode(&mut session, &mut buf),
        Err(WireError::LengthLimit { len: 8, limit: 4, .. })
    ));
}

#[test]
fn test_negative_length_rejected() {
    let parser = parser();
    let mut session = Session::new(SessionId(1));
    let bytes = Wire::new().i8(TEXT_TYPE).i32(-7).build();

    let mut buf: &[u8] = &bytes;
    assert!(matches!(
        parser.decode(&mut session, &mut buf),
        Err(WireError::InvalidLength { len: -7, .. })
    ));
}

#[test]
fn test_invalid_utf8_rejected() {
    let parser = parser();
    let mut session = Session::new(SessionId(1));
    let bytes = Wire::new().i8(TEXT_TYPE).i32(2).raw(&[0xC3, 0x28]).build();

    let mut buf: &[u8] = &bytes;
    assert!(matches!(
        parser.decode(&mut session, &mut buf),
        Err(WireError::InvalidUtf8(_))
    ));
}

fn arb_point() -> impl Strategy<Value = Point> {
    (any::<i32>(), any::<i32>()).prop_map(|(x, y)| Point { x, y })
}

fn arb_name() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z0-9 ]{0,24}")
}

fn arb_sent() -> impl Strategy<Value = Sent> {
    prop_oneof![
        (any::<i32>(), any::<i16>())
            .prop_map(|(int, short)| Sent::IntShort(IntShort { int, short })),
        (
            arb_name(),
            proptest::option::of(prop::collection::vec(any::<u8>(), 0..40)),
            any::<u128>(),
            -1.0e6f64..1.0e6,
        )
            .prop_map(|(name, blob, id, weight)| Sent::Text(Text {
                name,
                blob,
                id: Uuid::from_u128(id),
                weight,
            })),
        (
            arb_name(),
            arb_point(),
            arb_point(),
            proptest::option::of(any::<i64>()),
            any::<u16>(),
        )
            .prop_map(|(name, origin, extent, ack, flags)| Sent::Shape {
                name,
                origin,
                extent,
                ack,
                flags,
            }),
        (
            proptest::option::of(prop::collection::vec(any::<i64>(), 0..6)),
            proptest::option::of(prop::collection::vec(arb_name(), 0..4)),
            proptest::option::of(prop::collection::vec(proptest::option::of(any::<i64>()), 0..4)),
        )
            .prop_map(|(ids, labels, acks)| Sent::Batch { ids, labels, acks }),
    ]
}

proptest! {
    /// Any partition of the stream, empty chunks included, decodes to the
    /// same messages as the whole stream.
    #[test]
    fn prop_partition_invariant(
        sent in prop::collection::vec(arb_sent(), 1..8),
        sizes in prop::collection::vec(0usize..12, 0..64),
    ) {
        let parser = parser();
        let stream: Vec<u8> = sent.iter().flat_map(Sent::encode).collect();

        let whole: Vec<Sent> = decode_chunks(&parser, &[stream.as_slice()])
            .iter()
            .map(|m| Sent::from_decoded(m.as_ref()))
            .collect();
        prop_assert_eq!(&whole, &sent);

        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut rest: &[u8] = &stream;
        for size in sizes {
            let (head, tail) = rest.split_at(size.min(rest.len()));
            chunks.push(head);
            rest = tail;
        }
        chunks.push(rest);

        let split: Vec<Sent> = decode_chunks(&parser, &chunks)
            .iter()
            .map(|m| Sent::from_decoded(m.as_ref()))
            .collect();
        prop_assert_eq!(split, sent);
    }
}
