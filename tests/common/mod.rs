//! Shared fixtures: a little-endian wire writer and a few message types.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Buf;
use gridwire::protocol::system::RECOVERY_ACK_TYPE;
use gridwire::{field, DirectParser, Message, MessageFactory, MessageReader, Result};
use uuid::Uuid;

pub const INT_SHORT_TYPE: i8 = 1;
pub const TEXT_TYPE: i8 = 2;
pub const POINT_TYPE: i8 = 3;
pub const SHAPE_TYPE: i8 = 4;
pub const BATCH_TYPE: i8 = 5;

/// `[i32][i16]`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IntShort {
    pub int: i32,
    pub short: i16,
}

impl Message for IntShort {
    fn direct_type(&self) -> i8 {
        INT_SHORT_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.int = field!(reader.read_i32(buf)),
                1 => self.short = field!(reader.read_i16(buf)),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

/// `[string][bytes][uuid][f64]`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Text {
    pub name: Option<String>,
    pub blob: Option<Vec<u8>>,
    pub id: Uuid,
    pub weight: f64,
}

impl Message for Text {
    fn direct_type(&self) -> i8 {
        TEXT_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.name = field!(reader.read_string(buf)?),
                1 => self.blob = field!(reader.read_bytes(buf)?),
                2 => self.id = field!(reader.read_uuid(buf)),
                3 => self.weight = field!(reader.read_f64(buf)),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

/// Untagged sub-object.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Message for Point {
    fn direct_type(&self) -> i8 {
        POINT_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.x = field!(reader.read_i32(buf)),
                1 => self.y = field!(reader.read_i32(buf)),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

/// `[string][point][point][tagged message or null][u16]`
#[derive(Debug, Default)]
pub struct Shape {
    pub name: Option<String>,
    pub origin: Point,
    pub extent: Point,
    pub attachment: Option<Box<dyn Message>>,
    pub flags: u16,
}

impl Message for Shape {
    fn direct_type(&self) -> i8 {
        SHAPE_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.name = field!(reader.read_string(buf)?),
                1 => field!(reader.read_nested(buf, &mut self.origin)?),
                2 => field!(reader.read_nested(buf, &mut self.extent)?),
                3 => self.attachment = field!(reader.read_message(buf)?),
                4 => self.flags = field!(reader.read_u16(buf)),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

/// `[long array][string array][message array]`
#[derive(Debug, Default)]
pub struct Batch {
    pub ids: Option<Vec<i64>>,
    pub labels: Option<Vec<Option<String>>>,
    pub acks: Option<Vec<Option<Box<dyn Message>>>>,
}

impl Message for Batch {
    fn direct_type(&self) -> i8 {
        BATCH_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.ids = field!(reader.read_i64_array(buf)?),
                1 => self.labels = field!(reader.read_string_array(buf)?),
                2 => self.acks = field!(reader.read_message_array(buf)?),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

pub fn factory() -> Arc<MessageFactory> {
    let mut factory = MessageFactory::with_system_types().unwrap();
    factory.register::<IntShort>(INT_SHORT_TYPE).unwrap();
    factory.register::<Text>(TEXT_TYPE).unwrap();
    factory.register::<Shape>(SHAPE_TYPE).unwrap();
    factory.register::<Batch>(BATCH_TYPE).unwrap();
    Arc::new(factory)
}

pub fn parser() -> DirectParser {
    DirectParser::new(factory())
}

/// Little-endian writer for test payloads.
#[derive(Debug, Default, Clone)]
pub struct Wire(Vec<u8>);

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn i8(mut self, v: i8) -> Self {
        self.0.push(v as u8);
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i16(mut self, v: i16) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(mut self, v: i64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f64(mut self, v: f64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn uuid(self, v: Uuid) -> Self {
        let (msb, lsb) = v.as_u64_pair();
        self.i64(msb as i64).i64(lsb as i64)
    }

    pub fn bytes(self, v: Option<&[u8]>) -> Self {
        match v {
            Some(v) => {
                let mut wire = self.i32(v.len() as i32);
                wire.0.extend_from_slice(v);
                wire
            }
            None => self.i32(-1),
        }
    }

    pub fn string(self, v: Option<&str>) -> Self {
        self.bytes(v.map(str::as_bytes))
    }

    pub fn raw(mut self, v: &[u8]) -> Self {
        self.0.extend_from_slice(v);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

pub fn int_short(int: i32, short: i16) -> Vec<u8> {
    Wire::new().i8(INT_SHORT_TYPE).i32(int).i16(short).build()
}

pub fn text(name: Option<&str>, blob: Option<&[u8]>, id: Uuid, weight: f64) -> Vec<u8> {
    Wire::new()
        .i8(TEXT_TYPE)
        .string(name)
        .bytes(blob)
        .uuid(id)
        .f64(weight)
        .build()
}

/// Shape carrying a recovery ack as its attachment.
pub fn shape_with_ack(name: &str, origin: (i32, i32), extent: (i32, i32), ack: i64) -> Vec<u8> {
    Wire::new()
        .i8(SHAPE_TYPE)
        .string(Some(name))
        .i32(origin.0)
        .i32(origin.1)
        .i32(extent.0)
        .i32(extent.1)
        .i8(RECOVERY_ACK_TYPE)
        .i64(ack)
        .u16(0xBEEF)
        .build()
}
