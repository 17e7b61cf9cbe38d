//! Direct message contract
//!
//! Wire layout:
//! ┌───────────────┬──────────────────────────────────────────────┐
//! │ type tag (i8) │ fields, fixed positional order, no framing   │
//! └───────────────┴──────────────────────────────────────────────┘
//!
//! A message knows its own field sequence. Completion is reported by the
//! message itself once its last field has been read.

use std::any::Any;
use std::fmt;

use bytes::Buf;

use super::reader::MessageReader;
use crate::error::Result;

/// Type-erasure helper so decoded messages can be downcast by the caller.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A self-describing, incrementally decodable record.
///
/// Implementations read their fields in order:
///
/// ```ignore
/// fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
///     loop {
///         match reader.state() {
///             0 => self.id = field!(reader.read_i64(buf)),
///             1 => self.name = field!(reader.read_string(buf)?),
///             _ => return Ok(true),
///         }
///         reader.increment_state();
///     }
/// }
/// ```
pub trait Message: AsAny + fmt::Debug + Send {
    /// One-byte wire tag identifying the concrete type.
    fn direct_type(&self) -> i8;

    /// Consume as many fields as `buf` offers.
    ///
    /// Returns `Ok(true)` once every field has been read. On `Ok(false)` the
    /// buffer is exhausted and the partial state lives in `reader`.
    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool>;

    /// Human readable type name for logs.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<'a> dyn Message + 'a {
    /// True if the message is of concrete type `T`.
    pub fn is<T: Message + 'static>(&self) -> bool {
        AsAny::as_any(self).is::<T>()
    }

    pub fn downcast_ref<T: Message + 'static>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }

    /// Take ownership of the concrete message, if it is a `T`.
    pub fn downcast_box<T: Message + 'static>(self: Box<Self>) -> Option<Box<T>> {
        AsAny::into_any(self).downcast::<T>().ok()
    }
}
