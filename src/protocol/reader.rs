//! Resumable field cursor for direct messages.
//!
//! One reader lives in each session and is shared by every message decoded on
//! that connection. It keeps a stack of frames, one per nesting level:
//!
//! ```text
//! depth 0   [type -3 | state 2 | scratch 5/8 bytes]   <- top-level message
//! depth 1   [type  8 | state 1 | len 40, 12 bytes ]   <- nested sub-object
//! ```
//!
//! Frames below the current depth survive a short read, so descending into a
//! nested field on the next call lands on the saved progress. All integers are
//! little-endian.

use std::sync::Arc;

use bytes::Buf;
use uuid::Uuid;

use super::factory::MessageFactory;
use super::message::Message;
use crate::config::ReaderLimits;
use crate::error::{Result, WireError};

/// Length prefix marking a null array or string.
pub const NULL_LENGTH: i32 = -1;

/// Type tag marking an absent polymorphic sub-message.
pub const NULL_TYPE: i8 = i8::MIN;

/// Widest primitive kept in scratch (uuid).
const SCRATCH_SIZE: usize = 16;

/// Outcome of a single field read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    /// The field is complete.
    Done(T),
    /// The buffer ran out; partial bytes are held by the reader.
    Pending,
}

impl<T> Progress<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Progress::Done(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Done(value) => Progress::Done(f(value)),
            Progress::Pending => Progress::Pending,
        }
    }
}

/// Unwrap a completed field or return `Ok(false)` from `read_from`.
#[macro_export]
macro_rules! field {
    ($read:expr) => {
        match $read {
            $crate::protocol::Progress::Done(value) => value,
            $crate::protocol::Progress::Pending => return Ok(false),
        }
    };
}

fn uuid_from_le(b: [u8; 16]) -> Uuid {
    let mut msb = [0u8; 8];
    let mut lsb = [0u8; 8];
    msb.copy_from_slice(&b[..8]);
    lsb.copy_from_slice(&b[8..]);
    Uuid::from_u64_pair(u64::from_le_bytes(msb), u64::from_le_bytes(lsb))
}

/// Progress of one nesting level.
#[derive(Debug, Default)]
struct Frame {
    /// Concrete type whose layout this frame interprets
    type_tag: Option<i8>,
    /// Index of the next field to read
    state: usize,
    /// Bytes of a primitive consumed so far
    scratch: [u8; SCRATCH_SIZE],
    filled: usize,
    /// Decoded length of an array whose body is still arriving
    pending_len: Option<usize>,
    body: Vec<u8>,
    /// Polymorphic child constructed but not yet complete
    child: Option<Box<dyn Message>>,
    /// Element count of a collection whose elements are still arriving
    pending_count: Option<usize>,
    strings: Vec<Option<String>>,
    items: Vec<Option<Box<dyn Message>>>,
}

impl Frame {
    /// No partial field of any kind is held.
    fn is_idle(&self) -> bool {
        self.filled == 0
            && self.pending_len.is_none()
            && self.body.is_empty()
            && self.child.is_none()
            && self.pending_count.is_none()
            && self.strings.is_empty()
            && self.items.is_empty()
    }

    fn is_clean(&self) -> bool {
        self.type_tag.is_none()
            && self.state == 0
            && self.is_idle()
            && self.scratch == [0; SCRATCH_SIZE]
    }
}

/// Stateful cursor for one connection.
///
/// Calls for one reader must be serialized; the owning session guarantees this.
#[derive(Debug)]
pub struct MessageReader {
    factory: Arc<MessageFactory>,
    limits: ReaderLimits,
    frames: Vec<Frame>,
    depth: usize,
}

impl MessageReader {
    pub fn new(factory: Arc<MessageFactory>, limits: ReaderLimits) -> Self {
        Self {
            factory,
            limits,
            frames: vec![Frame::default()],
            depth: 0,
        }
    }

    /// Point the top-level frame at the layout of `tag`.
    ///
    /// Must be called before every top-level `read_from`, including
    /// resumptions: the frame may have been redirected since.
    pub fn set_current_type(&mut self, tag: i8) {
        debug_assert_eq!(self.depth, 0, "current type set while inside a nested read");
        self.frames[0].type_tag = Some(tag);
    }

    /// Type of the message being interpreted at the current depth.
    pub fn current_type(&self) -> Option<i8> {
        self.frame().type_tag
    }

    /// Nesting depth, 0 for the top-level message.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Index of the next field at the current depth.
    pub fn state(&self) -> usize {
        self.frame().state
    }

    pub fn increment_state(&mut self) {
        self.frame_mut().state += 1;
    }

    /// Clear all cursor state for the next message.
    pub fn reset(&mut self) {
        self.frames.truncate(1);
        self.frames[0] = Frame::default();
        self.depth = 0;
    }

    /// Indistinguishable from a freshly created reader.
    pub fn is_clean(&self) -> bool {
        self.depth == 0 && self.frames.len() == 1 && self.frames[0].is_clean()
    }

    /// Top-level message finished without leftover partial fields.
    pub(crate) fn is_settled(&self) -> bool {
        self.depth == 0 && self.frames.iter().all(Frame::is_idle)
    }

    pub fn limits(&self) -> ReaderLimits {
        self.limits
    }

    fn frame(&self) -> &Frame {
        &self.frames[self.depth]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frames[self.depth]
    }

    /// Descend into a nested sub-object of type `tag`, reusing saved progress.
    fn forward(&mut self, tag: i8) {
        self.depth += 1;
        if self.frames.len() <= self.depth {
            self.frames.push(Frame::default());
        }
        self.frames[self.depth].type_tag = Some(tag);
    }

    /// Return to the parent; a finished child frame is cleared for reuse.
    fn backward(&mut self, finished: bool) {
        if finished {
            self.frames[self.depth] = Frame::default();
        }
        self.depth -= 1;
    }

    /// Read `N` bytes, resuming a previous partial read.
    fn read_fixed<const N: usize>(&mut self, buf: &mut dyn Buf) -> Progress<[u8; N]> {
        let frame = self.frame_mut();
        let take = (N - frame.filled).min(buf.remaining());
        buf.copy_to_slice(&mut frame.scratch[frame.filled..frame.filled + take]);
        frame.filled += take;

        if frame.filled < N {
            return Progress::Pending;
        }

        let mut out = [0u8; N];
        out.copy_from_slice(&frame.scratch[..N]);
        frame.scratch = [0; SCRATCH_SIZE];
        frame.filled = 0;
        Progress::Done(out)
    }

    pub fn read_u8(&mut self, buf: &mut dyn Buf) -> Progress<u8> {
        self.read_fixed::<1>(buf).map(|b| b[0])
    }

    pub fn read_i8(&mut self, buf: &mut dyn Buf) -> Progress<i8> {
        self.read_fixed::<1>(buf).map(|b| b[0] as i8)
    }

    pub fn read_bool(&mut self, buf: &mut dyn Buf) -> Progress<bool> {
        self.read_u8(buf).map(|b| b != 0)
    }

    pub fn read_i16(&mut self, buf: &mut dyn Buf) -> Progress<i16> {
        self.read_fixed(buf).map(i16::from_le_bytes)
    }

    pub fn read_u16(&mut self, buf: &mut dyn Buf) -> Progress<u16> {
        self.read_fixed(buf).map(u16::from_le_bytes)
    }

    pub fn read_i32(&mut self, buf: &mut dyn Buf) -> Progress<i32> {
        self.read_fixed(buf).map(i32::from_le_bytes)
    }

    pub fn read_i64(&mut self, buf: &mut dyn Buf) -> Progress<i64> {
        self.read_fixed(buf).map(i64::from_le_bytes)
    }

    pub fn read_f32(&mut self, buf: &mut dyn Buf) -> Progress<f32> {
        self.read_fixed(buf).map(f32::from_le_bytes)
    }

    pub fn read_f64(&mut self, buf: &mut dyn Buf) -> Progress<f64> {
        self.read_fixed(buf).map(f64::from_le_bytes)
    }

    /// Most significant half first, each half little-endian.
    pub fn read_uuid(&mut self, buf: &mut dyn Buf) -> Progress<Uuid> {
        self.read_fixed::<16>(buf).map(uuid_from_le)
    }

    /// Length-prefixed byte array; `None` for the null marker.
    pub fn read_bytes(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<u8>>>> {
        self.read_array(buf, "byte array", 1)
    }

    /// Length-prefixed UTF-8 string; `None` for the null marker.
    pub fn read_string(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<String>>> {
        match self.read_array(buf, "string", 1)? {
            Progress::Done(Some(bytes)) => Ok(Progress::Done(Some(String::from_utf8(bytes)?))),
            Progress::Done(None) => Ok(Progress::Done(None)),
            Progress::Pending => Ok(Progress::Pending),
        }
    }

    /// Element count prefix; `elem_size` converts it to a body length.
    fn read_array(
        &mut self,
        buf: &mut dyn Buf,
        field: &'static str,
        elem_size: usize,
    ) -> Result<Progress<Option<Vec<u8>>>> {
        let len = match self.frame().pending_len {
            Some(len) => len,
            None => {
                let raw = match self.read_i32(buf) {
                    Progress::Done(raw) => raw,
                    Progress::Pending => return Ok(Progress::Pending),
                };
                let count = match self.check_length(raw, field)? {
                    Some(count) => count,
                    None => return Ok(Progress::Done(None)),
                };
                let len = count.saturating_mul(elem_size);
                if len > self.limits.max_array_len {
                    return Err(WireError::LengthLimit {
                        field,
                        len,
                        limit: self.limits.max_array_len,
                    });
                }
                self.frame_mut().pending_len = Some(len);
                len
            }
        };

        let frame = self.frame_mut();
        let start = frame.body.len();
        let take = (len - start).min(buf.remaining());
        frame.body.resize(start + take, 0);
        buf.copy_to_slice(&mut frame.body[start..]);

        if frame.body.len() < len {
            return Ok(Progress::Pending);
        }

        frame.pending_len = None;
        Ok(Progress::Done(Some(std::mem::take(&mut frame.body))))
    }

    /// Validate a length prefix; `None` for the null marker.
    fn check_length(&self, raw: i32, field: &'static str) -> Result<Option<usize>> {
        if raw == NULL_LENGTH {
            return Ok(None);
        }
        if raw < 0 {
            return Err(WireError::InvalidLength { field, len: raw });
        }
        let count = raw as usize;
        if count > self.limits.max_array_len {
            return Err(WireError::LengthLimit {
                field,
                len: count,
                limit: self.limits.max_array_len,
            });
        }
        Ok(Some(count))
    }

    /// Array of fixed-width elements, buffered whole then decoded.
    fn read_fixed_array<const N: usize, T>(
        &mut self,
        buf: &mut dyn Buf,
        field: &'static str,
        decode: fn([u8; N]) -> T,
    ) -> Result<Progress<Option<Vec<T>>>> {
        Ok(self.read_array(buf, field, N)?.map(|body| {
            body.map(|bytes| {
                bytes
                    .chunks_exact(N)
                    .map(|chunk| {
                        let mut raw = [0u8; N];
                        raw.copy_from_slice(chunk);
                        decode(raw)
                    })
                    .collect()
            })
        }))
    }

    pub fn read_bool_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<bool>>>> {
        self.read_fixed_array::<1, _>(buf, "bool array", |b| b[0] != 0)
    }

    pub fn read_i16_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<i16>>>> {
        self.read_fixed_array::<2, _>(buf, "short array", i16::from_le_bytes)
    }

    /// UTF-16 code units.
    pub fn read_u16_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<u16>>>> {
        self.read_fixed_array::<2, _>(buf, "char array", u16::from_le_bytes)
    }

    pub fn read_i32_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<i32>>>> {
        self.read_fixed_array::<4, _>(buf, "int array", i32::from_le_bytes)
    }

    pub fn read_i64_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<i64>>>> {
        self.read_fixed_array::<8, _>(buf, "long array", i64::from_le_bytes)
    }

    pub fn read_f32_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<f32>>>> {
        self.read_fixed_array::<4, _>(buf, "float array", f32::from_le_bytes)
    }

    pub fn read_f64_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<f64>>>> {
        self.read_fixed_array::<8, _>(buf, "double array", f64::from_le_bytes)
    }

    pub fn read_uuid_array(&mut self, buf: &mut dyn Buf) -> Result<Progress<Option<Vec<Uuid>>>> {
        self.read_fixed_array::<16, _>(buf, "uuid array", uuid_from_le)
    }

    /// Element count of a variable-width collection, kept until it completes.
    fn read_count(
        &mut self,
        buf: &mut dyn Buf,
        field: &'static str,
    ) -> Result<Progress<Option<usize>>> {
        if let Some(count) = self.frame().pending_count {
            return Ok(Progress::Done(Some(count)));
        }
        let raw = match self.read_i32(buf) {
            Progress::Done(raw) => raw,
            Progress::Pending => return Ok(Progress::Pending),
        };
        let count = self.check_length(raw, field)?;
        self.frame_mut().pending_count = count;
        Ok(Progress::Done(count))
    }

    /// Count-prefixed array of nullable strings.
    ///
    /// Finished elements are kept in the frame; only the element in progress
    /// is partial.
    pub fn read_string_array(
        &mut self,
        buf: &mut dyn Buf,
    ) -> Result<Progress<Option<Vec<Option<String>>>>> {
        let count = match self.read_count(buf, "string array")? {
            Progress::Done(Some(count)) => count,
            Progress::Done(None) => return Ok(Progress::Done(None)),
            Progress::Pending => return Ok(Progress::Pending),
        };
        while self.frame().strings.len() < count {
            match self.read_string(buf)? {
                Progress::Done(item) => self.frame_mut().strings.push(item),
                Progress::Pending => return Ok(Progress::Pending),
            }
        }
        let frame = self.frame_mut();
        frame.pending_count = None;
        Ok(Progress::Done(Some(std::mem::take(&mut frame.strings))))
    }

    /// Count-prefixed collection of tagged sub-messages, each possibly null.
    pub fn read_message_array(
        &mut self,
        buf: &mut dyn Buf,
    ) -> Result<Progress<Option<Vec<Option<Box<dyn Message>>>>>> {
        let count = match self.read_count(buf, "message array")? {
            Progress::Done(Some(count)) => count,
            Progress::Done(None) => return Ok(Progress::Done(None)),
            Progress::Pending => return Ok(Progress::Pending),
        };
        while self.frame().items.len() < count {
            match self.read_message(buf)? {
                Progress::Done(item) => self.frame_mut().items.push(item),
                Progress::Pending => return Ok(Progress::Pending),
            }
        }
        let frame = self.frame_mut();
        frame.pending_count = None;
        Ok(Progress::Done(Some(std::mem::take(&mut frame.items))))
    }

    /// Read a fixed-type sub-object written without a tag.
    ///
    /// The child gets its own frame with the current type redirected to it;
    /// after a short read the frame is kept and resumed on the next call.
    pub fn read_nested(
        &mut self,
        buf: &mut dyn Buf,
        msg: &mut dyn Message,
    ) -> Result<Progress<()>> {
        self.forward(msg.direct_type());
        match msg.read_from(buf, self) {
            Ok(true) => {
                self.backward(true);
                Ok(Progress::Done(()))
            }
            Ok(false) => {
                self.backward(false);
                Ok(Progress::Pending)
            }
            Err(e) => {
                self.backward(false);
                Err(e)
            }
        }
    }

    /// Read a polymorphic sub-message prefixed by its own type tag.
    ///
    /// `NULL_TYPE` decodes as `None`. Unknown tags fail like top-level ones.
    pub fn read_message(
        &mut self,
        buf: &mut dyn Buf,
    ) -> Result<Progress<Option<Box<dyn Message>>>> {
        let mut child = match self.frame_mut().child.take() {
            Some(child) => child,
            None => {
                let tag = match self.read_i8(buf) {
                    Progress::Done(tag) => tag,
                    Progress::Pending => return Ok(Progress::Pending),
                };
                if tag == NULL_TYPE {
                    return Ok(Progress::Done(None));
                }
                self.factory.create(tag)?
            }
        };

        match self.read_nested(buf, child.as_mut())? {
            Progress::Done(()) => Ok(Progress::Done(Some(child))),
            Progress::Pending => {
                self.frame_mut().child = Some(child);
                Ok(Progress::Pending)
            }
        }
    }
}
