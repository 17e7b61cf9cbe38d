//! Error types for gridwire.

use thiserror::Error;

/// Main error type for decoding and connection handling.
#[derive(Debug, Error)]
pub enum WireError {
    /// The factory has no constructor for the observed type tag.
    #[error("unknown message type tag {tag}")]
    UnknownType { tag: i8 },

    /// Direct messages write themselves; the parser never encodes.
    #[error("encode is not supported by the direct parser")]
    Unsupported,

    /// Message boundaries and reader bookkeeping disagree.
    #[error("framing violation in message type {tag}: {reason}")]
    FramingViolation { tag: i8, reason: &'static str },

    /// Negative length prefix other than the null marker.
    #[error("invalid length {len} for {field}")]
    InvalidLength { field: &'static str, len: i32 },

    /// Length prefix above the configured limit.
    #[error("{field} length {len} exceeds limit {limit}")]
    LengthLimit {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    /// String field bytes are not UTF-8.
    #[error("invalid utf-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A constructor is already registered for the tag.
    #[error("message type tag {tag} registered twice")]
    DuplicateType { tag: i8 },

    /// Constructor produced a message reporting a different tag.
    #[error("constructor for tag {tag} produced a message with tag {actual}")]
    TagMismatch { tag: i8, actual: i8 },

    /// The null marker cannot be used as a message tag.
    #[error("type tag {tag} is reserved")]
    ReservedTag { tag: i8 },

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error on a socket or file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True for errors that leave the byte stream position unknown.
    ///
    /// The connection owning the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownType { .. }
                | Self::FramingViolation { .. }
                | Self::InvalidLength { .. }
                | Self::LengthLimit { .. }
                | Self::InvalidUtf8(_)
                | Self::Io(_)
        )
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
