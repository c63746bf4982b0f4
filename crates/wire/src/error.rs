use thiserror::Error;

/// Errors from encoding/decoding a single frame. Per §7's error taxonomy,
/// every variant here is a *protocol* error: the caller closes the
/// connection and logs at warning, it never becomes a fatal daemon error.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("read/write timed out")]
    Timeout,

    #[error("bad frame magic: expected {expected:#x}, got {actual:#x}")]
    BadMagic { expected: u32, actual: u32 },

    #[error("frame length {length} out of range [{min}, {max}]")]
    LengthOutOfRange { length: u32, min: usize, max: usize },

    #[error("declared body size {declared} does not match transferred body size {actual}")]
    BodySizeMismatch { declared: usize, actual: usize },

    #[error("type {type_id:#010x} body byte {value:#x} is not a valid enum discriminant")]
    InvalidEnumValue { type_id: u32, value: u8 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
