//! Error types for the DTV IPC protocol.

use thiserror::Error;

/// Protocol-level errors raised while building or parsing PDUs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A read ran past the declared payload length.
    #[error("Truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string field has no NUL terminator before the end of the payload.
    #[error("Unterminated string field")]
    UnterminatedString,

    /// A string field is not valid UTF-8.
    #[error("Invalid string field: {0}")]
    InvalidString(String),

    /// An append did not fit into the space reserved for the payload.
    #[error("Encoding overflow: {needed} bytes needed, {available} available")]
    EncodingOverflow { needed: usize, available: usize },

    /// The payload written does not match the size the buffer was created with.
    #[error("Payload size mismatch: declared {declared}, written {written}")]
    SizeMismatch { declared: usize, written: usize },

    /// The buffer could not be allocated.
    #[error("Failed to allocate {0} bytes")]
    AllocationFailure(usize),

    /// The envelope was stamped twice or after the payload was started.
    #[error("PDU header already initialized")]
    HeaderAlreadyInitialized,

    /// A sealed buffer has no header.
    #[error("PDU header not initialized")]
    HeaderNotInitialized,

    /// The opcode has no handler or decoder.
    #[error("Unsupported opcode: 0x{0:02X}")]
    UnsupportedOpcode(u8),

    /// The service id is not served here.
    #[error("Unknown service: 0x{0:02X}")]
    UnknownService(u8),

    /// A source type byte outside the known set.
    #[error("Invalid source type: 0x{0:02X}")]
    InvalidSourceType(u8),

    /// The declared payload exceeds the frame limit.
    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(u32, u32),

    /// Descriptor count in the payload disagrees with the descriptors received.
    #[error("Ancillary mismatch: payload announces {expected} descriptors, got {actual}")]
    AncillaryMismatch { expected: usize, actual: usize },
}

/// Status code carried by error PDUs.
///
/// Values 0..=4 are the tuner status codes reported by the hardware and
/// business-logic collaborators; the rest are raised by the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Operation succeeded.
    Success = 0x00,
    /// The collaborator or hardware rejected the operation.
    Fail = 0x01,
    /// Invalid argument.
    InvalidArgument = 0x02,
    /// No signal on the requested source.
    NoSignal = 0x03,
    /// The capability is not available.
    NotSupported = 0x04,
    /// The response could not be allocated or encoded.
    NoMemory = 0x05,
    /// No handler for the requested opcode.
    UnsupportedOpcode = 0x06,
}

impl From<u8> for ErrorCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ErrorCode::Success,
            0x02 => ErrorCode::InvalidArgument,
            0x03 => ErrorCode::NoSignal,
            0x04 => ErrorCode::NotSupported,
            0x05 => ErrorCode::NoMemory,
            0x06 => ErrorCode::UnsupportedOpcode,
            _ => ErrorCode::Fail,
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(value: ErrorCode) -> Self {
        value as u8
    }
}

impl From<&ProtocolError> for ErrorCode {
    fn from(value: &ProtocolError) -> Self {
        match value {
            ProtocolError::UnsupportedOpcode(_) | ProtocolError::UnknownService(_) => {
                ErrorCode::UnsupportedOpcode
            }
            ProtocolError::EncodingOverflow { .. }
            | ProtocolError::SizeMismatch { .. }
            | ProtocolError::AllocationFailure(_)
            | ProtocolError::HeaderAlreadyInitialized
            | ProtocolError::HeaderNotInitialized => ErrorCode::NoMemory,
            _ => ErrorCode::Fail,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::Success => "success",
            ErrorCode::Fail => "fail",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::NoSignal => "no signal",
            ErrorCode::NotSupported => "not supported",
            ErrorCode::NoMemory => "no memory",
            ErrorCode::UnsupportedOpcode => "unsupported opcode",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        for code in [
            ErrorCode::Success,
            ErrorCode::Fail,
            ErrorCode::InvalidArgument,
            ErrorCode::NoSignal,
            ErrorCode::NotSupported,
            ErrorCode::NoMemory,
            ErrorCode::UnsupportedOpcode,
        ] {
            assert_eq!(ErrorCode::from(u8::from(code)), code);
        }
        assert_eq!(ErrorCode::from(0xEE), ErrorCode::Fail);
    }

    #[test]
    fn test_protocol_error_mapping() {
        let truncated = ProtocolError::Truncated { needed: 4, remaining: 1 };
        assert_eq!(ErrorCode::from(&truncated), ErrorCode::Fail);
        assert_eq!(
            ErrorCode::from(&ProtocolError::UnsupportedOpcode(0x42)),
            ErrorCode::UnsupportedOpcode
        );
        assert_eq!(
            ErrorCode::from(&ProtocolError::AllocationFailure(64)),
            ErrorCode::NoMemory
        );
    }
}
