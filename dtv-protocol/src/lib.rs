//! Wire protocol for the DTV tuner IPC service.
//!
//! This crate defines the binary protocol spoken between the `dtvd` daemon
//! and its client over a local stream socket.
//!
//! # Frame Format
//!
//! ```text
//! +---------+--------+--------+------------------+
//! | Service | Opcode | Length |     Payload      |
//! |   u8    |   u8   | u32 LE |    (variable)    |
//! +---------+--------+--------+------------------+
//! ```
//!
//! Responses reuse the opcode of the command they answer, notifications use
//! opcodes 0x81..=0x84 and failures are opcode 0 with a one-byte status.
//! The set-source response additionally carries file descriptors as
//! `SCM_RIGHTS` ancillary data.
//!
//! # Example
//!
//! ```rust
//! use dtv_protocol::{decode_header, decode_reply, Request, Response, SourceType, Tuner, HEADER_SIZE};
//!
//! // Client side: encode a request.
//! let request = Request::GetChannels { tuner_id: "7".to_string(), source: SourceType::IsdbT };
//! let sealed = request.encode().unwrap();
//! let header = decode_header(sealed.frame()).unwrap().unwrap();
//! assert_eq!(header.payload_len as usize, sealed.frame().len() - HEADER_SIZE);
//!
//! // Server side: decode it and answer.
//! let decoded = Request::decode(&sealed.to_pdu()).unwrap();
//! assert_eq!(decoded, request);
//! let reply = Response::Tuners(vec![Tuner::new("7")]).encode(header.service).unwrap();
//! assert!(matches!(decode_reply(&reply.to_pdu(), &[]).unwrap(), Ok(Response::Tuners(_))));
//! ```

pub mod ancillary;
pub mod codec;
pub mod error;
pub mod message;
pub mod pdu;
pub mod types;

pub use ancillary::{AncillaryView, ControlHeader, ANCILLARY_ALIGNMENT};
pub use error::{ErrorCode, ProtocolError};
pub use message::{decode_error, decode_reply, encode_error, Notification, Request, Response};
pub use pdu::{decode_header, Pdu, PduBuf, PduHeader, PduReader, SealedPdu, HEADER_SIZE};
pub use types::{
    channel_status, scan_status, Channel, NativeHandle, Opcode, Program, SourceType, Tuner,
    MAX_PAYLOAD_SIZE, SERVICE_DTV,
};
