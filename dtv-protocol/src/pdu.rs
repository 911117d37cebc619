//! PDU buffers.
//!
//! Frame format:
//! ```text
//! +---------+--------+--------+------------------+
//! | Service | Opcode | Length |     Payload      |
//! |   u8    |   u8   | u32 LE |    (variable)    |
//! +---------+--------+--------+------------------+
//! | 1 byte  | 1 byte | 4 bytes|  Length bytes    |
//! ```
//!
//! Outbound PDUs are built in a [`PduBuf`] created with the exact payload
//! size, appended to once, then sealed. Inbound PDUs are read through a
//! [`PduReader`] cursor.

use std::os::fd::RawFd;

use bytes::{Buf, BufMut, Bytes};

use crate::ancillary::{self, AncillaryView, ControlHeader, ANCILLARY_ALIGNMENT};
use crate::error::ProtocolError;
use crate::types::MAX_PAYLOAD_SIZE;

/// Frame header size: 1 (service) + 1 (opcode) + 4 (length) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub service: u8,
    pub opcode: u8,
    pub payload_len: u32,
}

/// Decode a frame header from the start of `buf`.
///
/// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are available.
pub fn decode_header(buf: &[u8]) -> Result<Option<PduHeader>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut cursor = &buf[..HEADER_SIZE];
    let service = cursor.get_u8();
    let opcode = cursor.get_u8();
    let payload_len = cursor.get_u32_le();
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload_len, MAX_PAYLOAD_SIZE));
    }

    Ok(Some(PduHeader {
        service,
        opcode,
        payload_len,
    }))
}

/// An inbound PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub service: u8,
    pub opcode: u8,
    pub payload: Bytes,
}

impl Pdu {
    pub fn new(service: u8, opcode: u8, payload: Bytes) -> Self {
        Self {
            service,
            opcode,
            payload,
        }
    }

    /// A cursor over the payload.
    pub fn reader(&self) -> PduReader {
        PduReader::new(self.payload.clone())
    }
}

/// Read cursor over a PDU payload.
#[derive(Debug, Clone)]
pub struct PduReader {
    buf: Bytes,
}

impl PduReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Read a NUL-terminated UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnterminatedString)?;
        let bytes = self.buf.copy_to_bytes(end);
        self.buf.advance(1);
        String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::InvalidString(e.to_string()))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        self.ensure(len)?;
        Ok(self.buf.copy_to_bytes(len))
    }
}

/// Location of the descriptor tail inside a buffer.
#[derive(Debug, Clone, Copy)]
struct Tail {
    offset: usize,
    control: ControlHeader,
}

/// Write-once outbound PDU buffer.
///
/// The whole frame, plus the descriptor tail if any, lives in one
/// allocation made up front.
#[derive(Debug)]
pub struct PduBuf {
    data: Vec<u8>,
    payload_end: usize,
    cursor: usize,
    header_set: bool,
    tail: Option<Tail>,
}

fn allocate(len: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| ProtocolError::AllocationFailure(len))?;
    data.resize(len, 0);
    Ok(data)
}

fn check_payload_size(payload_size: usize) -> Result<(), ProtocolError> {
    if payload_size > MAX_PAYLOAD_SIZE as usize {
        let reported = u32::try_from(payload_size).unwrap_or(u32::MAX);
        return Err(ProtocolError::PayloadTooLarge(reported, MAX_PAYLOAD_SIZE));
    }
    Ok(())
}

impl PduBuf {
    /// Create a buffer for exactly `payload_size` payload bytes.
    pub fn new(payload_size: usize) -> Result<Self, ProtocolError> {
        check_payload_size(payload_size)?;
        let payload_end = HEADER_SIZE + payload_size;
        Ok(Self {
            data: allocate(payload_end)?,
            payload_end,
            cursor: HEADER_SIZE,
            header_set: false,
            tail: None,
        })
    }

    /// Create a buffer for `payload_size` payload bytes that carries `fds`
    /// on the ancillary channel.
    ///
    /// An empty descriptor set yields a plain buffer.
    pub fn with_fds(payload_size: usize, fds: &[RawFd]) -> Result<Self, ProtocolError> {
        if fds.is_empty() {
            return Self::new(payload_size);
        }
        check_payload_size(payload_size)?;

        let payload_end = HEADER_SIZE + payload_size;
        let offset = ancillary::align_up(payload_end, ANCILLARY_ALIGNMENT);
        let total = offset + ancillary::region_size(fds.len());

        let mut data = allocate(total)?;
        let control = ancillary::build(&mut data[offset..], fds)?;

        Ok(Self {
            data,
            payload_end,
            cursor: HEADER_SIZE,
            header_set: false,
            tail: Some(Tail { offset, control }),
        })
    }

    /// Stamp the envelope. Must be called once, before any append.
    pub fn init_header(&mut self, service: u8, opcode: u8) -> Result<(), ProtocolError> {
        if self.header_set || self.cursor != HEADER_SIZE {
            return Err(ProtocolError::HeaderAlreadyInitialized);
        }
        let payload_len = (self.payload_end - HEADER_SIZE) as u32;
        let mut header = &mut self.data[..HEADER_SIZE];
        header.put_u8(service);
        header.put_u8(opcode);
        header.put_u32_le(payload_len);
        self.header_set = true;
        Ok(())
    }

    /// Payload bytes still free.
    pub fn remaining(&self) -> usize {
        self.payload_end - self.cursor
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], ProtocolError> {
        if !self.header_set {
            return Err(ProtocolError::HeaderNotInitialized);
        }
        let available = self.remaining();
        if len > available {
            return Err(ProtocolError::EncodingOverflow {
                needed: len,
                available,
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&mut self.data[start..start + len])
    }

    pub fn append_u8(&mut self, value: u8) -> Result<(), ProtocolError> {
        let mut dst = self.reserve(1)?;
        dst.put_u8(value);
        Ok(())
    }

    pub fn append_bool(&mut self, value: bool) -> Result<(), ProtocolError> {
        self.append_u8(if value { 1 } else { 0 })
    }

    pub fn append_u32(&mut self, value: u32) -> Result<(), ProtocolError> {
        let mut dst = self.reserve(4)?;
        dst.put_u32_le(value);
        Ok(())
    }

    pub fn append_i32(&mut self, value: i32) -> Result<(), ProtocolError> {
        let mut dst = self.reserve(4)?;
        dst.put_i32_le(value);
        Ok(())
    }

    pub fn append_u64(&mut self, value: u64) -> Result<(), ProtocolError> {
        let mut dst = self.reserve(8)?;
        dst.put_u64_le(value);
        Ok(())
    }

    /// Append a string as its bytes plus a NUL terminator.
    pub fn append_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        if value.as_bytes().contains(&0) {
            return Err(ProtocolError::InvalidString(
                "interior NUL byte".to_string(),
            ));
        }
        let mut dst = self.reserve(value.len() + 1)?;
        dst.put_slice(value.as_bytes());
        dst.put_u8(0);
        Ok(())
    }

    pub fn append_bytes(&mut self, value: &[u8]) -> Result<(), ProtocolError> {
        let mut dst = self.reserve(value.len())?;
        dst.put_slice(value);
        Ok(())
    }

    /// Finish the buffer. The payload must be filled exactly.
    pub fn seal(self) -> Result<SealedPdu, ProtocolError> {
        if !self.header_set {
            return Err(ProtocolError::HeaderNotInitialized);
        }
        if self.cursor != self.payload_end {
            return Err(ProtocolError::SizeMismatch {
                declared: self.payload_end - HEADER_SIZE,
                written: self.cursor - HEADER_SIZE,
            });
        }
        Ok(SealedPdu {
            data: self.data,
            frame_len: self.payload_end,
            tail: self.tail,
        })
    }
}

/// A fully encoded PDU ready for transmission.
#[derive(Debug)]
pub struct SealedPdu {
    data: Vec<u8>,
    frame_len: usize,
    tail: Option<Tail>,
}

impl SealedPdu {
    pub fn service(&self) -> u8 {
        self.data[0]
    }

    pub fn opcode(&self) -> u8 {
        self.data[1]
    }

    /// Header and payload, as sent on the wire.
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.frame_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_SIZE..self.frame_len]
    }

    /// Descriptor side channel, if the buffer carries one.
    pub fn ancillary(&self) -> Option<AncillaryView<'_>> {
        self.tail
            .map(|tail| AncillaryView::new(&self.data[tail.offset..], tail.control))
    }

    /// Re-read this PDU as an inbound one.
    pub fn to_pdu(&self) -> Pdu {
        Pdu::new(
            self.service(),
            self.opcode(),
            Bytes::copy_from_slice(self.payload()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_read_back() {
        let mut buf = PduBuf::new(1 + 4 + 8 + 3 + 2).unwrap();
        buf.init_header(0x01, 0x07).unwrap();
        buf.append_u8(0xAB).unwrap();
        buf.append_u32(0xDEADBEEF).unwrap();
        buf.append_u64(1 << 40).unwrap();
        buf.append_string("ab").unwrap();
        buf.append_bytes(&[9, 8]).unwrap();
        let sealed = buf.seal().unwrap();

        let frame = sealed.frame();
        assert_eq!(&frame[..HEADER_SIZE], &[0x01, 0x07, 18, 0, 0, 0]);
        let header = decode_header(frame).unwrap().unwrap();
        assert_eq!(header.payload_len, 18);
        assert!(sealed.ancillary().is_none());

        let mut reader = sealed.to_pdu().reader();
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_u64().unwrap(), 1 << 40);
        assert_eq!(reader.read_string().unwrap(), "ab");
        assert_eq!(reader.read_bytes(2).unwrap().as_ref(), &[9, 8]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let mut buf = PduBuf::new(3).unwrap();
        buf.init_header(0x01, 0x01).unwrap();
        assert_eq!(
            buf.append_u32(1),
            Err(ProtocolError::EncodingOverflow {
                needed: 4,
                available: 3
            })
        );
        // A failed append leaves the cursor untouched.
        buf.append_string("hi").unwrap();
        assert!(buf.seal().is_ok());
    }

    #[test]
    fn test_underfilled_buffer_does_not_seal() {
        let mut buf = PduBuf::new(8).unwrap();
        buf.init_header(0x01, 0x01).unwrap();
        buf.append_u32(7).unwrap();
        assert_eq!(
            buf.seal().unwrap_err(),
            ProtocolError::SizeMismatch {
                declared: 8,
                written: 4
            }
        );
    }

    #[test]
    fn test_header_is_stamped_once_and_first() {
        let mut buf = PduBuf::new(4).unwrap();
        assert_eq!(buf.append_u32(1), Err(ProtocolError::HeaderNotInitialized));
        buf.init_header(0x01, 0x02).unwrap();
        assert_eq!(
            buf.init_header(0x01, 0x03),
            Err(ProtocolError::HeaderAlreadyInitialized)
        );
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = PduBuf::new(0).unwrap();
        buf.init_header(0x01, 0x03).unwrap();
        let sealed = buf.seal().unwrap();
        assert_eq!(sealed.frame(), &[0x01, 0x03, 0, 0, 0, 0]);
        assert!(sealed.payload().is_empty());
    }

    #[test]
    fn test_truncated_reads() {
        let mut reader = PduReader::new(Bytes::from_static(&[1, 2]));
        assert_eq!(
            reader.read_u32(),
            Err(ProtocolError::Truncated {
                needed: 4,
                remaining: 2
            })
        );

        let mut reader = PduReader::new(Bytes::from_static(b"no-nul"));
        assert_eq!(reader.read_string(), Err(ProtocolError::UnterminatedString));
    }

    #[test]
    fn test_interior_nul_rejected() {
        let mut buf = PduBuf::new(4).unwrap();
        buf.init_header(0x01, 0x01).unwrap();
        assert!(matches!(
            buf.append_string("a\0b"),
            Err(ProtocolError::InvalidString(_))
        ));
    }

    #[test]
    fn test_fds_live_after_aligned_payload() {
        let mut buf = PduBuf::with_fds(5, &[3, 4]).unwrap();
        buf.init_header(0x01, 0x02).unwrap();
        buf.append_u32(1).unwrap();
        buf.append_u8(2).unwrap();
        let sealed = buf.seal().unwrap();

        // Tail never leaks into the frame.
        assert_eq!(sealed.frame().len(), HEADER_SIZE + 5);

        let tail = sealed.ancillary().unwrap();
        assert_eq!(tail.fds(), vec![3, 4]);
        assert_eq!(tail.control().len, ancillary::cmsg_len(8));
        assert!(tail.control().is_scm_rights());
    }

    #[test]
    fn test_with_no_fds_is_plain() {
        let mut buf = PduBuf::with_fds(0, &[]).unwrap();
        buf.init_header(0x01, 0x02).unwrap();
        assert!(buf.seal().unwrap().ancillary().is_none());
    }

    #[test]
    fn test_header_limits() {
        assert_eq!(decode_header(&[1, 2, 3]).unwrap(), None);
        let oversized = [0x01, 0x01, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode_header(&oversized),
            Err(ProtocolError::PayloadTooLarge(_, _))
        ));
    }
}
