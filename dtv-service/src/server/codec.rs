//! Stream framing for inbound PDUs.

use std::io;

use bytes::BytesMut;
use dtv_protocol::{decode_header, Pdu, HEADER_SIZE};
use tokio_util::codec::Decoder;

/// Splits a byte stream into [`Pdu`]s.
#[derive(Debug, Default)]
pub struct PduCodec;

impl Decoder for PduCodec {
    type Item = Pdu;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Pdu>, io::Error> {
        let header = match decode_header(src) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        };

        let total_len = HEADER_SIZE + header.payload_len as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let _ = src.split_to(HEADER_SIZE);
        let payload = src.split_to(header.payload_len as usize).freeze();
        Ok(Some(Pdu::new(header.service, header.opcode, payload)))
    }
}
