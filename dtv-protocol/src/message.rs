//! Request, response and notification messages.
//!
//! Requests are decoded from inbound PDUs by the service and encoded by
//! clients. Responses and notifications go the other way. Every encoder
//! sizes the payload first and fills a single [`PduBuf`].

use std::os::fd::RawFd;

use bytes::Bytes;

use crate::codec::{self, list_size, string_size};
use crate::error::{ErrorCode, ProtocolError};
use crate::pdu::{Pdu, PduBuf, PduReader, SealedPdu};
use crate::types::*;

fn build(
    service: u8,
    opcode: Opcode,
    payload_size: usize,
    fds: &[RawFd],
    fill: impl FnOnce(&mut PduBuf) -> Result<(), ProtocolError>,
) -> Result<SealedPdu, ProtocolError> {
    let mut buf = PduBuf::with_fds(payload_size, fds)?;
    buf.init_header(service, opcode.into())?;
    fill(&mut buf)?;
    buf.seal()
}

fn source_key_size(tuner_id: &str) -> usize {
    string_size(tuner_id) + 1
}

fn append_source_key(
    buf: &mut PduBuf,
    tuner_id: &str,
    source: SourceType,
) -> Result<(), ProtocolError> {
    buf.append_string(tuner_id)?;
    buf.append_u8(source.into())
}

fn read_source_key(reader: &mut PduReader) -> Result<(String, SourceType), ProtocolError> {
    let tuner_id = reader.read_string()?;
    let source = codec::read_source_type(reader)?;
    Ok((tuner_id, source))
}

fn append_list<T>(
    buf: &mut PduBuf,
    items: &[T],
    append: impl Fn(&mut PduBuf, &T) -> Result<(), ProtocolError>,
) -> Result<(), ProtocolError> {
    let count = u32::try_from(items.len()).map_err(|_| ProtocolError::EncodingOverflow {
        needed: items.len(),
        available: u32::MAX as usize,
    })?;
    buf.append_u32(count)?;
    for item in items {
        append(buf, item)?;
    }
    Ok(())
}

fn read_list<T>(
    reader: &mut PduReader,
    min_item_size: usize,
    read: impl Fn(&mut PduReader) -> Result<T, ProtocolError>,
) -> Result<Vec<T>, ProtocolError> {
    let count = codec::read_count(reader, min_item_size)?;
    (0..count).map(|_| read(reader)).collect()
}

/// Commands a client sends to the DTV service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetTuners,
    SetSource {
        tuner_id: String,
        source: SourceType,
    },
    StartScan {
        tuner_id: String,
        source: SourceType,
    },
    StopScan {
        tuner_id: String,
        source: SourceType,
    },
    ClearChannelCache,
    SetChannel {
        tuner_id: String,
        source: SourceType,
        number: String,
    },
    GetChannels {
        tuner_id: String,
        source: SourceType,
    },
    GetPrograms {
        tuner_id: String,
        source: SourceType,
        number: String,
        start: u64,
        end: u64,
    },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::GetTuners => Opcode::GetTuners,
            Request::SetSource { .. } => Opcode::SetSource,
            Request::StartScan { .. } => Opcode::StartScan,
            Request::StopScan { .. } => Opcode::StopScan,
            Request::ClearChannelCache => Opcode::ClearChannelCache,
            Request::SetChannel { .. } => Opcode::SetChannel,
            Request::GetChannels { .. } => Opcode::GetChannels,
            Request::GetPrograms { .. } => Opcode::GetPrograms,
        }
    }

    /// Decode a request PDU.
    ///
    /// Unknown service ids and opcodes are rejected before the payload is
    /// looked at. Bytes after the last field are ignored.
    pub fn decode(pdu: &Pdu) -> Result<Self, ProtocolError> {
        if pdu.service != SERVICE_DTV {
            return Err(ProtocolError::UnknownService(pdu.service));
        }
        let opcode = Opcode::try_from(pdu.opcode).map_err(ProtocolError::UnsupportedOpcode)?;
        let mut reader = pdu.reader();

        let request = match opcode {
            Opcode::GetTuners => Request::GetTuners,
            Opcode::SetSource => {
                let (tuner_id, source) = read_source_key(&mut reader)?;
                Request::SetSource { tuner_id, source }
            }
            Opcode::StartScan => {
                let (tuner_id, source) = read_source_key(&mut reader)?;
                Request::StartScan { tuner_id, source }
            }
            Opcode::StopScan => {
                let (tuner_id, source) = read_source_key(&mut reader)?;
                Request::StopScan { tuner_id, source }
            }
            Opcode::ClearChannelCache => Request::ClearChannelCache,
            Opcode::SetChannel => {
                let (tuner_id, source) = read_source_key(&mut reader)?;
                let number = reader.read_string()?;
                Request::SetChannel {
                    tuner_id,
                    source,
                    number,
                }
            }
            Opcode::GetChannels => {
                let (tuner_id, source) = read_source_key(&mut reader)?;
                Request::GetChannels { tuner_id, source }
            }
            Opcode::GetPrograms => {
                let (tuner_id, source) = read_source_key(&mut reader)?;
                let number = reader.read_string()?;
                let start = reader.read_u64()?;
                let end = reader.read_u64()?;
                Request::GetPrograms {
                    tuner_id,
                    source,
                    number,
                    start,
                    end,
                }
            }
            other => return Err(ProtocolError::UnsupportedOpcode(other.into())),
        };

        Ok(request)
    }

    fn payload_size(&self) -> usize {
        match self {
            Request::GetTuners | Request::ClearChannelCache => 0,
            Request::SetSource { tuner_id, .. }
            | Request::StartScan { tuner_id, .. }
            | Request::StopScan { tuner_id, .. }
            | Request::GetChannels { tuner_id, .. } => source_key_size(tuner_id),
            Request::SetChannel {
                tuner_id, number, ..
            } => source_key_size(tuner_id) + string_size(number),
            Request::GetPrograms {
                tuner_id, number, ..
            } => source_key_size(tuner_id) + string_size(number) + 16,
        }
    }

    /// Encode the request for the DTV service.
    pub fn encode(&self) -> Result<SealedPdu, ProtocolError> {
        build(SERVICE_DTV, self.opcode(), self.payload_size(), &[], |buf| {
            match self {
                Request::GetTuners | Request::ClearChannelCache => {}
                Request::SetSource { tuner_id, source }
                | Request::StartScan { tuner_id, source }
                | Request::StopScan { tuner_id, source }
                | Request::GetChannels { tuner_id, source } => {
                    append_source_key(buf, tuner_id, *source)?;
                }
                Request::SetChannel {
                    tuner_id,
                    source,
                    number,
                } => {
                    append_source_key(buf, tuner_id, *source)?;
                    buf.append_string(number)?;
                }
                Request::GetPrograms {
                    tuner_id,
                    source,
                    number,
                    start,
                    end,
                } => {
                    append_source_key(buf, tuner_id, *source)?;
                    buf.append_string(number)?;
                    buf.append_u64(*start)?;
                    buf.append_u64(*end)?;
                }
            }
            Ok(())
        })
    }
}

/// Successful command results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Tuners(Vec<Tuner>),
    /// Stream handle; its descriptors ride on the ancillary channel.
    Source(NativeHandle),
    ScanStarted,
    ScanStopped,
    CacheCleared,
    Channel(Channel),
    Channels(Vec<Channel>),
    Programs(Vec<Program>),
}

impl Response {
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Tuners(_) => Opcode::GetTuners,
            Response::Source(_) => Opcode::SetSource,
            Response::ScanStarted => Opcode::StartScan,
            Response::ScanStopped => Opcode::StopScan,
            Response::CacheCleared => Opcode::ClearChannelCache,
            Response::Channel(_) => Opcode::SetChannel,
            Response::Channels(_) => Opcode::GetChannels,
            Response::Programs(_) => Opcode::GetPrograms,
        }
    }

    /// Exact payload size of the encoded response.
    pub fn payload_size(&self) -> usize {
        match self {
            Response::Tuners(tuners) => list_size(tuners, codec::tuner_size),
            Response::Source(handle) => 12 + 4 * handle.ints.len(),
            Response::ScanStarted | Response::ScanStopped | Response::CacheCleared => 0,
            Response::Channel(ch) => codec::channel_size(ch),
            Response::Channels(channels) => list_size(channels, codec::channel_size),
            Response::Programs(programs) => list_size(programs, codec::program_size),
        }
    }

    /// Encode the response under the request's service id.
    pub fn encode(&self, service: u8) -> Result<SealedPdu, ProtocolError> {
        let fds: &[RawFd] = match self {
            Response::Source(handle) => &handle.fds,
            _ => &[],
        };
        build(service, self.opcode(), self.payload_size(), fds, |buf| {
            match self {
                Response::Tuners(tuners) => append_list(buf, tuners, codec::append_tuner)?,
                Response::Source(handle) => {
                    buf.append_u32(handle.version)?;
                    buf.append_u32(handle.fds.len() as u32)?;
                    buf.append_u32(handle.ints.len() as u32)?;
                    for value in &handle.ints {
                        buf.append_i32(*value)?;
                    }
                }
                Response::ScanStarted | Response::ScanStopped | Response::CacheCleared => {}
                Response::Channel(ch) => codec::append_channel(buf, ch)?,
                Response::Channels(channels) => {
                    append_list(buf, channels, codec::append_channel)?
                }
                Response::Programs(programs) => {
                    append_list(buf, programs, codec::append_program)?
                }
            }
            Ok(())
        })
    }

    /// Decode a response payload for `opcode`.
    ///
    /// `fds` are the descriptors received alongside the PDU; set-source
    /// responses must carry exactly as many as their payload announces.
    pub fn decode(opcode: Opcode, payload: Bytes, fds: &[RawFd]) -> Result<Self, ProtocolError> {
        let mut reader = PduReader::new(payload);
        let response = match opcode {
            Opcode::GetTuners => Response::Tuners(read_list(&mut reader, 5, codec::read_tuner)?),
            Opcode::SetSource => {
                let version = reader.read_u32()?;
                let num_fds = reader.read_u32()? as usize;
                let num_ints = codec::read_count(&mut reader, 4)?;
                if num_fds != fds.len() {
                    return Err(ProtocolError::AncillaryMismatch {
                        expected: num_fds,
                        actual: fds.len(),
                    });
                }
                let ints = (0..num_ints)
                    .map(|_| reader.read_i32())
                    .collect::<Result<Vec<_>, _>>()?;
                Response::Source(NativeHandle {
                    version,
                    fds: fds.to_vec(),
                    ints,
                })
            }
            Opcode::StartScan => Response::ScanStarted,
            Opcode::StopScan => Response::ScanStopped,
            Opcode::ClearChannelCache => Response::CacheCleared,
            Opcode::SetChannel => Response::Channel(codec::read_channel(&mut reader)?),
            Opcode::GetChannels => {
                Response::Channels(read_list(&mut reader, 8, codec::read_channel)?)
            }
            Opcode::GetPrograms => {
                Response::Programs(read_list(&mut reader, 28, codec::read_program)?)
            }
            other => return Err(ProtocolError::UnsupportedOpcode(other.into())),
        };
        Ok(response)
    }
}

/// Server-initiated messages produced by the scanning and EPG logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ChannelScanned {
        tuner_id: String,
        source: SourceType,
        channel: Channel,
    },
    ScanComplete {
        tuner_id: String,
        source: SourceType,
    },
    ScanStopped {
        tuner_id: String,
        source: SourceType,
    },
    EitBroadcast {
        tuner_id: String,
        source: SourceType,
        channel: Channel,
        programs: Vec<Program>,
    },
}

impl Notification {
    pub fn opcode(&self) -> Opcode {
        match self {
            Notification::ChannelScanned { .. } => Opcode::ChannelScanned,
            Notification::ScanComplete { .. } => Opcode::ScanComplete,
            Notification::ScanStopped { .. } => Opcode::ScanStopped,
            Notification::EitBroadcast { .. } => Opcode::EitBroadcast,
        }
    }

    pub fn payload_size(&self) -> usize {
        match self {
            Notification::ChannelScanned {
                tuner_id, channel, ..
            } => source_key_size(tuner_id) + codec::channel_size(channel),
            Notification::ScanComplete { tuner_id, .. }
            | Notification::ScanStopped { tuner_id, .. } => source_key_size(tuner_id),
            Notification::EitBroadcast {
                tuner_id,
                channel,
                programs,
                ..
            } => {
                source_key_size(tuner_id)
                    + codec::channel_size(channel)
                    + list_size(programs, codec::program_size)
            }
        }
    }

    pub fn encode(&self) -> Result<SealedPdu, ProtocolError> {
        build(SERVICE_DTV, self.opcode(), self.payload_size(), &[], |buf| {
            match self {
                Notification::ChannelScanned {
                    tuner_id,
                    source,
                    channel,
                } => {
                    append_source_key(buf, tuner_id, *source)?;
                    codec::append_channel(buf, channel)?;
                }
                Notification::ScanComplete { tuner_id, source }
                | Notification::ScanStopped { tuner_id, source } => {
                    append_source_key(buf, tuner_id, *source)?;
                }
                Notification::EitBroadcast {
                    tuner_id,
                    source,
                    channel,
                    programs,
                } => {
                    append_source_key(buf, tuner_id, *source)?;
                    codec::append_channel(buf, channel)?;
                    append_list(buf, programs, codec::append_program)?;
                }
            }
            Ok(())
        })
    }

    pub fn decode(pdu: &Pdu) -> Result<Self, ProtocolError> {
        let opcode = Opcode::try_from(pdu.opcode).map_err(ProtocolError::UnsupportedOpcode)?;
        let mut reader = pdu.reader();
        let (tuner_id, source) = match opcode {
            Opcode::ChannelScanned
            | Opcode::ScanComplete
            | Opcode::ScanStopped
            | Opcode::EitBroadcast => read_source_key(&mut reader)?,
            other => return Err(ProtocolError::UnsupportedOpcode(other.into())),
        };

        let notification = match opcode {
            Opcode::ChannelScanned => Notification::ChannelScanned {
                tuner_id,
                source,
                channel: codec::read_channel(&mut reader)?,
            },
            Opcode::ScanComplete => Notification::ScanComplete { tuner_id, source },
            Opcode::ScanStopped => Notification::ScanStopped { tuner_id, source },
            _ => {
                let channel = codec::read_channel(&mut reader)?;
                let programs = read_list(&mut reader, 28, codec::read_program)?;
                Notification::EitBroadcast {
                    tuner_id,
                    source,
                    channel,
                    programs,
                }
            }
        };
        Ok(notification)
    }
}

/// Encode an error PDU carrying `status`.
pub fn encode_error(service: u8, status: ErrorCode) -> Result<SealedPdu, ProtocolError> {
    build(service, Opcode::Error, 1, &[], |buf| buf.append_u8(status.into()))
}

/// Decode the status of an error PDU.
pub fn decode_error(pdu: &Pdu) -> Result<ErrorCode, ProtocolError> {
    if pdu.opcode != u8::from(Opcode::Error) {
        return Err(ProtocolError::UnsupportedOpcode(pdu.opcode));
    }
    Ok(ErrorCode::from(pdu.reader().read_u8()?))
}

/// Decode a reply to a command: either a response or an error status.
pub fn decode_reply(pdu: &Pdu, fds: &[RawFd]) -> Result<Result<Response, ErrorCode>, ProtocolError> {
    if pdu.opcode == u8::from(Opcode::Error) {
        return Ok(Err(decode_error(pdu)?));
    }
    let opcode = Opcode::try_from(pdu.opcode).map_err(ProtocolError::UnsupportedOpcode)?;
    Ok(Ok(Response::decode(opcode, pdu.payload.clone(), fds)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(number: &str) -> Channel {
        Channel {
            network_id: "32736".to_string(),
            transport_stream_id: "32736".to_string(),
            service_id: "1024".to_string(),
            channel_type: 1,
            number: number.to_string(),
            name: "NHK".to_string(),
            is_emergency: false,
            is_free: true,
        }
    }

    #[test]
    fn test_request_decode() {
        let req = Request::GetPrograms {
            tuner_id: "3".to_string(),
            source: SourceType::IsdbT,
            number: "011".to_string(),
            start: 100,
            end: 200,
        };
        let sealed = req.encode().unwrap();
        assert_eq!(sealed.service(), SERVICE_DTV);
        assert_eq!(sealed.opcode(), 0x08);
        assert_eq!(Request::decode(&sealed.to_pdu()).unwrap(), req);

        let pdu = Pdu::new(SERVICE_DTV, 0x01, Bytes::new());
        assert_eq!(Request::decode(&pdu).unwrap(), Request::GetTuners);
    }

    #[test]
    fn test_set_source_payload_layout() {
        let req = Request::SetSource {
            tuner_id: "7".to_string(),
            source: SourceType::DvbT2,
        };
        let sealed = req.encode().unwrap();
        assert_eq!(sealed.frame(), &[0x01, 0x02, 3, 0, 0, 0, b'7', 0, 0x01]);
    }

    #[test]
    fn test_request_rejects_unknown_opcode_and_service() {
        let pdu = Pdu::new(SERVICE_DTV, 0x42, Bytes::new());
        assert_eq!(
            Request::decode(&pdu),
            Err(ProtocolError::UnsupportedOpcode(0x42))
        );

        // Notification opcodes are not requests.
        let pdu = Pdu::new(SERVICE_DTV, 0x81, Bytes::new());
        assert_eq!(
            Request::decode(&pdu),
            Err(ProtocolError::UnsupportedOpcode(0x81))
        );

        let pdu = Pdu::new(0x02, 0x01, Bytes::new());
        assert_eq!(Request::decode(&pdu), Err(ProtocolError::UnknownService(0x02)));
    }

    #[test]
    fn test_request_malformed_payload() {
        let pdu = Pdu::new(SERVICE_DTV, 0x03, Bytes::from_static(b"1\0"));
        assert!(matches!(
            Request::decode(&pdu),
            Err(ProtocolError::Truncated { .. })
        ));

        let pdu = Pdu::new(SERVICE_DTV, 0x03, Bytes::from_static(b"1\0\x7f"));
        assert_eq!(
            Request::decode(&pdu),
            Err(ProtocolError::InvalidSourceType(0x7f))
        );
    }

    #[test]
    fn test_source_response_with_fds() {
        let handle = NativeHandle {
            version: 12,
            fds: vec![10, 11],
            ints: vec![-1, 42, 7],
        };
        let sealed = Response::Source(handle.clone()).encode(SERVICE_DTV).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&12u32.to_le_bytes());
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&3u32.to_le_bytes());
        for v in [-1i32, 42, 7] {
            expected.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(sealed.payload(), expected.as_slice());
        assert_eq!(sealed.ancillary().unwrap().fds(), vec![10, 11]);

        let pdu = sealed.to_pdu();
        assert_eq!(
            decode_reply(&pdu, &[10, 11]).unwrap(),
            Ok(Response::Source(handle))
        );
        assert_eq!(
            decode_reply(&pdu, &[10]),
            Err(ProtocolError::AncillaryMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_response_sizes_match_encoding() {
        let responses = vec![
            Response::Tuners(vec![Tuner::new("7"), Tuner::new("12")]),
            Response::Source(NativeHandle::default()),
            Response::ScanStarted,
            Response::CacheCleared,
            Response::Channel(channel("011")),
            Response::Channels(Vec::new()),
            Response::Programs(vec![Program::default()]),
        ];
        for response in responses {
            let sealed = response.encode(SERVICE_DTV).unwrap();
            assert_eq!(sealed.payload().len(), response.payload_size());
            let decoded = decode_reply(&sealed.to_pdu(), &[]).unwrap();
            assert_eq!(decoded, Ok(response));
        }
    }

    #[test]
    fn test_error_pdu() {
        let sealed = encode_error(SERVICE_DTV, ErrorCode::UnsupportedOpcode).unwrap();
        assert_eq!(sealed.frame(), &[0x01, 0x00, 1, 0, 0, 0, 0x06]);
        assert_eq!(
            decode_reply(&sealed.to_pdu(), &[]).unwrap(),
            Err(ErrorCode::UnsupportedOpcode)
        );
    }

    #[test]
    fn test_notifications() {
        let eit = Notification::EitBroadcast {
            tuner_id: "7".to_string(),
            source: SourceType::IsdbT,
            channel: channel("021"),
            programs: vec![Program {
                event_id: "1".to_string(),
                title: "News".to_string(),
                languages: vec!["ja".to_string()],
                ..Default::default()
            }],
        };
        let sealed = eit.encode().unwrap();
        assert_eq!(sealed.opcode(), 0x84);
        assert_eq!(sealed.payload().len(), eit.payload_size());
        assert_eq!(Notification::decode(&sealed.to_pdu()).unwrap(), eit);

        let done = Notification::ScanComplete {
            tuner_id: "7".to_string(),
            source: SourceType::IsdbT,
        };
        let sealed = done.encode().unwrap();
        assert_eq!(sealed.frame(), &[0x01, 0x82, 3, 0, 0, 0, b'7', 0, 0x0a]);
    }
}
