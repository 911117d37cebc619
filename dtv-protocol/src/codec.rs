//! Codec for the tuner, channel and program records.
//!
//! Record layouts (strings are UTF-8 followed by a single NUL, integers are
//! little endian):
//!
//! ```text
//! Tuner:   id:str  num_types:u32  types:u8[num_types]
//! Channel: network_id:str  ts_id:str  service_id:str  type:u8
//!          number:str  name:str  is_emergency:u8  is_free:u8
//! Program: event_id:str  title:str  start:u64  duration:u64
//!          description:str  rating:str
//!          lang_num:u32  langs:str[lang_num]
//!          stl_lang_num:u32  stl_langs:str[stl_lang_num]
//! ```
//!
//! The `*_size` functions give the exact number of bytes the matching
//! `append_*` writes, so a response buffer can be allocated once.

use crate::error::ProtocolError;
use crate::pdu::{PduBuf, PduReader};
use crate::types::{Channel, Program, SourceType, Tuner};

const U8_SIZE: usize = 1;
const U32_SIZE: usize = 4;
const U64_SIZE: usize = 8;

/// Wire size of a string field.
pub fn string_size(s: &str) -> usize {
    s.len() + 1
}

fn string_list_size(list: &[String]) -> usize {
    U32_SIZE + list.iter().map(|s| string_size(s)).sum::<usize>()
}

/// Wire size of a tuner record.
pub fn tuner_size(tuner: &Tuner) -> usize {
    string_size(&tuner.id) + U32_SIZE + tuner.supported_types.len() * U8_SIZE
}

/// Wire size of a channel record.
pub fn channel_size(ch: &Channel) -> usize {
    string_size(&ch.network_id)
        + string_size(&ch.transport_stream_id)
        + string_size(&ch.service_id)
        + U8_SIZE
        + string_size(&ch.number)
        + string_size(&ch.name)
        + U8_SIZE
        + U8_SIZE
}

/// Wire size of a program record.
pub fn program_size(prog: &Program) -> usize {
    string_size(&prog.event_id)
        + string_size(&prog.title)
        + U64_SIZE
        + U64_SIZE
        + string_size(&prog.description)
        + string_size(&prog.rating)
        + string_list_size(&prog.languages)
        + string_list_size(&prog.subtitle_languages)
}

/// Wire size of a counted list of records.
pub fn list_size<T>(items: &[T], item_size: impl Fn(&T) -> usize) -> usize {
    U32_SIZE + items.iter().map(item_size).sum::<usize>()
}

fn count_of(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::EncodingOverflow {
        needed: len,
        available: u32::MAX as usize,
    })
}

fn append_string_list(buf: &mut PduBuf, list: &[String]) -> Result<(), ProtocolError> {
    buf.append_u32(count_of(list.len())?)?;
    for s in list {
        buf.append_string(s)?;
    }
    Ok(())
}

pub fn append_tuner(buf: &mut PduBuf, tuner: &Tuner) -> Result<(), ProtocolError> {
    buf.append_string(&tuner.id)?;
    buf.append_u32(count_of(tuner.supported_types.len())?)?;
    for source in &tuner.supported_types {
        buf.append_u8((*source).into())?;
    }
    Ok(())
}

pub fn append_channel(buf: &mut PduBuf, ch: &Channel) -> Result<(), ProtocolError> {
    buf.append_string(&ch.network_id)?;
    buf.append_string(&ch.transport_stream_id)?;
    buf.append_string(&ch.service_id)?;
    buf.append_u8(ch.channel_type)?;
    buf.append_string(&ch.number)?;
    buf.append_string(&ch.name)?;
    buf.append_bool(ch.is_emergency)?;
    buf.append_bool(ch.is_free)?;
    Ok(())
}

pub fn append_program(buf: &mut PduBuf, prog: &Program) -> Result<(), ProtocolError> {
    buf.append_string(&prog.event_id)?;
    buf.append_string(&prog.title)?;
    buf.append_u64(prog.start_time)?;
    buf.append_u64(prog.duration)?;
    buf.append_string(&prog.description)?;
    buf.append_string(&prog.rating)?;
    append_string_list(buf, &prog.languages)?;
    append_string_list(buf, &prog.subtitle_languages)?;
    Ok(())
}

/// Read a source type byte.
pub fn read_source_type(reader: &mut PduReader) -> Result<SourceType, ProtocolError> {
    let raw = reader.read_u8()?;
    SourceType::try_from(raw).map_err(ProtocolError::InvalidSourceType)
}

/// Read a `count:u32` prefix, rejecting counts the payload cannot hold.
pub fn read_count(reader: &mut PduReader, min_item_size: usize) -> Result<usize, ProtocolError> {
    let count = reader.read_u32()? as usize;
    let needed = count.saturating_mul(min_item_size);
    if needed > reader.remaining() {
        return Err(ProtocolError::Truncated {
            needed,
            remaining: reader.remaining(),
        });
    }
    Ok(count)
}

fn read_string_list(reader: &mut PduReader) -> Result<Vec<String>, ProtocolError> {
    let count = read_count(reader, 1)?;
    (0..count).map(|_| reader.read_string()).collect()
}

pub fn read_tuner(reader: &mut PduReader) -> Result<Tuner, ProtocolError> {
    let id = reader.read_string()?;
    let count = read_count(reader, U8_SIZE)?;
    let supported_types = (0..count)
        .map(|_| read_source_type(reader))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Tuner {
        id,
        supported_types,
    })
}

pub fn read_channel(reader: &mut PduReader) -> Result<Channel, ProtocolError> {
    Ok(Channel {
        network_id: reader.read_string()?,
        transport_stream_id: reader.read_string()?,
        service_id: reader.read_string()?,
        channel_type: reader.read_u8()?,
        number: reader.read_string()?,
        name: reader.read_string()?,
        is_emergency: reader.read_bool()?,
        is_free: reader.read_bool()?,
    })
}

pub fn read_program(reader: &mut PduReader) -> Result<Program, ProtocolError> {
    Ok(Program {
        event_id: reader.read_string()?,
        title: reader.read_string()?,
        start_time: reader.read_u64()?,
        duration: reader.read_u64()?,
        description: reader.read_string()?,
        rating: reader.read_string()?,
        languages: read_string_list(reader)?,
        subtitle_languages: read_string_list(reader)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_channel() -> Channel {
        Channel {
            network_id: "32736".to_string(),
            transport_stream_id: "32736".to_string(),
            service_id: "1024".to_string(),
            channel_type: 1,
            number: "011".to_string(),
            name: "NHK総合".to_string(),
            is_emergency: false,
            is_free: true,
        }
    }

    fn news_program() -> Program {
        Program {
            event_id: "e1".to_string(),
            title: "News".to_string(),
            start_time: 1_704_067_200,
            duration: 1800,
            description: "d".to_string(),
            rating: "G".to_string(),
            languages: vec!["en".to_string(), "fr".to_string()],
            subtitle_languages: Vec::new(),
        }
    }

    fn encode_with<T>(
        record: &T,
        size: impl Fn(&T) -> usize,
        append: impl Fn(&mut PduBuf, &T) -> Result<(), ProtocolError>,
    ) -> Vec<u8> {
        let mut buf = PduBuf::new(size(record)).unwrap();
        buf.init_header(0x01, 0x00).unwrap();
        append(&mut buf, record).unwrap();
        buf.seal().unwrap().payload().to_vec()
    }

    #[test]
    fn test_program_layout() {
        let payload = encode_with(&news_program(), program_size, append_program);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"e1\0");
        expected.extend_from_slice(b"News\0");
        expected.extend_from_slice(&1_704_067_200u64.to_le_bytes());
        expected.extend_from_slice(&1800u64.to_le_bytes());
        expected.extend_from_slice(b"d\0");
        expected.extend_from_slice(b"G\0");
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"en\0");
        expected.extend_from_slice(b"fr\0");
        expected.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_channel_layout() {
        let ch = Channel {
            network_id: "1".to_string(),
            transport_stream_id: "2".to_string(),
            service_id: "3".to_string(),
            channel_type: 7,
            number: "4-1".to_string(),
            name: "N".to_string(),
            is_emergency: true,
            is_free: false,
        };
        let payload = encode_with(&ch, channel_size, append_channel);
        assert_eq!(payload, b"1\x002\x003\x00\x074-1\x00N\x00\x01\x00".to_vec());
    }

    #[test]
    fn test_tuner_layout() {
        let tuner = Tuner {
            id: "7".to_string(),
            supported_types: vec![SourceType::DvbT, SourceType::IsdbT],
        };
        let payload = encode_with(&tuner, tuner_size, append_tuner);
        assert_eq!(payload, vec![b'7', 0, 2, 0, 0, 0, 0x00, 0x0a]);
    }

    #[test]
    fn test_sizes_cover_empty_fields() {
        let tuner = Tuner::default();
        assert_eq!(tuner_size(&tuner), 5);
        assert_eq!(encode_with(&tuner, tuner_size, append_tuner).len(), 5);

        let ch = Channel::default();
        assert_eq!(channel_size(&ch), 8);
        assert_eq!(encode_with(&ch, channel_size, append_channel).len(), 8);

        let prog = Program::default();
        assert_eq!(program_size(&prog), 4 + 16 + 8);
        assert_eq!(encode_with(&prog, program_size, append_program).len(), 28);
    }

    #[test]
    fn test_subtitle_list_sized_by_its_own_entries() {
        let mut prog = news_program();
        prog.languages = vec!["ja".to_string()];
        prog.subtitle_languages = vec!["ja".to_string(), "en".to_string(), "zh".to_string()];
        let payload = encode_with(&prog, program_size, append_program);
        assert_eq!(payload.len(), program_size(&prog));

        let mut reader = PduReader::new(payload.into());
        assert_eq!(read_program(&mut reader).unwrap(), prog);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_records_decode_back() {
        let ch = sample_channel();
        let payload = encode_with(&ch, channel_size, append_channel);
        assert_eq!(read_channel(&mut PduReader::new(payload.into())).unwrap(), ch);

        let tuner = Tuner {
            id: "12".to_string(),
            supported_types: vec![SourceType::DvbS2],
        };
        let payload = encode_with(&tuner, tuner_size, append_tuner);
        assert_eq!(read_tuner(&mut PduReader::new(payload.into())).unwrap(), tuner);
    }

    #[test]
    fn test_undersized_buffer_overflows() {
        let ch = sample_channel();
        let mut buf = PduBuf::new(channel_size(&ch) - 1).unwrap();
        buf.init_header(0x01, 0x06).unwrap();
        assert!(matches!(
            append_channel(&mut buf, &ch),
            Err(ProtocolError::EncodingOverflow { .. })
        ));
    }

    #[test]
    fn test_bogus_count_is_truncated() {
        let mut payload = b"id\0".to_vec();
        payload.extend_from_slice(&1000u32.to_le_bytes());
        let err = read_tuner(&mut PduReader::new(payload.into())).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }
}
