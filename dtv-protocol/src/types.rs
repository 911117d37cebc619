//! Message and record type definitions for the DTV IPC protocol.

use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};

/// Service id of the DTV service.
pub const SERVICE_DTV: u8 = 0x01;

/// Maximum PDU payload size (16 MB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Opcode identifiers.
///
/// Commands and their responses share an opcode. Notifications live in the
/// 0x8x range and are never answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Failure response.
    Error = 0x00,

    // Commands
    /// List the available tuners.
    GetTuners = 0x01,
    /// Select a tuner source and obtain its stream handle.
    SetSource = 0x02,
    /// Start channel scanning.
    StartScan = 0x03,
    /// Stop channel scanning.
    StopScan = 0x04,
    /// Drop the scanned channel cache.
    ClearChannelCache = 0x05,
    /// Tune to a channel.
    SetChannel = 0x06,
    /// List the channels of a tuner source.
    GetChannels = 0x07,
    /// List the programs of a channel in a time window.
    GetPrograms = 0x08,

    // Notifications
    /// A channel was found while scanning.
    ChannelScanned = 0x81,
    /// Scanning finished.
    ScanComplete = 0x82,
    /// Scanning was stopped.
    ScanStopped = 0x83,
    /// An event information table was received.
    EitBroadcast = 0x84,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(Opcode::Error),
            0x01 => Ok(Opcode::GetTuners),
            0x02 => Ok(Opcode::SetSource),
            0x03 => Ok(Opcode::StartScan),
            0x04 => Ok(Opcode::StopScan),
            0x05 => Ok(Opcode::ClearChannelCache),
            0x06 => Ok(Opcode::SetChannel),
            0x07 => Ok(Opcode::GetChannels),
            0x08 => Ok(Opcode::GetPrograms),
            0x81 => Ok(Opcode::ChannelScanned),
            0x82 => Ok(Opcode::ScanComplete),
            0x83 => Ok(Opcode::ScanStopped),
            0x84 => Ok(Opcode::EitBroadcast),
            _ => Err(value),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        value as u8
    }
}

/// Broadcast standard a tuner can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SourceType {
    DvbT = 0x00,
    DvbT2 = 0x01,
    DvbC = 0x02,
    DvbC2 = 0x03,
    DvbS = 0x04,
    DvbS2 = 0x05,
    DvbH = 0x06,
    DvbSh = 0x07,
    Atsc = 0x08,
    AtscMh = 0x09,
    IsdbT = 0x0a,
    IsdbTb = 0x0b,
    IsdbS = 0x0c,
    IsdbC = 0x0d,
    OneSeg = 0x0e,
    Dtmb = 0x0f,
    Cmmb = 0x10,
    TDmb = 0x11,
    SDmb = 0x12,
}

impl TryFrom<u8> for SourceType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(SourceType::DvbT),
            0x01 => Ok(SourceType::DvbT2),
            0x02 => Ok(SourceType::DvbC),
            0x03 => Ok(SourceType::DvbC2),
            0x04 => Ok(SourceType::DvbS),
            0x05 => Ok(SourceType::DvbS2),
            0x06 => Ok(SourceType::DvbH),
            0x07 => Ok(SourceType::DvbSh),
            0x08 => Ok(SourceType::Atsc),
            0x09 => Ok(SourceType::AtscMh),
            0x0a => Ok(SourceType::IsdbT),
            0x0b => Ok(SourceType::IsdbTb),
            0x0c => Ok(SourceType::IsdbS),
            0x0d => Ok(SourceType::IsdbC),
            0x0e => Ok(SourceType::OneSeg),
            0x0f => Ok(SourceType::Dtmb),
            0x10 => Ok(SourceType::Cmmb),
            0x11 => Ok(SourceType::TDmb),
            0x12 => Ok(SourceType::SDmb),
            _ => Err(value),
        }
    }
}

impl From<SourceType> for u8 {
    fn from(value: SourceType) -> Self {
        value as u8
    }
}

/// A tuner input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tuner {
    /// Tuner identifier. Numeric-looking but carried as text.
    pub id: String,
    /// Source types the tuner can receive.
    pub supported_types: Vec<SourceType>,
}

impl Tuner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            supported_types: Vec::new(),
        }
    }
}

/// A broadcast channel.
///
/// Network id, transport stream id and service id together form the tuning
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channel {
    pub network_id: String,
    pub transport_stream_id: String,
    pub service_id: String,
    /// Channel type code.
    pub channel_type: u8,
    /// Display number. Not purely numeric in every numbering scheme.
    pub number: String,
    /// Display name.
    pub name: String,
    pub is_emergency: bool,
    pub is_free: bool,
}

/// A program (EPG event) on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Program {
    pub event_id: String,
    pub title: String,
    pub start_time: u64,
    pub duration: u64,
    pub description: String,
    pub rating: String,
    /// Spoken language codes.
    pub languages: Vec<String>,
    /// Subtitle language codes.
    pub subtitle_languages: Vec<String>,
}

/// Platform stream handle returned for a tuner source.
///
/// File descriptors travel out of band on the ancillary channel; only the
/// plain integers are part of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NativeHandle {
    pub version: u32,
    pub fds: Vec<RawFd>,
    pub ints: Vec<i32>,
}

/// Channel update status reported by the business logic.
pub mod channel_status {
    pub const ADDED: u8 = 0;
}

/// Scan status reported by the business logic.
pub mod scan_status {
    pub const UNKNOWN: u8 = 0;
    pub const COMPLETE: u8 = 1;
    pub const STOPPED: u8 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for raw in 0u8..=0xFF {
            if let Ok(op) = Opcode::try_from(raw) {
                assert_eq!(u8::from(op), raw);
            }
        }
        assert_eq!(Opcode::try_from(0x09), Err(0x09));
    }

    #[test]
    fn test_source_type_codes() {
        assert_eq!(SourceType::try_from(0x0a), Ok(SourceType::IsdbT));
        assert_eq!(u8::from(SourceType::SDmb), 0x12);
        assert_eq!(SourceType::try_from(0x13), Err(0x13));
    }
}
