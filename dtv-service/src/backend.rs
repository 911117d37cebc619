//! DTV business logic collaborator.
//!
//! Scanning, channel and EPG operations are delegated to a [`DtvBackend`].
//! Asynchronous results (scanned channels, scan completion, EIT updates)
//! are reported through the [`NotificationEmitter`] handed over at init.

use dtv_protocol::{Channel, ErrorCode, Program, SourceType};
use log::debug;

use crate::notify::NotificationEmitter;

pub trait DtvBackend: Send {
    fn init(&mut self, emitter: NotificationEmitter) -> Result<(), ErrorCode>;

    fn uninit(&mut self) -> Result<(), ErrorCode>;

    fn start_scanning(&mut self, tuner_id: &str, source: SourceType) -> Result<(), ErrorCode>;

    fn stop_scanning(&mut self, tuner_id: &str, source: SourceType) -> Result<(), ErrorCode>;

    fn clear_scanned_channel_cache(&mut self) -> Result<(), ErrorCode>;

    /// Tune to `number` and return the channel now playing.
    fn set_channel(
        &mut self,
        tuner_id: &str,
        source: SourceType,
        number: &str,
    ) -> Result<Channel, ErrorCode>;

    fn channels(&mut self, tuner_id: &str, source: SourceType) -> Result<Vec<Channel>, ErrorCode>;

    /// Programs of channel `number` overlapping `[start, end]`.
    fn programs(
        &mut self,
        tuner_id: &str,
        source: SourceType,
        number: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<Program>, ErrorCode>;
}

/// Backend without scanning or EPG support. Every business operation
/// reports [`ErrorCode::NotSupported`].
#[derive(Debug, Default)]
pub struct UnsupportedBackend {
    emitter: Option<NotificationEmitter>,
}

impl DtvBackend for UnsupportedBackend {
    fn init(&mut self, emitter: NotificationEmitter) -> Result<(), ErrorCode> {
        self.emitter = Some(emitter);
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), ErrorCode> {
        self.emitter = None;
        Ok(())
    }

    fn start_scanning(&mut self, tuner_id: &str, source: SourceType) -> Result<(), ErrorCode> {
        debug!("start_scanning({}, {:?}) not supported", tuner_id, source);
        Err(ErrorCode::NotSupported)
    }

    fn stop_scanning(&mut self, tuner_id: &str, source: SourceType) -> Result<(), ErrorCode> {
        debug!("stop_scanning({}, {:?}) not supported", tuner_id, source);
        Err(ErrorCode::NotSupported)
    }

    fn clear_scanned_channel_cache(&mut self) -> Result<(), ErrorCode> {
        Err(ErrorCode::NotSupported)
    }

    fn set_channel(
        &mut self,
        _tuner_id: &str,
        _source: SourceType,
        _number: &str,
    ) -> Result<Channel, ErrorCode> {
        Err(ErrorCode::NotSupported)
    }

    fn channels(&mut self, _tuner_id: &str, _source: SourceType) -> Result<Vec<Channel>, ErrorCode> {
        Err(ErrorCode::NotSupported)
    }

    fn programs(
        &mut self,
        _tuner_id: &str,
        _source: SourceType,
        _number: &str,
        _start: u64,
        _end: u64,
    ) -> Result<Vec<Program>, ErrorCode> {
        Err(ErrorCode::NotSupported)
    }
}
