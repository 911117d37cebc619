//! TV input hardware abstraction.
//!
//! The registry drives the hardware through [`TvInputHal`]. Hardware
//! events arrive through a [`HalCallback`] that may be invoked from any
//! thread and must never block.

pub mod simulated;

use std::sync::Arc;

use dtv_protocol::{ErrorCode, NativeHandle};
use serde::Deserialize;
use thiserror::Error;

pub use simulated::SimulatedHal;

/// Kind of TV input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(i32)]
pub enum DeviceType {
    Other = 1,
    Tuner = 2,
    Composite = 3,
    Svideo = 4,
    Scart = 5,
    Component = 6,
    Vga = 7,
    Dvi = 8,
    Hdmi = 9,
    DisplayPort = 10,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Tuner
    }
}

/// Kind of stream a device can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(i32)]
pub enum StreamType {
    /// Sideband stream the hardware renders on its own.
    IndependentVideoSource = 1,
    /// Stream that produces buffers for the caller.
    BufferProducer = 2,
}

impl Default for StreamType {
    fn default() -> Self {
        StreamType::IndependentVideoSource
    }
}

/// Stream configuration advertised by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub stream_id: i32,
    pub stream_type: StreamType,
    pub max_video_width: u32,
    pub max_video_height: u32,
}

/// Identity of a device in a hardware event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: i32,
    pub device_type: DeviceType,
}

impl DeviceInfo {
    pub fn tuner(device_id: i32) -> Self {
        Self {
            device_id,
            device_type: DeviceType::Tuner,
        }
    }
}

/// Hardware event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalEvent {
    DeviceAvailable(DeviceInfo),
    DeviceUnavailable(DeviceInfo),
    StreamConfigurationsChanged(DeviceInfo),
    CaptureSucceeded {
        device_id: i32,
        stream_id: i32,
        seq: u32,
    },
    CaptureFailed {
        device_id: i32,
        stream_id: i32,
        seq: u32,
    },
}

/// Hardware-level errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    #[error("Unknown device: {0}")]
    UnknownDevice(i32),

    #[error("Unknown stream {stream_id} on device {device_id}")]
    UnknownStream { device_id: i32, stream_id: i32 },

    #[error("Stream {stream_id} already open on device {device_id}")]
    StreamBusy { device_id: i32, stream_id: i32 },

    #[error("HAL I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for HalError {
    fn from(e: std::io::Error) -> Self {
        HalError::Io(e.to_string())
    }
}

impl From<&HalError> for ErrorCode {
    fn from(_: &HalError) -> Self {
        ErrorCode::Fail
    }
}

/// Receiver of hardware events.
pub trait HalCallback: Send + Sync {
    fn notify(&self, event: HalEvent);
}

/// TV input hardware module.
pub trait TvInputHal: Send {
    /// Install the event callback. Devices present at startup are reported
    /// through it as available.
    fn initialize(&mut self, callback: Arc<dyn HalCallback>) -> Result<(), HalError>;

    /// Stream configurations currently offered by `device_id`.
    fn stream_configurations(&self, device_id: i32) -> Result<Vec<StreamConfig>, HalError>;

    /// Open a stream and return its platform handle.
    fn open_stream(
        &mut self,
        device_id: i32,
        config: &StreamConfig,
    ) -> Result<NativeHandle, HalError>;

    fn close_stream(&mut self, device_id: i32, stream_id: i32) -> Result<(), HalError>;
}
