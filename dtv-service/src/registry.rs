//! Device and stream registry.
//!
//! Tracks the tuner devices the hardware reports as available and the
//! stream each one is currently delivering. Only the service task touches
//! the registry; hardware events reach it as messages.

use std::collections::BTreeMap;
use std::sync::Arc;

use dtv_protocol::{ErrorCode, NativeHandle, Tuner};
use log::{debug, error, info, warn};

use crate::hal::{DeviceInfo, DeviceType, HalCallback, HalError, HalEvent, StreamType, TvInputHal};

/// Default maximum number of tracked devices.
pub const DEFAULT_MAX_DEVICES: usize = 100;

/// Stream state of a tracked device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    /// A stream is open. The handle is the one returned when it was opened.
    Streaming { stream_id: i32, handle: NativeHandle },
}

#[derive(Debug)]
struct DeviceEntry {
    device_type: DeviceType,
    state: StreamState,
}

/// Registry of available tuner devices.
pub struct DeviceRegistry {
    hal: Box<dyn TvInputHal>,
    devices: BTreeMap<i32, DeviceEntry>,
    capacity: usize,
}

impl DeviceRegistry {
    pub fn new(hal: Box<dyn TvInputHal>, capacity: usize) -> Self {
        Self {
            hal,
            devices: BTreeMap::new(),
            capacity,
        }
    }

    /// Initialize the hardware with the callback that feeds
    /// [`handle_event`](Self::handle_event).
    pub fn initialize(&mut self, callback: Arc<dyn HalCallback>) -> Result<(), HalError> {
        self.hal.initialize(callback)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    #[cfg(test)]
    pub fn state(&self, device_id: i32) -> Option<&StreamState> {
        self.devices.get(&device_id).map(|entry| &entry.state)
    }

    /// Apply a hardware event.
    pub fn handle_event(&mut self, event: HalEvent) {
        match event {
            HalEvent::DeviceAvailable(info) => {
                if self.tracks(&info) {
                    self.add_device(info);
                }
            }
            HalEvent::DeviceUnavailable(info) => {
                if self.tracks(&info) {
                    self.remove_device(info.device_id);
                }
            }
            HalEvent::StreamConfigurationsChanged(info) => {
                if self.tracks(&info) {
                    self.reset_stream(info.device_id);
                }
            }
            HalEvent::CaptureSucceeded { device_id, .. } | HalEvent::CaptureFailed { device_id, .. } => {
                debug!("Capture event on device {} ignored", device_id);
            }
        }
    }

    fn tracks(&self, info: &DeviceInfo) -> bool {
        if info.device_type != DeviceType::Tuner {
            debug!(
                "Device {} is not a tuner ({:?}), ignored",
                info.device_id, info.device_type
            );
            return false;
        }
        true
    }

    fn add_device(&mut self, info: DeviceInfo) {
        if self.devices.contains_key(&info.device_id) {
            warn!("Device {} is already registered", info.device_id);
            return;
        }
        if self.devices.len() >= self.capacity {
            error!(
                "Device list full ({} devices), dropping device {}",
                self.capacity, info.device_id
            );
            return;
        }
        info!("Device {} available", info.device_id);
        self.devices.insert(
            info.device_id,
            DeviceEntry {
                device_type: info.device_type,
                state: StreamState::Idle,
            },
        );
    }

    fn remove_device(&mut self, device_id: i32) {
        let Some(entry) = self.devices.remove(&device_id) else {
            error!("Unavailable event for unknown device {}", device_id);
            return;
        };
        if let StreamState::Streaming { stream_id, .. } = entry.state {
            if let Err(e) = self.hal.close_stream(device_id, stream_id) {
                warn!("Failed to close stream {} of device {}: {}", stream_id, device_id, e);
            }
        }
        info!("Device {} unavailable", device_id);
    }

    fn reset_stream(&mut self, device_id: i32) {
        let Some(entry) = self.devices.get_mut(&device_id) else {
            error!("Configuration change for unknown device {}", device_id);
            return;
        };
        let previous = std::mem::replace(&mut entry.state, StreamState::Idle);
        if let StreamState::Streaming { stream_id, .. } = previous {
            if let Err(e) = self.hal.close_stream(device_id, stream_id) {
                warn!("Failed to close stream {} of device {}: {}", stream_id, device_id, e);
            }
        }
        info!("Stream configurations of device {} changed", device_id);
    }

    /// Make sure `device_id` is streaming its independent video source and
    /// return the stream handle.
    ///
    /// A request for the stream already acting returns the cached handle
    /// without reopening it.
    pub fn acquire_stream(&mut self, device_id: i32) -> Result<NativeHandle, ErrorCode> {
        if !self.devices.contains_key(&device_id) {
            warn!("Stream requested for unknown device {}", device_id);
            return Err(ErrorCode::InvalidArgument);
        }

        let configs = self.hal.stream_configurations(device_id).map_err(|e| {
            error!("Couldn't get stream configs of device {}: {}", device_id, e);
            ErrorCode::from(&e)
        })?;
        let config = configs
            .iter()
            .find(|c| c.stream_type == StreamType::IndependentVideoSource)
            .copied()
            .ok_or_else(|| {
                error!("Device {} has no independent video source", device_id);
                ErrorCode::Fail
            })?;

        let entry = match self.devices.get_mut(&device_id) {
            Some(entry) => entry,
            None => return Err(ErrorCode::InvalidArgument),
        };
        if let StreamState::Streaming { stream_id, handle } = &entry.state {
            if *stream_id == config.stream_id {
                debug!("Device {} already streaming {}", device_id, stream_id);
                return Ok(handle.clone());
            }
            let old = *stream_id;
            self.hal.close_stream(device_id, old).map_err(|e| {
                error!("Couldn't close stream {} of device {}: {}", old, device_id, e);
                ErrorCode::from(&e)
            })?;
            entry.state = StreamState::Idle;
        }

        let handle = self.hal.open_stream(device_id, &config).map_err(|e| {
            error!("Couldn't open stream {} of device {}: {}", config.stream_id, device_id, e);
            ErrorCode::from(&e)
        })?;
        info!("Device {} streaming {}", device_id, config.stream_id);
        entry.state = StreamState::Streaming {
            stream_id: config.stream_id,
            handle: handle.clone(),
        };
        Ok(handle)
    }

    /// Tracked tuners, by ascending device id.
    pub fn tuners(&self) -> Vec<Tuner> {
        self.devices
            .iter()
            .filter(|(_, entry)| entry.device_type == DeviceType::Tuner)
            .map(|(id, _)| Tuner::new(id.to_string()))
            .collect()
    }

    /// Close every acting stream.
    pub fn close_all(&mut self) {
        for (device_id, entry) in self.devices.iter_mut() {
            let previous = std::mem::replace(&mut entry.state, StreamState::Idle);
            if let StreamState::Streaming { stream_id, .. } = previous {
                if let Err(e) = self.hal.close_stream(*device_id, stream_id) {
                    warn!("Failed to close stream {} of device {}: {}", stream_id, device_id, e);
                }
            }
        }
    }
}
