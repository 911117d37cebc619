//! Config-driven TV input hardware for hosts without a tuner module.
//!
//! Every configured device is reported available on initialization. An
//! opened stream is backed by a Unix socket pair; one end is handed out as
//! the stream descriptor and both ends live until the stream is closed.

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use dtv_protocol::NativeHandle;
use log::{debug, info};

use super::{
    DeviceInfo, DeviceType, HalCallback, HalError, HalEvent, StreamConfig, TvInputHal,
};
use crate::config::DeviceConfig;

/// `native_handle_t` header size, reported as the handle version.
const NATIVE_HANDLE_VERSION: u32 = 12;

struct SimulatedDevice {
    device_type: DeviceType,
    streams: Vec<StreamConfig>,
    ints: Vec<i32>,
}

struct OpenStream {
    source: UnixStream,
    _sink: UnixStream,
}

/// Simulated hardware module.
pub struct SimulatedHal {
    devices: HashMap<i32, SimulatedDevice>,
    order: Vec<i32>,
    open: HashMap<(i32, i32), OpenStream>,
    callback: Option<Arc<dyn HalCallback>>,
}

impl SimulatedHal {
    pub fn new(devices: &[DeviceConfig]) -> Self {
        let mut hal = Self {
            devices: HashMap::new(),
            order: Vec::new(),
            open: HashMap::new(),
            callback: None,
        };
        for device in devices {
            let streams = device
                .streams
                .iter()
                .map(|s| StreamConfig {
                    stream_id: s.id,
                    stream_type: s.stream_type,
                    max_video_width: s.width,
                    max_video_height: s.height,
                })
                .collect();
            if hal
                .devices
                .insert(
                    device.id,
                    SimulatedDevice {
                        device_type: device.device_type,
                        streams,
                        ints: device.ints.clone(),
                    },
                )
                .is_none()
            {
                hal.order.push(device.id);
            }
        }
        hal
    }

    /// Number of streams currently open.
    #[cfg(test)]
    pub fn open_streams(&self) -> usize {
        self.open.len()
    }

    fn device(&self, device_id: i32) -> Result<&SimulatedDevice, HalError> {
        self.devices
            .get(&device_id)
            .ok_or(HalError::UnknownDevice(device_id))
    }

    /// Remove a device and report it unavailable.
    #[cfg(test)]
    pub fn unplug(&mut self, device_id: i32) -> Result<(), HalError> {
        let device = self
            .devices
            .remove(&device_id)
            .ok_or(HalError::UnknownDevice(device_id))?;
        self.order.retain(|id| *id != device_id);
        if let Some(callback) = &self.callback {
            callback.notify(HalEvent::DeviceUnavailable(DeviceInfo {
                device_id,
                device_type: device.device_type,
            }));
        }
        Ok(())
    }
}

impl TvInputHal for SimulatedHal {
    fn initialize(&mut self, callback: Arc<dyn HalCallback>) -> Result<(), HalError> {
        info!("Simulated TV input HAL with {} device(s)", self.order.len());
        for device_id in &self.order {
            if let Some(device) = self.devices.get(device_id) {
                callback.notify(HalEvent::DeviceAvailable(DeviceInfo {
                    device_id: *device_id,
                    device_type: device.device_type,
                }));
            }
        }
        self.callback = Some(callback);
        Ok(())
    }

    fn stream_configurations(&self, device_id: i32) -> Result<Vec<StreamConfig>, HalError> {
        Ok(self.device(device_id)?.streams.clone())
    }

    fn open_stream(
        &mut self,
        device_id: i32,
        config: &StreamConfig,
    ) -> Result<NativeHandle, HalError> {
        let ints = {
            let device = self.device(device_id)?;
            if !device.streams.iter().any(|s| s.stream_id == config.stream_id) {
                return Err(HalError::UnknownStream {
                    device_id,
                    stream_id: config.stream_id,
                });
            }
            device.ints.clone()
        };
        let key = (device_id, config.stream_id);
        if self.open.contains_key(&key) {
            return Err(HalError::StreamBusy {
                device_id,
                stream_id: config.stream_id,
            });
        }

        let (source, sink) = UnixStream::pair()?;
        let handle = NativeHandle {
            version: NATIVE_HANDLE_VERSION,
            fds: vec![source.as_raw_fd()],
            ints,
        };
        debug!(
            "Opened stream {} on device {} (fd {})",
            config.stream_id,
            device_id,
            source.as_raw_fd()
        );
        self.open.insert(
            key,
            OpenStream {
                source,
                _sink: sink,
            },
        );
        Ok(handle)
    }

    fn close_stream(&mut self, device_id: i32, stream_id: i32) -> Result<(), HalError> {
        match self.open.remove(&(device_id, stream_id)) {
            Some(stream) => {
                debug!(
                    "Closed stream {} on device {} (fd {})",
                    stream_id,
                    device_id,
                    stream.source.as_raw_fd()
                );
                Ok(())
            }
            None => Err(HalError::UnknownStream {
                device_id,
                stream_id,
            }),
        }
    }
}
