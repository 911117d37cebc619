//! Command dispatcher.
//!
//! Decodes an inbound PDU into a [`Request`], makes exactly one call into
//! the registry or the backend, and encodes the result. Any failure is
//! reported as the status of an error PDU by the caller.

use std::sync::Arc;

use dtv_protocol::{ErrorCode, Pdu, Request, Response, SealedPdu};
use log::{debug, error, warn};
use thiserror::Error;

use crate::backend::DtvBackend;
use crate::hal::{HalCallback, HalError, HalEvent};
use crate::notify::NotificationEmitter;
use crate::registry::DeviceRegistry;

/// Parse a decimal tuner id into a device id.
fn parse_device_id(tuner_id: &str) -> Result<i32, ErrorCode> {
    if tuner_id.is_empty() || !tuner_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ErrorCode::InvalidArgument);
    }
    tuner_id.parse().map_err(|_| ErrorCode::InvalidArgument)
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("TV input HAL: {0}")]
    Hal(#[from] HalError),
    #[error("DTV backend: {0}")]
    Backend(ErrorCode),
}

pub struct Dispatcher {
    registry: DeviceRegistry,
    backend: Box<dyn DtvBackend>,
}

impl Dispatcher {
    pub fn new(registry: DeviceRegistry, backend: Box<dyn DtvBackend>) -> Self {
        Self { registry, backend }
    }

    /// Bring up the hardware and the backend. A backend that fails to
    /// start is stopped again and the error returned.
    pub fn init(
        &mut self,
        hal_callback: Arc<dyn HalCallback>,
        emitter: NotificationEmitter,
    ) -> Result<(), InitError> {
        self.registry.initialize(hal_callback)?;
        if let Err(code) = self.backend.init(emitter) {
            error!("Backend initialization failed: {}", code);
            if let Err(code) = self.backend.uninit() {
                warn!("Backend shutdown failed: {}", code);
            }
            return Err(InitError::Backend(code));
        }
        Ok(())
    }

    pub fn handle_hal_event(&mut self, event: HalEvent) {
        self.registry.handle_event(event);
    }

    #[cfg(test)]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Handle one command PDU and build its response.
    pub fn dispatch(&mut self, pdu: &Pdu) -> Result<SealedPdu, ErrorCode> {
        let request = Request::decode(pdu).map_err(|e| {
            warn!("Rejected request 0x{:02X}/0x{:02X}: {}", pdu.service, pdu.opcode, e);
            ErrorCode::from(&e)
        })?;
        debug!("Dispatching {:?}", request);

        let response = self.execute(request)?;
        // Any encode failure is reported as NoMemory.
        response.encode(pdu.service).map_err(|e| {
            error!("Failed to encode {:?} response: {}", response.opcode(), e);
            ErrorCode::NoMemory
        })
    }

    fn execute(&mut self, request: Request) -> Result<Response, ErrorCode> {
        match request {
            Request::GetTuners => Ok(Response::Tuners(self.registry.tuners())),
            Request::SetSource { tuner_id, source } => {
                let device_id = parse_device_id(&tuner_id)?;
                debug!("Set source {:?} on device {}", source, device_id);
                self.registry.acquire_stream(device_id).map(Response::Source)
            }
            Request::StartScan { tuner_id, source } => self
                .backend
                .start_scanning(&tuner_id, source)
                .map(|_| Response::ScanStarted),
            Request::StopScan { tuner_id, source } => self
                .backend
                .stop_scanning(&tuner_id, source)
                .map(|_| Response::ScanStopped),
            Request::ClearChannelCache => self
                .backend
                .clear_scanned_channel_cache()
                .map(|_| Response::CacheCleared),
            Request::SetChannel {
                tuner_id,
                source,
                number,
            } => self
                .backend
                .set_channel(&tuner_id, source, &number)
                .map(Response::Channel),
            Request::GetChannels { tuner_id, source } => self
                .backend
                .channels(&tuner_id, source)
                .map(Response::Channels),
            Request::GetPrograms {
                tuner_id,
                source,
                number,
                start,
                end,
            } => self
                .backend
                .programs(&tuner_id, source, &number, start, end)
                .map(Response::Programs),
        }
    }

    /// Close every acting stream and stop the backend.
    pub fn shutdown(&mut self) {
        self.registry.close_all();
        if let Err(code) = self.backend.uninit() {
            warn!("Backend shutdown failed: {}", code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnsupportedBackend;
    use crate::hal::DeviceInfo;
    use crate::registry::tests::FakeHal;
    use crate::registry::DEFAULT_MAX_DEVICES;
    use bytes::Bytes;
    use dtv_protocol::{
        decode_reply, Channel, NativeHandle, Program, SourceType, SERVICE_DTV,
    };

    /// Backend returning canned data.
    #[derive(Default)]
    struct CannedBackend {
        programs: Vec<Program>,
        channel_name: String,
        init_status: Option<ErrorCode>,
        uninit_calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl DtvBackend for CannedBackend {
        fn init(&mut self, _emitter: NotificationEmitter) -> Result<(), ErrorCode> {
            match self.init_status {
                Some(code) => Err(code),
                None => Ok(()),
            }
        }
        fn uninit(&mut self) -> Result<(), ErrorCode> {
            self.uninit_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
        fn start_scanning(&mut self, _: &str, _: SourceType) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn stop_scanning(&mut self, _: &str, _: SourceType) -> Result<(), ErrorCode> {
            Err(ErrorCode::NoSignal)
        }
        fn clear_scanned_channel_cache(&mut self) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn set_channel(&mut self, _: &str, _: SourceType, number: &str) -> Result<Channel, ErrorCode> {
            Ok(Channel {
                number: number.to_string(),
                name: self.channel_name.clone(),
                ..Default::default()
            })
        }
        fn channels(&mut self, _: &str, _: SourceType) -> Result<Vec<Channel>, ErrorCode> {
            Ok(Vec::new())
        }
        fn programs(
            &mut self,
            _: &str,
            _: SourceType,
            _: &str,
            _: u64,
            _: u64,
        ) -> Result<Vec<Program>, ErrorCode> {
            Ok(self.programs.clone())
        }
    }

    fn dispatcher(backend: Box<dyn DtvBackend>, devices: &[i32]) -> Dispatcher {
        let mut registry = DeviceRegistry::new(Box::new(FakeHal::new(1)), DEFAULT_MAX_DEVICES);
        for id in devices {
            registry.handle_event(HalEvent::DeviceAvailable(DeviceInfo::tuner(*id)));
        }
        Dispatcher::new(registry, backend)
    }

    fn request(req: Request) -> Pdu {
        req.encode().unwrap().to_pdu()
    }

    #[test]
    fn test_get_tuners() {
        let mut dispatcher = dispatcher(Box::new(UnsupportedBackend::default()), &[7]);
        let sealed = dispatcher.dispatch(&request(Request::GetTuners)).unwrap();

        assert_eq!(sealed.opcode(), 0x01);
        assert_eq!(sealed.payload(), &[1, 0, 0, 0, b'7', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_opcode_and_service() {
        let mut dispatcher = dispatcher(Box::new(UnsupportedBackend::default()), &[]);

        let pdu = Pdu::new(SERVICE_DTV, 0x42, Bytes::new());
        assert_eq!(
            dispatcher.dispatch(&pdu).unwrap_err(),
            ErrorCode::UnsupportedOpcode
        );

        let pdu = Pdu::new(0x09, 0x01, Bytes::new());
        assert_eq!(
            dispatcher.dispatch(&pdu).unwrap_err(),
            ErrorCode::UnsupportedOpcode
        );
    }

    #[test]
    fn test_malformed_request_fails() {
        let mut dispatcher = dispatcher(Box::new(UnsupportedBackend::default()), &[7]);
        let pdu = Pdu::new(SERVICE_DTV, 0x02, Bytes::from_static(b"7"));
        assert_eq!(dispatcher.dispatch(&pdu).unwrap_err(), ErrorCode::Fail);
        assert_eq!(
            dispatcher.registry().state(7),
            Some(&crate::registry::StreamState::Idle)
        );
    }

    #[test]
    fn test_set_source_returns_handle_with_fds() {
        let mut dispatcher = dispatcher(Box::new(UnsupportedBackend::default()), &[7]);
        let sealed = dispatcher
            .dispatch(&request(Request::SetSource {
                tuner_id: "7".to_string(),
                source: SourceType::IsdbT,
            }))
            .unwrap();

        let fds = sealed.ancillary().unwrap().fds();
        assert_eq!(fds, vec![101]);
        assert_eq!(
            decode_reply(&sealed.to_pdu(), &fds).unwrap(),
            Ok(Response::Source(NativeHandle {
                version: 12,
                fds: vec![101],
                ints: vec![1],
            }))
        );
    }

    #[test]
    fn test_set_source_bad_tuner_id() {
        let mut dispatcher = dispatcher(Box::new(UnsupportedBackend::default()), &[7]);
        for id in ["", "7a", "-7", "99999999999"] {
            let pdu = request(Request::SetSource {
                tuner_id: id.to_string(),
                source: SourceType::IsdbT,
            });
            assert_eq!(
                dispatcher.dispatch(&pdu).unwrap_err(),
                ErrorCode::InvalidArgument
            );
        }

        let pdu = request(Request::SetSource {
            tuner_id: "8".to_string(),
            source: SourceType::IsdbT,
        });
        assert_eq!(
            dispatcher.dispatch(&pdu).unwrap_err(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn test_backend_status_is_forwarded() {
        let mut dispatcher = dispatcher(Box::new(UnsupportedBackend::default()), &[7]);
        let pdu = request(Request::StartScan {
            tuner_id: "7".to_string(),
            source: SourceType::IsdbT,
        });
        assert_eq!(
            dispatcher.dispatch(&pdu).unwrap_err(),
            ErrorCode::NotSupported
        );

        let mut dispatcher = dispatcher_with_programs(Vec::new());
        let pdu = request(Request::StopScan {
            tuner_id: "7".to_string(),
            source: SourceType::IsdbT,
        });
        assert_eq!(dispatcher.dispatch(&pdu).unwrap_err(), ErrorCode::NoSignal);
    }

    fn dispatcher_with_programs(programs: Vec<Program>) -> Dispatcher {
        dispatcher(
            Box::new(CannedBackend {
                programs,
                ..Default::default()
            }),
            &[7],
        )
    }

    #[test]
    fn test_backend_results_are_encoded() {
        let program = Program {
            event_id: "1".to_string(),
            title: "News".to_string(),
            languages: vec!["en".to_string(), "fr".to_string()],
            ..Default::default()
        };
        let mut dispatcher = dispatcher_with_programs(vec![program.clone()]);

        let sealed = dispatcher
            .dispatch(&request(Request::GetPrograms {
                tuner_id: "7".to_string(),
                source: SourceType::IsdbT,
                number: "011".to_string(),
                start: 0,
                end: 10,
            }))
            .unwrap();
        assert_eq!(
            decode_reply(&sealed.to_pdu(), &[]).unwrap(),
            Ok(Response::Programs(vec![program]))
        );

        let sealed = dispatcher
            .dispatch(&request(Request::SetChannel {
                tuner_id: "7".to_string(),
                source: SourceType::IsdbT,
                number: "021".to_string(),
            }))
            .unwrap();
        match decode_reply(&sealed.to_pdu(), &[]).unwrap() {
            Ok(Response::Channel(ch)) => assert_eq!(ch.number, "021"),
            other => panic!("unexpected reply {:?}", other),
        }

        let sealed = dispatcher
            .dispatch(&request(Request::ClearChannelCache))
            .unwrap();
        assert!(sealed.payload().is_empty());
        assert_eq!(sealed.opcode(), 0x05);
    }

    #[test]
    fn test_unencodable_result_reports_no_memory() {
        let backend = CannedBackend {
            channel_name: "a\0b".to_string(),
            ..Default::default()
        };
        let mut dispatcher = dispatcher(Box::new(backend), &[7]);
        let pdu = request(Request::SetChannel {
            tuner_id: "7".to_string(),
            source: SourceType::IsdbT,
            number: "021".to_string(),
        });
        assert_eq!(dispatcher.dispatch(&pdu).unwrap_err(), ErrorCode::NoMemory);
    }

    #[test]
    fn test_response_keeps_request_service() {
        let mut dispatcher = dispatcher_with_programs(Vec::new());
        let sealed = dispatcher
            .dispatch(&request(Request::GetChannels {
                tuner_id: "7".to_string(),
                source: SourceType::DvbT,
            }))
            .unwrap();
        assert_eq!(sealed.service(), SERVICE_DTV);
        assert_eq!(sealed.frame(), &[0x01, 0x07, 4, 0, 0, 0, 0, 0, 0, 0]);
    }

    struct Discard;

    impl HalCallback for Discard {
        fn notify(&self, _event: HalEvent) {}
    }

    #[test]
    fn test_backend_init_failure_aborts() {
        let uninit_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let backend = CannedBackend {
            init_status: Some(ErrorCode::Fail),
            uninit_calls: uninit_calls.clone(),
            ..Default::default()
        };
        let mut dispatcher = dispatcher(Box::new(backend), &[]);
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let callback: Arc<dyn HalCallback> = Arc::new(Discard);

        let err = dispatcher
            .init(callback, NotificationEmitter::new(tx))
            .unwrap_err();
        assert!(matches!(err, InitError::Backend(ErrorCode::Fail)));
        assert_eq!(uninit_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_device_id() {
        assert_eq!(parse_device_id("0"), Ok(0));
        assert_eq!(parse_device_id("12"), Ok(12));
        assert_eq!(parse_device_id("+1"), Err(ErrorCode::InvalidArgument));
    }
}
