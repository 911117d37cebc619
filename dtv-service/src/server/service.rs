//! The service task.
//!
//! A single task owns the dispatcher, the registry behind it and the
//! current transport. Requests, hardware events and notifications reach it
//! as [`ServiceEvent`]s and are handled one at a time.

use std::sync::{Arc, Mutex};

use dtv_protocol::{encode_error, ErrorCode, Notification, Pdu, SealedPdu};
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::dispatch::{Dispatcher, InitError};
use crate::hal::{HalCallback, HalEvent};
use crate::notify::NotificationEmitter;
use crate::server::transport::Transport;

/// Message for the service task.
#[derive(Debug)]
pub enum ServiceEvent {
    /// A client connected; replies go to `transport`.
    Attach { session_id: u64, transport: Transport },
    /// The client's read side ended.
    Detach { session_id: u64 },
    Request { session_id: u64, pdu: Pdu },
    Hal(HalEvent),
    Notify(Notification),
    Shutdown,
}

/// Forwards hardware events to the service task without blocking.
///
/// While the service is initializing, events are held back instead and
/// handed over with [`take_startup_events`](Self::take_startup_events).
#[derive(Debug)]
pub struct HalEventSender {
    tx: mpsc::Sender<ServiceEvent>,
    startup: Mutex<Option<Vec<HalEvent>>>,
}

impl HalEventSender {
    #[cfg(test)]
    pub fn new(tx: mpsc::Sender<ServiceEvent>) -> Self {
        Self {
            tx,
            startup: Mutex::new(None),
        }
    }

    /// Sender that holds events back until they are taken.
    pub fn starting(tx: mpsc::Sender<ServiceEvent>) -> Self {
        Self {
            tx,
            startup: Mutex::new(Some(Vec::new())),
        }
    }

    /// Take the held-back events. Later events go to the queue.
    pub fn take_startup_events(&self) -> Vec<HalEvent> {
        let mut startup = self.startup.lock().unwrap_or_else(|e| e.into_inner());
        startup.take().unwrap_or_default()
    }
}

impl HalCallback for HalEventSender {
    fn notify(&self, event: HalEvent) {
        {
            let mut startup = self.startup.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(held) = startup.as_mut() {
                held.push(event);
                return;
            }
        }
        match self.tx.try_send(ServiceEvent::Hal(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Event queue full, dropping hardware event {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Service stopped, dropping hardware event");
            }
        }
    }
}

pub struct Service {
    dispatcher: Dispatcher,
    rx: mpsc::Receiver<ServiceEvent>,
    tx: mpsc::Sender<ServiceEvent>,
    client: Option<(u64, Transport)>,
}

impl Service {
    pub fn new(dispatcher: Dispatcher, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size);
        Self {
            dispatcher,
            rx,
            tx,
            client: None,
        }
    }

    /// Sender for listeners, HAL callbacks and the emitter.
    pub fn sender(&self) -> mpsc::Sender<ServiceEvent> {
        self.tx.clone()
    }

    /// Initialize the hardware and the backend with callbacks that feed
    /// this service. Devices reported during initialization are applied
    /// before any queued event, however many there are.
    pub fn init(&mut self) -> Result<(), InitError> {
        let sender = Arc::new(HalEventSender::starting(self.tx.clone()));
        let callback: Arc<dyn HalCallback> = sender.clone();
        let emitter = NotificationEmitter::new(self.tx.clone());
        let result = self.dispatcher.init(callback, emitter);

        let startup = sender.take_startup_events();
        debug!("Applying {} hardware event(s) from initialization", startup.len());
        for event in startup {
            self.dispatcher.handle_hal_event(event);
        }
        result
    }

    /// Process events until [`ServiceEvent::Shutdown`], then close every
    /// stream and stop the backend.
    pub async fn run(self) {
        let Self {
            mut dispatcher,
            mut rx,
            tx,
            mut client,
        } = self;
        // Only the handed-out senders keep the queue open.
        drop(tx);

        while let Some(event) = rx.recv().await {
            match event {
                ServiceEvent::Attach {
                    session_id,
                    transport,
                } => {
                    if let Some((previous, _)) = client.replace((session_id, transport)) {
                        warn!("[Session {}] Replaced by session {}", previous, session_id);
                    }
                    info!("[Session {}] Attached", session_id);
                }
                ServiceEvent::Detach { session_id } => {
                    if matches!(&client, Some((id, _)) if *id == session_id) {
                        client = None;
                        info!("[Session {}] Detached", session_id);
                    }
                }
                ServiceEvent::Request { session_id, pdu } => {
                    let reply = match dispatcher.dispatch(&pdu) {
                        Ok(sealed) => Some(sealed),
                        Err(code) => error_reply(pdu.service, code),
                    };
                    if let Some(reply) = reply {
                        send_to(&mut client, session_id, &reply).await;
                    }
                }
                ServiceEvent::Hal(event) => dispatcher.handle_hal_event(event),
                ServiceEvent::Notify(notification) => {
                    let Some((session_id, _)) = &client else {
                        debug!("No client, dropping notification {:?}", notification.opcode());
                        continue;
                    };
                    let session_id = *session_id;
                    match notification.encode() {
                        Ok(sealed) => send_to(&mut client, session_id, &sealed).await,
                        Err(e) => error!(
                            "Failed to encode notification {:?}: {}",
                            notification.opcode(),
                            e
                        ),
                    }
                }
                ServiceEvent::Shutdown => {
                    info!("Service shutting down");
                    break;
                }
            }
        }

        dispatcher.shutdown();
    }
}

fn error_reply(service: u8, code: ErrorCode) -> Option<SealedPdu> {
    match encode_error(service, code) {
        Ok(sealed) => Some(sealed),
        Err(e) => {
            error!("Failed to encode error reply ({}): {}", code, e);
            None
        }
    }
}

/// Send `pdu` to the attached client if it is still `session_id`. A failed
/// send ends the connection.
async fn send_to(client: &mut Option<(u64, Transport)>, session_id: u64, pdu: &SealedPdu) {
    let Some((id, transport)) = client.as_mut() else {
        debug!("[Session {}] Gone, dropping reply", session_id);
        return;
    };
    if *id != session_id {
        debug!("[Session {}] Not attached, dropping reply", session_id);
        return;
    }
    if let Err(e) = transport.send(pdu).await {
        error!("[Session {}] Send failed: {}", session_id, e);
        *client = None;
    }
}
