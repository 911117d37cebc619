//! Notification emitter.
//!
//! The backend reports scan and EPG progress from its own threads. The
//! emitter turns each report into a [`Notification`] and queues it for the
//! service task, which serializes and sends it. Emitting never blocks: a
//! full queue drops the notification.

use dtv_protocol::{channel_status, scan_status, Channel, Notification, Program, SourceType};
use log::{debug, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::server::ServiceEvent;

/// Cloneable handle for emitting notifications from any thread.
#[derive(Debug, Clone)]
pub struct NotificationEmitter {
    tx: mpsc::Sender<ServiceEvent>,
}

impl NotificationEmitter {
    pub fn new(tx: mpsc::Sender<ServiceEvent>) -> Self {
        Self { tx }
    }

    /// Report a channel update found while scanning.
    pub fn channel_update(&self, status: u8, tuner_id: &str, source: SourceType, channel: &Channel) {
        if status != channel_status::ADDED {
            debug!("Channel update status {} on tuner {} ignored", status, tuner_id);
            return;
        }
        self.emit(Notification::ChannelScanned {
            tuner_id: tuner_id.to_string(),
            source,
            channel: channel.clone(),
        });
    }

    /// Report a change of scan status.
    pub fn scan_status(&self, status: u8, tuner_id: &str, source: SourceType) {
        let notification = match status {
            scan_status::COMPLETE => Notification::ScanComplete {
                tuner_id: tuner_id.to_string(),
                source,
            },
            scan_status::STOPPED => Notification::ScanStopped {
                tuner_id: tuner_id.to_string(),
                source,
            },
            other => {
                debug!("Scan status {} on tuner {} ignored", other, tuner_id);
                return;
            }
        };
        self.emit(notification);
    }

    /// Report event information received for a channel.
    pub fn event_broadcast(
        &self,
        tuner_id: &str,
        source: SourceType,
        channel: &Channel,
        programs: &[Program],
    ) {
        self.emit(Notification::EitBroadcast {
            tuner_id: tuner_id.to_string(),
            source,
            channel: channel.clone(),
            programs: programs.to_vec(),
        });
    }

    fn emit(&self, notification: Notification) {
        let opcode = notification.opcode();
        match self.tx.try_send(ServiceEvent::Notify(notification)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event queue full, dropping notification {:?}", opcode);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Service stopped, dropping notification {:?}", opcode);
            }
        }
    }
}
