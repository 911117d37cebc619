//! Client session: the inbound half of a connection.

use futures::StreamExt;
use log::{debug, error, info};
use tokio::net::unix::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use crate::server::codec::PduCodec;
use crate::server::service::ServiceEvent;

/// Reads PDUs off a connection and forwards them to the service task.
pub struct Session {
    id: u64,
    reader: FramedRead<OwnedReadHalf, PduCodec>,
    events: mpsc::Sender<ServiceEvent>,
}

impl Session {
    pub fn new(id: u64, reader: OwnedReadHalf, events: mpsc::Sender<ServiceEvent>) -> Self {
        Self {
            id,
            reader: FramedRead::new(reader, PduCodec),
            events,
        }
    }

    /// Run until the peer disconnects, a frame is invalid, or the service
    /// stops.
    pub async fn run(mut self) {
        while let Some(frame) = self.reader.next().await {
            match frame {
                Ok(pdu) => {
                    debug!(
                        "[Session {}] Received 0x{:02X}/0x{:02X} ({} bytes)",
                        self.id,
                        pdu.service,
                        pdu.opcode,
                        pdu.payload.len()
                    );
                    let event = ServiceEvent::Request {
                        session_id: self.id,
                        pdu,
                    };
                    if self.events.send(event).await.is_err() {
                        info!("[Session {}] Service stopped", self.id);
                        return;
                    }
                }
                Err(e) => {
                    error!("[Session {}] Read error: {}", self.id, e);
                    break;
                }
            }
        }

        let _ = self
            .events
            .send(ServiceEvent::Detach {
                session_id: self.id,
            })
            .await;
    }
}
