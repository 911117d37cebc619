//! Unix socket listener.
//!
//! Only one client is served at a time. A connection that arrives while
//! another is attached is refused.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::server::service::ServiceEvent;
use crate::server::session::Session;
use crate::server::transport::Transport;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the listening socket.
    pub socket_path: PathBuf,
}

/// Accepts client connections and hands them to the service task.
pub struct Server {
    config: ServerConfig,
    events: mpsc::Sender<ServiceEvent>,
    permits: Arc<Semaphore>,
}

impl Server {
    pub fn new(config: ServerConfig, events: mpsc::Sender<ServiceEvent>) -> Self {
        Self {
            config,
            events,
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Bind the socket, replacing a stale socket file.
    pub fn bind(&self) -> io::Result<UnixListener> {
        match std::fs::remove_file(&self.config.socket_path) {
            Ok(()) => warn!("Removed stale socket {}", self.config.socket_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&self.config.socket_path)?;
        info!("Server listening on {}", self.config.socket_path.display());
        Ok(listener)
    }

    /// Accept connections until the task is dropped.
    pub async fn serve(&self, listener: UnixListener) -> io::Result<()> {
        let mut connection_count = 0u64;

        loop {
            match listener.accept().await {
                Ok((socket, _addr)) => {
                    connection_count += 1;
                    let session_id = connection_count;

                    let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(
                                "[Session {}] Refused: another client is connected",
                                session_id
                            );
                            continue;
                        }
                    };

                    info!("[Session {}] New connection", session_id);
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        handle_connection(socket, session_id, events, permit).await;
                        info!("[Session {}] Connection closed", session_id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Attach the connection to the service and read it until it ends.
async fn handle_connection(
    socket: UnixStream,
    session_id: u64,
    events: mpsc::Sender<ServiceEvent>,
    _permit: OwnedSemaphorePermit,
) {
    let (reader, writer) = socket.into_split();
    let attach = ServiceEvent::Attach {
        session_id,
        transport: Transport::new(writer),
    };
    if events.send(attach).await.is_err() {
        error!("[Session {}] Service is not running", session_id);
        return;
    }

    Session::new(session_id, reader, events).run().await;
}
