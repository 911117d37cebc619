//! IPC server: socket listener, per-connection reader and the service task.

pub mod codec;
pub mod listener;
pub mod service;
pub mod session;
pub mod transport;

pub use listener::{Server, ServerConfig};
pub use service::{Service, ServiceEvent};
