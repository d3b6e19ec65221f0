mod client;
mod error;
mod server;
mod service;
mod sessions;

pub use client::{is_daemon_running, DaemonClient};
pub use error::{DaemonError, Result};
pub use server::run_server;
pub use service::{DaemonService, IndexStart, ServiceConfig};
pub use sessions::{SessionRegistry, SessionSettings};
