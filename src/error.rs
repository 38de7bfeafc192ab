//! Error types for the peripheral server.

use thiserror::Error;

/// The main error type for device operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inventory document (de)serialization error.
    #[error("inventory persistence error: {0}")]
    Persist(#[from] serde_json::Error),

    /// Timed out acquiring a lock on a shared resource.
    #[error("timed out locking {0}")]
    Lock(&'static str),

    /// A deadline expired while waiting on the device.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The device answered a handshake with something other than an ACK.
    #[error("device refused: {0}")]
    DeviceRefused(String),

    /// Well-formed line with semantics this server cannot act on.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The serial link has been closed.
    #[error("link is closed")]
    Closed,

    /// Background polling routine is already running.
    #[error("background polling already started")]
    PollingReinit,

    /// The device is shutting down.
    #[error("device is stopping")]
    Stopped,
}

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, Error>;
