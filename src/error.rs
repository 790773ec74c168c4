//! Unified error type for the codec, link layer, and APCI engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type IecResult<T> = Result<T, IecError>;

/// Error kinds produced by this crate.
///
/// Wire parse errors and timer expiries are meant to close the
/// offending connection rather than propagate to application code;
/// callers observe the close through a [`crate::apci::ConnectionEvent`]
/// or [`crate::link101::LinkLayerState`] stream, not through this enum.
#[derive(Error, Debug)]
pub enum IecError {
    /// Malformed wire message: bad start byte, inconsistent length,
    /// reserved bits set illegally, or an unknown type-id.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// N(S) or N(R) out of the expected range on an I-frame.
    #[error("sequence error: {0}")]
    SequenceError(String),

    /// An acknowledgement or TESTFR_CON deadline elapsed.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// Attempted enqueue into a bounded queue with no free slot.
    #[error("queue full: {0}")]
    QueueFull(String),

    /// A protocol rule was violated (I-frame while stopped, VSQ >= 128,
    /// IOA mismatch in a SQ=1 ASDU, ...).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The underlying transport reported EOF or an I/O error.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// Connection attempt failed (refused, t0 elapsed, DNS failure, ...).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A caller-supplied configuration was invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// No data transfer has been started on this connection (STARTDT
    /// not yet confirmed) but a business operation was attempted.
    #[error("data transfer not started")]
    NotStarted,

    /// The connection is not (or no longer) open.
    #[error("not connected")]
    NotConnected,

    /// Wrapped I/O error from the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IecError {
    /// True for errors that should close the connection rather than
    /// merely fail the call that triggered them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IecError::SequenceError(_)
                | IecError::ProtocolViolation(_)
                | IecError::TransportClosed(_)
                | IecError::Timeout(_)
                | IecError::Io(_)
        )
    }
}
