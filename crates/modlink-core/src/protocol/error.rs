//! Protocol errors

use thiserror::Error;

/// Errors that can occur while driving the module
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The underlying serial transport reported a failure.
    #[error("Serial transport error: {0}")]
    SerialError(String),

    /// No response line arrived before the deadline.
    #[error("Response deadline elapsed")]
    Timeout,

    /// A firmware transfer precondition failed; nothing was transmitted.
    #[error("Firmware transfer rejected: {0}")]
    TransferRejected(String),

    /// The module rejected a firmware block or the completion check.
    #[error("Firmware transfer failed, module answered: '{response}'")]
    TransferFailed {
        /// The offending response line, verbatim.
        response: String,
    },

    /// A write was attempted on a bypass session that already exited.
    #[error("Bypass session already exited")]
    BypassExited,

    /// An I/O error from a sink or source.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
