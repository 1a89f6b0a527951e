use std::io;

use thiserror::Error;

/// Errors that can occur while a client is running.
///
/// Transport failures (`Write`, `Close`) are never returned from metric calls: they are routed to the error handler
/// configured with [`StatsdBuilder::with_error_handler`][crate::StatsdBuilder::with_error_handler]. `InvalidArgument`
/// is the only variant returned directly to a caller, as it indicates a programming error.
///
/// Failing to open the transport is reported once, when building the client, as
/// [`BuildError::Connection`][crate::BuildError::Connection].
#[derive(Debug, Error)]
pub enum Error {
    /// Writing a packet to the transport failed.
    ///
    /// The packet is dropped and not retried.
    #[error("failed to write packet: {0}")]
    Write(#[source] io::Error),

    /// Closing the transport failed.
    #[error("failed to close transport: {0}")]
    Close(#[source] io::Error),

    /// Malformed caller input, such as an odd-length tag list.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Details about the invalid argument.
        reason: String,
    },
}

impl Error {
    pub(crate) fn invalid_argument<R: Into<String>>(reason: R) -> Self {
        Error::InvalidArgument { reason: reason.into() }
    }
}
