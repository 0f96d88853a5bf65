/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{Error as IoError, ErrorKind};

/// The error type for **mecho** connection-level operations
///
/// Low-level building blocks (the [`Multiplexer`](crate::Multiplexer) and the
/// functions in [`transfer`](crate::transfer)) return a plain
/// [`std::io::Result`](std::io::Result). Everything that drives a whole
/// connection returns an `EchoError`, which wraps I/O failures from the
/// **`mio`** layer "as-is" in the [`Failed`](EchoError::Failed) variant.
///
/// A remote peer closing the connection is **not** an error; it shows up as
/// a finished connection with `peer_closed` set in its statistics.
#[derive(Debug)]
pub enum EchoError {
    /// Indicates that the connection saw no readiness event for longer than
    /// its configured idle timeout.
    TimedOut,
    /// Indicates that a client connection did not complete within the bounds
    /// of its [`ConnectPolicy`](crate::ConnectPolicy).
    ConnectTimedOut,
    /// Indicates that a payload does not fit into a fixed-size buffer.
    TooBig,
    /// Indicates a fault reported by the underlying socket or multiplexer.
    Failed(IoError),
}

impl EchoError {
    /// Returns the [`ErrorKind`] that best describes this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TimedOut | Self::ConnectTimedOut => ErrorKind::TimedOut,
            Self::TooBig => ErrorKind::InvalidInput,
            Self::Failed(inner) => inner.kind(),
        }
    }
}

impl Display for EchoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "The connection was idle for too long!"),
            Self::ConnectTimedOut => write!(f, "The connection could not be established in time!"),
            Self::TooBig => write!(f, "The payload exceeds the buffer capacity!"),
            Self::Failed(inner) => write!(f, "The socket operation has failed: {}", inner),
        }
    }
}

impl Error for EchoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Failed(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<IoError> for EchoError {
    fn from(error: IoError) -> Self {
        Self::Failed(error)
    }
}

impl From<EchoError> for IoError {
    fn from(error: EchoError) -> Self {
        match error {
            EchoError::Failed(inner) => inner,
            other => IoError::new(other.kind(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_pass_through() {
        let error = EchoError::from(IoError::new(ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(error.kind(), ErrorKind::ConnectionRefused);
        assert!(error.source().is_some());

        let io_error: IoError = error.into();
        assert_eq!(io_error.kind(), ErrorKind::ConnectionRefused);
    }

    #[test]
    fn echo_errors_become_inner_errors() {
        let io_error: IoError = EchoError::ConnectTimedOut.into();
        assert_eq!(io_error.kind(), ErrorKind::TimedOut);
        let inner = io_error.get_ref().and_then(|inner| inner.downcast_ref::<EchoError>());
        assert!(matches!(inner, Some(EchoError::ConnectTimedOut)));
    }
}
