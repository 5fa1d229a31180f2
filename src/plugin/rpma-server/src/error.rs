use std::io;

use thiserror::Error;

use crate::provider::ConnEvent;

/// A failed call into the RDMA libraries: the operation name and the errno it left behind.
#[derive(Debug, Error)]
#[error("{op}: {source}")]
pub struct NativeError {
    pub op: &'static str,
    #[source]
    pub source: io::Error,
}

impl NativeError {
    pub fn new(op: &'static str, source: io::Error) -> Self {
        NativeError { op, source }
    }

    pub fn from_errno(op: &'static str, errno: i32) -> Self {
        NativeError {
            op,
            source: io::Error::from_raw_os_error(errno),
        }
    }

    #[inline]
    pub fn code(&self) -> i32 {
        self.source.raw_os_error().unwrap_or(libc::EIO)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
    #[error("Invalid memory descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Engine is not set up")]
    NotSetUp,
    #[error("Job has no I/O buffer")]
    NoBuffer,

    #[error("No RDMA device found: {0}")]
    DeviceNotFound(#[source] NativeError),
    #[error("Failed to create peer: {0}")]
    PeerCreationFailed(#[source] NativeError),
    #[error("Failed to register memory: {0}")]
    RegistrationFailed(#[source] NativeError),
    #[error("Failed to listen: {0}")]
    ListenFailed(#[source] NativeError),
    #[error("Failed to obtain a connection request: {0}")]
    NoRequestFailed(#[source] NativeError),
    #[error("Failed to accept the connection: {0}")]
    ConnectFailed(#[source] NativeError),
    #[error("Failed to get the next connection event: {0}")]
    EventFailed(#[source] NativeError),
    #[error("Unexpected connection event: expected {expected}, got {got}")]
    UnexpectedEventFailed { expected: ConnEvent, got: ConnEvent },
    #[error("Failed to wait for completions: {0}")]
    CompletionFailed(#[source] NativeError),

    #[error("Failed to shut down the endpoint: {0}")]
    EndpointShutdownFailed(#[source] NativeError),
    #[error("Failed to disconnect: {0}")]
    DisconnectFailed(#[source] NativeError),
    #[error("Failed to delete the connection: {0}")]
    ConnectionDeleteFailed(#[source] NativeError),
    #[error("Failed to deregister memory: {0}")]
    DeregistrationFailed(#[source] NativeError),
    #[error("Failed to delete the peer: {0}")]
    PeerDeleteFailed(#[source] NativeError),
}

impl Error {
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::DeviceNotFound(e)
            | Error::PeerCreationFailed(e)
            | Error::RegistrationFailed(e)
            | Error::ListenFailed(e)
            | Error::NoRequestFailed(e)
            | Error::ConnectFailed(e)
            | Error::EventFailed(e)
            | Error::CompletionFailed(e)
            | Error::EndpointShutdownFailed(e)
            | Error::DisconnectFailed(e)
            | Error::ConnectionDeleteFailed(e)
            | Error::DeregistrationFailed(e)
            | Error::PeerDeleteFailed(e) => Some(e),
            _ => None,
        }
    }

    /// The failing operation: the native call when there is one.
    pub fn op(&self) -> &'static str {
        match self {
            Error::InvalidOption { .. } => "validate_options",
            Error::InvalidDescriptor(_) => "descriptor",
            Error::NotSetUp => "setup",
            Error::NoBuffer => "post_init",
            Error::UnexpectedEventFailed { .. } => "next_event",
            other => other.native().map_or("rpma", |e| e.op),
        }
    }

    pub fn code(&self) -> i32 {
        if let Some(e) = self.native() {
            return e.code();
        }
        match self {
            Error::InvalidOption { .. } | Error::InvalidDescriptor(_) | Error::NotSetUp => {
                libc::EINVAL
            }
            Error::NoBuffer => libc::ENOBUFS,
            Error::UnexpectedEventFailed { .. } => libc::EPROTO,
            _ => libc::EIO,
        }
    }
}

impl From<Error> for harness::Error {
    fn from(err: Error) -> Self {
        harness::Error::Engine {
            op: err.op().to_owned(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_code_is_surfaced() {
        let err = Error::ListenFailed(NativeError::from_errno("rdma_listen", libc::EADDRINUSE));
        let converted: harness::Error = err.into();
        match converted {
            harness::Error::Engine { op, code, message } => {
                assert_eq!(op, "rdma_listen");
                assert_eq!(code, libc::EADDRINUSE);
                assert!(message.starts_with("Failed to listen: rdma_listen"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_native_errors_have_codes() {
        let err = Error::UnexpectedEventFailed {
            expected: ConnEvent::Closed,
            got: ConnEvent::Lost,
        };
        assert_eq!(err.op(), "next_event");
        assert_eq!(err.code(), libc::EPROTO);
        assert_eq!(Error::NoBuffer.code(), libc::ENOBUFS);
    }
}
