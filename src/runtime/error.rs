//! Fatal runtime errors.
//!
//! Anything in here stops the event loop. Per-connection failures never
//! become a `ServerError`; they are logged where they happen.

use std::io;
use std::net::SocketAddr;

/// Unrecoverable failure during bootstrap or while waiting for events.
#[derive(Debug)]
pub enum ServerError {
    /// The listening socket could not be created.
    Socket(io::Error),
    /// Socket options on the listening socket could not be applied.
    Configure(io::Error),
    /// The listening socket could not be bound.
    Bind { addr: SocketAddr, source: io::Error },
    /// The listening socket could not be put into listening state.
    Listen(io::Error),
    /// The readiness multiplexer could not be created.
    Multiplexer(io::Error),
    /// The listening socket could not be registered with the multiplexer.
    RegisterListener(io::Error),
    /// Waiting for readiness events failed.
    Wait(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Socket(e) => write!(f, "Cannot create socket: {}", e),
            ServerError::Configure(e) => write!(f, "Cannot configure socket: {}", e),
            ServerError::Bind { addr, source } => write!(f, "Cannot bind {}: {}", addr, source),
            ServerError::Listen(e) => write!(f, "Cannot listen: {}", e),
            ServerError::Multiplexer(e) => write!(f, "Cannot create poll instance: {}", e),
            ServerError::RegisterListener(e) => {
                write!(f, "Cannot register listener with poll instance: {}", e)
            }
            ServerError::Wait(e) => write!(f, "Waiting for events failed: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Socket(e)
            | ServerError::Configure(e)
            | ServerError::Listen(e)
            | ServerError::Multiplexer(e)
            | ServerError::RegisterListener(e)
            | ServerError::Wait(e) => Some(e),
            ServerError::Bind { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_includes_os_error() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:8888".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Cannot bind 127.0.0.1:8888: "));
        assert!(err.source().is_some());
    }
}
