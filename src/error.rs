use std::io;
use thiserror::Error;

pub type TraceResult<T> = Result<T, TraceError>;

/// Errors surfaced by the tracing engine.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to resolve target: {0}")]
    ResolutionFailed(String),

    /// The kernel refused to open a raw ICMP socket.
    #[error(
        "insufficient permissions for raw ICMP sockets ({0}); \
         run as root or grant cap_net_raw"
    )]
    PermissionDenied(#[source] io::Error),

    #[error("host unreachable")]
    HostUnreachable,

    /// A probe key (echo identifier or ephemeral port) is already in use by
    /// a live probe. Callers redraw the identifier or rebind and retry.
    #[error("probe key already registered")]
    AlreadyRegistered,

    /// The per-family receiver shut down between lookup and registration.
    /// Callers restart it via `Registry::get_or_start` and retry.
    #[error("receiver is shut down")]
    ReceiverClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TraceError {
    /// Map a transmit/bind error onto the engine taxonomy.
    pub(crate) fn from_send(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(err),
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                Self::HostUnreachable
            }
            _ => Self::Io(err),
        }
    }
}
