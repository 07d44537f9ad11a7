/// Error types for the logduct daemon.
///
/// Split into a small fatal surface (bind/permission failures that abort
/// startup) and a transient surface (everything else), which is always
/// logged and never propagated out of the event loop.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to bind listening socket at {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn successor process: {0}")]
    Reload(#[source] std::io::Error),

    #[error("malformed header: {0}")]
    MalformedHeader(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("errno: {0}")]
    Errno(#[from] nix::errno::Errno),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

/// Converts a nix errno into a `std::io::Error` carrying the same errno,
/// for wrapping into the `#[source]` field of the variants above.
pub fn io_err(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
