//! Error types.

/// Errors returned by [netresolve](crate).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IoError as returned from the reactor or a backend socket
    #[error("io error")]
    Io(#[from] std::io::Error),

    /// No backend in the chain produced any paths
    #[error("no data")]
    NoData,

    /// The request timeout fired before a backend finished
    #[error("operation timed-out")]
    TimedOut,

    /// Malformed request options
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// A mandatory backend failed to load or the chain is unusable
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(std::io::Error::from_raw_os_error(e as i32))
    }
}

/// Result returned by [netresolve](crate).
pub type Result<T> = std::result::Result<T, Error>;
