// Errors surfaced by the session engine and its configuration layer
use std::io;
use thiserror::Error;

/// Outcome of an operation as seen by the caller of the engine.
///
/// Transient network trouble never shows up here: it is absorbed by the
/// reconnect logic. Only terminal states of the current operation do.
#[derive(Error, Debug)]
pub enum FtpError {
    #[error("operation in progress")]
    InProgress,

    #[error("no such file or directory")]
    NoFile,

    #[error("no host name given")]
    NoHost,

    #[error("fatal protocol error")]
    Fatal,

    #[error("store failed - reput is needed")]
    StoreFailed,

    #[error("login failed")]
    LoginFailed,

    #[error(transparent)]
    System(io::Error),

    #[error("{0}")]
    Lookup(String),
}

impl FtpError {
    /// True for the "would block" outcome, which is not a failure.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, FtpError::InProgress)
    }

    /// Failures the caller is expected to handle by retrying the whole
    /// operation (as opposed to giving up on it).
    pub fn needs_retry(&self) -> bool {
        matches!(self, FtpError::StoreFailed)
    }
}

/// OS error kept by the session after entering the system-error state.
///
/// `io::Error` is not `Clone`, and the error is reported every time the
/// caller polls, so the parts needed to rebuild it are stored instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedError {
    pub code: Option<i32>,
    pub kind: io::ErrorKind,
    pub message: String,
}

impl SavedError {
    pub fn from_io(e: &io::Error) -> Self {
        Self {
            code: e.raw_os_error(),
            kind: e.kind(),
            message: e.to_string(),
        }
    }

    pub fn to_io(&self) -> io::Error {
        match self.code {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(self.kind, self.message.clone()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Proxy protocol unsupported: {0}")]
    UnsupportedProxy(String),

    #[error("Invalid proxy URL {0}: {1}")]
    InvalidProxy(String, String),

    #[error("Invalid reply pattern `{name}`: {source}")]
    InvalidPattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },
}
