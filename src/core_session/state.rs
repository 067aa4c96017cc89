use crate::constants::LOOKUP_ERROR_TEXT;
use crate::core_error::{FtpError, SavedError};
use chrono::{DateTime, Utc};

/// Where the session's protocol conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    NoHost,
    Initial,
    Connecting,
    UserRespWaiting,
    /// Logged in and idle.
    Eof,
    CwdCwdWaiting,
    DatasocketConnecting,
    Accepting,
    DataOpen,
    /// A non-data command is outstanding.
    Waiting,
    NoFile,
    StoreFailed,
    LoginFailed,
    SystemError,
    LookupError,
    Fatal,
    CopyFailed,
}

impl State {
    /// Outcome reported to the caller while the session sits in this state.
    ///
    /// `CopyFailed` reports nothing here; the copy driver inspects the
    /// state itself.
    pub fn to_error(
        self,
        saved: Option<&SavedError>,
        lookup_msg: Option<&str>,
    ) -> Option<FtpError> {
        match self {
            State::NoFile => Some(FtpError::NoFile),
            State::NoHost => Some(FtpError::NoHost),
            State::Fatal => Some(FtpError::Fatal),
            State::StoreFailed => Some(FtpError::StoreFailed),
            State::LoginFailed => Some(FtpError::LoginFailed),
            State::SystemError => Some(FtpError::System(
                saved
                    .map(SavedError::to_io)
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "unknown system error")),
            )),
            State::LookupError => Some(FtpError::Lookup(
                lookup_msg.unwrap_or(LOOKUP_ERROR_TEXT).to_string(),
            )),
            _ => None,
        }
    }
}

/// The high-level operation requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Closed,
    Retrieve,
    Store,
    /// NLST
    List,
    /// LIST
    LongList,
    ChangeDir,
    MakeDir,
    RemoveDir,
    Remove,
    Rename,
    QuoteCmd,
    ArrayInfo,
    ConnectVerify,
}

impl Mode {
    /// Operations that move bytes over a data connection.
    pub fn uses_data_socket(self) -> bool {
        matches!(self, Mode::Retrieve | Mode::Store | Mode::List | Mode::LongList)
    }
}

/// Session flags the caller may toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    SyncMode,
    PassiveMode,
    NoRestMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub passive_mode: bool,
    pub norest_mode: bool,
    /// Server paths look like `C:/dir`.
    pub dosish_path: bool,
    /// Data moved since the transfer command was sent.
    pub io_flag: bool,
}

/// Role in a server-to-server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    None,
    /// Sends PORT with the address the passive side published.
    Active,
    /// Sends PASV and publishes the address it got.
    Passive,
}

/// Progress of the passive data address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrReceived {
    None,
    Received,
    /// Connect started.
    Connecting,
}

/// One entry of an info-array query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file: String,
    pub get_size: bool,
    pub get_time: bool,
    pub size: Option<u64>,
    pub time: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn new(file: impl Into<String>, get_size: bool, get_time: bool) -> Self {
        Self {
            file: file.into(),
            get_size,
            get_time,
            size: None,
            time: None,
        }
    }
}
