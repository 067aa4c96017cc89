//! Non-blocking FTP client sessions.
//!
//! A [`Session`] describes what the caller wants (connect, retrieve a file,
//! change directory, ...). The [`SessionRegistry`] owns all sessions and
//! steps them; each step does as much protocol work as possible without
//! blocking and fills a [`Block`] with the descriptors and timeout the
//! caller's event loop should wait on.
pub mod config;
pub mod constants;
pub mod core_error;
pub mod core_ftpcommand;
pub mod core_log;
pub mod core_network;
pub mod core_pool;
pub mod core_ratelimit;
pub mod core_reply;
pub mod core_session;
pub mod helpers;
pub mod readiness;

pub use config::Config;
pub use core_error::{ConfigError, FtpError};
pub use core_pool::{ManualClock, SessionHandle, SessionRegistry};
pub use core_session::{FileInfo, Flag, Mode, Session, State};
pub use readiness::{Block, Interest, Progress};
