// The FTP session: state machine, reply validators and data transfer calls
mod control;
pub mod keepalive;
pub mod otp;
mod replies;
pub mod session;
pub mod state;
mod step;
mod transfer;

pub use session::Session;
pub use state::{CopyMode, FileInfo, Flag, Mode, State};
