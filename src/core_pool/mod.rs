// Arena of sessions sharing idle control connections
pub mod registry;

pub use registry::{Clock, ManualClock, Peers, SessionHandle, SessionRegistry, SystemClock};
