// Socket plumbing below the session: options, connect/accept helpers,
// data channel addressing and host lookup.
pub mod pasv;
pub mod port;
pub mod resolver;
pub mod socket;
pub mod verify;

pub use resolver::{InlineResolverFactory, Resolve, ResolverFactory, ThreadResolverFactory};
pub use socket::SocketTuning;
