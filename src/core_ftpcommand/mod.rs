// Commands the client sends and the buffer they travel through
pub mod ftpcommand;
pub mod pipeline;

pub use ftpcommand::{FtpCommand, TransferType};
pub use pipeline::CommandPipeline;
