// Everything that turns control-connection bytes into session decisions
pub mod check;
pub mod patterns;
pub mod queue;
pub mod reader;

pub use check::Check;
pub use patterns::{PatternConfig, ReplyPatterns};
pub use queue::{CloseOutcome, Expectation, ExpectationQueue};
pub use reader::{ReplyLine, ReplyReader};
