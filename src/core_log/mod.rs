pub mod logger;

pub use logger::{debug_print, init_logger, level_for};
