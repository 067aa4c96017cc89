use env_logger::{Builder, Env};
use log::Level;
use std::io::Write;

/// Installs the process logger with the `[timestamp] [level] message` format.
///
/// `RUST_LOG` overrides `default_filter`. Calling it twice is harmless, which
/// lets every test install it.
pub fn init_logger(default_filter: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(
                buf,
                "[{}] [{}] {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .try_init();
}

/// Maps the engine's 0..9 verbosity scale onto log levels.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 | 1 => Level::Info,
        2..=4 => Level::Debug,
        _ => Level::Trace,
    }
}

/// Logs one protocol trace line, e.g. `---> USER ftp`.
pub fn debug_print(prefix: &str, text: &str, verbosity: u8) {
    log::log!(level_for(verbosity), "{}{}", prefix, text);
}
