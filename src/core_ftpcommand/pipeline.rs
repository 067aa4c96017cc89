use crate::constants::TELNET_IAC;
use crate::core_ftpcommand::ftpcommand::FtpCommand;
use std::io::{self, ErrorKind, Write};

/// Outgoing command buffer of the control connection.
///
/// In sync mode only one complete line is on the wire at a time: after a
/// line is written, further lines wait until `reply_arrived` is called.
#[derive(Debug, Default)]
pub struct CommandPipeline {
    buf: Vec<u8>,
    sync_mode: bool,
    sync_wait: bool,
}

impl CommandPipeline {
    pub fn new(sync_mode: bool) -> Self {
        Self {
            buf: Vec::new(),
            sync_mode,
            sync_wait: false,
        }
    }

    pub fn send_command(&mut self, cmd: &FtpCommand) {
        self.send(cmd.to_string());
    }

    /// Queues raw command text.
    ///
    /// Bare `\n` becomes `\r\n`, byte 255 is doubled, and a missing line
    /// terminator is added.
    pub fn send(&mut self, cmd: impl AsRef<[u8]>) {
        let cmd = cmd.as_ref();
        if cmd.is_empty() {
            return;
        }
        let tail: &[u8] = if cmd.last() == Some(&b'\n') { b"" } else { b"\n" };
        let mut prev = 0u8;
        for &ch in cmd.iter().chain(tail) {
            if ch == b'\n' && prev != b'\r' {
                self.buf.push(b'\r');
            } else if ch == TELNET_IAC {
                self.buf.push(TELNET_IAC);
            }
            self.buf.push(ch);
            prev = ch;
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.sync_wait = false;
    }

    pub fn sync_mode(&self) -> bool {
        self.sync_mode
    }

    pub fn set_sync_mode(&mut self, on: bool) {
        self.sync_mode = on;
        if !on {
            self.sync_wait = false;
        }
    }

    pub fn sync_wait(&self) -> bool {
        self.sync_wait
    }

    /// Holds back everything until the next reply (banner before USER).
    pub fn hold_until_reply(&mut self) {
        if self.sync_mode {
            self.sync_wait = true;
        }
    }

    pub fn reply_arrived(&mut self) {
        self.sync_wait = false;
    }

    /// Writes as much as the socket takes without blocking.
    ///
    /// `all` ignores sync mode (used when tearing down). Returns the bytes
    /// that went out in this call.
    pub fn flush<W: Write>(&mut self, w: &mut W, all: bool) -> io::Result<Vec<u8>> {
        let mut written = Vec::new();
        while !self.buf.is_empty() && (all || !self.sync_wait) {
            let to_write = if !all && self.sync_mode {
                match self.buf.iter().position(|&b| b == b'\n') {
                    Some(i) => i + 1,
                    None => break,
                }
            } else {
                self.buf.len()
            };
            match w.write(&self.buf[..to_write]) {
                Ok(0) => break,
                Ok(n) => {
                    let line_done = self.buf[n - 1] == b'\n';
                    written.extend(self.buf.drain(..n));
                    if self.sync_mode && line_done {
                        self.sync_wait = true;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                    break
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

/// Log lines for a flushed chunk, with PASS arguments hidden unless allowed.
pub fn masked_log_lines(written: &[u8], may_show_pass: bool) -> Vec<String> {
    String::from_utf8_lossy(written)
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .map(|l| {
            if !may_show_pass && l.starts_with("PASS ") {
                String::from("PASS XXXX")
            } else {
                l.to_string()
            }
        })
        .collect()
}
