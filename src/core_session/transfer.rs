// Caller-facing data calls. None of them blocks: `FtpError::InProgress`
// means "step the session and ask again".
use crate::core_error::FtpError;
use crate::core_log::debug_print;
use crate::core_network::socket::{
    is_transient, is_transient_write, is_would_block, poll_ready, unsent_bytes,
};
use crate::core_session::session::Session;
use crate::core_session::state::{CopyMode, Mode, State};
use std::io::{Read, Write};

impl Session {
    /// Reads transfer data, or the collected reply text of a QUOTE.
    ///
    /// `Ok(0)` is the end of the data. Bytes before the requested position
    /// are skipped when the server could not restart.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FtpError> {
        if let Some(e) = self.state_to_error() {
            return Err(e);
        }
        if self.mode == Mode::Closed {
            return Ok(0);
        }
        if self.state == State::Waiting && self.queue.is_empty() {
            return Ok(self.read_result(buf));
        }

        loop {
            if self.state != State::DataOpen {
                return Err(FtpError::InProgress);
            }
            if self.data.is_none() {
                return self.data_eof();
            }
            if self.queue.len() > 1 && self.real_pos.is_none() {
                return Err(FtpError::InProgress);
            }
            let allowed = self.rate.bytes_allowed(self.now);
            if allowed == 0 {
                return Err(FtpError::InProgress);
            }
            let size = buf.len().min(usize::try_from(allowed).unwrap_or(usize::MAX));

            let res = match self.data.as_ref() {
                Some(sock) => {
                    let mut r = sock;
                    r.read(&mut buf[..size])
                }
                None => return self.data_eof(),
            };
            let n = match res {
                Ok(0) => return self.data_eof(),
                Ok(n) => n,
                Err(e) if is_would_block(&e) => return Err(FtpError::InProgress),
                Err(e) if is_transient(&e) => {
                    debug_print("**** ", &format!("data read: {}", e), 0);
                    self.disconnect();
                    return Err(FtpError::InProgress);
                }
                Err(e) => {
                    self.enter_system_error(e);
                    return Err(self.state_to_error().unwrap_or(FtpError::Fatal));
                }
            };
            self.retries = 0;
            self.rate.bytes_used(n as u64);
            self.event_time = self.now;

            let before = self.real_pos.unwrap_or(0);
            let real = before + n as u64;
            self.real_pos = Some(real);
            if real <= self.pos {
                continue;
            }
            self.flags.io_flag = true;
            let skip = self.pos.saturating_sub(before) as usize;
            if skip > 0 {
                buf.copy_within(skip..n, 0);
            }
            let got = n - skip;
            self.pos += got as u64;
            return Ok(got);
        }
    }

    /// Hands out the reply text of a finished command, then ends it.
    fn read_result(&mut self, buf: &mut [u8]) -> usize {
        let text = self.result.take().unwrap_or_default();
        if text.is_empty() {
            self.switch_to_state(State::Eof);
            return 0;
        }
        let bytes = text.as_bytes();
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        let rest = String::from_utf8_lossy(&bytes[n..]).into_owned();
        self.result = Some(rest);
        n
    }

    fn data_eof(&mut self) -> Result<usize, FtpError> {
        self.data_close();
        if self.queue.is_empty() {
            self.switch_to_state(State::Eof);
            Ok(0)
        } else {
            Err(FtpError::InProgress)
        }
    }

    /// Sends data of a store. `Ok(0)` for any other operation.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, FtpError> {
        if self.mode != Mode::Store {
            return Ok(0);
        }
        if let Some(e) = self.state_to_error() {
            return Err(e);
        }
        if self.state != State::DataOpen || (self.queue.len() > 1 && self.real_pos.is_none()) {
            return Err(FtpError::InProgress);
        }
        let allowed = self.rate.bytes_allowed(self.now);
        if allowed == 0 {
            return Err(FtpError::InProgress);
        }
        let size = buf.len().min(usize::try_from(allowed).unwrap_or(usize::MAX));
        if size == 0 {
            return Ok(0);
        }

        let res = match self.data.as_ref() {
            Some(sock) => {
                let mut w = sock;
                w.write(&buf[..size])
            }
            None => return Err(FtpError::InProgress),
        };
        let n = match res {
            Ok(n) => n,
            Err(e) if is_would_block(&e) => return Err(FtpError::InProgress),
            Err(e) if is_transient_write(&e) => {
                debug_print("**** ", &format!("data write: {}", e), 0);
                self.disconnect();
                return Err(self.state_to_error().unwrap_or(FtpError::InProgress));
            }
            Err(e) => {
                self.enter_system_error(e);
                return Err(self.state_to_error().unwrap_or(FtpError::Fatal));
            }
        };
        self.retries = 0;
        self.rate.bytes_used(n as u64);
        self.event_time = self.now;
        self.pos += n as u64;
        self.real_pos = Some(self.real_pos.unwrap_or(0) + n as u64);
        self.flags.io_flag = true;
        Ok(n)
    }

    /// Closes the data connection of a store so the server sees the end.
    pub fn send_eot(&mut self) -> Result<(), FtpError> {
        if self.mode != Mode::Store {
            return Ok(());
        }
        if self.state != State::DataOpen {
            return Err(FtpError::InProgress);
        }
        self.data_close();
        self.state = State::Waiting;
        Ok(())
    }

    /// Whether a store has been confirmed by the server.
    pub fn store_status(&mut self) -> Result<(), FtpError> {
        if let Some(e) = self.state_to_error() {
            return Err(e);
        }
        if self.mode != Mode::Store {
            return Ok(());
        }
        if self.state == State::Waiting && self.queue.is_empty() {
            self.switch_to_state(State::Eof);
            return Ok(());
        }
        if self.state == State::DataOpen {
            // the caller is done writing
            if let Err(e) = self.send_eot() {
                debug_print("**** ", &format!("end of store: {}", e), 0);
            }
        }
        Err(FtpError::InProgress)
    }

    /// True when `read`/`write` would make progress or report an error.
    pub fn data_ready(&mut self) -> bool {
        if self.state_to_error().is_some() || self.mode == Mode::Closed {
            return true;
        }
        if self.state == State::Waiting {
            return self.queue.is_empty();
        }
        if self.state != State::DataOpen {
            return false;
        }
        if self.data.is_none() {
            return true;
        }
        if self.rate.bytes_allowed(self.now) == 0 {
            return false;
        }
        if self.real_pos.is_none() && self.queue.len() > 1 {
            return false;
        }
        let writable = self.mode == Mode::Store;
        let ready = match self.data.as_ref() {
            Some(sock) => poll_ready(sock, writable),
            None => return true,
        };
        match ready {
            Ok(r) => r,
            Err(e) => {
                debug_print("**** ", &format!("data connection: {}", e), 0);
                self.data_close();
                self.disconnect();
                true
            }
        }
    }

    /// Bytes of a store accepted by `write` but still in the kernel.
    pub fn buffered(&self) -> usize {
        if self.state != State::DataOpen || self.mode != Mode::Store {
            return 0;
        }
        match &self.data {
            Some(sock) => unsent_bytes(sock).min(usize::try_from(self.pos).unwrap_or(usize::MAX)),
            None => 0,
        }
    }

    /// Outcome of an operation without a data stream.
    ///
    /// Transfers report their end through `read`, `store_status` or the
    /// copy driver instead.
    pub fn done(&self) -> Result<(), FtpError> {
        if let Some(e) = self.state_to_error() {
            return Err(e);
        }
        match self.mode {
            Mode::Closed => Ok(()),
            Mode::ConnectVerify => {
                if self.state != State::Initial || self.lookup_done {
                    Ok(())
                } else {
                    Err(FtpError::InProgress)
                }
            }
            _ if self.copy_mode != CopyMode::None || !self.mode.uses_data_socket() => {
                if self.state == State::Waiting && self.queue.is_empty() {
                    Ok(())
                } else {
                    Err(FtpError::InProgress)
                }
            }
            _ => Err(FtpError::InProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core_network::InlineResolverFactory;
    use crate::core_reply::Check;
    use std::sync::Arc;
    use std::time::Instant;

    fn session() -> Session {
        let config = Config::default();
        let patterns = Arc::new(config.reply_patterns().unwrap());
        Session::new(Arc::new(config), patterns, Arc::new(InlineResolverFactory), Instant::now())
    }

    #[test]
    fn test_store_status_ends_the_upload() {
        let mut s = session();
        s.connect("localhost", 2121);
        s.open("f", Mode::Store, 0);
        s.state = State::DataOpen;
        s.expect(226, State::StoreFailed, Check::Transfer);

        assert!(matches!(s.store_status(), Err(FtpError::InProgress)));
        assert_eq!(s.state, State::Waiting);
        assert!(s.data.is_none());

        s.queue.clear();
        assert!(s.store_status().is_ok());
        assert_eq!(s.state, State::Eof);
    }
}
