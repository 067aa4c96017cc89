// Control connection housekeeping: sending, tearing down and state switches
use crate::constants::RESP_LOGGED_IN;
use crate::core_error::SavedError;
use crate::core_ftpcommand::pipeline::masked_log_lines;
use crate::core_ftpcommand::FtpCommand;
use crate::core_log::debug_print;
use crate::core_network::socket::{is_transient_write, send_urgent_abort};
use crate::core_reply::{Check, CloseOutcome};
use crate::core_session::session::Session;
use crate::core_session::state::{CopyMode, Mode, State};
use crate::readiness::Block;
use std::io;

impl Session {
    pub(crate) fn send_cmd(&mut self, cmd: FtpCommand) {
        self.pipeline.send_command(&cmd);
    }

    pub(crate) fn expect(&mut self, code: u16, fail_state: State, check: Check) {
        self.queue.push(code, fail_state, check);
    }

    /// Writes queued commands; `all` overrides sync mode.
    pub(crate) fn flush_send_queue(&mut self, all: bool) {
        let Some(sock) = self.control.as_ref() else {
            return;
        };
        if self.pipeline.is_empty() {
            return;
        }
        let mut w = sock;
        match self.pipeline.flush(&mut w, all) {
            Ok(written) => {
                if written.is_empty() {
                    return;
                }
                self.event_time = self.now;
                let proxy_auth = self.proxy.as_ref().map_or(false, |p| p.user.is_some());
                let may_show = (self.skey_pass.is_some() || self.user.is_none()) && !proxy_auth;
                for line in masked_log_lines(&written, may_show) {
                    debug_print("---> ", &line, 3);
                }
            }
            Err(e) if is_transient_write(&e) => {
                debug_print("**** ", &e.to_string(), 0);
                self.disconnect();
            }
            Err(e) => self.enter_system_error(e),
        }
    }

    /// Keeps `e` for the caller and drops the connection.
    pub(crate) fn enter_system_error(&mut self, e: io::Error) {
        debug_print("**** ", &e.to_string(), 0);
        self.saved_error = Some(SavedError::from_io(&e));
        self.switch_to_state(State::SystemError);
    }

    /// QUITs (when logged far enough), closes both connections and picks
    /// the state that tells the caller what happened to the operation.
    pub fn disconnect(&mut self) {
        if self.disconnect_in_progress {
            return;
        }
        self.disconnect_in_progress = true;

        self.data_abort();
        self.data_close();
        if self.control.is_some() && self.state != State::Connecting {
            self.send_cmd(FtpCommand::Quit);
            self.flush_send_queue(true);
        }
        self.control_close();
        self.aborted_close();

        self.state = if self.copy_mode != CopyMode::None {
            State::CopyFailed
        } else if self.mode == Mode::Store && self.flags.io_flag {
            State::StoreFailed
        } else {
            State::Initial
        };
        self.disconnect_in_progress = false;
    }

    pub(crate) fn control_close(&mut self) {
        if self.control.take().is_some() {
            debug_print("---- ", "Closing control socket", 8);
            if self.settings.relookup_always && self.proxy.is_none() {
                self.lookup_done = false;
            }
        }
        self.reader.clear();
        self.queue.clear();
        self.pipeline.clear();
    }

    pub(crate) fn aborted_close(&mut self) {
        self.aborted_data = None;
    }

    pub(crate) fn data_close(&mut self) {
        if self.data.take().is_some() {
            debug_print("---- ", "Closing data socket", 8);
        }
        self.keepalive.reset();
        self.result = None;
    }

    /// Interrupts a running transfer with an urgent ABOR.
    ///
    /// The data socket is parked until the ABOR reply so the server does
    /// not see the connection drop first.
    pub(crate) fn data_abort(&mut self) {
        if self.control.is_none() || self.state == State::Connecting {
            return;
        }
        if self.copy_mode == CopyMode::None {
            if self.data.is_none() {
                return;
            }
        } else if self.queue.is_empty() || self.copy_addr.is_none() {
            return;
        }
        // nothing was requested over this data connection yet
        if self.data.is_some()
            && (matches!(self.state, State::Accepting | State::DatasocketConnecting)
                || self.queue.is_empty())
        {
            return;
        }

        self.flush_send_queue(true);
        let Some(control) = self.control.as_ref() else {
            return;
        };
        send_urgent_abort(control);
        self.send_cmd(FtpCommand::Abor);
        self.expect(226, State::Initial, Check::Abor);
        self.flush_send_queue(true);

        self.aborted_close();
        self.aborted_data = self.data.take();
    }

    /// Enters `ns` with the side effects that state requires.
    pub(crate) fn switch_to_state(&mut self, ns: State) {
        if ns == self.state {
            return;
        }
        match ns {
            State::Initial
            | State::Fatal
            | State::StoreFailed
            | State::LoginFailed
            | State::SystemError => self.disconnect(),
            State::Eof => {
                self.data_abort();
                self.data_close();
                self.file = None;
                self.set_idle_start();
                self.mode = Mode::Closed;
            }
            State::NoFile | State::LookupError | State::CopyFailed => {}
            State::DataOpen => self.data_close(),
            other => unreachable!("no transition into {:?}", other),
        }
        // disconnect may already have settled on a failure the caller must see
        if matches!(self.state, State::CopyFailed | State::StoreFailed) {
            return;
        }
        self.state = if ns == State::StoreFailed && self.mode != Mode::Store {
            State::Initial
        } else {
            ns
        };
    }

    /// Reconnects after `timeout` without progress. Returns true when it did.
    pub(crate) fn check_timeout(&mut self, block: &mut Block) -> bool {
        let timeout = self.timeout();
        let elapsed = self.now.saturating_duration_since(self.event_time);
        if elapsed < timeout {
            block.timeout(timeout - elapsed);
            return false;
        }
        let login_pending = self
            .queue
            .head()
            .map_or(false, |h| h.expect == RESP_LOGGED_IN);
        if login_pending && !self.pipeline.sync_mode() {
            self.pipeline.set_sync_mode(true);
            debug_print("**** ", "Timeout - trying sync mode (is it windoze?)", 0);
        } else {
            debug_print("**** ", "Timeout - reconnecting", 0);
        }
        self.disconnect();
        self.event_time = self.now;
        true
    }

    pub(crate) fn close_resp_queue(&mut self) {
        if self.queue.close() == CloseOutcome::MustDisconnect {
            self.disconnect();
        }
    }
}
