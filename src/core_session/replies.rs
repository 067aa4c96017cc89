// Reading replies and deciding what each one means for the session
use crate::constants::{
    RESP_BROKEN_PIPE, RESP_LOGIN_FAILED, RESP_NOT_IMPLEMENTED, RESP_NOT_UNDERSTOOD,
    RESP_NO_FILE, RESP_PASS_REQ, RESP_RESULT_HERE, RESP_SERVICE_CLOSING, RESP_TRANSFER_START,
};
use crate::core_ftpcommand::FtpCommand;
use crate::core_log::debug_print;
use crate::core_network::pasv::parse_pasv_reply;
use crate::core_network::socket::{is_transient, is_would_block};
use crate::core_reply::Check;
use crate::core_session::otp::make_skey_reply;
use crate::core_session::session::Session;
use crate::core_session::state::{AddrReceived, CopyMode, Mode, State};
use crate::helpers::{convert_ftp_date, extract_pwd, leading_number};
use std::net::{Ipv4Addr, SocketAddr};

/// Reply class, the first digit.
fn class(code: u16) -> u16 {
    code / 100
}

/// Value after `NNN ` when it starts with a digit.
fn numeric_tail(line: &str) -> Option<&str> {
    line.get(4..).filter(|t| t.starts_with(|c: char| c.is_ascii_digit()))
}

impl Session {
    /// Consumes every complete reply available on the control socket.
    ///
    /// Returns early when a reply moved the session into another state and
    /// nothing else is buffered, so the state handler runs before more
    /// input is looked at.
    pub(crate) fn receive_resp(&mut self) {
        loop {
            let Some((code, text)) = self.next_reply_line() else {
                return;
            };
            self.line = text;
            if code == RESP_RESULT_HERE {
                self.result = Some(self.line.get(4..).unwrap_or("").to_string());
            }
            if let Some(new_state) = self.check_resp(code) {
                if new_state != self.state {
                    if matches!(new_state, State::Fatal | State::NoFile) {
                        self.last_error_resp = Some(self.line.clone());
                    }
                    self.switch_to_state(new_state);
                    if !self.reader.has_pending() {
                        return;
                    }
                }
            }
        }
    }

    /// Next line that completes a reply, reading from the socket as needed.
    fn next_reply_line(&mut self) -> Option<(u16, String)> {
        loop {
            self.control.as_ref()?;
            if let Some(line) = self.reader.next_line() {
                debug_print("<--- ", &line.text, if line.banner { 0 } else { 1 });
                if self.queue.head().map_or(false, |h| h.log_resp) {
                    self.log_resp(&line.text);
                    self.log_resp("\n");
                }
                if line.complete {
                    self.pipeline.reply_arrived();
                    return Some((line.code, line.text));
                }
                continue;
            }

            let sock = self.control.as_ref()?;
            let mut r = sock;
            match self.reader.fill(&mut r) {
                Ok(0) => {
                    debug_print("**** ", "Peer closed connection", 0);
                    self.control_close();
                    self.disconnect();
                    return None;
                }
                Ok(_) => self.event_time = self.now,
                Err(e) if is_would_block(&e) => return None,
                Err(e) if is_transient(&e) => {
                    debug_print("**** ", &e.to_string(), 0);
                    self.disconnect();
                    return None;
                }
                Err(e) => {
                    self.enter_system_error(e);
                    return None;
                }
            }
        }
    }

    fn log_resp(&mut self, text: &str) {
        self.result.get_or_insert_with(String::new).push_str(text);
    }

    /// Matches a completed reply against the oldest expectation.
    ///
    /// `None` keeps the current state; a state is the one to switch to.
    pub(crate) fn check_resp(&mut self, act: u16) -> Option<State> {
        let line = self.line.clone();

        if act == RESP_TRANSFER_START && self.mode == Mode::Retrieve && self.want_size {
            self.catch_size_in_150(&line);
        }
        if class(act) == 1 {
            return None;
        }
        if act == RESP_SERVICE_CLOSING {
            if self.patterns.remote_timeout.is_match(&line) {
                debug_print("**** ", "Server closed the idle connection", 1);
            }
            return Some(State::Initial);
        }

        let Some(head) = self.queue.head().cloned() else {
            debug_print("**** ", "extra server response", 3);
            return if class(act) == 2 {
                None
            } else {
                Some(State::Initial)
            };
        };
        let matched = class(act) == class(head.expect);

        let verdict = match head.check {
            Check::None => None,
            Check::Ignore => Some(self.state),
            Check::Ready => self.ready_check(&line),
            Check::Rest => self.rest_check(act),
            Check::Cwd => {
                if matched {
                    self.cwd = self.target_cwd.clone();
                    self.real_cwd = self.target_cwd.take();
                    None
                } else if class(act) == 5 {
                    Some(State::NoFile)
                } else {
                    None
                }
            }
            Check::CwdCurrent => {
                if matched {
                    let cwd = self.cwd.clone();
                    self.set_real_cwd(cwd.as_deref());
                }
                if class(act) == 5 {
                    Some(State::NoFile)
                } else {
                    None
                }
            }
            Check::CwdStale => {
                if matched {
                    self.set_real_cwd(head.path.as_deref());
                }
                Some(self.state)
            }
            Check::Abor => {
                self.aborted_close();
                Some(self.state)
            }
            Check::Size { index } => self.catch_size(act, index, &line),
            Check::SizeOpt => self.catch_size_opt(act, &line),
            Check::Mdtm { index } => self.catch_date(act, index, &line),
            Check::MdtmOpt => self.catch_date_opt(act, &line),
            Check::FileAccess => self.no_file_check(act, head.expect, &line),
            Check::Pasv => self.pasv_catch(act, &line),
            Check::Pwd => {
                if matched && self.home.is_none() {
                    let (pwd, dosish) = extract_pwd(&line);
                    if dosish {
                        self.flags.dosish_path = true;
                    }
                    if !pwd.is_empty() {
                        self.home = Some(pwd);
                    }
                }
                Some(self.state)
            }
            Check::Rnfr { to } => {
                if matched {
                    self.send_cmd(FtpCommand::Rnto(to));
                    self.expect(250, State::Initial, Check::FileAccess);
                    None
                } else {
                    self.no_file_check(act, head.expect, &line)
                }
            }
            Check::UserProxy => self.proxy_user_check(act, &line),
            Check::User => self.user_check(act, &line),
            Check::PassProxy => self.proxy_pass_check(act, &line),
            Check::Pass => self.pass_check(act, &line),
            Check::Transfer => self.transfer_check(act, head.expect, &line),
        };

        let verdict = match verdict {
            None if !matched => Some(head.fail_state),
            v => v,
        };
        self.queue.pop();
        verdict
    }

    fn catch_size_in_150(&mut self, line: &str) {
        if self.size.is_some() {
            return;
        }
        let Some(open) = line.rfind('(') else {
            return;
        };
        let inner = &line[open + 1..];
        if inner.starts_with(|c: char| c.is_ascii_digit()) {
            self.size = leading_number(inner);
            debug_print("---- ", "saw file size in response", 7);
        }
    }

    fn ready_check(&mut self, line: &str) -> Option<State> {
        if !self.pipeline.sync_mode() && self.patterns.microsoft_banner.is_match(line) {
            debug_print("---- ", "Turning on sync-mode", 2);
            self.pipeline.set_sync_mode(true);
            self.try_time = None;
            return Some(State::Initial);
        }
        None
    }

    fn rest_check(&mut self, act: u16) -> Option<State> {
        match class(act) {
            5 => {
                debug_print("---- ", "Switching to NOREST mode", 2);
                self.flags.norest_mode = true;
                self.real_pos = Some(0);
                if self.mode == Mode::Store {
                    self.pos = 0;
                }
                if self.copy_mode != CopyMode::None {
                    return Some(State::CopyFailed);
                }
                Some(self.state)
            }
            4 => None,
            _ => {
                self.real_pos = Some(self.pos);
                Some(self.state)
            }
        }
    }

    fn no_file_check(&mut self, act: u16, expect: u16, line: &str) -> Option<State> {
        if act == RESP_NOT_IMPLEMENTED || act == RESP_NOT_UNDERSTOOD {
            return Some(State::Fatal);
        }
        if class(act) == 5 {
            if self.patterns.broken_pipe.is_match(line) {
                return Some(if self.copy_mode != CopyMode::None {
                    State::CopyFailed
                } else {
                    State::Initial
                });
            }
            // a server that rejects the restarted transfer gets it once more
            // from the beginning
            if self.real_pos.map_or(false, |p| p > 0)
                && !self.flags.io_flag
                && self.copy_mode == CopyMode::None
            {
                debug_print("---- ", "Switching to NOREST mode", 2);
                self.flags.norest_mode = true;
                self.real_pos = Some(0);
                if self.mode == Mode::Store {
                    self.pos = 0;
                }
                self.state = State::Eof;
                return Some(State::Eof);
            }
            return Some(State::NoFile);
        }
        if class(act) != class(expect) && self.copy_mode != CopyMode::None {
            return Some(State::CopyFailed);
        }
        None
    }

    fn transfer_check(&mut self, act: u16, expect: u16, line: &str) -> Option<State> {
        if self.mode == Mode::Closed || self.queue.len() > 1 {
            return Some(self.state);
        }
        // NLST of an empty directory
        if act == RESP_NO_FILE && self.mode == Mode::List {
            self.data_close();
            return Some(State::DataOpen);
        }
        if act == RESP_BROKEN_PIPE
            && self.copy_mode == CopyMode::None
            && self.data.is_none()
            && self.patterns.broken_pipe.is_match(line)
        {
            return Some(self.state);
        }
        self.no_file_check(act, expect, line)
    }

    fn pass_check(&mut self, act: u16, line: &str) -> Option<State> {
        if self.ignore_pass {
            return Some(self.state);
        }
        if act == RESP_LOGIN_FAILED {
            if self.patterns.login_incorrect.is_match(line) {
                return Some(State::LoginFailed);
            }
            return None;
        }
        if class(act) == 5 {
            return Some(State::LoginFailed);
        }
        None
    }

    /// USER reply: 2xx means no password is needed, 331 may carry an OTP
    /// challenge.
    fn user_check(&mut self, act: u16, line: &str) -> Option<State> {
        if class(act) == 2 {
            self.ignore_pass = true;
            return Some(self.state);
        }
        if act == RESP_LOGIN_FAILED {
            if self.patterns.unknown_user.is_match(line) {
                return Some(State::LoginFailed);
            }
            return None;
        }
        if class(act) == 5 {
            if self.proxy.is_some() && self.patterns.proxy_lookup.is_match(line) {
                debug_print("---- ", "Proxy could not reach the server", 1);
                self.last_error_resp = Some(line.to_string());
                self.disconnect();
                return Some(State::LookupError);
            }
            return Some(State::LoginFailed);
        }
        if act == RESP_PASS_REQ && self.settings.skey_allow && self.user.is_some() {
            if let (Some(pass), Some(challenge)) = (self.pass.clone(), self.result.take()) {
                self.skey_pass = make_skey_reply(&challenge, &pass);
                if self.settings.skey_force && self.skey_pass.is_none() {
                    debug_print("---- ", "No OTP challenge and skey-force is set", 0);
                    return Some(State::LoginFailed);
                }
            }
        }
        if class(act) == 3 {
            return Some(self.state);
        }
        None
    }

    fn proxy_user_check(&mut self, act: u16, line: &str) -> Option<State> {
        if act == RESP_LOGIN_FAILED && !self.patterns.unknown_user.is_match(line) {
            return None;
        }
        if class(act) == 5 {
            return Some(State::LoginFailed);
        }
        None
    }

    fn proxy_pass_check(&mut self, act: u16, line: &str) -> Option<State> {
        if class(act) == 5 {
            if self.patterns.login_incorrect.is_match(line) {
                debug_print("---- ", "Proxy rejected the login", 1);
            }
            return Some(State::LoginFailed);
        }
        None
    }

    fn pasv_catch(&mut self, act: u16, line: &str) -> Option<State> {
        if class(act) == 5 {
            return self.pasv_off();
        }
        if class(act) != 2 {
            return None;
        }
        // a borrowed connection may not carry the resolved address
        let control_ip = match self.peer_addr.or_else(|| self.control_peer()) {
            Some(SocketAddr::V4(a)) => *a.ip(),
            _ => Ipv4Addr::UNSPECIFIED,
        };
        match parse_pasv_reply(line, control_ip) {
            Some(addr) => {
                self.data_addr = Some(addr);
                self.addr_received = AddrReceived::Received;
                Some(self.state)
            }
            None => self.pasv_off(),
        }
    }

    fn pasv_off(&mut self) -> Option<State> {
        debug_print("---- ", "Switching passive mode off", 2);
        self.flags.passive_mode = false;
        Some(State::Initial)
    }

    fn catch_size(&mut self, act: u16, index: usize, line: &str) -> Option<State> {
        let value = match class(act) {
            2 => numeric_tail(line).and_then(leading_number),
            5 => None,
            _ => return None,
        };
        let Some(entry) = self.array.get_mut(index) else {
            return Some(self.state);
        };
        entry.size = value;
        entry.get_size = false;
        if !entry.get_time {
            self.array_ptr = index + 1;
        }
        self.retries = 0;
        Some(self.state)
    }

    fn catch_date(&mut self, act: u16, index: usize, line: &str) -> Option<State> {
        let value = match class(act) {
            2 => numeric_tail(line).and_then(convert_ftp_date),
            5 => None,
            _ => return None,
        };
        let Some(entry) = self.array.get_mut(index) else {
            return Some(self.state);
        };
        entry.time = value;
        entry.get_time = false;
        if !entry.get_size {
            self.array_ptr = index + 1;
        }
        self.retries = 0;
        Some(self.state)
    }

    fn catch_size_opt(&mut self, act: u16, line: &str) -> Option<State> {
        if !self.want_size {
            return Some(self.state);
        }
        match numeric_tail(line).filter(|_| class(act) == 2) {
            Some(tail) => {
                self.size = leading_number(tail);
                self.want_size = false;
            }
            None => self.size = None,
        }
        Some(self.state)
    }

    fn catch_date_opt(&mut self, act: u16, line: &str) -> Option<State> {
        if !self.want_date {
            return Some(self.state);
        }
        match numeric_tail(line).filter(|_| class(act) == 2) {
            Some(tail) => {
                self.date = convert_ftp_date(tail);
                self.want_date = false;
            }
            None => self.date = None,
        }
        Some(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core_network::InlineResolverFactory;
    use crate::core_session::state::FileInfo;
    use std::sync::Arc;
    use std::time::Instant;

    fn session() -> Session {
        let config = Config::default();
        let patterns = Arc::new(config.reply_patterns().unwrap());
        let mut s = Session::new(
            Arc::new(config),
            patterns,
            Arc::new(InlineResolverFactory),
            Instant::now(),
        );
        s.connect("ftp.example.org", 0);
        s
    }

    fn reply(s: &mut Session, line: &str) -> Option<State> {
        s.line = line.to_string();
        let code = line[..3].parse().unwrap();
        s.check_resp(code)
    }

    #[test]
    fn test_replies_match_in_order() {
        let mut s = session();
        s.state = State::Waiting;
        s.expect(200, State::Initial, Check::None);
        s.expect(250, State::Initial, Check::FileAccess);
        assert_eq!(reply(&mut s, "200 Type set to I"), None);
        assert_eq!(s.queue.len(), 1);
        assert_eq!(reply(&mut s, "550 No such file"), Some(State::NoFile));
        assert!(s.queue.is_empty());
    }

    #[test]
    fn test_mismatched_class_uses_fail_state() {
        let mut s = session();
        s.state = State::Waiting;
        s.expect(200, State::Initial, Check::None);
        assert_eq!(reply(&mut s, "504 Type not supported"), Some(State::Initial));
    }

    #[test]
    fn test_421_forces_reconnect() {
        let mut s = session();
        s.state = State::Waiting;
        s.expect(250, State::Initial, Check::FileAccess);
        assert_eq!(
            reply(&mut s, "421 Timeout (no operation for 900 seconds)"),
            Some(State::Initial)
        );
        assert_eq!(s.queue.len(), 1);
    }

    #[test]
    fn test_extra_reply() {
        let mut s = session();
        assert_eq!(reply(&mut s, "226 Done"), None);
        assert_eq!(reply(&mut s, "500 What?"), Some(State::Initial));
    }

    #[test]
    fn test_preliminary_replies_are_skipped() {
        let mut s = session();
        s.open("file", Mode::Retrieve, 0);
        s.want_size();
        s.expect(226, State::Initial, Check::Transfer);
        assert_eq!(
            reply(&mut s, "150 Opening BINARY mode data connection for file (4096 bytes)"),
            None
        );
        assert_eq!(s.size(), Some(4096));
        assert_eq!(s.queue.len(), 1);
    }

    #[test]
    fn test_rest_rejected_turns_norest_on() {
        let mut s = session();
        s.open("file", Mode::Store, 100);
        s.real_pos = None;
        s.state = State::DataOpen;
        s.expect(350, State::Initial, Check::Rest);
        assert_eq!(reply(&mut s, "502 REST not implemented"), Some(State::DataOpen));
        assert!(s.flags.norest_mode);
        assert_eq!(s.real_pos, Some(0));
        assert_eq!(s.pos, 0);
    }

    #[test]
    fn test_rest_accepted() {
        let mut s = session();
        s.open("file", Mode::Retrieve, 100);
        s.real_pos = None;
        s.state = State::DataOpen;
        s.expect(350, State::Initial, Check::Rest);
        assert_eq!(reply(&mut s, "350 Restarting at 100"), Some(State::DataOpen));
        assert_eq!(s.real_pos, Some(100));
    }

    #[test]
    fn test_restarted_retrieve_refused_starts_over() {
        let mut s = session();
        s.open("file", Mode::Retrieve, 100);
        s.state = State::DataOpen;
        s.expect(226, State::Initial, Check::Transfer);
        assert_eq!(reply(&mut s, "554 Restart not possible"), Some(State::Eof));
        assert_eq!(s.state, State::Eof);
        assert!(s.flags.norest_mode);
        assert_eq!(s.real_pos, Some(0));
    }

    #[test]
    fn test_empty_nlst() {
        let mut s = session();
        s.open("", Mode::List, 0);
        s.state = State::DataOpen;
        s.expect(226, State::Initial, Check::Transfer);
        assert_eq!(reply(&mut s, "550 No files found"), Some(State::DataOpen));
    }

    #[test]
    fn test_cwd_success_and_failure() {
        let mut s = session();
        s.state = State::Waiting;
        s.target_cwd = Some("/pub".into());
        s.expect(250, State::Initial, Check::Cwd);
        assert_eq!(reply(&mut s, "250 OK"), None);
        assert_eq!(s.cwd(), Some("/pub"));
        assert_eq!(s.real_cwd(), Some("/pub"));

        s.target_cwd = Some("/nope".into());
        s.expect(250, State::Initial, Check::Cwd);
        assert_eq!(reply(&mut s, "550 No such directory"), Some(State::NoFile));
        assert_eq!(s.cwd(), Some("/pub"));
    }

    #[test]
    fn test_pwd_sets_home_once() {
        let mut s = session();
        s.state = State::UserRespWaiting;
        s.expect(257, State::Initial, Check::Pwd);
        reply(&mut s, "257 \"/home/joe\" is current directory");
        assert_eq!(s.home(), Some("/home/joe"));
        s.expect(257, State::Initial, Check::Pwd);
        reply(&mut s, "257 \"/elsewhere\"");
        assert_eq!(s.home(), Some("/home/joe"));
    }

    #[test]
    fn test_pasv_zero_address_without_lookup() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let mut s = session();
        s.control = Some(socket2::Socket::from(stream));
        s.peer_addr = None;
        s.state = State::DatasocketConnecting;
        s.expect(227, State::Initial, Check::Pasv);
        reply(&mut s, "227 Entering Passive Mode (0,0,0,0,4,1)");
        let addr = s.data_addr.unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
        assert_eq!(addr.port(), 1025);
    }

    #[test]
    fn test_pasv_reply() {
        let mut s = session();
        s.state = State::DatasocketConnecting;
        s.expect(227, State::Initial, Check::Pasv);
        let v = reply(&mut s, "227 Entering Passive Mode (192,168,1,2,4,1)");
        assert_eq!(v, Some(State::DatasocketConnecting));
        assert_eq!(s.addr_received, AddrReceived::Received);
        assert_eq!(s.data_addr.unwrap().port(), 1025);

        s.expect(227, State::Initial, Check::Pasv);
        s.flags.passive_mode = true;
        assert_eq!(reply(&mut s, "227 garbage"), Some(State::Initial));
        assert!(!s.flags.passive_mode);
    }

    #[test]
    fn test_rnfr_queues_rnto() {
        let mut s = session();
        s.rename("a", "b");
        s.state = State::Waiting;
        s.expect(350, State::Initial, Check::Rnfr { to: "b".into() });
        assert_eq!(reply(&mut s, "350 Ready for RNTO"), None);
        assert_eq!(s.queue.head().map(|h| h.expect), Some(250));
        assert_eq!(s.pipeline.pending(), "RNTO b\r\n".len());
    }

    #[test]
    fn test_login_checks() {
        let mut s = session();
        s.state = State::UserRespWaiting;
        s.expect(230, State::Initial, Check::Pass);
        assert_eq!(reply(&mut s, "530 Login incorrect."), Some(State::LoginFailed));

        s.expect(230, State::Initial, Check::Pass);
        // 530 without the marker text is treated as transient
        assert_eq!(reply(&mut s, "530 Too many users"), Some(State::Initial));

        s.expect(331, State::Initial, Check::User);
        assert_eq!(reply(&mut s, "230 No password needed"), Some(State::UserRespWaiting));
        assert!(s.ignore_pass);
    }

    #[test]
    fn test_user_reply_with_otp_challenge() {
        let mut s = session();
        s.set_login(Some("joe"), Some("This is a test."));
        s.state = State::UserRespWaiting;
        s.queue.push_logged(331, State::Initial, Check::User);
        s.result = Some("331 otp-md5 99 TeSt ext required\n".into());
        assert_eq!(
            reply(&mut s, "331 otp-md5 99 TeSt ext required"),
            Some(State::UserRespWaiting)
        );
        assert_eq!(s.skey_pass.as_deref(), Some("50FE1962C4965880"));
    }

    #[test]
    fn test_array_replies() {
        let mut s = session();
        s.get_info_array(vec![FileInfo::new("a", true, true), FileInfo::new("b", true, false)]);
        s.state = State::Waiting;
        s.expect(213, State::Initial, Check::Mdtm { index: 0 });
        s.expect(213, State::Initial, Check::Size { index: 0 });
        s.expect(213, State::Initial, Check::Size { index: 1 });

        reply(&mut s, "213 20240101120000");
        assert_eq!(s.array_ptr, 0);
        reply(&mut s, "213 42");
        assert_eq!(s.array_ptr, 1);
        reply(&mut s, "550 b: no such file");
        assert_eq!(s.array_ptr, 2);

        let info = s.info_array();
        assert_eq!(info[0].size, Some(42));
        assert!(info[0].time.is_some());
        assert_eq!(info[1].size, None);
        assert!(!info[1].get_size);
    }

    #[test]
    fn test_microsoft_banner_turns_sync_on() {
        let mut s = session();
        s.set_flag(crate::core_session::state::Flag::SyncMode, false);
        s.state = State::UserRespWaiting;
        s.expect(220, State::Initial, Check::Ready);
        assert_eq!(
            reply(&mut s, "220 Microsoft FTP Service"),
            Some(State::Initial)
        );
        assert!(s.pipeline.sync_mode());
    }
}
