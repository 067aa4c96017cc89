// The protocol state machine. One call to `step` advances a session as far
// as it can without blocking and records what it waits for.
use crate::constants::{MAX_RETRIES_TEXT, RESP_LOGGED_IN, RESP_PASS_REQ, RESP_READY};
use crate::core_ftpcommand::{FtpCommand, TransferType};
use crate::core_log::debug_print;
use crate::core_network::socket::{
    apply_tuning, is_fd_exhausted, is_transient, is_would_block, listen_on, new_stream_socket,
    pending_error, poll_connected, start_connect,
};
use crate::core_network::verify::data_peer_ok;
use crate::core_pool::registry::{get_better_connection, Peers};
use crate::core_reply::Check;
use crate::core_session::keepalive::KeepAliveAction;
use crate::core_session::session::{secs, Session};
use crate::core_session::state::{AddrReceived, CopyMode, Mode, State};
use crate::helpers::{cwd_argument, parent_dirs};
use crate::readiness::{Block, Interest, Progress};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// How often a pending lookup is looked at again.
const RESOLVE_POLL: Duration = Duration::from_millis(50);
/// Back-off when out of descriptors or out of rate budget.
const RETRY_SOON: Duration = Duration::from_secs(1);

/// What a state handler wants done next.
enum Flow {
    /// Handle the (new) current state right away.
    Next,
    Return,
    /// Check the timeout, then register what to wait for.
    Usual,
    /// Register what to wait for.
    NoTimeout,
    SystemError(io::Error),
}

impl Session {
    /// Advances the session and fills `block` with what it waits for.
    pub fn step(&mut self, peers: &mut Peers<'_>, block: &mut Block) -> Progress {
        let mut m = Progress::Stall;

        if self.mode == Mode::Closed && self.control.is_some() && self.settings.idle > 0 {
            let idle = secs(self.settings.idle);
            let elapsed = self.now.saturating_duration_since(self.idle_start);
            if elapsed >= idle {
                debug_print("---- ", "Closing idle connection", 2);
                self.disconnect();
                return m;
            }
            block.timeout(idle - elapsed);
        }

        loop {
            let flow = match self.state {
                State::Initial => self.do_initial(peers, block, &mut m),
                State::Connecting => self.do_connecting(&mut m),
                State::UserRespWaiting => self.do_user_resp_waiting(&mut m),
                State::Eof => self.do_eof(&mut m),
                State::CwdCwdWaiting => self.do_cwd_cwd_waiting(&mut m),
                State::Accepting => self.do_accepting(&mut m),
                State::DatasocketConnecting => self.do_datasocket_connecting(&mut m),
                State::DataOpen => self.do_data_open(block, &mut m),
                State::Waiting => self.do_waiting(&mut m),
                State::NoHost
                | State::NoFile
                | State::StoreFailed
                | State::LoginFailed
                | State::SystemError
                | State::LookupError
                | State::Fatal
                | State::CopyFailed => {
                    // the caller has to see the error before anything else
                    if self.mode != Mode::Closed {
                        block.no_wait();
                    }
                    Flow::Return
                }
            };
            match flow {
                Flow::Next => continue,
                Flow::Return => return m,
                Flow::Usual => return self.usual_return(m, block),
                Flow::NoTimeout => return self.notimeout_return(m, block),
                Flow::SystemError(e) => return self.system_error_return(e, m, block),
            }
        }
    }

    fn usual_return(&mut self, m: Progress, block: &mut Block) -> Progress {
        if m == Progress::Moved {
            return m;
        }
        if self.check_timeout(block) {
            return Progress::Moved;
        }
        self.notimeout_return(m, block)
    }

    fn notimeout_return(&mut self, m: Progress, block: &mut Block) -> Progress {
        if m == Progress::Moved {
            return m;
        }
        if let Some(data) = &self.data {
            let fd = data.as_raw_fd();
            match self.state {
                State::Accepting => block.poll_vec(fd, Interest::Readable),
                State::DatasocketConnecting => {
                    if self.addr_received == AddrReceived::Connecting {
                        block.poll_vec(fd, Interest::Writable);
                    }
                }
                State::DataOpen => {
                    let allowed = self.rate.bytes_allowed(self.now);
                    let rest_pending = self.queue.len() > 1 && self.real_pos.is_none();
                    if !rest_pending && allowed > 0 {
                        let interest = if self.mode == Mode::Store {
                            Interest::Writable
                        } else {
                            Interest::Readable
                        };
                        block.poll_vec(fd, interest);
                    }
                    if allowed == 0 {
                        block.timeout(RETRY_SOON);
                    }
                }
                // an old data socket about to be replaced
                _ => {}
            }
        }
        if let Some(control) = &self.control {
            let fd = control.as_raw_fd();
            if self.state == State::Connecting {
                block.poll_vec(fd, Interest::Writable);
            } else {
                block.poll_vec(fd, Interest::Readable);
                if !self.pipeline.is_empty() && !self.pipeline.sync_wait() {
                    block.poll_vec(fd, Interest::Writable);
                }
            }
        }
        m
    }

    fn system_error_return(&mut self, e: io::Error, m: Progress, block: &mut Block) -> Progress {
        if is_fd_exhausted(&e) {
            debug_print("**** ", &e.to_string(), 0);
            block.timeout(RETRY_SOON);
            return m;
        }
        self.enter_system_error(e);
        Progress::Moved
    }

    fn pre_waiting(&mut self, m: &mut Progress) -> Flow {
        self.state = State::Waiting;
        *m = Progress::Moved;
        Flow::Next
    }

    pub(crate) fn control_peer(&self) -> Option<SocketAddr> {
        self.control
            .as_ref()
            .and_then(|s| s.peer_addr().ok())
            .and_then(|a| a.as_socket())
    }

    fn do_initial(&mut self, peers: &mut Peers<'_>, block: &mut Block, m: &mut Progress) -> Flow {
        if self.mode == Mode::Closed || self.hostname.is_none() {
            return Flow::Return;
        }

        get_better_connection(self, peers, 0);
        get_better_connection(self, peers, 1);
        if self.state != State::Initial {
            *m = Progress::Moved;
            return Flow::Return;
        }

        let (host, port) = self.connect_target();
        if !self.lookup_done {
            if self.resolver.is_none() {
                debug_print("---- ", "Resolving host address...", 4);
                self.resolver = Some(self.resolvers.start(&host, port));
                *m = Progress::Moved;
            }
            let Some(resolver) = self.resolver.as_mut() else {
                return Flow::Return;
            };
            if !resolver.done() {
                block.timeout(RESOLVE_POLL);
                return Flow::Return;
            }
            if let Some(err) = resolver.error() {
                self.last_error_resp = Some(err.to_string());
                self.resolver = None;
                self.switch_to_state(State::LookupError);
                *m = Progress::Moved;
                return Flow::Return;
            }
            self.peer_addr = resolver.result();
            self.resolver = None;
            self.lookup_done = true;
            *m = Progress::Moved;
        }

        if self.mode == Mode::ConnectVerify {
            return Flow::Return;
        }

        let redial = secs(self.settings.redial_interval);
        if let Some(tried) = self.try_time {
            let elapsed = self.now.saturating_duration_since(tried);
            if elapsed < redial {
                block.timeout(redial - elapsed);
                return Flow::Return;
            }
        }
        self.try_time = Some(self.now);

        let max_retries = self.settings.max_retries;
        if max_retries > 0 && self.retries >= max_retries {
            self.last_error_resp = Some(MAX_RETRIES_TEXT.to_string());
            self.switch_to_state(State::Fatal);
            *m = Progress::Moved;
            return Flow::Return;
        }
        self.retries += 1;

        let Some(addr) = self.peer_addr else {
            self.lookup_done = false;
            *m = Progress::Moved;
            return Flow::Return;
        };
        let sock = match new_stream_socket(&addr, self.socket_tuning()) {
            Ok(s) => s,
            Err(e) => return Flow::SystemError(e),
        };
        debug_print(
            "---- ",
            &format!(
                "Connecting to {}{} ({}) port {}",
                if self.proxy.is_some() { "proxy " } else { "" },
                host,
                addr.ip(),
                addr.port()
            ),
            0,
        );
        let res = start_connect(&sock, &addr);
        if self.settings.relookup_always && self.proxy.is_none() {
            self.lookup_done = false;
        }
        if let Err(e) = res {
            debug_print("**** ", &format!("connect: {}", e), 0);
            drop(sock);
            self.disconnect();
            if is_transient(&e) {
                *m = Progress::Moved;
                return Flow::Return;
            }
            return Flow::SystemError(e);
        }
        self.control = Some(sock);
        self.state = State::Connecting;
        *m = Progress::Moved;
        self.event_time = self.now;
        Flow::Next
    }

    fn do_connecting(&mut self, m: &mut Progress) -> Flow {
        let connected = match self.control.as_ref().map(poll_connected) {
            Some(r) => r,
            None => Err(io::Error::from(ErrorKind::NotConnected)),
        };
        match connected {
            Ok(true) => {}
            Ok(false) => return Flow::Usual,
            Err(e) => {
                debug_print("**** ", &e.to_string(), 0);
                self.disconnect();
                *m = Progress::Moved;
                return Flow::Return;
            }
        }

        // nothing goes out before the greeting when in sync mode
        self.pipeline.hold_until_reply();
        self.expect(RESP_READY, State::Initial, Check::Ready);

        let mut user = self.user.clone().unwrap_or_else(|| self.anon_user.clone());
        if let Some(proxy) = self.proxy.clone() {
            let hostname = self.hostname.clone().unwrap_or_default();
            user = if self.port != 0 {
                format!("{}@{}:{}", user, hostname, self.port)
            } else {
                format!("{}@{}", user, hostname)
            };
            if let (Some(pu), Some(pp)) = (&proxy.user, &proxy.pass) {
                self.expect(RESP_PASS_REQ, State::Initial, Check::UserProxy);
                self.expect(RESP_LOGGED_IN, State::Initial, Check::PassProxy);
                self.pipeline.send(format!("USER {}\nPASS {}", pu, pp));
            }
        }

        self.skey_pass = None;
        self.ignore_pass = false;
        self.send_cmd(FtpCommand::User(user));
        if self.settings.skey_allow {
            self.queue.push_logged(RESP_PASS_REQ, State::Initial, Check::User);
        } else {
            self.expect(RESP_PASS_REQ, State::Initial, Check::User);
        }

        self.state = State::UserRespWaiting;
        *m = Progress::Moved;
        Flow::Next
    }

    fn do_user_resp_waiting(&mut self, m: &mut Progress) -> Flow {
        let otp_possible =
            self.user.is_some() && self.pass.is_some() && self.settings.skey_allow;
        // PASS has to wait for the USER reply: it may carry the OTP challenge
        if (self.pipeline.sync_mode() || otp_possible) && !self.queue.is_empty() {
            self.flush_send_queue(false);
            self.receive_resp();
            if self.state != State::UserRespWaiting {
                *m = Progress::Moved;
                return Flow::Return;
            }
            if !self.queue.is_empty() {
                return Flow::Usual;
            }
        }

        if !self.ignore_pass {
            let pass = match (&self.skey_pass, &self.pass) {
                (Some(otp), _) if self.settings.skey_allow => otp.clone(),
                (_, Some(pass)) => pass.clone(),
                (_, None) => self.anon_pass.clone(),
            };
            self.send_cmd(FtpCommand::Pass(pass));
            self.expect(RESP_LOGGED_IN, State::Initial, Check::Pass);
        }
        if self.home.is_none() {
            self.send_cmd(FtpCommand::Pwd);
            self.expect(257, State::Initial, Check::Pwd);
        }
        self.set_real_cwd(Some("~"));
        self.ttype = TransferType::Ascii;

        self.state = State::Eof;
        *m = Progress::Moved;
        Flow::Next
    }

    fn do_eof(&mut self, m: &mut Progress) -> Flow {
        self.flush_send_queue(false);
        self.receive_resp();
        if self.state != State::Eof {
            *m = Progress::Moved;
            return Flow::Return;
        }
        if matches!(self.mode, Mode::Closed | Mode::ConnectVerify) {
            return Flow::NoTimeout;
        }
        if self.home.is_none() && !self.queue.is_empty() {
            return Flow::Usual;
        }

        self.expand_tilde_in_cwd();
        if self.mode != Mode::ChangeDir && self.cwd != self.real_cwd {
            if let Some(cwd) = self.cwd.clone() {
                self.send_cmd(FtpCommand::Cwd(cwd.clone()));
                self.expect(250, State::Initial, Check::CwdCurrent);
                self.queue.set_path(&cwd);
            }
        }
        self.state = State::CwdCwdWaiting;
        *m = Progress::Moved;
        Flow::Next
    }

    fn do_cwd_cwd_waiting(&mut self, m: &mut Progress) -> Flow {
        self.flush_send_queue(false);
        self.receive_resp();
        if self.state != State::CwdCwdWaiting {
            *m = Progress::Moved;
            return Flow::Return;
        }
        if self.mode != Mode::ChangeDir && self.cwd != self.real_cwd {
            return Flow::Usual;
        }
        // the active side of a copy needs the peer's address first
        if self.copy_mode == CopyMode::Active && self.copy_addr.is_none() {
            return Flow::Usual;
        }
        if self.mode == Mode::Store && self.flags.norest_mode && self.pos > 0 {
            self.pos = 0;
        }

        let passive = self.flags.passive_mode || self.copy_mode == CopyMode::Passive;
        let file = self.file.clone().unwrap_or_default();
        let file_arg = (!file.is_empty()).then(|| file.clone());

        let old_type = self.ttype;
        self.real_pos = if self.flags.norest_mode || self.pos == 0 {
            Some(0)
        } else {
            None
        };
        self.flags.io_flag = false;

        let command = match self.mode {
            Mode::Retrieve => {
                self.ttype = TransferType::Image;
                Some(FtpCommand::Retr(file.clone()))
            }
            Mode::Store => {
                self.ttype = TransferType::Image;
                Some(FtpCommand::Stor(file.clone()))
            }
            Mode::LongList => {
                self.ttype = TransferType::Ascii;
                Some(FtpCommand::List(file_arg))
            }
            Mode::List => {
                self.ttype = TransferType::Ascii;
                self.real_pos = Some(0);
                Some(FtpCommand::Nlst(file_arg))
            }
            Mode::ChangeDir => {
                if self.real_cwd.as_deref() == Some(file.as_str()) {
                    self.cwd = self.real_cwd.clone();
                } else {
                    let arg = cwd_argument(&file, self.real_cwd.as_deref());
                    self.target_cwd = Some(file.clone());
                    self.send_cmd(FtpCommand::Cwd(arg));
                    self.expect(250, State::Initial, Check::Cwd);
                    self.queue.set_path(&file);
                }
                return self.pre_waiting(m);
            }
            Mode::MakeDir => Some(FtpCommand::Mkd(file.clone())),
            Mode::RemoveDir => Some(FtpCommand::Rmd(file.clone())),
            Mode::Remove => Some(FtpCommand::Dele(file.clone())),
            Mode::QuoteCmd => Some(FtpCommand::Raw(file.clone())),
            Mode::Rename => Some(FtpCommand::Rnfr(file.clone())),
            Mode::ArrayInfo => {
                self.ttype = TransferType::Image;
                None
            }
            Mode::Closed | Mode::ConnectVerify => {
                // the operation was replaced before its command went out
                self.state = State::Eof;
                *m = Progress::Moved;
                return Flow::Return;
            }
        };

        if old_type != self.ttype {
            self.send_cmd(FtpCommand::Type(self.ttype));
            self.expect(200, State::Initial, Check::None);
        }
        if self.want_size {
            self.send_cmd(FtpCommand::Size(file.clone()));
            self.expect(213, State::Initial, Check::SizeOpt);
        }
        if self.want_date {
            self.send_cmd(FtpCommand::Mdtm(file.clone()));
            self.expect(213, State::Initial, Check::MdtmOpt);
        }

        if self.mode == Mode::ArrayInfo {
            for index in self.array_ptr..self.array.len() {
                let entry = self.array[index].clone();
                if entry.get_time {
                    self.send_cmd(FtpCommand::Mdtm(entry.file.clone()));
                    self.expect(213, State::Initial, Check::Mdtm { index });
                }
                if entry.get_size {
                    self.send_cmd(FtpCommand::Size(entry.file));
                    self.expect(213, State::Initial, Check::Size { index });
                }
            }
            return self.pre_waiting(m);
        }

        let Some(command) = command else {
            return self.pre_waiting(m);
        };

        if !self.mode.uses_data_socket() {
            if self.mode == Mode::MakeDir && self.mkdir_p {
                for parent in parent_dirs(&file) {
                    self.send_cmd(FtpCommand::Mkd(parent));
                    self.expect(0, State::Initial, Check::Ignore);
                }
            }
            self.send_cmd(command);
            match self.mode {
                Mode::RemoveDir | Mode::Remove => {
                    self.expect(250, State::Initial, Check::FileAccess)
                }
                Mode::MakeDir => self.expect(257, State::Initial, Check::FileAccess),
                Mode::Rename => {
                    let to = self.file1.clone().unwrap_or_default();
                    self.expect(350, State::Initial, Check::Rnfr { to });
                }
                _ => self.queue.push_logged(0, State::Initial, Check::Ignore),
            }
            self.result = None;
            return self.pre_waiting(m);
        }

        if passive {
            if self.copy_mode == CopyMode::None {
                let any: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
                match new_stream_socket(&any, self.socket_tuning()) {
                    Ok(s) => self.data = Some(s),
                    Err(e) => return Flow::SystemError(e),
                }
            }
            self.send_cmd(FtpCommand::Pasv);
            self.expect(227, State::Initial, Check::Pasv);
            self.addr_received = AddrReceived::None;
        } else {
            let port_addr = match self.copy_addr.filter(|_| self.copy_mode != CopyMode::None) {
                Some(addr) => addr,
                None => match self.open_listener() {
                    Ok(addr) => addr,
                    Err(e) => return Flow::SystemError(e),
                },
            };
            self.send_cmd(FtpCommand::Port(port_addr));
            self.expect(200, State::Initial, Check::None);
        }

        if self.real_pos.is_none() {
            self.send_cmd(FtpCommand::Rest(self.pos));
            self.expect(350, State::Initial, Check::Rest);
        }
        self.send_cmd(command);
        let fail = if self.mode == Mode::Store {
            State::StoreFailed
        } else {
            State::Initial
        };
        self.expect(226, fail, Check::Transfer);
        *m = Progress::Moved;

        if self.copy_mode == CopyMode::Active {
            return self.pre_waiting(m);
        }
        self.state = if passive {
            State::DatasocketConnecting
        } else {
            State::Accepting
        };
        Flow::Next
    }

    /// Listens next to the control connection's local address for PORT.
    fn open_listener(&mut self) -> io::Result<SocketAddrV4> {
        let local = self
            .control
            .as_ref()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?
            .local_addr()?
            .as_socket();
        let Some(local @ SocketAddr::V4(_)) = local else {
            return Err(io::Error::new(
                ErrorKind::Unsupported,
                "PORT needs an IPv4 control connection",
            ));
        };
        let (sock, bound) = listen_on(&local, self.socket_tuning())?;
        self.data = Some(sock);
        match bound {
            SocketAddr::V4(a) => Ok(a),
            SocketAddr::V6(_) => Err(io::Error::from(ErrorKind::Unsupported)),
        }
    }

    fn do_accepting(&mut self, m: &mut Progress) -> Flow {
        self.flush_send_queue(false);
        self.receive_resp();
        if self.state != State::Accepting {
            *m = Progress::Moved;
            return Flow::Return;
        }

        let accepted = match self.data.as_ref() {
            Some(listener) => listener.accept(),
            None => Err(io::Error::from(ErrorKind::NotConnected)),
        };
        let (sock, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) if is_would_block(&e) => return Flow::Usual,
            Err(e) if is_transient(&e) || e.kind() == ErrorKind::NotConnected => {
                debug_print("**** ", &format!("accept: {}", e), 0);
                self.disconnect();
                *m = Progress::Moved;
                return Flow::Return;
            }
            Err(e) => return Flow::SystemError(e),
        };
        if let Err(e) = sock.set_nonblocking(true).and_then(|_| sock.set_cloexec(true)) {
            return Flow::SystemError(e);
        }
        apply_tuning(&sock, self.socket_tuning());
        self.data = Some(sock);

        self.state = State::DataOpen;
        *m = Progress::Moved;

        let peer_ok = match (peer.as_socket(), self.control_peer()) {
            (Some(data), Some(control)) => data_peer_ok(
                &data,
                &control,
                self.settings.verify_address,
                self.settings.verify_port,
            ),
            _ => true,
        };
        if !peer_ok {
            self.disconnect();
            return Flow::Return;
        }
        self.rate.reset(self.now);
        Flow::Next
    }

    fn do_datasocket_connecting(&mut self, m: &mut Progress) -> Flow {
        self.flush_send_queue(false);
        self.receive_resp();
        if self.state != State::DatasocketConnecting {
            *m = Progress::Moved;
            return Flow::Return;
        }

        match self.addr_received {
            AddrReceived::None => return Flow::Usual,
            AddrReceived::Received => {
                let Some(addr) = self.data_addr else {
                    self.disconnect();
                    *m = Progress::Moved;
                    return Flow::Return;
                };
                let data = SocketAddr::V4(addr);
                if let Some(control) = self.control_peer() {
                    if !data_peer_ok(&data, &control, self.settings.verify_address, false) {
                        self.disconnect();
                        *m = Progress::Moved;
                        return Flow::Return;
                    }
                }
                self.addr_received = AddrReceived::Connecting;

                if self.copy_mode != CopyMode::None {
                    self.copy_addr = Some(addr);
                    return self.pre_waiting(m);
                }

                debug_print(
                    "---- ",
                    &format!("Connecting data socket to ({}) port {}", addr.ip(), addr.port()),
                    3,
                );
                let res = match self.data.as_ref() {
                    Some(sock) => start_connect(sock, &data),
                    None => Err(io::Error::from(ErrorKind::NotConnected)),
                };
                if let Err(e) = res {
                    debug_print("**** ", &format!("connect: {}", e), 0);
                    self.disconnect();
                    if is_transient(&e) || e.kind() == ErrorKind::NotConnected {
                        *m = Progress::Moved;
                        return Flow::Return;
                    }
                    return Flow::SystemError(e);
                }
                *m = Progress::Moved;
            }
            AddrReceived::Connecting => {}
        }

        let connected = match self.data.as_ref().map(poll_connected) {
            Some(r) => r,
            None => Err(io::Error::from(ErrorKind::NotConnected)),
        };
        match connected {
            Ok(true) => {}
            Ok(false) => return Flow::Usual,
            Err(e) => {
                debug_print("**** ", &format!("data connection: {}", e), 0);
                self.disconnect();
                *m = Progress::Moved;
                return Flow::Return;
            }
        }

        self.state = State::DataOpen;
        *m = Progress::Moved;
        self.rate.reset(self.now);
        Flow::Next
    }

    fn do_data_open(&mut self, block: &mut Block, m: &mut Progress) -> Flow {
        if self.queue.is_empty() {
            let (action, wait) = self.keepalive.tick(
                self.now,
                self.pos,
                secs(self.settings.nop_interval),
                self.timeout(),
            );
            match action {
                KeepAliveAction::Reconnect => {
                    debug_print("**** ", "Timeout - reconnecting", 0);
                    self.disconnect();
                    *m = Progress::Moved;
                    return Flow::Return;
                }
                KeepAliveAction::SendNoop => {
                    self.send_cmd(FtpCommand::Noop);
                    self.expect(0, State::Initial, Check::Ignore);
                }
                KeepAliveAction::Nothing => {}
            }
            block.timeout(wait);
        }

        let old_state = self.state;
        self.flush_send_queue(false);
        self.receive_resp();
        if self.state != old_state {
            *m = Progress::Moved;
            return Flow::Return;
        }

        if let Some(e) = self.data.as_ref().and_then(pending_error) {
            debug_print("**** ", &format!("data connection: {}", e), 0);
            self.data_close();
            self.disconnect();
            *m = Progress::Moved;
            return Flow::Return;
        }

        self.check_timeout(block);
        if self.state != old_state {
            *m = Progress::Moved;
            return Flow::Return;
        }

        // all data and the final reply are in, the caller only has to look
        if self.data.is_none() && self.queue.is_empty() {
            block.no_wait();
            return Flow::Return;
        }
        Flow::Usual
    }

    fn do_waiting(&mut self, m: &mut Progress) -> Flow {
        let old_state = self.state;
        self.flush_send_queue(false);
        let was_empty = self.queue.is_empty();
        self.receive_resp();
        if self.state != old_state {
            *m = Progress::Moved;
            return Flow::Return;
        }
        if !was_empty && self.queue.is_empty() {
            *m = Progress::Moved;
        }
        // a store may wait for its final reply as long as the server likes
        if self.mode == Mode::Store || self.copy_mode != CopyMode::None {
            return Flow::NoTimeout;
        }
        Flow::Usual
    }
}
