use crate::config::{parse_proxy, Config, FtpSettings, ProxySpec};
use crate::constants::{FTP_PORT, LOOKUP_ERROR_TEXT};
use crate::core_error::{FtpError, SavedError};
use crate::core_ftpcommand::{CommandPipeline, TransferType};
use crate::core_network::socket::{apply_tuning, SocketTuning};
use crate::core_network::{Resolve, ResolverFactory};
use crate::core_ratelimit::RateLimiter;
use crate::core_reply::{ExpectationQueue, ReplyPatterns, ReplyReader};
use crate::core_session::keepalive::KeepAlive;
use crate::core_session::state::{AddrReceived, CopyMode, FileInfo, Flag, Flags, Mode, State};
use crate::helpers::{expand_tilde, join_path};
use chrono::{DateTime, Utc};
use log::warn;
use socket2::Socket;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One FTP conversation, driven by [`SessionRegistry::step`].
///
/// The public methods only record what the caller wants; the protocol work
/// happens when the registry steps the session.
///
/// [`SessionRegistry::step`]: crate::core_pool::SessionRegistry::step
pub struct Session {
    pub(crate) config: Arc<Config>,
    pub(crate) patterns: Arc<ReplyPatterns>,
    pub(crate) resolvers: Arc<dyn ResolverFactory>,
    pub(crate) settings: FtpSettings,

    // identity
    pub(crate) hostname: Option<String>,
    pub(crate) port: u16, // 0 = default
    pub(crate) user: Option<String>,
    pub(crate) pass: Option<String>,
    pub(crate) group: Option<String>,
    pub(crate) gpass: Option<String>,
    pub(crate) anon_user: String,
    pub(crate) anon_pass: String,
    pub(crate) proxy: Option<ProxySpec>,

    // operation
    pub(crate) state: State,
    pub(crate) mode: Mode,
    pub(crate) flags: Flags,
    pub(crate) ttype: TransferType,
    pub(crate) file: Option<String>,
    pub(crate) file1: Option<String>,
    pub(crate) pos: u64,
    pub(crate) real_pos: Option<u64>, // None while a REST reply is outstanding
    pub(crate) cwd: Option<String>,
    pub(crate) real_cwd: Option<String>,
    pub(crate) target_cwd: Option<String>,
    pub(crate) home: Option<String>,
    pub(crate) mkdir_p: bool,

    // sockets
    pub(crate) control: Option<Socket>,
    pub(crate) data: Option<Socket>,
    pub(crate) aborted_data: Option<Socket>,
    pub(crate) peer_addr: Option<SocketAddr>,
    pub(crate) lookup_done: bool,
    pub(crate) resolver: Option<Box<dyn Resolve>>,
    pub(crate) data_addr: Option<SocketAddrV4>,
    pub(crate) addr_received: AddrReceived,

    // control channel
    pub(crate) pipeline: CommandPipeline,
    pub(crate) reader: ReplyReader,
    pub(crate) queue: ExpectationQueue,
    pub(crate) line: String,
    pub(crate) result: Option<String>,
    pub(crate) last_error_resp: Option<String>,
    pub(crate) saved_error: Option<SavedError>,

    // timing and retries
    pub(crate) now: Instant,
    pub(crate) event_time: Instant,
    pub(crate) try_time: Option<Instant>,
    pub(crate) idle_start: Instant,
    pub(crate) keepalive: KeepAlive,
    pub(crate) retries: u32,
    pub(crate) ignore_pass: bool,
    pub(crate) skey_pass: Option<String>,

    // optional probes
    pub(crate) want_size: bool,
    pub(crate) size: Option<u64>,
    pub(crate) want_date: bool,
    pub(crate) date: Option<DateTime<Utc>>,
    pub(crate) array: Vec<FileInfo>,
    pub(crate) array_ptr: usize,

    pub(crate) copy_mode: CopyMode,
    pub(crate) copy_addr: Option<SocketAddrV4>,
    pub(crate) rate: RateLimiter,
    pub(crate) disconnect_in_progress: bool,
}

impl Session {
    pub fn new(
        config: Arc<Config>,
        patterns: Arc<ReplyPatterns>,
        resolvers: Arc<dyn ResolverFactory>,
        now: Instant,
    ) -> Self {
        let settings = config.settings_for(None);
        let mut session = Self {
            config,
            patterns,
            resolvers,
            anon_user: settings.anon_user.clone(),
            anon_pass: settings.anon_pass(),
            settings,
            hostname: None,
            port: 0,
            user: None,
            pass: None,
            group: None,
            gpass: None,
            proxy: None,
            state: State::NoHost,
            mode: Mode::Closed,
            flags: Flags::default(),
            ttype: TransferType::Ascii,
            file: None,
            file1: None,
            pos: 0,
            real_pos: Some(0),
            cwd: None,
            real_cwd: None,
            target_cwd: None,
            home: None,
            mkdir_p: false,
            control: None,
            data: None,
            aborted_data: None,
            peer_addr: None,
            lookup_done: false,
            resolver: None,
            data_addr: None,
            addr_received: AddrReceived::None,
            pipeline: CommandPipeline::new(true),
            reader: ReplyReader::new(),
            queue: ExpectationQueue::new(),
            line: String::new(),
            result: None,
            last_error_resp: None,
            saved_error: None,
            now,
            event_time: now,
            try_time: None,
            idle_start: now,
            keepalive: KeepAlive::default(),
            retries: 0,
            ignore_pass: false,
            skey_pass: None,
            want_size: false,
            size: None,
            want_date: false,
            date: None,
            array: Vec::new(),
            array_ptr: 0,
            copy_mode: CopyMode::None,
            copy_addr: None,
            rate: RateLimiter::new(0, 0, now),
            disconnect_in_progress: false,
        };
        session.reconfig();
        session
    }

    /// A fresh session to the same place with the same credentials and
    /// modes. The resolved address is shared unless every connect has to
    /// look the host up again.
    pub fn clone_session(&self, now: Instant) -> Session {
        let mut s = Session::new(
            Arc::clone(&self.config),
            Arc::clone(&self.patterns),
            Arc::clone(&self.resolvers),
            now,
        );
        s.hostname = self.hostname.clone();
        s.port = self.port;
        s.user = self.user.clone();
        s.pass = self.pass.clone();
        s.group = self.group.clone();
        s.gpass = self.gpass.clone();
        s.cwd = self.cwd.clone();
        s.home = self.home.clone();
        s.reconfig();
        if self.state != State::NoHost {
            s.state = State::Initial;
        }
        if !s.settings.relookup_always {
            s.peer_addr = self.peer_addr;
            s.lookup_done = self.lookup_done;
        }
        s.pipeline.set_sync_mode(self.pipeline.sync_mode());
        s.flags.passive_mode = self.flags.passive_mode;
        s.flags.norest_mode = self.flags.norest_mode;
        s
    }

    pub(crate) fn set_now(&mut self, now: Instant) {
        self.now = now;
    }

    /// Points the session at a new server. `port` 0 means the FTP default.
    pub fn connect(&mut self, host: &str, port: u16) {
        self.close();
        self.hostname = Some(host.to_string());
        self.port = port;
        self.cwd = Some(String::from("~"));
        self.home = None;
        self.flags = Flags::default();
        self.reconfig();
        self.state = State::Initial;
        self.lookup_done = false;
        self.try_time = None;
        if host.is_empty() {
            self.state = State::NoHost;
        }
    }

    /// Credentials for the next login; `None` logs in anonymously.
    pub fn set_login(&mut self, user: Option<&str>, pass: Option<&str>) {
        self.close();
        if self.control.is_some() {
            self.disconnect();
        }
        self.user = user.map(str::to_string);
        self.pass = pass.map(str::to_string);
        self.cwd = Some(String::from("~"));
        self.home = None;
        self.set_real_cwd(None);
        if self.hostname.is_some() {
            self.state = State::Initial;
        }
    }

    pub fn set_group(&mut self, group: Option<&str>, gpass: Option<&str>) {
        self.group = group.map(str::to_string);
        self.gpass = gpass.map(str::to_string);
    }

    /// Starts `mode` on `file`, transferring from byte `pos` on.
    pub fn open(&mut self, file: &str, mode: Mode, pos: u64) {
        self.close();
        self.file = Some(file.to_string());
        self.mode = mode;
        self.pos = pos;
        self.real_pos = Some(pos);
        self.flags.io_flag = false;
    }

    /// Changes directory, relative names are taken from the current one.
    pub fn chdir(&mut self, dir: &str) {
        self.expand_tilde_in_cwd();
        let base = self.cwd.clone().unwrap_or_else(|| String::from("~"));
        let target = join_path(&base, dir, self.flags.dosish_path);
        let target = match &self.home {
            Some(home) => expand_tilde(&target, home).unwrap_or(target),
            None => target,
        };
        self.open(&target, Mode::ChangeDir, 0);
    }

    /// MKD; with `parents` every missing parent is created first.
    pub fn mkdir(&mut self, path: &str, parents: bool) {
        self.open(path, Mode::MakeDir, 0);
        self.mkdir_p = parents;
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        self.open(from, Mode::Rename, 0);
        self.file1 = Some(to.to_string());
    }

    /// Sends `cmd` verbatim; the reply text is readable afterwards.
    pub fn quote(&mut self, cmd: &str) {
        self.open(cmd, Mode::QuoteCmd, 0);
    }

    /// Asks for sizes and/or modification times of several files at once.
    pub fn get_info_array(&mut self, entries: Vec<FileInfo>) {
        self.open("", Mode::ArrayInfo, 0);
        self.array = entries;
        self.array_ptr = 0;
    }

    pub fn info_array(&self) -> &[FileInfo] {
        &self.array
    }

    /// Probe the size of the file opened next.
    pub fn want_size(&mut self) {
        self.want_size = true;
        self.size = None;
    }

    pub fn want_date(&mut self) {
        self.want_date = true;
        self.date = None;
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.date
    }

    /// Only resolve the host; `done()` reports the lookup result.
    pub fn connect_verify(&mut self) {
        if self.lookup_done {
            return;
        }
        self.mode = Mode::ConnectVerify;
    }

    /// Ends the current operation. The control connection is kept when the
    /// protocol state allows it, so the next operation can reuse it.
    pub fn close(&mut self) {
        if self.mode != Mode::Closed {
            self.set_idle_start();
        }
        self.retries = 0;
        self.flags.norest_mode = false;
        self.resolver = None;
        self.expand_tilde_in_cwd();
        self.data_abort();
        self.data_close();
        if self.control.is_some() {
            match self.state {
                State::Accepting
                | State::Connecting
                | State::DatasocketConnecting
                | State::UserRespWaiting => self.disconnect(),
                State::CwdCwdWaiting
                | State::Waiting
                | State::DataOpen
                | State::NoFile
                | State::StoreFailed
                | State::Fatal
                | State::SystemError
                | State::CopyFailed => {
                    self.state = if self.control.is_none() {
                        State::Initial
                    } else {
                        State::Eof
                    };
                }
                State::NoHost
                | State::Initial
                | State::Eof
                | State::LoginFailed
                | State::LookupError => {}
            }
        } else if self.hostname.is_some() {
            self.state = State::Initial;
        } else {
            self.state = State::NoHost;
        }
        self.copy_mode = CopyMode::None;
        self.copy_addr = None;
        self.close_resp_queue();

        self.mode = Mode::Closed;
        self.file = None;
        self.file1 = None;
        self.pos = 0;
        self.want_size = false;
        self.want_date = false;
        self.mkdir_p = false;
    }

    /// Re-reads the settings for the current host.
    pub fn reconfig(&mut self) {
        let s = self.config.settings_for(self.hostname.as_deref());
        self.pipeline.set_sync_mode(s.sync_mode);
        self.flags.passive_mode = s.passive_mode;
        self.anon_user = s.anon_user.clone();
        self.anon_pass = s.anon_pass();
        self.rate.reconfigure(s.limit_rate, s.limit_max, self.now);
        let tuning = SocketTuning {
            buffer: s.socket_buffer,
            maxseg: s.socket_maxseg,
        };
        self.set_proxy(&s.proxy);
        self.settings = s;
        for sock in [&self.control, &self.data].into_iter().flatten() {
            apply_tuning(sock, tuning);
        }
    }

    fn set_proxy(&mut self, url: &str) {
        self.proxy = match parse_proxy(url) {
            Ok(p) => p,
            Err(e) => {
                warn!("ignoring proxy setting: {}", e);
                None
            }
        };
        self.lookup_done = false;
    }

    pub fn set_flag(&mut self, flag: Flag, on: bool) {
        match flag {
            Flag::SyncMode => self.pipeline.set_sync_mode(on),
            Flag::PassiveMode => self.flags.passive_mode = on,
            Flag::NoRestMode => self.flags.norest_mode = on,
        }
    }

    pub fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::SyncMode => self.pipeline.sync_mode(),
            Flag::PassiveMode => self.flags.passive_mode,
            Flag::NoRestMode => self.flags.norest_mode,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn home(&self) -> Option<&str> {
        self.home.as_deref()
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    /// Directory the server confirmed.
    pub fn real_cwd(&self) -> Option<&str> {
        self.real_cwd.as_deref()
    }

    /// Reply text collected for QUOTE and single-value queries.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// Server reply behind the last fatal, no-file or lookup error.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error_resp.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.control.is_some()
    }

    /// A data connection is open, or an aborted one awaits its ABOR reply.
    pub fn has_data_connection(&self) -> bool {
        self.data.is_some() || self.aborted_data.is_some()
    }

    pub fn state_to_error(&self) -> Option<FtpError> {
        self.state
            .to_error(self.saved_error.as_ref(), self.last_error_resp.as_deref())
    }

    pub fn current_status(&self) -> String {
        let text = match self.state {
            State::Eof | State::NoFile => {
                if self.control.is_none() {
                    "Not connected"
                } else if !self.pipeline.is_empty() {
                    "Sending commands..."
                } else if !self.queue.is_empty() {
                    "Waiting for response..."
                } else {
                    "Connection idle"
                }
            }
            State::Initial => {
                if self.hostname.is_some() && self.resolver.is_some() {
                    "Resolving host address..."
                } else if self.hostname.is_some() && self.delaying_reconnect() {
                    "Delaying before reconnect"
                } else {
                    "Not connected"
                }
            }
            State::NoHost => "Not connected",
            State::Connecting => "Connecting...",
            State::UserRespWaiting => "Logging in...",
            State::DatasocketConnecting => {
                if self.addr_received == AddrReceived::None {
                    "Waiting for response..."
                } else {
                    "Making data connection..."
                }
            }
            State::CwdCwdWaiting => "Changing remote directory...",
            State::Waiting => {
                if self.mode == Mode::Store {
                    "Waiting for transfer to complete"
                } else {
                    "Waiting for response..."
                }
            }
            State::Accepting => "Waiting for data connection...",
            State::DataOpen => {
                if self.data.is_some() {
                    "Data connection open"
                } else {
                    "Waiting for transfer to complete"
                }
            }
            State::Fatal => "Fatal protocol error occurred",
            State::StoreFailed => "Store failed - reput is needed",
            State::LoginFailed => "Login failed",
            State::SystemError => {
                return self
                    .saved_error
                    .as_ref()
                    .map(|e| e.to_io().to_string())
                    .unwrap_or_else(|| String::from("System error"));
            }
            State::LookupError => LOOKUP_ERROR_TEXT,
            State::CopyFailed => "Copy failed",
        };
        text.to_string()
    }

    pub(crate) fn delaying_reconnect(&self) -> bool {
        self.try_time.map_or(false, |t| {
            self.now.saturating_duration_since(t) < secs(self.settings.redial_interval)
        })
    }

    /// Same server, same credentials: a control connection can be shared.
    pub fn same_connection(&self, o: &Session) -> bool {
        matches!((&self.hostname, &o.hostname), (Some(a), Some(b)) if a == b)
            && self.port == o.port
            && self.user == o.user
            && self.pass == o.pass
            && self.group == o.group
            && self.gpass == o.gpass
            && (self.user.is_some() || self.anon_user == o.anon_user)
            && (self.pass.is_some() || self.anon_pass == o.anon_pass)
    }

    /// Same connection and the same current directory. Known home
    /// directories are shared between the two on the way.
    pub fn same_location_as(&mut self, o: &mut Session) -> bool {
        if self.hostname.is_none() || o.hostname.is_none() || !self.same_connection(o) {
            return false;
        }
        share_home(self, o);
        if self.home.is_some() && self.home != o.home {
            return false;
        }
        if self.cwd.is_none() || o.cwd.is_none() {
            return false;
        }
        self.expand_tilde_in_cwd();
        o.expand_tilde_in_cwd();
        self.cwd == o.cwd
    }

    /// Takes part in a server-to-server copy. The passive side sends PASV
    /// and publishes the address, the other side sends PORT with it.
    pub fn set_copy_mode(&mut self, passive: bool) {
        self.copy_mode = if passive {
            CopyMode::Passive
        } else {
            CopyMode::Active
        };
        self.copy_addr = None;
    }

    pub fn copy_address(&self) -> Option<SocketAddrV4> {
        self.copy_addr
    }

    pub fn set_copy_address(&mut self, addr: SocketAddrV4) {
        self.copy_addr = Some(addr);
    }

    pub(crate) fn set_real_cwd(&mut self, cwd: Option<&str>) {
        self.real_cwd = cwd.map(str::to_string);
    }

    pub(crate) fn expand_tilde_in_cwd(&mut self) {
        let Some(home) = self.home.clone() else {
            return;
        };
        for dir in [&mut self.cwd, &mut self.real_cwd] {
            if let Some(expanded) = dir.as_deref().and_then(|d| expand_tilde(d, &home)) {
                *dir = Some(expanded);
            }
        }
    }

    pub(crate) fn set_idle_start(&mut self) {
        self.idle_start = self.now;
    }

    /// Host and port the control connection really goes to.
    pub(crate) fn connect_target(&self) -> (String, u16) {
        match &self.proxy {
            Some(p) => (p.host.clone(), p.port),
            None => (
                self.hostname.clone().unwrap_or_default(),
                if self.port == 0 { FTP_PORT } else { self.port },
            ),
        }
    }

    pub(crate) fn socket_tuning(&self) -> SocketTuning {
        SocketTuning {
            buffer: self.settings.socket_buffer,
            maxseg: self.settings.socket_maxseg,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        secs(self.settings.timeout)
    }
}

/// Copies a home directory known to only one of the two sessions.
pub(crate) fn share_home(a: &mut Session, b: &mut Session) {
    if a.home.is_some() && b.home.is_none() {
        b.home = a.home.clone();
    } else if a.home.is_none() && b.home.is_some() {
        a.home = b.home.clone();
    }
}

pub(crate) fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("pos", &self.pos)
            .field("cwd", &self.cwd)
            .field("real_cwd", &self.real_cwd)
            .finish()
    }
}
