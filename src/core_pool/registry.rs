use crate::config::Config;
use crate::core_error::{ConfigError, FtpError};
use crate::core_log::debug_print;
use crate::core_network::ResolverFactory;
use crate::core_reply::ReplyPatterns;
use crate::core_session::session::share_home;
use crate::core_session::{Mode, Session, State};
use crate::readiness::{Block, Progress};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of the current time for every step.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Index of a session inside a [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(usize);

/// The other sessions of the registry while one of them is being stepped.
pub struct Peers<'a> {
    slots: &'a mut [Option<Session>],
    now: Instant,
}

impl<'a> Peers<'a> {
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> + '_ {
        let now = self.now;
        self.slots.iter_mut().flatten().map(move |s| {
            s.set_now(now);
            s
        })
    }
}

/// Owns all sessions; control connections move between idle sessions of
/// the same login so that a new operation skips the connect and login.
pub struct SessionRegistry {
    config: Arc<Config>,
    patterns: Arc<ReplyPatterns>,
    resolvers: Arc<dyn ResolverFactory>,
    clock: Box<dyn Clock>,
    slots: Vec<Option<Session>>,
}

impl SessionRegistry {
    pub fn new(config: Config, resolvers: Arc<dyn ResolverFactory>) -> Result<Self, ConfigError> {
        config.validate()?;
        let patterns = Arc::new(config.reply_patterns()?);
        Ok(Self {
            config: Arc::new(config),
            patterns,
            resolvers,
            clock: Box::new(SystemClock),
            slots: Vec::new(),
        })
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// A new, unconnected session.
    pub fn create(&mut self) -> SessionHandle {
        let session = Session::new(
            Arc::clone(&self.config),
            Arc::clone(&self.patterns),
            Arc::clone(&self.resolvers),
            self.clock.now(),
        );
        self.insert(session)
    }

    pub fn insert(&mut self, session: Session) -> SessionHandle {
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = Some(session);
            return SessionHandle(i);
        }
        self.slots.push(Some(session));
        SessionHandle(self.slots.len() - 1)
    }

    /// Closes the session and its connection.
    pub fn remove(&mut self, h: SessionHandle) -> Option<Session> {
        let now = self.clock.now();
        let mut session = self.slots.get_mut(h.0)?.take()?;
        session.set_now(now);
        session.close();
        session.disconnect();
        Some(session)
    }

    pub fn session(&self, h: SessionHandle) -> Option<&Session> {
        self.slots.get(h.0)?.as_ref()
    }

    pub fn session_mut(&mut self, h: SessionHandle) -> Option<&mut Session> {
        let now = self.clock.now();
        let session = self.slots.get_mut(h.0)?.as_mut()?;
        session.set_now(now);
        Some(session)
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| SessionHandle(i))
            .collect()
    }

    pub fn clone_session(&mut self, h: SessionHandle) -> Option<SessionHandle> {
        let clone = self.session(h)?.clone_session(self.clock.now());
        Some(self.insert(clone))
    }

    /// Runs the state machine of `h` once. `block` receives what the
    /// session waits for.
    pub fn step(&mut self, h: SessionHandle, block: &mut Block) -> Progress {
        let now = self.clock.now();
        let Some(mut session) = self.slots.get_mut(h.0).and_then(Option::take) else {
            return Progress::Stall;
        };
        session.set_now(now);
        let progress = {
            let mut peers = Peers {
                slots: &mut self.slots,
                now,
            };
            session.step(&mut peers, block)
        };
        self.slots[h.0] = Some(session);
        progress
    }

    /// Steps and then reads, the way a caller polling for data expects.
    pub fn read(&mut self, h: SessionHandle, buf: &mut [u8]) -> Result<usize, FtpError> {
        self.step(h, &mut Block::new());
        self.session_mut(h).ok_or(FtpError::NoHost)?.read(buf)
    }

    pub fn write(&mut self, h: SessionHandle, buf: &[u8]) -> Result<usize, FtpError> {
        self.step(h, &mut Block::new());
        self.session_mut(h).ok_or(FtpError::NoHost)?.write(buf)
    }

    pub fn done(&mut self, h: SessionHandle) -> Result<(), FtpError> {
        self.session_mut(h).ok_or(FtpError::NoHost)?.done()
    }

    pub fn store_status(&mut self, h: SessionHandle) -> Result<(), FtpError> {
        self.session_mut(h).ok_or(FtpError::NoHost)?.store_status()
    }

    pub fn data_ready(&mut self, h: SessionHandle) -> bool {
        self.session_mut(h).map_or(true, Session::data_ready)
    }

    /// Disconnects idle sessions, of `host` only unless `all` is set.
    pub fn cleanup(&mut self, host: Option<&str>, all: bool) {
        if !all && host.is_none() {
            return;
        }
        let now = self.clock.now();
        for s in self.slots.iter_mut().flatten() {
            if s.control.is_none() || s.mode != Mode::Closed {
                continue;
            }
            if all || s.hostname.as_deref() == host {
                s.set_now(now);
                s.disconnect();
            }
        }
    }

    /// Hands the data address the passive side of a copy learned to the
    /// active side. False while it is not known yet.
    pub fn forward_copy_address(&mut self, from: SessionHandle, to: SessionHandle) -> bool {
        let Some(addr) = self.session(from).and_then(Session::copy_address) else {
            return false;
        };
        match self.session_mut(to) {
            Some(s) => {
                s.set_copy_address(addr);
                true
            }
            None => false,
        }
    }
}

/// Takes over the control connection of an idle session with the same
/// login.
///
/// Level 0 only accepts a donor already sitting in the wanted directory,
/// level 1 any idle donor.
pub(crate) fn get_better_connection(me: &mut Session, peers: &mut Peers<'_>, level: u8) {
    if level == 0 && me.cwd.is_none() {
        return;
    }
    for o in peers.iter_mut() {
        if o.control.is_none()
            || o.data.is_some()
            || o.state != State::Eof
            || !o.queue.is_empty()
            || o.mode != Mode::Closed
        {
            continue;
        }
        if !me.same_connection(o) {
            continue;
        }

        if !me.settings.relookup_always {
            if me.lookup_done && !o.lookup_done {
                o.lookup_done = true;
                o.peer_addr = me.peer_addr;
            } else if o.lookup_done && !me.lookup_done {
                me.lookup_done = true;
                me.peer_addr = o.peer_addr;
            }
        }
        share_home(me, o);
        o.expand_tilde_in_cwd();
        me.expand_tilde_in_cwd();

        if level == 0 && me.real_cwd != o.real_cwd {
            continue;
        }

        debug_print("---- ", "Reusing connection of an idle session", 3);
        o.state = State::Initial;
        me.control = o.control.take();
        me.state = State::Eof;
        me.ttype = o.ttype;
        me.event_time = o.event_time;
        let real_cwd = o.real_cwd.take();
        me.set_real_cwd(real_cwd.as_deref());
        o.disconnect();
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_network::InlineResolverFactory;
    use std::net::{Ipv4Addr, TcpListener};

    fn registry() -> (SessionRegistry, ManualClock) {
        let clock = ManualClock::new(Instant::now());
        let reg = SessionRegistry::new(Config::default(), Arc::new(InlineResolverFactory))
            .unwrap()
            .with_clock(Box::new(clock.clone()));
        (reg, clock)
    }

    /// A session that looks logged in and idle, holding a real socket.
    fn idle_session(reg: &mut SessionRegistry, listener: &TcpListener, cwd: &str) -> SessionHandle {
        let addr = listener.local_addr().unwrap();
        let h = reg.create();
        let s = reg.session_mut(h).unwrap();
        s.connect("127.0.0.1", addr.port());
        let sock = socket2::Socket::from(std::net::TcpStream::connect(addr).unwrap());
        sock.set_nonblocking(true).unwrap();
        s.control = Some(sock);
        s.state = State::Eof;
        s.home = Some("/home/ftp".into());
        s.cwd = Some(cwd.to_string());
        s.real_cwd = Some(cwd.to_string());
        s.lookup_done = true;
        s.peer_addr = Some(addr);
        h
    }

    #[test]
    fn test_handles_reuse_free_slots() {
        let (mut reg, _) = registry();
        let a = reg.create();
        let b = reg.create();
        assert_ne!(a, b);
        reg.remove(a);
        let c = reg.create();
        assert_eq!(a, c);
        assert_eq!(reg.handles().len(), 2);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut config = Config::default();
        config.patterns.broken_pipe = Some("(".into());
        assert!(SessionRegistry::new(config, Arc::new(InlineResolverFactory)).is_err());
    }

    #[test]
    fn test_reuse_idle_connection() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let (mut reg, _) = registry();
        let donor = idle_session(&mut reg, &listener, "/pub");

        let h = reg.create();
        {
            let s = reg.session_mut(h).unwrap();
            s.connect("127.0.0.1", listener.local_addr().unwrap().port());
            s.chdir("/pub");
        }
        let progress = reg.step(h, &mut Block::new());
        assert_eq!(progress, Progress::Moved);

        let s = reg.session(h).unwrap();
        assert!(s.is_connected());
        assert_eq!(s.home(), Some("/home/ftp"));
        assert_eq!(s.real_cwd(), Some("/pub"));
        let d = reg.session(donor).unwrap();
        assert!(!d.is_connected());
        assert_eq!(d.state(), State::Initial);
    }

    #[test]
    fn test_no_reuse_across_logins() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let (mut reg, _) = registry();
        let donor = idle_session(&mut reg, &listener, "/pub");

        let h = reg.create();
        {
            let s = reg.session_mut(h).unwrap();
            s.connect("127.0.0.1", listener.local_addr().unwrap().port());
            s.set_login(Some("joe"), Some("secret"));
            s.chdir("/pub");
        }
        reg.step(h, &mut Block::new());
        // a connection of its own, the donor keeps its one
        assert!(reg.session(donor).unwrap().is_connected());
        let s = reg.session(h).unwrap();
        assert!(s.is_connected());
        assert!(matches!(
            s.state(),
            State::Connecting | State::UserRespWaiting
        ));
    }

    #[test]
    fn test_idle_connection_closed() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let (mut reg, clock) = registry();
        let h = idle_session(&mut reg, &listener, "/pub");

        let mut block = Block::new();
        reg.step(h, &mut block);
        assert!(reg.session(h).unwrap().is_connected());
        assert!(block.timeout_value().is_some());

        clock.advance(Duration::from_secs(181));
        reg.step(h, &mut Block::new());
        assert!(!reg.session(h).unwrap().is_connected());
    }

    #[test]
    fn test_cleanup_by_host() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let (mut reg, _) = registry();
        let h = idle_session(&mut reg, &listener, "/");
        reg.cleanup(Some("elsewhere"), false);
        assert!(reg.session(h).unwrap().is_connected());
        reg.cleanup(Some("127.0.0.1"), false);
        assert!(!reg.session(h).unwrap().is_connected());
    }

    #[test]
    fn test_forward_copy_address() {
        let (mut reg, _) = registry();
        let from = reg.create();
        let to = reg.create();
        assert!(!reg.forward_copy_address(from, to));
        let addr = "10.0.0.1:2000".parse().unwrap();
        reg.session_mut(from).unwrap().set_copy_address(addr);
        assert!(reg.forward_copy_address(from, to));
        assert_eq!(reg.session(to).unwrap().copy_address(), Some(addr));
    }

    #[test]
    fn test_operation_replaced_before_command() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let (mut reg, _) = registry();
        let h = idle_session(&mut reg, &listener, "/pub");
        {
            let s = reg.session_mut(h).unwrap();
            s.state = State::CwdCwdWaiting;
            s.mode = Mode::ConnectVerify;
        }
        reg.step(h, &mut Block::new());
        let s = reg.session(h).unwrap();
        assert_eq!(s.state(), State::Eof);
        assert!(s.is_connected());
        assert!(s.done().is_ok());
    }

    #[test]
    fn test_clone_shares_lookup() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let (mut reg, _) = registry();
        let h = idle_session(&mut reg, &listener, "/pub");
        let c = reg.clone_session(h).unwrap();
        let s = reg.session(c).unwrap();
        assert!(!s.is_connected());
        assert_eq!(s.state(), State::Initial);
        assert_eq!(s.cwd(), Some("/pub"));
        assert_eq!(s.hostname(), Some("127.0.0.1"));
    }
}
