use crate::constants::{TELNET_IAC, TELNET_IP, TELNET_SYNCH};
use log::{debug, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;

/// Socket options taken from the settings; zero leaves the OS default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketTuning {
    pub buffer: usize,
    pub maxseg: u32,
}

/// A non-blocking, close-on-exec TCP socket for `addr`'s family.
pub fn new_stream_socket(addr: &SocketAddr, tuning: SocketTuning) -> io::Result<Socket> {
    let sock = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    sock.set_nonblocking(true)?;
    sock.set_cloexec(true)?;
    apply_tuning(&sock, tuning);
    Ok(sock)
}

/// Keep-alive is always on; buffer and segment size only when configured.
/// Failures are logged and otherwise ignored.
pub fn apply_tuning(sock: &Socket, tuning: SocketTuning) {
    let _ = sock.set_keepalive(true);
    if tuning.buffer > 0 {
        if let Err(e) = sock.set_send_buffer_size(tuning.buffer) {
            warn!("setsockopt(SO_SNDBUF,{}): {}", tuning.buffer, e);
        }
        if let Err(e) = sock.set_recv_buffer_size(tuning.buffer) {
            warn!("setsockopt(SO_RCVBUF,{}): {}", tuning.buffer, e);
        }
    }
    if tuning.maxseg > 0 {
        if let Err(e) = sock.set_mss(tuning.maxseg) {
            warn!("setsockopt(TCP_MAXSEG,{}): {}", tuning.maxseg, e);
        }
    }
}

/// Starts a connect; "in progress" counts as success.
pub fn start_connect(sock: &Socket, addr: &SocketAddr) -> io::Result<()> {
    match sock.connect(&SockAddr::from(*addr)) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == ErrorKind::WouldBlock => {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// `Ok(true)` once a pending connect completed, `Ok(false)` while it is
/// still running, the connect error otherwise.
pub fn poll_connected(sock: &Socket) -> io::Result<bool> {
    if let Some(e) = sock.take_error()? {
        return Err(e);
    }
    match sock.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotConnected || e.raw_os_error() == Some(libc::ENOTCONN) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Pending socket error, if the peer went away or the connection broke.
pub fn pending_error(sock: &Socket) -> Option<io::Error> {
    match sock.take_error() {
        Ok(e) => e,
        Err(e) => Some(e),
    }
}

/// Zero-timeout readiness probe. `Err` on a socket error or hang-up.
pub fn poll_ready(sock: &Socket, writable: bool) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let events = if writable { libc::POLLOUT } else { libc::POLLIN };
    let mut pfd = libc::pollfd {
        fd: sock.as_raw_fd(),
        events,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        let e = io::Error::last_os_error();
        return if is_would_block(&e) { Ok(false) } else { Err(e) };
    }
    if pfd.revents & libc::POLLERR != 0 {
        return Err(pending_error(sock)
            .unwrap_or_else(|| io::Error::new(ErrorKind::Other, "socket error")));
    }
    // a reader still wants to see the EOF behind POLLHUP
    if pfd.revents & libc::POLLHUP != 0 && writable {
        return Err(io::Error::from(ErrorKind::BrokenPipe));
    }
    Ok(pfd.revents & (events | libc::POLLHUP) != 0)
}

/// Listening data socket on an ephemeral port of `local`'s address.
pub fn listen_on(local: &SocketAddr, tuning: SocketTuning) -> io::Result<(Socket, SocketAddr)> {
    let mut bind_addr = *local;
    bind_addr.set_port(0);
    let sock = new_stream_socket(&bind_addr, tuning)?;
    sock.bind(&SockAddr::from(bind_addr))?;
    sock.listen(1)?;
    let bound = sock
        .local_addr()?
        .as_socket()
        .ok_or_else(|| io::Error::new(ErrorKind::Unsupported, "not an inet socket"))?;
    Ok((sock, bound))
}

/// Network trouble that a reconnect may cure.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::ETIMEDOUT)
            | Some(libc::ECONNRESET)
            | Some(libc::ECONNREFUSED)
            | Some(libc::EHOSTUNREACH)
            | Some(libc::EHOSTDOWN)
            | Some(libc::ENETRESET)
            | Some(libc::ENETUNREACH)
            | Some(libc::ENETDOWN)
            | Some(libc::ECONNABORTED)
    )
}

/// A write to a peer that already closed also warrants a reconnect.
pub fn is_transient_write(e: &io::Error) -> bool {
    is_transient(e) || e.raw_os_error() == Some(libc::EPIPE) || e.kind() == ErrorKind::BrokenPipe
}

/// Out of descriptors; worth another try a moment later.
pub fn is_fd_exhausted(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

pub fn is_would_block(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Telnet interrupt ahead of ABOR. Only the first byte goes out of band,
/// many stacks mishandle longer urgent data.
pub fn send_urgent_abort(sock: &Socket) {
    if let Err(e) = sock.send_out_of_band(&[TELNET_IAC]) {
        debug!("send(MSG_OOB): {}", e);
    }
    if let Err(e) = sock.send(&[TELNET_IP, TELNET_IAC, TELNET_SYNCH]) {
        debug!("send(IP,SYNCH): {}", e);
    }
}

/// Bytes written to `sock` that the kernel has not sent yet.
#[cfg(target_os = "linux")]
pub fn unsent_bytes(sock: &Socket) -> usize {
    use std::os::unix::io::AsRawFd;

    let mut queued: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(sock.as_raw_fd(), libc::TIOCOUTQ, &mut queued) };
    if rc < 0 || queued < 0 {
        return 0;
    }
    queued as usize
}

#[cfg(not(target_os = "linux"))]
pub fn unsent_bytes(_sock: &Socket) -> usize {
    0
}
