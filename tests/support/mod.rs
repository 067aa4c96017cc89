// Scripted FTP server for driving sessions end to end. It runs its own
// tokio runtime on a background thread; the engine under test stays
// synchronous and is stepped from the test thread.
#![allow(dead_code)]

use rouilleftpc::{Block, FtpError, SessionHandle, SessionRegistry};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

const DATA_TIMEOUT: Duration = Duration::from_secs(5);
const DRIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// The server's file tree.
#[derive(Debug, Default, Clone)]
pub struct FsState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
}

impl FsState {
    pub fn with_dirs(dirs: &[&str]) -> Self {
        let mut fs = FsState::default();
        fs.dirs.insert("/".to_string());
        for d in dirs {
            fs.dirs.insert(d.to_string());
        }
        fs
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.insert(path.to_string(), data.to_vec());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub home: String,
    /// Empty: any login is accepted.
    pub users: HashMap<String, String>,
    /// Challenge text for the 331 reply and the PASS it expects.
    pub otp: Option<(String, String)>,
    pub rest_supported: bool,
    /// Replaces the reply to every USER, e.g. a proxy refusing the target.
    pub user_reply: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            home: "/home/ftp".to_string(),
            users: HashMap::new(),
            otp: None,
            rest_supported: true,
            user_reply: None,
        }
    }
}

struct Shared {
    opts: ServerOptions,
    fs: Mutex<FsState>,
    log: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

pub struct MockFtp {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
}

impl MockFtp {
    pub fn start(opts: ServerOptions, fs: FsState) -> Self {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            opts,
            fs: Mutex::new(fs),
            log: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });

        let server_shared = Arc::clone(&shared);
        thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = TcpListener::from_std(listener).unwrap();
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        break;
                    };
                    server_shared.connections.fetch_add(1, Ordering::SeqCst);
                    let shared = Arc::clone(&server_shared);
                    tokio::spawn(async move {
                        let _ = handle_connection(socket, shared).await;
                    });
                }
            });
        });

        MockFtp { addr, shared }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command line received so far, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn saw(&self, line: &str) -> bool {
        self.commands().iter().any(|c| c == line)
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.fs.lock().unwrap().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.shared.fs.lock().unwrap().dirs.contains(path)
    }
}

enum DataChannel {
    None,
    Passive(TcpListener),
    Active(SocketAddr),
}

struct Connection {
    cwd: String,
    user: Option<String>,
    rename_from: Option<String>,
    rest: u64,
    data: DataChannel,
}

async fn send_response(writer: &mut OwnedWriteHalf, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\r\n").await
}

/// Printable part of a command line; telnet interrupt bytes are dropped.
fn clean_line(raw: &[u8]) -> String {
    let text: String = raw
        .iter()
        .filter(|b| (0x20..0x7f).contains(*b))
        .map(|&b| b as char)
        .collect();
    text.trim().to_string()
}

fn resolve(cwd: &str, arg: &str) -> String {
    let path = if arg.starts_with('/') {
        arg.to_string()
    } else {
        let rel = arg.trim_start_matches("./");
        if cwd == "/" {
            format!("/{}", rel)
        } else {
            format!("{}/{}", cwd, rel)
        }
    };
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path
    }
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn parse_port(arg: &str) -> Option<SocketAddr> {
    let n: Vec<u8> = arg
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    if n.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(n[0], n[1], n[2], n[3]);
    Some(SocketAddr::from((ip, u16::from(n[4]) << 8 | u16::from(n[5]))))
}

async fn handle_connection(socket: TcpStream, shared: Arc<Shared>) -> io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    send_response(&mut writer, "220 Mock FTP server ready").await?;

    let mut conn = Connection {
        cwd: shared.opts.home.clone(),
        user: None,
        rename_from: None,
        rest: 0,
        data: DataChannel::None,
    };
    // may already hold a line read while a transfer was running
    let mut raw = Vec::new();
    loop {
        if !raw.ends_with(b"\n") && reader.read_until(b'\n', &mut raw).await? == 0 {
            break;
        }
        let line = clean_line(&raw);
        raw.clear();
        if line.is_empty() {
            continue;
        }
        shared.log.lock().unwrap().push(line.clone());

        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        if verb == "QUIT" {
            send_response(&mut writer, "221 Goodbye").await?;
            break;
        }
        let mut io = ControlIo {
            reader: &mut reader,
            writer: &mut writer,
            pending: &mut raw,
        };
        handle_command(&mut conn, &shared, &mut io, &verb, &arg).await?;
    }
    Ok(())
}

struct ControlIo<'a> {
    reader: &'a mut BufReader<OwnedReadHalf>,
    writer: &'a mut OwnedWriteHalf,
    /// Receives a command line that arrives during a transfer.
    pending: &'a mut Vec<u8>,
}

async fn handle_command(
    conn: &mut Connection,
    shared: &Shared,
    io: &mut ControlIo<'_>,
    verb: &str,
    arg: &str,
) -> io::Result<()> {
    let writer = &mut *io.writer;
    match verb {
        "USER" => {
            conn.user = Some(arg.to_string());
            if let Some(text) = &shared.opts.user_reply {
                return send_response(writer, text).await;
            }
            match &shared.opts.otp {
                Some((challenge, _)) => send_response(writer, &format!("331 {}", challenge)).await,
                None => send_response(writer, "331 Password required").await,
            }
        }
        "PASS" => {
            let user = conn.user.clone().unwrap_or_default();
            let ok = match (&shared.opts.otp, shared.opts.users.get(&user)) {
                (Some((_, expected)), _) => arg == expected,
                (None, Some(pass)) => arg == pass,
                (None, None) => shared.opts.users.is_empty(),
            };
            if ok {
                send_response(writer, "230 Login successful").await
            } else {
                send_response(writer, "530 Login incorrect.").await
            }
        }
        "PWD" => {
            let text = format!("257 \"{}\" is the current directory", conn.cwd);
            send_response(writer, &text).await
        }
        "CWD" => {
            let path = resolve(&conn.cwd, arg);
            if shared.fs.lock().unwrap().dirs.contains(&path) {
                conn.cwd = path;
                send_response(writer, "250 Directory successfully changed").await
            } else {
                send_response(writer, "550 Failed to change directory").await
            }
        }
        "TYPE" => send_response(writer, &format!("200 Switching to {} mode", arg)).await,
        "NOOP" => send_response(writer, "200 NOOP ok").await,
        "ABOR" => send_response(writer, "226 ABOR successful").await,
        "SITE" => send_response(writer, "214-The following SITE commands are recognized\r\n CHMOD\r\n214 Help OK").await,
        "PASV" => {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
            let port = listener.local_addr()?.port();
            conn.data = DataChannel::Passive(listener);
            let text = format!(
                "227 Entering Passive Mode (127,0,0,1,{},{})",
                port >> 8,
                port & 0xff
            );
            send_response(writer, &text).await
        }
        "PORT" => match parse_port(arg) {
            Some(addr) => {
                conn.data = DataChannel::Active(addr);
                send_response(writer, "200 PORT command successful").await
            }
            None => send_response(writer, "501 Illegal PORT command").await,
        },
        "REST" => {
            if !shared.opts.rest_supported {
                return send_response(writer, "502 REST not implemented").await;
            }
            conn.rest = arg.parse().unwrap_or(0);
            send_response(writer, &format!("350 Restart position accepted ({})", conn.rest)).await
        }
        "RETR" => {
            let path = resolve(&conn.cwd, arg);
            let content = shared.fs.lock().unwrap().files.get(&path).cloned();
            let Some(content) = content else {
                conn.rest = 0;
                return send_response(writer, "550 Failed to open file").await;
            };
            let text = format!(
                "150 Opening BINARY mode data connection for {} ({} bytes)",
                arg,
                content.len()
            );
            send_response(writer, &text).await?;
            let offset = (conn.rest as usize).min(content.len());
            conn.rest = 0;
            let mut data = open_data(conn).await?;
            // a command during the transfer (ABOR) ends it early
            let interrupted = tokio::select! {
                r = send_body(&mut data, &content[offset..]) => r.map(|_| false),
                r = io.reader.read_until(b'\n', io.pending) => r.map(|n| n > 0),
            };
            let interrupted = interrupted?;
            drop(data);
            if interrupted {
                send_response(writer, "426 Connection closed; transfer aborted.").await
            } else {
                send_response(writer, "226 Transfer complete").await
            }
        }
        "STOR" => {
            let path = resolve(&conn.cwd, arg);
            send_response(writer, "150 Ok to send data").await?;
            let mut data = open_data(conn).await?;
            let mut received = Vec::new();
            tokio::time::timeout(DATA_TIMEOUT, data.read_to_end(&mut received))
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
            let offset = conn.rest as usize;
            conn.rest = 0;
            {
                let mut fs = shared.fs.lock().unwrap();
                let file = fs.files.entry(path).or_default();
                file.truncate(offset);
                file.extend_from_slice(&received);
            }
            send_response(writer, "226 Transfer complete").await
        }
        "LIST" | "NLST" => {
            let dir = if arg.is_empty() {
                conn.cwd.clone()
            } else {
                resolve(&conn.cwd, arg)
            };
            let listing: Vec<String> = {
                let fs = shared.fs.lock().unwrap();
                fs.files
                    .iter()
                    .filter(|(p, _)| parent(p) == dir)
                    .map(|(p, c)| {
                        let name = &p[p.rfind('/').map_or(0, |i| i + 1)..];
                        if verb == "LIST" {
                            format!("-rw-r--r-- 1 ftp ftp {} Jan 01 00:00 {}\r\n", c.len(), name)
                        } else {
                            format!("{}\r\n", name)
                        }
                    })
                    .collect()
            };
            if listing.is_empty() && verb == "NLST" {
                conn.data = DataChannel::None;
                return send_response(writer, "550 No files found").await;
            }
            send_response(writer, "150 Here comes the directory listing").await?;
            let mut data = open_data(conn).await?;
            data.write_all(listing.concat().as_bytes()).await?;
            data.shutdown().await?;
            drop(data);
            send_response(writer, "226 Directory send OK").await
        }
        "MKD" => {
            let path = resolve(&conn.cwd, arg);
            let created = {
                let mut fs = shared.fs.lock().unwrap();
                !fs.dirs.contains(&path)
                    && fs.dirs.contains(&parent(&path))
                    && fs.dirs.insert(path.clone())
            };
            if created {
                send_response(writer, &format!("257 \"{}\" created", path)).await
            } else {
                send_response(writer, "550 Create directory operation failed").await
            }
        }
        "RMD" => {
            let path = resolve(&conn.cwd, arg);
            if shared.fs.lock().unwrap().dirs.remove(&path) {
                send_response(writer, "250 Remove directory operation successful").await
            } else {
                send_response(writer, "550 Remove directory operation failed").await
            }
        }
        "DELE" => {
            let path = resolve(&conn.cwd, arg);
            if shared.fs.lock().unwrap().files.remove(&path).is_some() {
                send_response(writer, "250 Delete operation successful").await
            } else {
                send_response(writer, "550 Delete operation failed").await
            }
        }
        "RNFR" => {
            let path = resolve(&conn.cwd, arg);
            if shared.fs.lock().unwrap().files.contains_key(&path) {
                conn.rename_from = Some(path);
                send_response(writer, "350 Ready for RNTO").await
            } else {
                send_response(writer, "550 RNFR command failed").await
            }
        }
        "RNTO" => {
            let Some(from) = conn.rename_from.take() else {
                return send_response(writer, "503 RNFR required first").await;
            };
            let to = resolve(&conn.cwd, arg);
            let renamed = {
                let mut fs = shared.fs.lock().unwrap();
                match fs.files.remove(&from) {
                    Some(content) => {
                        fs.files.insert(to, content);
                        true
                    }
                    None => false,
                }
            };
            if renamed {
                send_response(writer, "250 Rename successful").await
            } else {
                send_response(writer, "550 Rename failed").await
            }
        }
        "SIZE" => {
            let path = resolve(&conn.cwd, arg);
            let size = shared.fs.lock().unwrap().files.get(&path).map(Vec::len);
            match size {
                Some(n) => send_response(writer, &format!("213 {}", n)).await,
                None => send_response(writer, "550 Could not get file size").await,
            }
        }
        "MDTM" => {
            let path = resolve(&conn.cwd, arg);
            let exists = shared.fs.lock().unwrap().files.contains_key(&path);
            if exists {
                send_response(writer, "213 20240101120000").await
            } else {
                send_response(writer, "550 Could not get file modification time").await
            }
        }
        _ => send_response(writer, "500 Unknown command").await,
    }
}

async fn send_body(data: &mut TcpStream, body: &[u8]) -> io::Result<()> {
    data.write_all(body).await?;
    data.shutdown().await
}

async fn open_data(conn: &mut Connection) -> io::Result<TcpStream> {
    let channel = std::mem::replace(&mut conn.data, DataChannel::None);
    let connect = async {
        match channel {
            DataChannel::Passive(listener) => listener.accept().await.map(|(s, _)| s),
            DataChannel::Active(addr) => TcpStream::connect(addr).await,
            DataChannel::None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no PORT or PASV",
            )),
        }
    };
    tokio::time::timeout(DATA_TIMEOUT, connect)
        .await
        .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?
}

// Engine-side helpers

pub fn registry(config_toml: &str) -> SessionRegistry {
    rouilleftpc::core_log::init_logger("debug");
    let config = rouilleftpc::Config::from_toml_str(config_toml).unwrap();
    SessionRegistry::new(
        config,
        Arc::new(rouilleftpc::core_network::InlineResolverFactory),
    )
    .unwrap()
}

fn pause() {
    thread::sleep(Duration::from_millis(2));
}

/// Steps `h` until the operation reports something other than "in progress".
pub fn wait_done(reg: &mut SessionRegistry, h: SessionHandle) -> Result<(), FtpError> {
    let deadline = Instant::now() + DRIVE_TIMEOUT;
    loop {
        reg.step(h, &mut Block::new());
        match reg.done(h) {
            Err(FtpError::InProgress) => {}
            other => return other,
        }
        assert!(Instant::now() < deadline, "operation never finished");
        pause();
    }
}

/// Reads until the end of the data.
pub fn read_all(reg: &mut SessionRegistry, h: SessionHandle) -> Result<Vec<u8>, FtpError> {
    let deadline = Instant::now() + DRIVE_TIMEOUT;
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reg.read(h, &mut buf) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(FtpError::InProgress) => pause(),
            Err(e) => return Err(e),
        }
        assert!(Instant::now() < deadline, "read never finished");
    }
}

/// Writes all of `data`, then waits for the server to confirm the store.
pub fn store_all(reg: &mut SessionRegistry, h: SessionHandle, data: &[u8]) -> Result<(), FtpError> {
    let deadline = Instant::now() + DRIVE_TIMEOUT;
    let mut sent = 0;
    while sent < data.len() {
        match reg.write(h, &data[sent..]) {
            Ok(n) => sent += n,
            Err(FtpError::InProgress) => pause(),
            Err(e) => return Err(e),
        }
        assert!(Instant::now() < deadline, "write never finished");
    }
    loop {
        reg.step(h, &mut Block::new());
        match reg.store_status(h) {
            Err(FtpError::InProgress) => pause(),
            other => return other,
        }
        assert!(Instant::now() < deadline, "store never confirmed");
    }
}
