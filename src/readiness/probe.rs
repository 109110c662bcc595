use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// A side-effect-free check that a service is reachable. Every variant is
/// safe to evaluate repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// A TCP connection to `addr` can be opened.
    Tcp { addr: String },
    /// `program args...` exits with status 0. Output is discarded.
    Command { program: String, args: Vec<String> },
    /// The data store at `addr` answers `PING` with `+PONG`.
    RedisPing { addr: String },
    /// The file at `path` contains `needle`.
    LogContains { path: PathBuf, needle: String },
    /// Any inner probe succeeds. Evaluated left to right.
    Any(Vec<Probe>),
}

impl Probe {
    pub fn check(&self) -> bool {
        match self {
            Probe::Tcp { addr } => connect(addr).is_some(),
            Probe::Command { program, args } => Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false),
            Probe::RedisPing { addr } => redis_ping(addr),
            Probe::LogContains { path, needle } => std::fs::read(path)
                .map(|bytes| String::from_utf8_lossy(&bytes).contains(needle.as_str()))
                .unwrap_or(false),
            Probe::Any(probes) => probes.iter().any(Probe::check),
        }
    }

    /// Short human-readable description for log lines.
    pub fn describe(&self) -> String {
        match self {
            Probe::Tcp { addr } => format!("tcp connect {addr}"),
            Probe::Command { program, args } => {
                let mut parts = vec![program.clone()];
                parts.extend(args.iter().cloned());
                format!("`{}` exits 0", shell_words::join(parts))
            }
            Probe::RedisPing { addr } => format!("PING/PONG on {addr}"),
            Probe::LogContains { path, needle } => {
                format!("{} contains {needle:?}", path.display())
            }
            Probe::Any(probes) => probes
                .iter()
                .map(Probe::describe)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

fn resolve(addr: &str) -> Option<SocketAddr> {
    addr.to_socket_addrs().ok()?.next()
}

fn connect(addr: &str) -> Option<TcpStream> {
    let addr = resolve(addr)?;
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).ok()
}

fn redis_ping(addr: &str) -> bool {
    let Some(mut stream) = connect(addr) else {
        return false;
    };
    if stream.set_read_timeout(Some(IO_TIMEOUT)).is_err()
        || stream.set_write_timeout(Some(IO_TIMEOUT)).is_err()
    {
        return false;
    }
    if stream.write_all(b"PING\r\n").is_err() {
        return false;
    }

    let mut reply = [0u8; 64];
    let mut filled = 0;
    while filled < reply.len() {
        match stream.read(&mut reply[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if reply[..filled].ends_with(b"\r\n") {
                    break;
                }
            }
            Err(_) => return false,
        }
    }
    reply[..filled].starts_with(b"+PONG")
}
