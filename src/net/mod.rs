//! TCP transport facade (C1): connect/listen/accept plus byte-level
//! read/write, instrumented with an observer hook.
//!
//! Grounded on `tlstesttool`'s `network/` directory: `TcpClient`/`TcpServer`
//! wrap an `asio::ip::tcp::socket` behind a pimpl `TcpConnection`, and
//! `AbstractSocketObserver`/`TimestampObserver` (`AbstractSocketObserver.h`,
//! `TimestampObserver.h`) let a logger observe block sizes without the
//! transport knowing about logging. This module collapses client and server
//! connection setup into one `TcpFacade` wrapping `std::net::TcpStream`,
//! since Rust's std socket types need no asio-style `io_context` threading,
//! and replaces the observer base class with a `SocketObserver` trait object.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use cfg_if::cfg_if;
use chrono::{LocalResult, TimeZone, Utc};
use log::debug;

use crate::error::Error;

/// Mirrors `AbstractSocketObserver`: notified of block sizes, not contents.
pub trait SocketObserver {
    fn on_block_written(&mut self, length: usize);
    fn on_block_read(&mut self, length: usize);
}

/// An OS-provided transmit timestamp where the platform exposes one,
/// `clock_gettime(CLOCK_REALTIME)` via `libc` on Unix; elsewhere (and if
/// the call fails) a monotonic wall-clock read through `chrono::Utc::now`
/// stands in, per `TimestampObserver`'s "best timestamp available" stance.
fn timestamp_now() -> String {
    cfg_if! {
        if #[cfg(unix)] {
            let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            let got_os_time = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } == 0;
            let datetime = if got_os_time {
                match Utc.timestamp_opt(ts.tv_sec, ts.tv_nsec as u32) {
                    LocalResult::Single(dt) => dt,
                    _ => Utc::now(),
                }
            } else {
                Utc::now()
            };
        } else {
            let datetime = Utc::now();
        }
    }
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Default observer, used whenever the driver does not install a specific
/// one: logs each transfer's size and timestamp at debug level, mirroring
/// `TimestampObserver`'s `Read.size`/`Read.timestamp`/`Write.size`/
/// `Write.timestamp` log fields.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl SocketObserver for LoggingObserver {
    fn on_block_written(&mut self, length: usize) {
        debug!(target: "Network", "Write.size={}", length);
        debug!(target: "Network", "Write.timestamp={}", timestamp_now());
    }

    fn on_block_read(&mut self, length: usize) {
        debug!(target: "Network", "Read.size={}", length);
        debug!(target: "Network", "Read.timestamp={}", timestamp_now());
    }
}

/// A connected TCP socket plus the observer that is told about every
/// transfer, standing in for `TcpConnection` with its registered
/// `AbstractSocketObserver`.
pub struct TcpFacade {
    stream: TcpStream,
    observer: Box<dyn SocketObserver>,
}

impl TcpFacade {
    fn new(stream: TcpStream) -> Self {
        TcpFacade {
            stream,
            observer: Box::new(LoggingObserver),
        }
    }

    /// Mirrors `TcpClient::connect`.
    pub fn connect(host: &str, port: u16) -> Result<Self, Error> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        Ok(TcpFacade::new(stream))
    }

    /// Mirrors `TcpServer::listen` + the accept half of its lifecycle,
    /// collapsed here because Rust's `TcpListener` already separates bind
    /// from accept the way the original's two-step API does.
    pub fn listen(host: &str, port: u16) -> Result<TcpListener, Error> {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|_| Error::config(format!("invalid listen address \"{}:{}\"", host, port)))?;
        Ok(TcpListener::bind(addr)?)
    }

    /// Accepts one connection, honoring `listen_timeout` the way the
    /// original's `TcpServer::accept` honors its own listen timeout: poll in
    /// a loop instead of blocking forever, so the driver can report a
    /// `ListenTimeout` error (§7) rather than hanging.
    pub fn accept(listener: &TcpListener, listen_timeout: Duration) -> Result<Self, Error> {
        listener.set_nonblocking(true)?;
        let deadline = std::time::Instant::now() + listen_timeout;
        loop {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    return Ok(TcpFacade::new(stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if std::time::Instant::now() >= deadline {
                        return Err(Error::Transport(
                            crate::error::TransportKind::Timeout,
                            "timed out waiting for an incoming connection".to_string(),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn register_observer(&mut self, observer: Box<dyn SocketObserver>) {
        self.observer = observer;
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.stream.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// Mirrors `TcpConnection::write`.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.stream.write_all(data)?;
        self.observer.on_block_written(data.len());
        Ok(())
    }

    /// Mirrors `TcpConnection::read`: blocks until exactly `length` bytes
    /// have been read.
    pub fn read_exact(&mut self, length: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; length];
        self.stream.read_exact(&mut buf)?;
        self.observer.on_block_read(buf.len());
        Ok(buf)
    }

    /// Best-effort: reads whatever is immediately available, up to `max`
    /// bytes, without blocking for more. Used by `receive_application_data`,
    /// which does not know the peer's message length in advance.
    pub fn read_available(&mut self, max: usize) -> Result<Vec<u8>, Error> {
        self.stream.set_nonblocking(true)?;
        let mut buf = vec![0u8; max];
        let result = self.stream.read(&mut buf);
        self.stream.set_nonblocking(false)?;
        match result {
            Ok(n) => {
                buf.truncate(n);
                self.observer.on_block_read(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Mirrors `TcpConnection::isClosed`: a zero-length, non-blocking peek
    /// indicates the peer has shut its write half.
    pub fn is_closed(&mut self) -> Result<bool, Error> {
        self.stream.set_nonblocking(true)?;
        let mut probe = [0u8; 1];
        let result = match self.stream.peek(&mut probe) {
            Ok(0) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        };
        let _ = self.stream.set_nonblocking(false);
        result
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.stream.peer_addr()?)
    }
}
