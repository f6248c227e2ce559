//! Error taxonomy shared by every component: configuration loading, the TCP
//! façade, the TLS backends, and the manipulation catalogue.
use std::{fmt, io};

/// Which transport-level condition occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Aborted,
    Reset,
    Timeout,
    Eof,
    Io,
}

/// Which handshake-level condition occurred.
#[derive(Debug, Clone)]
pub enum HandshakeKind {
    MessageDecode(String),
    AlertReceived { level: u8, code: u8 },
    UnsupportedOperation(String),
    BackendError(String),
}

#[derive(Debug, Clone)]
pub enum Error {
    Config(String),
    Transport(TransportKind, String),
    Handshake(HandshakeKind),
    Manipulation(String),
    AppData(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn unsupported(op: impl Into<String>) -> Self {
        Error::Handshake(HandshakeKind::UnsupportedOperation(op.into()))
    }

    /// `true` for the one `AppDataError` case the driver treats as benign:
    /// the peer closed gracefully while we were waiting on application data.
    pub fn is_graceful_close(&self) -> bool {
        matches!(self, Error::AppData(msg) if msg == "connection was closed gracefully.")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Parsing the configuration failed: {}", msg),
            Error::Transport(kind, msg) => write!(f, "Transport error ({:?}): {}", kind, msg),
            Error::Handshake(HandshakeKind::MessageDecode(msg)) => {
                write!(f, "Failed to decode handshake message: {}", msg)
            }
            Error::Handshake(HandshakeKind::AlertReceived { level, code }) => {
                write!(f, "Received alert (level={}, code={})", level, code)
            }
            Error::Handshake(HandshakeKind::UnsupportedOperation(op)) => {
                write!(f, "Backend does not support: {}", op)
            }
            Error::Handshake(HandshakeKind::BackendError(msg)) => {
                write!(f, "Backend error: {}", msg)
            }
            Error::Manipulation(msg) => write!(f, "Manipulation failed: {}", msg),
            Error::AppData(msg) => write!(f, "Application data error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionAborted => TransportKind::Aborted,
            io::ErrorKind::ConnectionReset => TransportKind::Reset,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportKind::Timeout,
            io::ErrorKind::UnexpectedEof => TransportKind::Eof,
            _ => TransportKind::Io,
        };
        Error::Transport(kind, err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::Handshake(HandshakeKind::BackendError(err.to_string()))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Handshake(HandshakeKind::BackendError(err.to_string()))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Config(format!("invalid regular expression: {}", err))
    }
}
