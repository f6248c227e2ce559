//! Configuration model (C2): an immutable, validated record that drives the
//! handshake driver, the manipulation catalogue, and the TLS session.
//!
//! Grounded on `tlstesttool`'s `Configuration` (`configuration/Configuration.h`),
//! a plain getter/setter container with a matching default constructor; this
//! rendition keeps the same field set and the same defaults but trades the
//! getter/setter boilerplate for plain public fields plus a `validate`/`Default`
//! pair, since Rust has no encapsulation pressure to hide them.

pub mod groups;
pub mod parser;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::manipulation::Manipulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    Client,
    Server,
}

/// Which concrete `Session` implementation (C11/C12) backs this run.
///
/// Maps onto the original `tlsLibrary` key: `OpenSSL` selected the one
/// TLS-1.3-capable backend available in the reference tool and is the
/// default, so it becomes `Modern` here; `mbed TLS`, `GnuTLS`, and
/// `TLS_ATTACKER` all named TLS-1.2-only or interop-focused alternatives and
/// collapse onto `Legacy`. See DESIGN.md for the open-question resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    Legacy,
    Modern,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Modern
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Low,
    Medium,
    High,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeType {
    Normal,
    ResumeWithSessionId,
    ResumeWithTicket,
    ZeroRtt,
}

impl Default for HandshakeType {
    fn default() -> Self {
        HandshakeType::Normal
    }
}

impl HandshakeType {
    pub fn is_resumption(self) -> bool {
        !matches!(self, HandshakeType::Normal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartTlsProtocol {
    None,
    Smtp,
    Imap,
    Pop3,
    Ftp,
}

impl Default for StartTlsProtocol {
    fn default() -> Self {
        StartTlsProtocol::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub listen_s: u32,
    pub wait_before_close_s: u32,
    pub tcp_receive_s: u32,
    pub session_lifetime_s: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            listen_s: 60,
            wait_before_close_s: 10,
            tcp_receive_s: 120,
            session_lifetime_s: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub mode: Option<NetworkMode>,
    pub backend: Backend,
    pub host: String,
    pub port: u16,
    pub timeouts: Timeouts,
    pub log_level: LogLevel,
    pub log_filter_regex: Option<String>,
    pub ca_file: PathBuf,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub tls_version: (u8, u8),
    pub cipher_suites: Vec<(u8, u8)>,
    pub use_sni: bool,
    pub verify_peer: bool,
    pub encrypt_then_mac: bool,
    pub extended_master_secret: bool,
    pub server_dh_params: String,
    pub supported_groups: Vec<String>,
    pub signature_algorithms: Vec<(u8, u8)>,
    pub signature_schemes: Vec<(u8, u8)>,
    pub secret_file: Option<PathBuf>,
    pub psk: Vec<u8>,
    pub psk_identity: String,
    pub psk_identity_hint: String,
    pub handshake_type: HandshakeType,
    pub session_cache: String,
    pub early_data: Vec<u8>,
    pub ocsp_response_file: Option<PathBuf>,
    pub client_hello_extension_raw: Vec<u8>,
    pub server_hello_extension_raw: Vec<u8>,
    pub encrypted_extensions_raw: Vec<u8>,
    pub starttls_protocol: StartTlsProtocol,
    pub manipulations: Vec<Manipulation>,
}

impl Configuration {
    /// Defaults match `Configuration`'s default constructor in the original
    /// tool: TLS 1.2, OFF logging, SNI/verify/encrypt-then-MAC all disabled.
    pub fn new() -> Self {
        Configuration {
            tls_version: (3, 3),
            ..Default::default()
        }
    }

    /// Post-parse validation enforcing the §3 invariants.
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::config("port must not be 0"));
        }
        if self.mode == Some(NetworkMode::Client) && self.host.is_empty() {
            return Err(Error::config("host is required when mode=client"));
        }
        if self.tls_version.0 != 3 {
            return Err(Error::config(format!(
                "Invalid major version for tlsVersion ({},{})",
                self.tls_version.0, self.tls_version.1
            )));
        }
        if self.tls_version.1 > 4 {
            return Err(Error::config(format!(
                "Invalid minor version for tlsVersion ({},{})",
                self.tls_version.0, self.tls_version.1
            )));
        }
        if self.handshake_type.is_resumption() && self.backend != Backend::Modern {
            return Err(Error::config(
                "resumption and 0-RTT handshake types require backend=modern",
            ));
        }
        if self.handshake_type.is_resumption()
            && self.backend == Backend::Legacy
            && self.mode == Some(NetworkMode::Server)
        {
            return Err(Error::config(
                "resumption handshake types are rejected in server mode on the legacy backend",
            ));
        }
        if let Some(pattern) = &self.log_filter_regex {
            regex::Regex::new(pattern)?;
        }
        Ok(())
    }
}
