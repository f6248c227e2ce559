//! The abstract contract every TLS backend must satisfy (C5).
//!
//! Grounded on `tlstesttool`'s `TlsSession` (`tls/TlsSession.h`), an abstract
//! base class with a pimpl-hidden per-backend `Data` struct. Rather than
//! mirror the inheritance hierarchy directly, this is a polymorphic
//! capability implemented by two concrete types sharing no common base,
//! held as `Box<dyn Session>` by the driver.

use std::io::Write as _;

use crate::config::{Configuration, HandshakeType};
use crate::error::Error;
use crate::net::TcpFacade;
use crate::tls::state::HandshakeState;

/// Where a TLS version appears as a two-byte pair, e.g. `(3, 3)` = TLS 1.2.
pub type TlsVersion = (u8, u8);

pub const VERSION_UNNEGOTIATED: TlsVersion = (0, 0);

/// Sink that secret material is appended to in NSS Key Log Format.
pub trait SecretSink: std::fmt::Debug {
    fn append_line(&mut self, line: &str) -> std::io::Result<()>;
}

/// The simplest possible sink: a file opened in append mode.
#[derive(Debug)]
pub struct FileSecretSink(pub std::fs::File);

impl SecretSink for FileSecretSink {
    fn append_line(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.0, "{}", line)
    }
}

/// Hooks the driver (C6) and manipulations (C4) observe mid-handshake.
///
/// The legacy backend exposes true step granularity (it drives the RFC 5246
/// state machine one message at a time) and invokes these around every
/// transition. The modern backend does not expose step granularity --
/// `perform_handshake` runs to completion internally -- so it invokes these
/// only at the handshake boundaries (see §4.5: "modern backend does not
/// expose step granularity and runs manipulations at handshake boundaries").
pub trait StepHooks {
    fn pre_step(&mut self, session: &mut dyn Session, state: HandshakeState);
    fn post_step(&mut self, session: &mut dyn Session, state: HandshakeState);
}

/// The full C5 contract. Object-safe so the driver can hold `Box<dyn
/// Session>` regardless of which backend produced it.
pub trait Session {
    // -- configuration setters: each may be called at most once, pre-handshake --
    fn set_ca_certificate(&mut self, path: &str) -> Result<(), Error>;
    fn set_certificate(&mut self, cert_path: &str, key_path: &str) -> Result<(), Error>;
    fn set_version(&mut self, version: TlsVersion) -> Result<(), Error>;
    fn set_cipher_suites(&mut self, suites: &[(u8, u8)]) -> Result<(), Error>;
    fn set_server_dh_params(&mut self, params: &str) -> Result<(), Error>;
    fn set_supported_groups(&mut self, groups: &[u16]) -> Result<(), Error>;
    fn set_signature_schemes(&mut self, schemes: &[(u8, u8)]) -> Result<(), Error>;
    fn set_signature_algorithms(&mut self, algorithms: &[(u8, u8)]) -> Result<(), Error>;
    fn set_use_sni(&mut self, use_sni: bool, host: &str) -> Result<(), Error>;
    fn set_verify_peer(&mut self, verify_peer: bool) -> Result<(), Error>;
    fn set_extension_encrypt_then_mac(&mut self, enable: bool) -> Result<(), Error>;
    fn set_extension_extended_master_secret(&mut self, enable: bool) -> Result<(), Error>;
    fn set_pre_shared_key(&mut self, key: &[u8], identity: &str, hint: &str) -> Result<(), Error>;
    fn set_hello_compression_methods(&mut self, methods: &[u8]) -> Result<(), Error>;
    fn set_client_hello_extensions(&mut self, raw: &[u8]) -> Result<(), Error>;
    fn set_server_hello_extensions(&mut self, raw: &[u8]) -> Result<(), Error>;
    fn set_encrypted_extensions_tls13(&mut self, raw: &[u8]) -> Result<(), Error>;
    fn set_handshake_type(&mut self, kind: HandshakeType) -> Result<(), Error>;
    fn set_session_cache(&mut self, cache: &str) -> Result<(), Error>;
    fn set_early_data(&mut self, data: &[u8]) -> Result<(), Error>;
    fn set_ocsp_responder_file(&mut self, path: &str) -> Result<(), Error>;
    fn set_wait_for_alert_seconds(&mut self, seconds: u32) -> Result<(), Error>;
    fn set_tcp_receive_timeout_seconds(&mut self, seconds: u32) -> Result<(), Error>;
    fn set_secret_output(&mut self, sink: Box<dyn SecretSink>) -> Result<(), Error>;

    // -- manipulation hooks --
    fn force_certificate_usage(&mut self) -> Result<(), Error>;
    fn overwrite_hello_version(&mut self, version: TlsVersion) -> Result<(), Error>;
    fn overwrite_elliptic_curve_group(&mut self, group_id: u16) -> Result<(), Error>;
    /// Sends one record of `content_type` carrying `bytes` as its plaintext
    /// body, over the socket handed to `setup_session`, framing and
    /// (post-handshake) encrypting it as the active connection state
    /// requires. Mirrors `TlsSession::sendRecord`, which reaches the socket
    /// through the connection the session already owns rather than through
    /// a parameter -- the same reason this trait takes `&mut self` here
    /// instead of threading a `&mut TcpFacade` through every manipulation
    /// hook.
    fn send_record(&mut self, content_type: u8, bytes: &[u8]) -> Result<(), Error>;
    fn send_application_data(&mut self, bytes: &[u8]) -> Result<(), Error>;
    fn send_early_data(&mut self, bytes: &[u8]) -> Result<(), Error>;

    // -- lifecycle --
    /// Takes ownership of the connected socket; every later method reaches
    /// it internally, the way `TlsSession` reaches the connection it was
    /// constructed with.
    fn setup_session(&mut self, tcp: TcpFacade) -> Result<(), Error>;
    fn perform_handshake(&mut self, hooks: &mut dyn StepHooks) -> Result<(), Error>;
    fn renegotiate(&mut self) -> Result<(), Error>;
    fn receive_application_data(&mut self) -> Result<Vec<u8>, Error>;
    fn close(&mut self) -> Result<(), Error>;
    fn clean_session(&mut self) -> Result<(), Error>;
    fn is_peer_closed(&mut self) -> Result<bool, Error>;

    // -- observability --
    fn state(&self) -> HandshakeState;
    fn version(&self) -> TlsVersion;
    fn is_client(&self) -> bool;
    fn pre_shared_key(&self) -> &[u8];
    fn psk_identity(&self) -> &str;
}

/// Constructs a `Session` for the selected backend, wiring in the parts of
/// `Configuration` that are fixed at session-creation time. Manipulation
/// hooks and per-call setters are applied afterwards by the driver.
pub fn create_session(config: &Configuration) -> Result<Box<dyn Session>, Error> {
    match config.backend {
        crate::config::Backend::Legacy => {
            Ok(Box::new(crate::tls::legacy::LegacySession::new(config)?))
        }
        crate::config::Backend::Modern => {
            Ok(Box::new(crate::tls::modern::ModernSession::new(config)?))
        }
    }
}
