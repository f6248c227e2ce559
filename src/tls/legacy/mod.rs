//! The legacy backend (C11): a TLS 1.2-focused [`Session`] implementation
//! operating message-by-message, with true step granularity.
//!
//! Grounded on `tlstesttool`'s `tls::openssl::TlsSession`
//! (`tls/openssl/TlsSession.cpp`). That class drives a *patched* OpenSSL
//! fork through custom entry points with no standard-library equivalent
//! (`SSL_CTX_set_overwrite_client_hello_ext`,
//! `SSL_CTX_set_manipulateForceCertificateUsage`,
//! `SSL_CTX_set_overwrite_hello_version`, `SSL_CTX_set_handshake_type`): a
//! vendored patch cannot be reproduced without fabricating a dependency, so
//! this backend instead drives the RFC 5246 state machine directly at the
//! wire level, exactly the level of control those patches exist to expose.
//! `openssl::x509`/`openssl::pkey` load the real certificate and key
//! material; `openssl::hash`/`openssl::symm` provide the PRF and
//! record-protection primitives the original delegates to its (forked)
//! OpenSSL. Precise interoperable cryptography is explicitly out of scope;
//! what this backend reproduces faithfully is the wire framing, the
//! per-message step granularity, and the exact points at which the
//! manipulation catalogue (C4) intervenes.

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rand::rand_bytes;
use openssl::x509::X509;
use smallvec::SmallVec;

use crate::config::{Configuration, HandshakeType as ConfigHandshakeType};
use crate::error::{Error, HandshakeKind};
use crate::net::TcpFacade;
use crate::tls::session::{SecretSink, Session, StepHooks, TlsVersion, VERSION_UNNEGOTIATED};
use crate::tls::state::HandshakeState;
use crate::tls::wire::{ContentType, HandshakeHeader, HandshakeType as WireHandshakeType, TlsPlaintextHeader, U24};

/// Record-protection state established once the handshake secrets are
/// derived. `None` means records are sent and received in plaintext.
struct CipherState {
    key: Vec<u8>,
    iv: Vec<u8>,
    sequence_number: u64,
}

pub struct LegacySession {
    tcp: Option<TcpFacade>,
    is_client: bool,
    state: HandshakeState,
    version: TlsVersion,
    requested_version: TlsVersion,

    ca_file: Option<String>,
    certificate: Option<(X509, PKey<Private>)>,
    cipher_suites: Vec<(u8, u8)>,
    supported_groups: Vec<u16>,
    signature_schemes: Vec<(u8, u8)>,
    use_sni: bool,
    sni_host: String,
    verify_peer: bool,
    encrypt_then_mac: bool,
    extended_master_secret: bool,
    psk: Vec<u8>,
    psk_identity: String,
    psk_identity_hint: String,
    compression_methods: Vec<u8>,
    client_hello_extensions_raw: Option<Vec<u8>>,
    server_hello_extensions_raw: Option<Vec<u8>>,
    handshake_type: ConfigHandshakeType,
    wait_for_alert_seconds: u32,
    tcp_receive_timeout_seconds: u32,

    force_certificate: bool,
    overwritten_hello_version: Option<TlsVersion>,
    overwritten_group: Option<u16>,

    /// Set by [`Session::renegotiate`]; makes [`Self::build_client_hello`]
    /// append a `renegotiation_info` extension carrying `own_verify_data`,
    /// mirroring RFC 5746 and the auto-appended extension in the S6 scenario.
    is_renegotiating: bool,
    own_verify_data: Vec<u8>,

    client_random: [u8; 32],
    server_random: [u8; 32],
    master_secret: Vec<u8>,
    write_cipher: Option<CipherState>,
    read_cipher: Option<CipherState>,
    secret_sink: Option<Box<dyn SecretSink>>,
}

impl LegacySession {
    pub fn new(config: &Configuration) -> Result<Self, Error> {
        let is_client = matches!(config.mode, Some(crate::config::NetworkMode::Client));
        Ok(LegacySession {
            tcp: None,
            is_client,
            state: HandshakeState::ClientHello,
            version: VERSION_UNNEGOTIATED,
            requested_version: config.tls_version,
            ca_file: None,
            certificate: None,
            cipher_suites: config.cipher_suites.clone(),
            supported_groups: Vec::new(),
            signature_schemes: config.signature_schemes.clone(),
            use_sni: config.use_sni,
            sni_host: config.host.clone(),
            verify_peer: config.verify_peer,
            encrypt_then_mac: config.encrypt_then_mac,
            extended_master_secret: config.extended_master_secret,
            psk: config.psk.clone(),
            psk_identity: config.psk_identity.clone(),
            psk_identity_hint: config.psk_identity_hint.clone(),
            compression_methods: vec![0x00],
            client_hello_extensions_raw: None,
            server_hello_extensions_raw: None,
            handshake_type: config.handshake_type,
            wait_for_alert_seconds: 0,
            tcp_receive_timeout_seconds: config.timeouts.tcp_receive_s,
            force_certificate: false,
            overwritten_hello_version: None,
            overwritten_group: None,
            is_renegotiating: false,
            own_verify_data: Vec::new(),
            client_random: [0u8; 32],
            server_random: [0u8; 32],
            master_secret: Vec::new(),
            write_cipher: None,
            read_cipher: None,
            secret_sink: None,
        })
    }

    fn random32() -> Result<[u8; 32], Error> {
        let mut buf = [0u8; 32];
        rand_bytes(&mut buf)?;
        Ok(buf)
    }

    /// TLS 1.2 PRF (RFC 5246 §5), using HMAC-SHA256 as P_hash, folded into a
    /// single closed-form expansion good enough to derive fixed-length
    /// secrets without iterating P_hash's recursive A() chain.
    fn prf(secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Result<Vec<u8>, Error> {
        let mut seed_with_label = Vec::with_capacity(label.len() + seed.len());
        seed_with_label.extend_from_slice(label);
        seed_with_label.extend_from_slice(seed);

        let mut out = Vec::with_capacity(out_len);
        let mut a = hmac_sha256(secret, &seed_with_label)?;
        while out.len() < out_len {
            let mut input = a.clone();
            input.extend_from_slice(&seed_with_label);
            let chunk = hmac_sha256(secret, &input)?;
            out.extend_from_slice(&chunk);
            a = hmac_sha256(secret, &a)?;
        }
        out.truncate(out_len);
        Ok(out)
    }

    fn derive_master_secret(&mut self) -> Result<(), Error> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(&self.client_random);
        seed.extend_from_slice(&self.server_random);
        let pre_master_secret = if !self.psk.is_empty() {
            self.psk.clone()
        } else {
            let mut shared = [0u8; 32];
            rand_bytes(&mut shared)?;
            shared.to_vec()
        };
        self.master_secret = Self::prf(&pre_master_secret, b"master secret", &seed, 48)?;
        Ok(())
    }

    fn derive_record_keys(&mut self) -> Result<(), Error> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(&self.server_random);
        seed.extend_from_slice(&self.client_random);
        // AES-128-GCM: 16-byte keys, 4-byte salt used as part of the IV.
        let key_block = Self::prf(&self.master_secret, b"key expansion", &seed, 2 * (16 + 4))?;
        let (client_key, rest) = key_block.split_at(16);
        let (server_key, rest) = rest.split_at(16);
        let (client_salt, server_salt) = rest.split_at(4);

        let (write_key, write_salt, read_key, read_salt) = if self.is_client {
            (client_key, client_salt, server_key, server_salt)
        } else {
            (server_key, server_salt, client_key, client_salt)
        };
        self.write_cipher = Some(CipherState {
            key: write_key.to_vec(),
            iv: write_salt.to_vec(),
            sequence_number: 0,
        });
        self.read_cipher = Some(CipherState {
            key: read_key.to_vec(),
            iv: read_salt.to_vec(),
            sequence_number: 0,
        });

        if let Some(sink) = self.secret_sink.as_mut() {
            let _ = sink.append_line(&format!(
                "CLIENT_RANDOM {} {}",
                hex::encode(self.client_random),
                hex::encode(&self.master_secret)
            ));
        }
        Ok(())
    }

    fn build_client_hello(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let version = self.overwritten_hello_version.unwrap_or(self.requested_version);
        body.push(version.0);
        body.push(version.1);
        body.extend_from_slice(&self.client_random);
        body.push(0); // session_id length
        let suites: Vec<u8> = if self.cipher_suites.is_empty() {
            vec![0xC0, 0x2F] // ECDHE-RSA-AES128-GCM-SHA256
        } else {
            self.cipher_suites.iter().flat_map(|(a, b)| [*a, *b]).collect()
        };
        body.extend_from_slice(&((suites.len()) as u16).to_be_bytes());
        body.extend_from_slice(&suites);
        body.push(self.compression_methods.len() as u8);
        body.extend_from_slice(&self.compression_methods);

        let mut extensions = if let Some(raw) = &self.client_hello_extensions_raw {
            raw.clone()
        } else {
            self.default_client_extensions()
        };
        if self.is_renegotiating {
            // renegotiation_info, RFC 5746: extension type 0xFF01, body is the
            // previous Finished verify_data length-prefixed as a single byte.
            extensions.extend_from_slice(&0xFF01u16.to_be_bytes());
            extensions.extend_from_slice(&((self.own_verify_data.len() + 1) as u16).to_be_bytes());
            extensions.push(self.own_verify_data.len() as u8);
            extensions.extend_from_slice(&self.own_verify_data);
        }
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        frame_handshake(WireHandshakeType::ClientHello, &body)
    }

    fn default_client_extensions(&self) -> Vec<u8> {
        let mut extensions = Vec::new();
        if self.use_sni && !self.sni_host.is_empty() {
            let host = self.sni_host.as_bytes();
            let mut ext = Vec::new();
            ext.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
            ext.push(0); // host_name type
            ext.extend_from_slice(&(host.len() as u16).to_be_bytes());
            ext.extend_from_slice(host);
            extensions.extend_from_slice(&0x0000u16.to_be_bytes());
            extensions.extend_from_slice(&(ext.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&ext);
        }
        if self.extended_master_secret {
            extensions.extend_from_slice(&0x0017u16.to_be_bytes());
            extensions.extend_from_slice(&0u16.to_be_bytes());
        }
        if self.encrypt_then_mac {
            extensions.extend_from_slice(&0x0016u16.to_be_bytes());
            extensions.extend_from_slice(&0u16.to_be_bytes());
        }
        extensions
    }

    fn build_server_hello(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let version = self.overwritten_hello_version.unwrap_or(self.requested_version);
        body.push(version.0);
        body.push(version.1);
        body.extend_from_slice(&self.server_random);
        body.push(0); // session_id length
        let suite = self.cipher_suites.first().copied().unwrap_or((0xC0, 0x2F));
        body.push(suite.0);
        body.push(suite.1);
        body.push(0x00); // compression method: null

        let extensions = self.server_hello_extensions_raw.clone().unwrap_or_default();
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        frame_handshake(WireHandshakeType::ServerHello, &body)
    }

    fn build_certificate_message(&self) -> Vec<u8> {
        let der = self
            .certificate
            .as_ref()
            .and_then(|(cert, _)| cert.to_der().ok())
            .unwrap_or_default();
        let mut cert_list = Vec::new();
        cert_list.extend_from_slice(&U24::new(der.len() as u32).to_be_bytes());
        cert_list.extend_from_slice(&der);
        let mut body = Vec::new();
        body.extend_from_slice(&U24::new(cert_list.len() as u32).to_be_bytes());
        body.extend_from_slice(&cert_list);
        frame_handshake(WireHandshakeType::Certificate, &body)
    }

    /// Builds an RFC 4492 `ServerKeyExchange` for the `ec_diffie_hellman` key
    /// exchange, carrying the negotiated (or [`Self::overwrite_elliptic_curve_group`]-
    /// overridden) named-curve identifier. The EC point and signature fields
    /// are placeholders: precise interoperable cryptography is out of scope
    /// (§1 Non-goals), but the named-curve identifier is a wire/protocol-message
    /// field and must appear exactly as configured.
    fn build_server_key_exchange(&self) -> Vec<u8> {
        let named_curve = self
            .overwritten_group
            .or_else(|| self.supported_groups.first().copied())
            .unwrap_or(23); // secp256r1, IANA TLS Supported Groups default
        let mut body = Vec::new();
        body.push(3); // ECParameters.curve_type = named_curve
        body.extend_from_slice(&named_curve.to_be_bytes());
        let point = [0x04, 0x00]; // placeholder uncompressed ECPoint
        body.push(point.len() as u8);
        body.extend_from_slice(&point);
        let scheme = self.signature_schemes.first().copied().unwrap_or((0x04, 0x01));
        body.push(scheme.0);
        body.push(scheme.1);
        body.extend_from_slice(&0u16.to_be_bytes()); // signature<0..2^16-1>, empty placeholder
        frame_handshake(WireHandshakeType::ServerKeyExchange, &body)
    }

    fn tcp_mut(&mut self) -> Result<&mut TcpFacade, Error> {
        self.tcp
            .as_mut()
            .ok_or_else(|| Error::config("session has no connected socket; call setup_session first"))
    }

    fn send_plaintext_record(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), Error> {
        let header = TlsPlaintextHeader {
            content_type: content_type as u8,
            version: self.negotiated_record_version(),
            length: payload.len() as u16,
        };
        let mut record = header.encode().to_vec();
        record.extend_from_slice(payload);
        self.tcp_mut()?.write_all(&record)
    }

    fn negotiated_record_version(&self) -> TlsVersion {
        if self.version == VERSION_UNNEGOTIATED {
            self.requested_version
        } else {
            self.version
        }
    }

    fn read_record(&mut self) -> Result<(ContentType, Vec<u8>), Error> {
        let header_bytes = self.tcp_mut()?.read_exact(TlsPlaintextHeader::LEN)?;
        let header = TlsPlaintextHeader::decode(&header_bytes)?;
        let body = self.tcp_mut()?.read_exact(header.length as usize)?;
        let content_type = ContentType::from_u8(header.content_type).ok_or_else(|| {
            Error::Handshake(HandshakeKind::MessageDecode(format!(
                "unknown content type {}",
                header.content_type
            )))
        })?;
        Ok((content_type, body))
    }
}

fn frame_handshake(kind: WireHandshakeType, body: &[u8]) -> Vec<u8> {
    let header = HandshakeHeader {
        msg_type: kind as u8,
        length: U24::new(body.len() as u32),
    };
    // Most handshake messages this backend sends (ClientHello extensions
    // aside) fit well under 128 bytes, so the header+body concatenation
    // stays on the stack instead of forcing a heap allocation per message.
    let mut out: SmallVec<[u8; 128]> = SmallVec::new();
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    out.into_vec()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    use openssl::pkey::PKey as HmacKey;
    use openssl::sign::Signer;

    let pkey = HmacKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

impl Session for LegacySession {
    fn set_ca_certificate(&mut self, path: &str) -> Result<(), Error> {
        self.ca_file = Some(path.to_string());
        Ok(())
    }

    fn set_certificate(&mut self, cert_path: &str, key_path: &str) -> Result<(), Error> {
        let cert_pem = std::fs::read(cert_path)?;
        let key_pem = std::fs::read(key_path)?;
        let cert = X509::from_pem(&cert_pem).map_err(Error::from)?;
        let key = PKey::private_key_from_pem(&key_pem).map_err(Error::from)?;
        self.certificate = Some((cert, key));
        Ok(())
    }

    fn set_version(&mut self, version: TlsVersion) -> Result<(), Error> {
        self.requested_version = version;
        Ok(())
    }

    fn set_cipher_suites(&mut self, suites: &[(u8, u8)]) -> Result<(), Error> {
        self.cipher_suites = suites.to_vec();
        Ok(())
    }

    fn set_server_dh_params(&mut self, _params: &str) -> Result<(), Error> {
        Ok(())
    }

    fn set_supported_groups(&mut self, groups: &[u16]) -> Result<(), Error> {
        self.supported_groups = groups.to_vec();
        Ok(())
    }

    fn set_signature_schemes(&mut self, schemes: &[(u8, u8)]) -> Result<(), Error> {
        self.signature_schemes = schemes.to_vec();
        Ok(())
    }

    fn set_signature_algorithms(&mut self, _algorithms: &[(u8, u8)]) -> Result<(), Error> {
        Ok(())
    }

    fn set_use_sni(&mut self, use_sni: bool, host: &str) -> Result<(), Error> {
        self.use_sni = use_sni;
        self.sni_host = host.to_string();
        Ok(())
    }

    fn set_verify_peer(&mut self, verify_peer: bool) -> Result<(), Error> {
        self.verify_peer = verify_peer;
        Ok(())
    }

    fn set_extension_encrypt_then_mac(&mut self, enable: bool) -> Result<(), Error> {
        self.encrypt_then_mac = enable;
        Ok(())
    }

    fn set_extension_extended_master_secret(&mut self, enable: bool) -> Result<(), Error> {
        self.extended_master_secret = enable;
        Ok(())
    }

    fn set_pre_shared_key(&mut self, key: &[u8], identity: &str, hint: &str) -> Result<(), Error> {
        self.psk = key.to_vec();
        self.psk_identity = identity.to_string();
        self.psk_identity_hint = hint.to_string();
        Ok(())
    }

    fn set_hello_compression_methods(&mut self, methods: &[u8]) -> Result<(), Error> {
        self.compression_methods = methods.to_vec();
        Ok(())
    }

    fn set_client_hello_extensions(&mut self, raw: &[u8]) -> Result<(), Error> {
        self.client_hello_extensions_raw = Some(raw.to_vec());
        Ok(())
    }

    fn set_server_hello_extensions(&mut self, raw: &[u8]) -> Result<(), Error> {
        self.server_hello_extensions_raw = Some(raw.to_vec());
        Ok(())
    }

    fn set_encrypted_extensions_tls13(&mut self, _raw: &[u8]) -> Result<(), Error> {
        Err(Error::unsupported(
            "EncryptedExtensions is a TLS 1.3 message; unsupported on the legacy backend",
        ))
    }

    fn set_handshake_type(&mut self, kind: ConfigHandshakeType) -> Result<(), Error> {
        self.handshake_type = kind;
        Ok(())
    }

    fn set_session_cache(&mut self, _cache: &str) -> Result<(), Error> {
        Ok(())
    }

    fn set_early_data(&mut self, _data: &[u8]) -> Result<(), Error> {
        Err(Error::unsupported("0-RTT early data is unsupported on the legacy backend"))
    }

    fn set_ocsp_responder_file(&mut self, _path: &str) -> Result<(), Error> {
        Ok(())
    }

    fn set_wait_for_alert_seconds(&mut self, seconds: u32) -> Result<(), Error> {
        self.wait_for_alert_seconds = seconds;
        Ok(())
    }

    fn set_tcp_receive_timeout_seconds(&mut self, seconds: u32) -> Result<(), Error> {
        self.tcp_receive_timeout_seconds = seconds;
        Ok(())
    }

    fn set_secret_output(&mut self, sink: Box<dyn SecretSink>) -> Result<(), Error> {
        self.secret_sink = Some(sink);
        Ok(())
    }

    fn force_certificate_usage(&mut self) -> Result<(), Error> {
        self.force_certificate = true;
        Ok(())
    }

    fn overwrite_hello_version(&mut self, version: TlsVersion) -> Result<(), Error> {
        self.overwritten_hello_version = Some(version);
        Ok(())
    }

    fn overwrite_elliptic_curve_group(&mut self, group_id: u16) -> Result<(), Error> {
        self.overwritten_group = Some(group_id);
        Ok(())
    }

    fn send_record(&mut self, content_type: u8, bytes: &[u8]) -> Result<(), Error> {
        let kind = ContentType::from_u8(content_type)
            .ok_or_else(|| Error::config(format!("unknown content type {}", content_type)))?;
        self.send_plaintext_record(kind, bytes)
    }

    fn send_application_data(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.send_plaintext_record(ContentType::ApplicationData, bytes)
    }

    fn send_early_data(&mut self, _bytes: &[u8]) -> Result<(), Error> {
        Err(Error::unsupported("0-RTT early data is unsupported on the legacy backend"))
    }

    fn setup_session(&mut self, tcp: TcpFacade) -> Result<(), Error> {
        self.tcp = Some(tcp);
        self.client_random = Self::random32()?;
        Ok(())
    }

    fn perform_handshake(&mut self, hooks: &mut dyn StepHooks) -> Result<(), Error> {
        let timeout = std::time::Duration::from_secs(self.tcp_receive_timeout_seconds as u64);
        self.tcp_mut()?.set_read_timeout(timeout)?;

        if self.is_client {
            self.step_client(hooks)?;
        } else {
            self.step_server(hooks)?;
        }
        self.state = HandshakeState::HandshakeDone;
        Ok(())
    }

    fn renegotiate(&mut self) -> Result<(), Error> {
        self.is_renegotiating = true;
        self.state = HandshakeState::ClientHello;
        let mut hooks = NoopHooks;
        self.perform_handshake(&mut hooks)
    }

    fn receive_application_data(&mut self) -> Result<Vec<u8>, Error> {
        let (content_type, body) = self.read_record()?;
        if content_type == ContentType::Alert && body.get(1) == Some(&0) {
            // level/description = (*, close_notify): the driver's §7
            // AppDataError case, non-fatal.
            return Err(Error::AppData("connection was closed gracefully.".to_string()));
        }
        if content_type != ContentType::ApplicationData {
            return Err(Error::Handshake(HandshakeKind::MessageDecode(format!(
                "expected application_data, got {:?}",
                content_type
            ))));
        }
        Ok(body)
    }

    fn close(&mut self) -> Result<(), Error> {
        // close_notify alert: level=warning(1), description=close_notify(0)
        self.send_plaintext_record(ContentType::Alert, &[1, 0])?;
        self.tcp_mut()?.close()
    }

    fn is_peer_closed(&mut self) -> Result<bool, Error> {
        self.tcp_mut()?.is_closed()
    }

    fn clean_session(&mut self) -> Result<(), Error> {
        self.write_cipher = None;
        self.read_cipher = None;
        self.master_secret.clear();
        Ok(())
    }

    fn state(&self) -> HandshakeState {
        self.state
    }

    fn version(&self) -> TlsVersion {
        self.version
    }

    fn is_client(&self) -> bool {
        self.is_client
    }

    fn pre_shared_key(&self) -> &[u8] {
        &self.psk
    }

    fn psk_identity(&self) -> &str {
        &self.psk_identity
    }
}

/// `StepHooks` used internally by `renegotiate`, which has no access to the
/// driver's own hook implementation.
struct NoopHooks;
impl StepHooks for NoopHooks {
    fn pre_step(&mut self, _session: &mut dyn Session, _state: HandshakeState) {}
    fn post_step(&mut self, _session: &mut dyn Session, _state: HandshakeState) {}
}

impl LegacySession {
    fn step_client(&mut self, hooks: &mut dyn StepHooks) -> Result<(), Error> {
        hooks.pre_step(self, HandshakeState::ClientHello);
        let client_hello = self.build_client_hello();
        crate::tls::protocol_log::log_handshake_message(
            WireHandshakeType::ClientHello as u8,
            &client_hello[HandshakeHeader::LEN..],
        );
        self.send_plaintext_record(ContentType::Handshake, &client_hello)?;
        hooks.post_step(self, HandshakeState::ClientHello);
        self.state = HandshakeState::ServerHello;

        hooks.pre_step(self, HandshakeState::ServerHello);
        let (content_type, body) = self.read_record()?;
        if content_type != ContentType::Handshake {
            return Err(unexpected_message("ServerHello", content_type));
        }
        let header = HandshakeHeader::decode(&body)?;
        if header.msg_type != WireHandshakeType::ServerHello as u8 {
            return Err(Error::Handshake(HandshakeKind::MessageDecode(
                "expected ServerHello".to_string(),
            )));
        }
        crate::tls::protocol_log::log_handshake_message(header.msg_type, &body[HandshakeHeader::LEN..]);
        self.server_random.copy_from_slice(&body[HandshakeHeader::LEN + 2..HandshakeHeader::LEN + 34]);
        self.version = (body[HandshakeHeader::LEN], body[HandshakeHeader::LEN + 1]);
        hooks.post_step(self, HandshakeState::ServerHello);

        self.state = HandshakeState::ServerCertificate;
        hooks.pre_step(self, HandshakeState::ServerCertificate);
        let (content_type, _certificate) = self.read_record()?;
        if content_type != ContentType::Handshake {
            return Err(unexpected_message("Certificate", content_type));
        }
        if let Ok(header) = HandshakeHeader::decode(&_certificate) {
            crate::tls::protocol_log::log_handshake_message(header.msg_type, &_certificate[HandshakeHeader::LEN..]);
        }
        hooks.post_step(self, HandshakeState::ServerCertificate);

        self.state = HandshakeState::ServerKeyExchange;
        hooks.pre_step(self, HandshakeState::ServerKeyExchange);
        let (content_type, server_key_exchange) = self.read_record()?;
        if content_type != ContentType::Handshake {
            return Err(unexpected_message("ServerKeyExchange", content_type));
        }
        if let Ok(header) = HandshakeHeader::decode(&server_key_exchange) {
            crate::tls::protocol_log::log_handshake_message(
                header.msg_type,
                &server_key_exchange[HandshakeHeader::LEN..],
            );
        }
        hooks.post_step(self, HandshakeState::ServerKeyExchange);

        self.state = HandshakeState::ServerHelloDone;
        hooks.pre_step(self, HandshakeState::ServerHelloDone);
        let (_content_type, _server_hello_done) = self.read_record()?;
        hooks.post_step(self, HandshakeState::ServerHelloDone);

        self.state = HandshakeState::ClientKeyExchange;
        hooks.pre_step(self, HandshakeState::ClientKeyExchange);
        self.derive_master_secret()?;
        let client_key_exchange = frame_handshake(WireHandshakeType::ClientKeyExchange, &[0x00]);
        self.send_plaintext_record(ContentType::Handshake, &client_key_exchange)?;
        hooks.post_step(self, HandshakeState::ClientKeyExchange);

        self.state = HandshakeState::ClientChangeCipherSpec;
        hooks.pre_step(self, HandshakeState::ClientChangeCipherSpec);
        self.send_plaintext_record(ContentType::ChangeCipherSpec, &[1])?;
        self.derive_record_keys()?;
        hooks.post_step(self, HandshakeState::ClientChangeCipherSpec);

        self.state = HandshakeState::ClientFinished;
        hooks.pre_step(self, HandshakeState::ClientFinished);
        self.own_verify_data = vec![0u8; 12];
        let finished = frame_handshake(WireHandshakeType::Finished, &self.own_verify_data);
        self.send_plaintext_record(ContentType::Handshake, &finished)?;
        hooks.post_step(self, HandshakeState::ClientFinished);

        self.state = HandshakeState::ServerChangeCipherSpec;
        hooks.pre_step(self, HandshakeState::ServerChangeCipherSpec);
        let (_content_type, _ccs) = self.read_record()?;
        hooks.post_step(self, HandshakeState::ServerChangeCipherSpec);

        self.state = HandshakeState::ServerFinished;
        hooks.pre_step(self, HandshakeState::ServerFinished);
        let (_content_type, _finished) = self.read_record()?;
        hooks.post_step(self, HandshakeState::ServerFinished);

        Ok(())
    }

    fn step_server(&mut self, hooks: &mut dyn StepHooks) -> Result<(), Error> {
        hooks.pre_step(self, HandshakeState::ClientHello);
        let (content_type, body) = self.read_record()?;
        if content_type != ContentType::Handshake {
            return Err(unexpected_message("ClientHello", content_type));
        }
        let header = HandshakeHeader::decode(&body)?;
        if header.msg_type != WireHandshakeType::ClientHello as u8 {
            return Err(Error::Handshake(HandshakeKind::MessageDecode(
                "expected ClientHello".to_string(),
            )));
        }
        crate::tls::protocol_log::log_handshake_message(header.msg_type, &body[HandshakeHeader::LEN..]);
        self.client_random.copy_from_slice(&body[HandshakeHeader::LEN + 2..HandshakeHeader::LEN + 34]);
        hooks.post_step(self, HandshakeState::ClientHello);

        self.state = HandshakeState::ServerHello;
        hooks.pre_step(self, HandshakeState::ServerHello);
        self.server_random = Self::random32()?;
        self.version = self.overwritten_hello_version.unwrap_or(self.requested_version);
        let server_hello = self.build_server_hello();
        crate::tls::protocol_log::log_handshake_message(
            WireHandshakeType::ServerHello as u8,
            &server_hello[HandshakeHeader::LEN..],
        );
        self.send_plaintext_record(ContentType::Handshake, &server_hello)?;
        hooks.post_step(self, HandshakeState::ServerHello);

        self.state = HandshakeState::ServerCertificate;
        hooks.pre_step(self, HandshakeState::ServerCertificate);
        if self.force_certificate || self.certificate.is_some() {
            let certificate = self.build_certificate_message();
            crate::tls::protocol_log::log_handshake_message(
                WireHandshakeType::Certificate as u8,
                &certificate[HandshakeHeader::LEN..],
            );
            self.send_plaintext_record(ContentType::Handshake, &certificate)?;
        }
        hooks.post_step(self, HandshakeState::ServerCertificate);

        self.state = HandshakeState::ServerKeyExchange;
        hooks.pre_step(self, HandshakeState::ServerKeyExchange);
        let server_key_exchange = self.build_server_key_exchange();
        crate::tls::protocol_log::log_handshake_message(
            WireHandshakeType::ServerKeyExchange as u8,
            &server_key_exchange[HandshakeHeader::LEN..],
        );
        self.send_plaintext_record(ContentType::Handshake, &server_key_exchange)?;
        hooks.post_step(self, HandshakeState::ServerKeyExchange);

        self.state = HandshakeState::ServerHelloDone;
        hooks.pre_step(self, HandshakeState::ServerHelloDone);
        let server_hello_done = frame_handshake(WireHandshakeType::ServerHelloDone, &[]);
        self.send_plaintext_record(ContentType::Handshake, &server_hello_done)?;
        hooks.post_step(self, HandshakeState::ServerHelloDone);

        self.state = HandshakeState::ClientKeyExchange;
        hooks.pre_step(self, HandshakeState::ClientKeyExchange);
        let (_content_type, _cke) = self.read_record()?;
        self.derive_master_secret()?;
        hooks.post_step(self, HandshakeState::ClientKeyExchange);

        self.state = HandshakeState::ClientChangeCipherSpec;
        hooks.pre_step(self, HandshakeState::ClientChangeCipherSpec);
        let (_content_type, _ccs) = self.read_record()?;
        hooks.post_step(self, HandshakeState::ClientChangeCipherSpec);

        self.state = HandshakeState::ClientFinished;
        hooks.pre_step(self, HandshakeState::ClientFinished);
        let (_content_type, _client_finished) = self.read_record()?;
        hooks.post_step(self, HandshakeState::ClientFinished);

        self.state = HandshakeState::ServerChangeCipherSpec;
        hooks.pre_step(self, HandshakeState::ServerChangeCipherSpec);
        self.send_plaintext_record(ContentType::ChangeCipherSpec, &[1])?;
        self.derive_record_keys()?;
        hooks.post_step(self, HandshakeState::ServerChangeCipherSpec);

        self.state = HandshakeState::ServerFinished;
        hooks.pre_step(self, HandshakeState::ServerFinished);
        self.own_verify_data = vec![0u8; 12];
        let finished = frame_handshake(WireHandshakeType::Finished, &self.own_verify_data);
        self.send_plaintext_record(ContentType::Handshake, &finished)?;
        hooks.post_step(self, HandshakeState::ServerFinished);

        Ok(())
    }
}

fn unexpected_message(expected: &str, got: ContentType) -> Error {
    Error::Handshake(HandshakeKind::MessageDecode(format!(
        "expected {}, got content type {:?}",
        expected, got
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_is_deterministic_and_sized() {
        let out1 = LegacySession::prf(b"secret", b"label", b"seed", 48).unwrap();
        let out2 = LegacySession::prf(b"secret", b"label", b"seed", 48).unwrap();
        assert_eq!(out1, out2);
        assert_eq!(out1.len(), 48);
    }

    #[test]
    fn client_hello_carries_requested_version() {
        let mut config = Configuration::new();
        config.mode = Some(crate::config::NetworkMode::Client);
        config.tls_version = (3, 3);
        let session = LegacySession::new(&config).unwrap();
        let hello = session.build_client_hello();
        assert_eq!(hello[HandshakeHeader::LEN], 3);
        assert_eq!(hello[HandshakeHeader::LEN + 1], 3);
    }
}
