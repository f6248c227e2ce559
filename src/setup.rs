//! Session configuration glue, shared by the client and server paths in
//! `main`.
//!
//! Grounded on `tlstesttool`'s `configureTlsSession`/`configureCertificates`
//! (`TlsTestTool.cpp`): a sequence of conditional setter calls driven off
//! whichever fields the configuration happens to carry, each wrapped so a
//! failure logs and aborts setup rather than panicking.

use log::info;

use crate::config::Configuration;
use crate::error::Error;
use crate::tls::session::FileSecretSink;
use crate::tls::Session;

/// Mirrors `configureTlsSession` + `configureCertificates`: applies every
/// configured field to a freshly created session, before `setup_session`
/// hands it a live socket.
pub fn configure_session(config: &Configuration, session: &mut dyn Session) -> Result<(), Error> {
    session.set_version(config.tls_version)?;
    session.set_use_sni(config.use_sni, &config.host)?;
    session.set_verify_peer(config.verify_peer)?;
    session.set_extension_encrypt_then_mac(config.encrypt_then_mac)?;
    session.set_extension_extended_master_secret(config.extended_master_secret)?;
    session.set_pre_shared_key(&config.psk, &config.psk_identity, &config.psk_identity_hint)?;

    if !config.client_hello_extension_raw.is_empty() {
        session.set_client_hello_extensions(&config.client_hello_extension_raw)?;
    }
    if !config.server_hello_extension_raw.is_empty() {
        session.set_server_hello_extensions(&config.server_hello_extension_raw)?;
    }
    if !config.encrypted_extensions_raw.is_empty() {
        session.set_encrypted_extensions_tls13(&config.encrypted_extensions_raw)?;
    }
    if let Some(path) = &config.ocsp_response_file {
        session.set_ocsp_responder_file(&path.to_string_lossy())?;
    }
    if !config.cipher_suites.is_empty() {
        session.set_cipher_suites(&config.cipher_suites)?;
    }
    if !config.server_dh_params.is_empty() {
        session.set_server_dh_params(&config.server_dh_params)?;
    }
    if let Some(secret_file) = &config.secret_file {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(secret_file)?;
        session.set_secret_output(Box::new(FileSecretSink(file)))?;
    }
    if !config.supported_groups.is_empty() {
        let ids = config
            .supported_groups
            .iter()
            .map(|name| crate::config::groups::resolve_supported_group(name))
            .collect::<Result<Vec<_>, _>>()?;
        session.set_supported_groups(&ids)?;
    }
    if !config.signature_schemes.is_empty() {
        session.set_signature_schemes(&config.signature_schemes)?;
    }
    if !config.signature_algorithms.is_empty() {
        session.set_signature_algorithms(&config.signature_algorithms)?;
    }
    session.set_wait_for_alert_seconds(config.timeouts.wait_before_close_s)?;
    session.set_tcp_receive_timeout_seconds(config.timeouts.tcp_receive_s)?;

    session.set_handshake_type(config.handshake_type)?;
    if config.handshake_type.is_resumption() {
        session.set_session_cache(&config.session_cache)?;
    }
    if config.handshake_type == crate::config::HandshakeType::ZeroRtt {
        session.set_early_data(&config.early_data)?;
    }

    if !config.ca_file.as_os_str().is_empty() {
        session.set_ca_certificate(&config.ca_file.to_string_lossy())?;
    }
    if !config.cert_file.as_os_str().is_empty() && !config.key_file.as_os_str().is_empty() {
        session.set_certificate(&config.cert_file.to_string_lossy(), &config.key_file.to_string_lossy())?;
    }

    info!(target: "TLS", "TLS session configured.");
    Ok(())
}
