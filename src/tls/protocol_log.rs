//! Protocol-message logger (C7): field-level `Tag=hex` lines for every
//! handshake message a backend sends or receives, plus the narrative
//! RX/TX/VALID/BAD lines the driver and backends emit around them.
//!
//! Grounded on `tlstesttool`'s `TlsMessageLogger::logTlsHandshakeMessage`
//! (`tls/openssl/TlsMessageLogger.cpp`) and the tag strings in
//! `TlsLogConstants.h`: a dispatch on handshake message type, each arm
//! walking the message's fixed-then-variable-length fields and logging one
//! `Tag=hex` line per field at the level the original calls `HIGH` (this
//! rendition's `log::info!`, per [`crate::logging::level_filter`]'s mapping).
//! Decode errors here are silent truncations exactly as upstream: a short or
//! malformed message simply stops emitting further fields instead of
//! failing the handshake, since this path only ever observes bytes already
//! accepted by the state machine.

use itertools::Itertools;
use log::info;

use crate::tls::wire::{HandshakeType, HELLO_RETRY_REQUEST_RANDOM};

/// Reads a length-prefixed field: `prefix_len` bytes of big-endian length,
/// then that many bytes of data. Returns `None` on short input, mirroring
/// the original's `std::distance(...) < ...` early returns.
fn read_length_prefixed<'a>(msg: &'a [u8], offset: usize, prefix_len: usize) -> Option<(&'a [u8], usize)> {
    if msg.len() < offset + prefix_len {
        return None;
    }
    let length = match prefix_len {
        1 => msg[offset] as usize,
        2 => u16::from_be_bytes([msg[offset], msg[offset + 1]]) as usize,
        3 => u32::from_be_bytes([0, msg[offset], msg[offset + 1], msg[offset + 2]]) as usize,
        _ => unreachable!("prefix_len is always 1, 2, or 3"),
    };
    let start = offset + prefix_len;
    if msg.len() < start + length {
        return None;
    }
    Some((&msg[start..start + length], start + length))
}

/// Renders bytes the way `Tooling::HexStringHelper::byteArrayToHexString`
/// does: lowercase, space-separated pairs.
fn to_hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).join(" ")
}

fn log_field(tag: &str, bytes: &[u8]) {
    info!(target: "TLS", "{}={}", tag, to_hex_string(bytes));
}

/// `ClientHello` (RFC 5246 §7.4.1.2 / RFC 8446 §4.1.2): version, random,
/// session_id, cipher_suites, compression_methods, extensions.
fn log_client_hello(msg: &[u8]) {
    if msg.len() < 2 {
        return;
    }
    log_field("ClientHello.client_version", &msg[0..2]);
    if msg.len() < 34 {
        return;
    }
    log_field("ClientHello.random", &msg[2..34]);
    let Some((session_id, mut offset)) = read_length_prefixed(msg, 34, 1) else { return };
    log_field("ClientHello.session_id", session_id);
    let Some((cipher_suites, next)) = read_length_prefixed(msg, offset, 2) else { return };
    log_field("ClientHello.cipher_suites", cipher_suites);
    offset = next;
    let Some((compression_methods, next)) = read_length_prefixed(msg, offset, 1) else { return };
    log_field("ClientHello.compression_methods", compression_methods);
    offset = next;
    if let Some((extensions, _)) = read_length_prefixed(msg, offset, 2) {
        log_field("ClientHello.extensions", extensions);
    }
}

/// `ServerHello` and `HelloRetryRequest` share a wire shape (RFC 8446
/// §4.1.3/§4.1.4); the random sentinel disambiguates which tag prefix to use.
fn log_server_hello_or_hello_retry(msg: &[u8]) {
    if msg.len() < 2 {
        return;
    }
    if msg.len() < 34 {
        log_field("ServerHello.server_version", &msg[0..2]);
        return;
    }
    let is_hello_retry = msg[2..34] == HELLO_RETRY_REQUEST_RANDOM;
    let prefix = if is_hello_retry { "HelloRetryRequest" } else { "ServerHello" };

    log_field(&format!("{}.server_version", prefix), &msg[0..2]);
    log_field(&format!("{}.random", prefix), &msg[2..34]);
    let Some((session_id, mut offset)) = read_length_prefixed(msg, 34, 1) else { return };
    log_field(&format!("{}.session_id", prefix), session_id);
    if msg.len() < offset + 2 {
        return;
    }
    log_field(&format!("{}.cipher_suite", prefix), &msg[offset..offset + 2]);
    offset += 2;
    if msg.len() < offset + 1 {
        return;
    }
    log_field(&format!("{}.compression_method", prefix), &msg[offset..offset + 1]);
    offset += 1;
    if let Some((extensions, _)) = read_length_prefixed(msg, offset, 2) {
        log_field(&format!("{}.extensions", prefix), extensions);
    }
}

/// `EncryptedExtensions` (RFC 8446 §4.3.1): a single extensions block.
fn log_encrypted_extensions(msg: &[u8]) {
    if let Some((extensions, _)) = read_length_prefixed(msg, 0, 2) {
        log_field("EncryptedExtensions.extensions", extensions);
    }
}

/// `Certificate` (TLS 1.2, RFC 5246 §7.4.2): a plain list of DER certs.
fn log_certificate_tls12(msg: &[u8]) {
    let Some((list, _)) = read_length_prefixed(msg, 0, 3) else { return };
    let mut offset = 0;
    let mut count = 0;
    while offset < list.len() {
        let Some((cert, next)) = read_length_prefixed(list, offset, 3) else { break };
        info!(target: "TLS", "Certificate.certificate_list[{}]={}", count, to_hex_string(cert));
        offset = next;
        count += 1;
    }
    info!(target: "TLS", "Certificate.certificate_list.size={}", count);
}

/// `Certificate` (TLS 1.3, RFC 8446 §4.4.2): a leading certificate_request_context
/// byte, then entries each followed by per-entry extensions.
fn log_certificate_tls13(msg: &[u8]) {
    if msg.is_empty() {
        return;
    }
    info!(target: "TLS", "Certificate.CertificateType={}", msg[0]);
    let Some((list, _)) = read_length_prefixed(msg, 1, 3) else { return };
    let mut offset = 0;
    let mut count = 0;
    while offset < list.len() {
        let Some((cert, next)) = read_length_prefixed(list, offset, 3) else { break };
        info!(target: "TLS", "Certificate.certificate_list[{}]={}", count, to_hex_string(cert));
        let Some((extensions, next2)) = read_length_prefixed(list, next, 2) else { break };
        info!(
            target: "TLS",
            "Certificate.certificate_list[{}].extensions_list={}",
            count,
            to_hex_string(extensions)
        );
        offset = next2;
        count += 1;
    }
    info!(target: "TLS", "Certificate.certificate_list.size={}", count);
}

/// Disambiguates the TLS 1.2/1.3 `Certificate` wire shapes by checking which
/// interpretation's length field exactly accounts for the rest of the
/// message, mirroring `logCertificateMessage`'s two `TlsUint24` probes.
fn log_certificate(msg: &[u8]) {
    info!(target: "TLS", "Certificate message data={}", to_hex_string(msg));
    if msg.len() >= 3 {
        let len_tls12 = u32::from_be_bytes([0, msg[0], msg[1], msg[2]]) as usize;
        if len_tls12 == msg.len() - 3 {
            return log_certificate_tls12(msg);
        }
    }
    if msg.len() >= 4 {
        let len_tls13 = u32::from_be_bytes([0, msg[1], msg[2], msg[3]]) as usize;
        if len_tls13 == msg.len() - 4 {
            log_certificate_tls13(msg);
        }
    }
}

/// `NewSessionTicket` (RFC 8446 §4.6.1): TLS 1.3 session resumption ticket.
fn log_new_session_ticket(msg: &[u8]) {
    info!(target: "TLS", "NewSessionTicket message data={}", to_hex_string(msg));
    if msg.len() < 8 {
        return;
    }
    log_field("NewSessionTicket.ticket_lifetime", &msg[0..4]);
    log_field("NewSessionTicket.ticket_age_add", &msg[4..8]);
    let Some((nonce, offset)) = read_length_prefixed(msg, 8, 1) else { return };
    log_field("NewSessionTicket.ticket_nonce", nonce);
    let Some((ticket, offset)) = read_length_prefixed(msg, offset, 2) else { return };
    log_field("NewSessionTicket.ticket", ticket);
    if let Some((extensions, _)) = read_length_prefixed(msg, offset, 2) {
        log_field("NewSessionTicket.extensions", extensions);
    }
}

/// `CertificateVerify` (RFC 8446 §4.4.3 / RFC 5246 §7.4.8): a signature
/// algorithm pair followed by the signature itself.
fn log_certificate_verify(msg: &[u8]) {
    info!(target: "TLS", "CertificateVerify message data={}", to_hex_string(msg));
    if msg.len() < 4 {
        return;
    }
    log_field("CertificateVerify.algorithm", &msg[0..2]);
    if let Some((signature, _)) = read_length_prefixed(msg, 2, 2) {
        log_field("CertificateVerify.signature", signature);
    }
}

/// Entry point, mirroring `TlsMessageLogger::logTlsHandshakeMessage`'s
/// dispatch on handshake message type. `is_sent` is accepted for symmetry
/// with the original signature but unused by the field-level arms, which log
/// identically either way; callers still use it to pick the right
/// RX/TX narrative line around this call.
pub fn log_handshake_message(msg_type: u8, msg: &[u8]) {
    match HandshakeType::from_u8(msg_type) {
        Some(HandshakeType::ServerHello) => log_server_hello_or_hello_retry(msg),
        Some(HandshakeType::ClientHello) => log_client_hello(msg),
        Some(HandshakeType::Certificate) => log_certificate(msg),
        Some(HandshakeType::NewSessionTicket) => log_new_session_ticket(msg),
        Some(HandshakeType::CertificateVerify) => log_certificate_verify(msg),
        Some(HandshakeType::EncryptedExtensions) => log_encrypted_extensions(msg),
        _ => {
            info!(target: "TLS", "tlsHandshakeMessage type=0x{:x} data={}", msg_type, to_hex_string(msg));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello_fixture() -> Vec<u8> {
        let mut msg = vec![0x03, 0x03];
        msg.extend_from_slice(&[0xAA; 32]);
        msg.push(0); // session_id length
        msg.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // one cipher suite
        msg.extend_from_slice(&[0x01, 0x00]); // one compression method
        msg.extend_from_slice(&[0x00, 0x00]); // empty extensions
        msg
    }

    #[test]
    fn client_hello_logging_does_not_panic_on_a_well_formed_message() {
        log_handshake_message(HandshakeType::ClientHello as u8, &client_hello_fixture());
    }

    #[test]
    fn client_hello_logging_does_not_panic_on_a_truncated_message() {
        let fixture = client_hello_fixture();
        log_handshake_message(HandshakeType::ClientHello as u8, &fixture[..10]);
    }

    #[test]
    fn hello_retry_request_random_is_detected() {
        let mut msg = vec![0x03, 0x03];
        msg.extend_from_slice(&HELLO_RETRY_REQUEST_RANDOM);
        msg.push(0);
        msg.extend_from_slice(&[0x13, 0x01]);
        msg.push(0);
        msg.extend_from_slice(&[0x00, 0x00]);
        // Exercised for the "does not panic" property; the tag prefix chosen
        // internally is not observable without capturing the logger output.
        log_handshake_message(HandshakeType::ServerHello as u8, &msg);
    }

    #[test]
    fn unknown_message_types_fall_back_to_the_raw_dump() {
        log_handshake_message(0xFF, &[0x01, 0x02, 0x03]);
    }
}
