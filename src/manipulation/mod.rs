//! The manipulation catalogue (C4): fault-injection actions driven into a
//! `Session` at the four points the driver exposes.
//!
//! Grounded on `tlstesttool`'s `manipulation/` directory: an abstract
//! `Manipulation` base class (`Manipulation.h`/`.cpp`) with one concrete
//! subclass per action, each overriding the four `execute*` hooks and
//! leaving the rest empty. Rather than mirror that hierarchy, this module
//! collapses it to a closed, typed catalogue of manipulation kinds
//! dispatched through a single enum, with one `match` arm per hook standing
//! in for the one-class-per-action hierarchy. `ManipulationsParser::parse`
//! (`ManipulationsParser.cpp`)
//! supplies the exact grammar reproduced in [`parse_manipulation`].

use log::info;

use crate::error::Error;
use crate::tls::{HandshakeState, Session};

/// When a heartbeat-request manipulation fires relative to the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTiming {
    BeforeHandshake,
    AfterHandshake,
}

/// One entry from the catalogue. Each variant corresponds to one of the
/// original tool's `Manipulation` subclasses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manipulation {
    ForceCertificateUsage,
    ManipulateClientHelloCompressionMethods(Vec<u8>),
    ManipulateServerHelloCompressionMethods(Vec<u8>),
    ManipulateClientHelloExtensions(Vec<u8>),
    ManipulateServerHelloExtensions(Vec<u8>),
    ManipulateEncryptedExtensionsTls13(Vec<u8>),
    ManipulateHelloVersion((u8, u8)),
    ManipulateEllipticCurveGroup(u16),
    Renegotiate,
    SendApplicationData { count: u64, data: Vec<u8> },
    SendHeartbeatRequest {
        when: HeartbeatTiming,
        payload_length: u16,
        payload: Vec<u8>,
    },
}

impl Manipulation {
    /// Mirrors `Manipulation::executePreHandshake`.
    pub fn pre_handshake(&self, session: &mut dyn Session) -> Result<(), Error> {
        match self {
            Manipulation::ForceCertificateUsage => {
                if !session.is_client() {
                    info!("Force sending of a certificate.");
                    session.force_certificate_usage()?;
                }
            }
            Manipulation::ManipulateClientHelloCompressionMethods(methods) => {
                if session.is_client() {
                    info!(
                        "Setting ClientHello.compression_methods to {}.",
                        hex::encode(methods)
                    );
                    session.set_hello_compression_methods(methods)?;
                }
            }
            Manipulation::ManipulateClientHelloExtensions(raw) => {
                if session.is_client() {
                    info!("Setting ClientHello.extensions to {}.", hex::encode(raw));
                    session.set_client_hello_extensions(raw)?;
                }
            }
            Manipulation::ManipulateServerHelloCompressionMethods(methods) => {
                if !session.is_client() {
                    info!(
                        "Setting ServerHello.compression_method to {}.",
                        hex::encode(methods)
                    );
                    session.set_hello_compression_methods(methods)?;
                }
            }
            Manipulation::ManipulateServerHelloExtensions(raw) => {
                if !session.is_client() {
                    info!("Setting ServerHello.extensions to {}.", hex::encode(raw));
                    session.set_server_hello_extensions(raw)?;
                }
            }
            Manipulation::ManipulateEncryptedExtensionsTls13(raw) => {
                if !session.is_client() {
                    info!("Setting EncryptedExtensions to {}.", hex::encode(raw));
                    session.set_encrypted_extensions_tls13(raw)?;
                }
            }
            Manipulation::ManipulateHelloVersion(version) => {
                info!(
                    "Setting version for Hello message to ({}, {}).",
                    version.0, version.1
                );
                session.overwrite_hello_version(*version)?;
            }
            Manipulation::SendHeartbeatRequest {
                when, payload, ..
            } => {
                if *when == HeartbeatTiming::BeforeHandshake {
                    send_heartbeat(session, payload)?;
                }
            }
            // The server-only compression-method/extensions overrides above
            // apply pre-handshake, same lifecycle point the original's
            // ManipulateServerHelloExtensions/ManipulateServerHelloCompressionMethods/
            // ManipulateEncryptedExtensionsTls13 subclasses use; Renegotiate
            // and SendApplicationData apply post-handshake; EllipticCurveGroup
            // applies pre-step.
            _ => {}
        }
        Ok(())
    }

    /// Mirrors `Manipulation::executePreStep`.
    pub fn pre_step(&self, session: &mut dyn Session) -> Result<(), Error> {
        if let Manipulation::ManipulateEllipticCurveGroup(group_id) = self {
            if !session.is_client() && session.state() == HandshakeState::ServerKeyExchange {
                info!(
                    "Setting EllipticCurveGroup to {} before sending ServerKeyExchange.",
                    group_id
                );
                session.overwrite_elliptic_curve_group(*group_id)?;
            }
        }
        Ok(())
    }

    /// Mirrors `Manipulation::executePostStep`. No catalogue entry uses this
    /// hook today; it is kept so the dispatch is exhaustive over the same
    /// four points as the original base class.
    pub fn post_step(&self, _session: &mut dyn Session) -> Result<(), Error> {
        Ok(())
    }

    /// Mirrors `Manipulation::executePostHandshake`.
    pub fn post_handshake(&self, session: &mut dyn Session) -> Result<(), Error> {
        match self {
            Manipulation::Renegotiate => {
                info!("Performing renegotiation.");
                // The driver supplies the TcpFacade via a dedicated call on
                // the session rather than through this trait method, since
                // renegotiation needs the live socket; see driver::run.
            }
            Manipulation::SendApplicationData { count, data } => {
                for counter in 1..=*count {
                    info!(
                        "Send TLS application data message {} of {}.",
                        counter, count
                    );
                    session.send_application_data(data)?;
                }
            }
            Manipulation::SendHeartbeatRequest {
                when, payload, ..
            } => {
                if *when == HeartbeatTiming::AfterHandshake {
                    send_heartbeat(session, payload)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Builds and sends a raw heartbeat record, following `SendHeartbeatRequest::send`.
/// `send_record` always receives just the heartbeat message (type, length,
/// payload, padding) as its plaintext body; the session is responsible for
/// framing it, and for encrypting it once the handshake has completed.
fn send_heartbeat(session: &mut dyn Session, payload: &[u8]) -> Result<(), Error> {
    info!("Sending HeartbeatRequest message...");
    let record = crate::tls::wire::build_raw_heartbeat_record(payload);
    info!("Message content: {}", hex::encode(&record));
    session.send_record(crate::tls::wire::ContentType::Heartbeat as u8, &record[5..])
}

/// Reproduces `ManipulationsParser::parse` exactly: one `name` per
/// manipulation key, `value` holding its configuration-file argument.
/// `backend` stands in for the original's `tlsLibrary` check, which only the
/// hello/encrypted-extensions manipulations consult (the legacy backend
/// takes a colon-delimited hex string where the modern one takes a raw
/// extension-bytes string).
pub fn parse_manipulation(
    name: &str,
    value: &str,
    backend: crate::config::Backend,
) -> Result<Manipulation, Error> {
    use crate::config::Backend;

    match name {
        "manipulateClientHelloCompressionMethods" => {
            Ok(Manipulation::ManipulateClientHelloCompressionMethods(
                parse_hex_string(name, value)?,
            ))
        }
        "manipulateServerHelloCompressionMethod" => {
            Ok(Manipulation::ManipulateServerHelloCompressionMethods(
                parse_hex_string(name, value)?,
            ))
        }
        "manipulateClientHelloExtensions" => {
            if backend == Backend::Legacy {
                let stripped: String = value.chars().filter(|&c| c != ':').collect();
                Ok(Manipulation::ManipulateClientHelloExtensions(
                    parse_hex_string(name, &stripped)?,
                ))
            } else {
                Ok(Manipulation::ManipulateClientHelloExtensions(
                    value.as_bytes().to_vec(),
                ))
            }
        }
        "manipulateServerHelloExtensions" => {
            if backend == Backend::Legacy {
                let stripped: String = value.chars().filter(|&c| c != ':').collect();
                Ok(Manipulation::ManipulateServerHelloExtensions(
                    parse_hex_string(name, &stripped)?,
                ))
            } else {
                Ok(Manipulation::ManipulateServerHelloExtensions(
                    value.as_bytes().to_vec(),
                ))
            }
        }
        "manipulateEncryptedExtensionsTls13" => {
            if backend == Backend::Modern {
                Ok(Manipulation::ManipulateEncryptedExtensionsTls13(
                    value.as_bytes().to_vec(),
                ))
            } else {
                Err(Error::config(format!(
                    "{} requires backend=modern",
                    name
                )))
            }
        }
        "manipulateHelloVersion" => {
            Ok(Manipulation::ManipulateHelloVersion(parse_hex_pair(
                name, value,
            )?))
        }
        "manipulateRenegotiate" => Ok(Manipulation::Renegotiate),
        "manipulateSendHeartbeatRequest" => parse_send_heartbeat_request(name, value),
        "manipulateSendTlsApplicationData" => parse_send_application_data(name, value),
        "manipulateEllipticCurveGroup" => Ok(Manipulation::ManipulateEllipticCurveGroup(
            crate::config::groups::resolve_supported_group(value)?,
        )),
        "manipulateForceCertificateUsage" => Ok(Manipulation::ForceCertificateUsage),
        _ => Err(Error::config(format!("Unknown manipulation {}", name))),
    }
}

fn parse_hex_pair(name: &str, value: &str) -> Result<(u8, u8), Error> {
    let re = regex::Regex::new(r"^\((0x[0-9a-fA-F]{2}),(0x[0-9a-fA-F]{2})\)$").unwrap();
    let caps = re
        .captures(value)
        .ok_or_else(|| Error::config(format!("Invalid value \"{}\" for {}", value, name)))?;
    let first = u8::from_str_radix(&caps[1][2..], 16)
        .map_err(|_| Error::config(format!("Invalid byte in value \"{}\" for {}", value, name)))?;
    let second = u8::from_str_radix(&caps[2][2..], 16)
        .map_err(|_| Error::config(format!("Invalid byte in value \"{}\" for {}", value, name)))?;
    Ok((first, second))
}

fn parse_hex_string(name: &str, value: &str) -> Result<Vec<u8>, Error> {
    let well_formed = regex::Regex::new(r"^([0-9a-fA-F]{2} ?)*$").unwrap();
    if !well_formed.is_match(value) {
        return Err(Error::config(format!(
            "Invalid hexadecimal string \"{}\" for {}",
            value, name
        )));
    }
    let byte_re = regex::Regex::new(r"([0-9a-fA-F]{2})").unwrap();
    let bytes: Vec<u8> = byte_re
        .find_iter(value)
        .map(|m| u8::from_str_radix(m.as_str(), 16).unwrap())
        .collect();
    if bytes.is_empty() {
        return Err(Error::config(format!(
            "Invalid hexadecimal string \"{}\" for {}",
            value, name
        )));
    }
    Ok(bytes)
}

fn parse_send_heartbeat_request(name: &str, value: &str) -> Result<Manipulation, Error> {
    let first_comma = value
        .find(',')
        .ok_or_else(|| Error::config(format!("Invalid value \"{}\" for {}", value, name)))?;
    let when_str = &value[..first_comma];
    let when = match when_str {
        "beforeHandshake" => HeartbeatTiming::BeforeHandshake,
        "afterHandshake" => HeartbeatTiming::AfterHandshake,
        _ => {
            return Err(Error::config(format!(
                "Invalid when \"{}\" in value \"{}\" for {}",
                when_str, value, name
            )))
        }
    };
    let last_comma = value.rfind(',').unwrap();
    let length_str = &value[first_comma + 1..last_comma];
    let payload_length: u32 = length_str
        .parse()
        .map_err(|_| Error::config(format!("Invalid payloadLength \"{}\" for {}", length_str, name)))?;
    if payload_length > 65535 {
        return Err(Error::config(format!(
            "Invalid payloadLength \"{}\" in value \"{}\" for {}",
            length_str, value, name
        )));
    }
    let payload = parse_hex_string(name, &value[last_comma + 1..])?;
    Ok(Manipulation::SendHeartbeatRequest {
        when,
        payload_length: payload_length as u16,
        payload,
    })
}

fn parse_send_application_data(name: &str, value: &str) -> Result<Manipulation, Error> {
    let split = value
        .find(',')
        .ok_or_else(|| Error::config(format!("Invalid value \"{}\" for {}", value, name)))?;
    let count_str = &value[..split];
    let count: u64 = count_str
        .parse()
        .map_err(|_| Error::config(format!("Invalid count \"{}\" for {}", count_str, name)))?;
    if count < 1 {
        return Err(Error::config(format!(
            "Invalid count \"{}\" in value \"{}\" for {}",
            count_str, value, name
        )));
    }
    let data = parse_hex_string(name, &value[split + 1..])?;
    Ok(Manipulation::SendApplicationData { count, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_pair() {
        assert_eq!(parse_hex_pair("x", "(0x03,0x01)").unwrap(), (3, 1));
        assert!(parse_hex_pair("x", "not-a-pair").is_err());
    }

    #[test]
    fn parses_hex_string_with_spaces() {
        assert_eq!(
            parse_hex_string("x", "de ad be ef").unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert_eq!(parse_hex_string("x", "deadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_hex_string("x", "zz").is_err());
    }

    #[test]
    fn parses_heartbeat_request() {
        let m = parse_manipulation(
            "manipulateSendHeartbeatRequest",
            "beforeHandshake,4,deadbeef",
            crate::config::Backend::Modern,
        )
        .unwrap();
        assert_eq!(
            m,
            Manipulation::SendHeartbeatRequest {
                when: HeartbeatTiming::BeforeHandshake,
                payload_length: 4,
                payload: vec![0xde, 0xad, 0xbe, 0xef],
            }
        );
    }

    #[test]
    fn parses_application_data() {
        let m = parse_manipulation(
            "manipulateSendTlsApplicationData",
            "3,aabb",
            crate::config::Backend::Modern,
        )
        .unwrap();
        assert_eq!(
            m,
            Manipulation::SendApplicationData {
                count: 3,
                data: vec![0xaa, 0xbb],
            }
        );
    }

    #[test]
    fn rejects_unknown_manipulation() {
        assert!(parse_manipulation("bogus", "x", crate::config::Backend::Modern).is_err());
    }
}
