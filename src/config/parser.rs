//! The configuration file grammar (C2): strict `key=value` lines folded into
//! a validated [`Configuration`].
//!
//! Grounded on two cooperating classes in `tlstesttool`:
//! `Tooling::ConfigurationFileParser` (`tooling/src/configuration/
//! ConfigurationFileParser.cpp`), which turns lines into key/value pairs,
//! and `ConfigurationParser::updateConfiguration`
//! (`configuration/ConfigurationParser.cpp`), which folds those pairs onto a
//! `Configuration` one key at a time, rejecting any name it doesn't
//! recognize. Both are reproduced here as free functions rather than as
//! parser *classes*, since Rust has no analogue to the original's
//! static-method-only utility class.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{
    Backend, Configuration, HandshakeType, LogLevel, NetworkMode, StartTlsProtocol, Timeouts,
};
use crate::error::Error;
use crate::manipulation::parse_manipulation;

static ARGUMENT_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._]+$").unwrap());
static NUMBER_PAIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(([0-9]+),([0-9]+)\)$").unwrap());
static HEX_PAIRS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((0x[0-9a-fA-F]{2}),(0x[0-9a-fA-F]{2})\)").unwrap());
static SUPPORTED_GROUP_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-zA-Z\-]+").unwrap());

/// A single `key=value` entry, following `Tooling::KeyValuePair`.
pub type KeyValuePair = (String, String);

/// Splits a configuration file into key/value pairs. Mirrors
/// `ConfigurationFileParser::parse`: blank lines and lines starting with `#`
/// are skipped, every other line must contain `=`, and the key must match
/// `[a-zA-Z0-9._]+`.
pub fn parse_file_contents(input: &str) -> Result<Vec<KeyValuePair>, Error> {
    let mut pairs = Vec::new();
    for line in input.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let split_pos = line
            .find('=')
            .ok_or_else(|| Error::config(format!("Invalid argument {}", line)))?;
        let key = &line[..split_pos];
        if !ARGUMENT_NAME.is_match(key) {
            return Err(Error::config(format!("Invalid argument {}", line)));
        }
        pairs.push((key.to_string(), line[split_pos + 1..].to_string()));
    }
    Ok(pairs)
}

/// Reads and parses a configuration file from disk, producing a validated
/// [`Configuration`]. Mirrors `ConfigurationLoader::parse`'s combination of
/// file reading, key-folding, and the post-parse required-argument checks
/// (here delegated to [`Configuration::validate`]).
pub fn load_configuration_file(path: &Path) -> Result<Configuration, Error> {
    let contents = std::fs::read_to_string(path)?;
    let pairs = parse_file_contents(&contents)?;
    let configuration = build_configuration(&pairs)?;
    configuration.validate()?;
    Ok(configuration)
}

/// Mirrors `ConfigurationParser::updateConfiguration`: `backend` (the
/// original's `tlsLibrary`) is resolved in a dedicated first pass since later
/// keys (the hello/encrypted-extensions manipulations) branch on it, then
/// every remaining pair is folded in source order.
pub fn build_configuration(pairs: &[KeyValuePair]) -> Result<Configuration, Error> {
    let mut configuration = Configuration::new();

    let mut backend_set = false;
    for (name, value) in pairs {
        if name == "tlsLibrary" {
            configuration.backend = match value.as_str() {
                "mbed TLS" | "GnuTLS" | "TLS_ATTACKER" => Backend::Legacy,
                "OpenSSL" => Backend::Modern,
                other => return Err(Error::config(format!("Unknown TLS library {}", other))),
            };
            backend_set = true;
            break;
        }
    }
    if !backend_set {
        configuration.backend = Backend::Modern;
    }

    let mut timeouts = Timeouts::default();

    for (name, value) in pairs {
        if name == "tlsLibrary" {
            continue;
        }
        match name.as_str() {
            "mode" => {
                configuration.mode = Some(match value.as_str() {
                    "client" => NetworkMode::Client,
                    "server" => NetworkMode::Server,
                    other => return Err(Error::config(format!("Unknown mode {}", other))),
                });
            }
            "host" => configuration.host = value.clone(),
            "port" => configuration.port = parse_u16(name, value)?,
            "listenTimeout" => timeouts.listen_s = parse_u32(name, value)?,
            "waitBeforeClose" => timeouts.wait_before_close_s = parse_u32(name, value)?,
            "receiveTimeout" => timeouts.tcp_receive_s = parse_u32(name, value)?,
            "sessionLifetime" => timeouts.session_lifetime_s = parse_u32(name, value)?,
            "logLevel" => {
                configuration.log_level = match value.as_str() {
                    "high" => LogLevel::High,
                    "medium" => LogLevel::Medium,
                    "low" => LogLevel::Low,
                    "off" => LogLevel::Off,
                    other => return Err(Error::config(format!("Unknown log level {}", other))),
                };
            }
            "logFilterRegEx" => configuration.log_filter_regex = Some(value.clone()),
            "caCertificateFile" => configuration.ca_file = value.into(),
            "certificateFile" => configuration.cert_file = value.into(),
            "privateKeyFile" => configuration.key_file = value.into(),
            "tlsVersion" => {
                let caps = NUMBER_PAIR
                    .captures(value)
                    .ok_or_else(|| Error::config(format!("Invalid value for {} {}", name, value)))?;
                let major: u8 = caps[1]
                    .parse()
                    .map_err(|_| Error::config(format!("Invalid value for {} {}", name, value)))?;
                let minor: u8 = caps[2]
                    .parse()
                    .map_err(|_| Error::config(format!("Invalid value for {} {}", name, value)))?;
                if major != 3 {
                    return Err(Error::config(format!(
                        "Invalid major version for {} {}",
                        name, value
                    )));
                }
                if minor > 4 {
                    return Err(Error::config(format!(
                        "Invalid minor version for {} {}",
                        name, value
                    )));
                }
                configuration.tls_version = (major, minor);
            }
            "tlsUseSni" => configuration.use_sni = parse_bool(name, value)?,
            "tlsVerifyPeer" => configuration.verify_peer = parse_bool(name, value)?,
            "tlsEncryptThenMac" => configuration.encrypt_then_mac = parse_bool(name, value)?,
            "tlsExtendedMasterSecret" => {
                configuration.extended_master_secret = parse_bool(name, value)?
            }
            "tlsCipherSuites" => {
                configuration.cipher_suites = parse_hex_pairs(name, value)?;
            }
            "tlsServerDHParams" => configuration.server_dh_params = value.clone(),
            "tlsSecretFile" => configuration.secret_file = Some(value.into()),
            "tlsSupportedGroups" => {
                let tokens: Vec<String> = SUPPORTED_GROUP_TOKEN
                    .find_iter(value)
                    .map(|m| m.as_str().to_string())
                    .collect();
                if tokens.is_empty() {
                    return Err(Error::config(format!("Invalid value for {} {}", name, value)));
                }
                configuration.supported_groups = tokens;
            }
            "tlsSignatureSchemes" => {
                configuration.signature_schemes = parse_hex_pairs(name, value)?;
            }
            "tlsSignatureAlgorithms" => {
                configuration.signature_algorithms = parse_number_pairs(name, value, 3, 6)?;
            }
            "sessionCache" => configuration.session_cache = value.clone(),
            "earlyData" => configuration.early_data = parse_hex_bytes(name, value)?,
            "psk" => configuration.psk = parse_hex_bytes(name, value)?,
            "pskIdentity" => configuration.psk_identity = value.clone(),
            "pskIdentityHint" => configuration.psk_identity_hint = value.clone(),
            "handshakeType" => {
                configuration.handshake_type = match value.as_str() {
                    "normal" => HandshakeType::Normal,
                    "resumptionWithSessionID" => HandshakeType::ResumeWithSessionId,
                    "resumptionWithSessionTicket" => HandshakeType::ResumeWithTicket,
                    "zeroRTT" => HandshakeType::ZeroRtt,
                    _ => {
                        return Err(Error::config(format!(
                            "Unknown handshakeType argument {}",
                            name
                        )))
                    }
                };
            }
            "ocspResponseFile" => configuration.ocsp_response_file = Some(value.into()),
            "startTLSProtocol" => {
                configuration.starttls_protocol = match value.as_str() {
                    "smtp" => StartTlsProtocol::Smtp,
                    "imap" => StartTlsProtocol::Imap,
                    "pop3" => StartTlsProtocol::Pop3,
                    "ftp" => StartTlsProtocol::Ftp,
                    other => {
                        return Err(Error::config(format!(
                            "Invalid StartTLS protocol: {}",
                            other
                        )))
                    }
                };
            }
            other if other.starts_with("manipulate") => {
                configuration
                    .manipulations
                    .push(parse_manipulation(other, value, configuration.backend)?);
            }
            other => return Err(Error::config(format!("Unknown argument {}", other))),
        }
    }

    configuration.timeouts = timeouts;
    Ok(configuration)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::config(format!("Invalid value for {} {}", name, value))),
    }
}

fn parse_u16(name: &str, value: &str) -> Result<u16, Error> {
    value
        .parse()
        .map_err(|_| Error::config(format!("Invalid value for {} {}", name, value)))
}

fn parse_u32(name: &str, value: &str) -> Result<u32, Error> {
    value
        .parse()
        .map_err(|_| Error::config(format!("Invalid value for {} {}", name, value)))
}

fn parse_hex_pairs(name: &str, value: &str) -> Result<Vec<(u8, u8)>, Error> {
    let pairs: Vec<(u8, u8)> = HEX_PAIRS
        .captures_iter(value)
        .map(|caps| {
            let upper = u8::from_str_radix(&caps[1][2..], 16).unwrap();
            let lower = u8::from_str_radix(&caps[2][2..], 16).unwrap();
            (upper, lower)
        })
        .collect();
    if pairs.is_empty() {
        return Err(Error::config(format!("Invalid value for {} {}", name, value)));
    }
    Ok(pairs)
}

fn parse_number_pairs(
    name: &str,
    value: &str,
    max_first: u8,
    max_second: u8,
) -> Result<Vec<(u8, u8)>, Error> {
    let re = Regex::new(r"\(([0-9]+),([0-9]+)\)").unwrap();
    let mut pairs = Vec::new();
    for caps in re.captures_iter(value) {
        let first: u32 = caps[1].parse().unwrap();
        let second: u32 = caps[2].parse().unwrap();
        if first > max_first as u32 {
            return Err(Error::config(format!(
                "Invalid signature version for {} {}",
                name, value
            )));
        }
        if second > max_second as u32 {
            return Err(Error::config(format!(
                "Invalid hash version for {} {}",
                name, value
            )));
        }
        pairs.push((first as u8, second as u8));
    }
    if pairs.is_empty() {
        return Err(Error::config(format!("Invalid value for {} {}", name, value)));
    }
    Ok(pairs)
}

fn parse_hex_bytes(name: &str, value: &str) -> Result<Vec<u8>, Error> {
    let re = Regex::new(r"^([0-9a-fA-F]{2})*$").unwrap();
    if !re.is_match(value) {
        return Err(Error::config(format!(
            "Invalid hexadecimal string \"{}\" for {}",
            value, name
        )));
    }
    let byte_re = Regex::new(r"([0-9a-fA-F]{2})").unwrap();
    Ok(byte_re
        .find_iter(value)
        .map(|m| u8::from_str_radix(m.as_str(), 16).unwrap())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_key_value_lines_and_ignores_comments() {
        let pairs = parse_file_contents("# comment\n\nmode=client\nport=4433\n").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("mode".to_string(), "client".to_string()),
                ("port".to_string(), "4433".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_line_without_equals() {
        assert!(parse_file_contents("garbage").is_err());
    }

    #[test]
    fn builds_minimal_client_configuration() {
        let pairs = parse_file_contents("mode=client\nhost=localhost\nport=4433\n").unwrap();
        let config = build_configuration(&pairs).unwrap();
        assert_eq!(config.mode, Some(NetworkMode::Client));
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4433);
        assert_eq!(config.backend, Backend::Modern);
    }

    #[test]
    fn rejects_unknown_argument() {
        let pairs = parse_file_contents("bogus=1\n").unwrap();
        assert!(build_configuration(&pairs).is_err());
    }

    #[test]
    fn parses_tls_version_pair() {
        let pairs = parse_file_contents("tlsVersion=(3,4)\n").unwrap();
        let config = build_configuration(&pairs).unwrap();
        assert_eq!(config.tls_version, (3, 4));
    }

    #[test]
    fn rejects_bad_tls_version_major() {
        let pairs = parse_file_contents("tlsVersion=(4,0)\n").unwrap();
        assert!(build_configuration(&pairs).is_err());
    }

    #[test]
    fn folds_manipulation_keys_through_the_catalogue_parser() {
        let pairs = parse_file_contents("manipulateForceCertificateUsage=\n").unwrap();
        let config = build_configuration(&pairs).unwrap();
        assert_eq!(config.manipulations.len(), 1);
    }
}
