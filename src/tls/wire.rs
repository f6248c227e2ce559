//! Wire-level primitives shared by the manipulation catalogue, the two
//! backends, and the protocol-message logger: record headers and the
//! handshake/content-type enumerations, plus explicit big-endian helpers for
//! the 16-/24-bit length fields TLS uses on the wire.
//!
//! Grounded on `tlstesttool`'s `TlsPlaintextHeader`/`HandshakeHeader`/
//! `HeartbeatMessageHeader` (`tls/TlsPlaintextHeader.h`,
//! `tls/TlsHandshakeHeader.h`, `tls/TlsHeartbeatMessageHeader.h`): those are
//! `#pragma pack(1)` structs read by pointer-casting a byte buffer; this
//! crate uses explicit big-endian encode/decode helpers returning typed
//! 24-/16-bit wrapper values instead.

use crate::error::Error;

/// A big-endian 24-bit length, as used by `Handshake.length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U24(pub u32);

impl U24 {
    pub const MAX: u32 = 0x00FF_FFFF;

    pub fn new(value: u32) -> Self {
        debug_assert!(value <= Self::MAX);
        U24(value & Self::MAX)
    }

    pub fn to_be_bytes(self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    pub fn from_be_bytes(bytes: [u8; 3]) -> Self {
        U24(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    Heartbeat = 24,
}

impl ContentType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            24 => Some(ContentType::Heartbeat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    EncryptedExtensions = 8,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    CertificateStatus = 22,
    KeyUpdate = 24,
}

impl HandshakeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(HandshakeType::HelloRequest),
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            4 => Some(HandshakeType::NewSessionTicket),
            5 => Some(HandshakeType::EndOfEarlyData),
            8 => Some(HandshakeType::EncryptedExtensions),
            11 => Some(HandshakeType::Certificate),
            12 => Some(HandshakeType::ServerKeyExchange),
            13 => Some(HandshakeType::CertificateRequest),
            14 => Some(HandshakeType::ServerHelloDone),
            15 => Some(HandshakeType::CertificateVerify),
            16 => Some(HandshakeType::ClientKeyExchange),
            20 => Some(HandshakeType::Finished),
            22 => Some(HandshakeType::CertificateStatus),
            24 => Some(HandshakeType::KeyUpdate),
            _ => None,
        }
    }
}

/// `TLSPlaintext` record header (RFC 5246 §6.2.1): 5 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsPlaintextHeader {
    pub content_type: u8,
    pub version: (u8, u8),
    pub length: u16,
}

impl TlsPlaintextHeader {
    pub const LEN: usize = 5;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let l = self.length.to_be_bytes();
        [self.content_type, self.version.0, self.version.1, l[0], l[1]]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::LEN {
            return Err(Error::config("short TLSPlaintext header"));
        }
        Ok(TlsPlaintextHeader {
            content_type: bytes[0],
            version: (bytes[1], bytes[2]),
            length: u16::from_be_bytes([bytes[3], bytes[4]]),
        })
    }
}

/// Handshake message header (RFC 5246 §7.4): 4 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
    pub msg_type: u8,
    pub length: U24,
}

impl HandshakeHeader {
    pub const LEN: usize = 4;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let l = self.length.to_be_bytes();
        [self.msg_type, l[0], l[1], l[2]]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::LEN {
            return Err(Error::config("short handshake header"));
        }
        Ok(HandshakeHeader {
            msg_type: bytes[0],
            length: U24::from_be_bytes([bytes[1], bytes[2], bytes[3]]),
        })
    }
}

/// Heartbeat message header (RFC 6520 §4): 3 bytes on the wire, followed by
/// the payload and at least 16 bytes of padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMessageHeader {
    pub heartbeat_type: u8,
    pub payload_length: u16,
}

impl HeartbeatMessageHeader {
    pub const LEN: usize = 3;
    pub const PADDING_LEN: usize = 16;
    pub const PADDING_BYTE: u8 = 0xAB;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let l = self.payload_length.to_be_bytes();
        [self.heartbeat_type, l[0], l[1]]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::LEN {
            return Err(Error::config("short heartbeat header"));
        }
        Ok(HeartbeatMessageHeader {
            heartbeat_type: bytes[0],
            payload_length: u16::from_be_bytes([bytes[1], bytes[2]]),
        })
    }
}

/// The 32-byte `random` sentinel TLS 1.3 uses so a ServerHello-shaped message
/// can double as a HelloRetryRequest (RFC 8446 §4.1.3).
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8, 0x91,
    0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8, 0x33, 0x9C,
];

/// Builds the 24-byte raw heartbeat record used by `SendHeartbeatRequest`
/// when the record layer does not exist yet (§4.4 catalogue entry 11).
pub fn build_raw_heartbeat_record(payload: &[u8]) -> Vec<u8> {
    let padding = [HeartbeatMessageHeader::PADDING_BYTE; HeartbeatMessageHeader::PADDING_LEN];
    let body_len = HeartbeatMessageHeader::LEN + payload.len() + padding.len();
    let plaintext = TlsPlaintextHeader {
        content_type: ContentType::Heartbeat as u8,
        version: (3, 3),
        length: body_len as u16,
    };
    let heartbeat = HeartbeatMessageHeader {
        heartbeat_type: 1, // heartbeat_request, RFC 6520 §3
        payload_length: payload.len() as u16,
    };
    let mut out = Vec::with_capacity(TlsPlaintextHeader::LEN + body_len);
    out.extend_from_slice(&plaintext.encode());
    out.extend_from_slice(&heartbeat.encode());
    out.extend_from_slice(payload);
    out.extend_from_slice(&padding);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_header_roundtrips() {
        let h = TlsPlaintextHeader {
            content_type: ContentType::Handshake as u8,
            version: (3, 3),
            length: 0x1234,
        };
        let bytes = h.encode();
        assert_eq!(TlsPlaintextHeader::decode(&bytes).unwrap(), h);
    }

    #[test]
    fn handshake_header_roundtrips() {
        let h = HandshakeHeader {
            msg_type: HandshakeType::ClientHello as u8,
            length: U24::new(0x00ABCD),
        };
        let bytes = h.encode();
        assert_eq!(HandshakeHeader::decode(&bytes).unwrap(), h);
    }

    #[test]
    fn heartbeat_header_roundtrips() {
        let h = HeartbeatMessageHeader {
            heartbeat_type: 1,
            payload_length: 4,
        };
        let bytes = h.encode();
        assert_eq!(HeartbeatMessageHeader::decode(&bytes).unwrap(), h);
    }

    #[test]
    fn heartbeat_record_matches_s3_scenario() {
        let record = build_raw_heartbeat_record(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let expected: Vec<u8> = vec![
            0x18, 0x03, 0x03, 0x00, 0x17, 0x01, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF, 0xAB, 0xAB,
            0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB,
        ];
        assert_eq!(record, expected);
    }
}
