//! Handshake position enumeration.
//!
//! Grounded on `tlstesttool`'s `TlsHandshakeState` (`tls/TlsHandshakeState.h`),
//! extended with the TLS 1.3-only positions a modern backend needs
//! (`HelloRetryRequest`, `EncryptedExtensions`, `EndOfEarlyData`) and the two
//! internal bookkeeping states the original names `INTERNAL_1`/`INTERNAL_2`.

/// The state identifies the *next* action for the local role: for a server in
/// `ClientHello`, it means "expect to receive a ClientHello next"; for a
/// client in the same state, "send a ClientHello next".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    HelloRequest,
    ClientHello,
    ServerHello,
    HelloRetryRequest,
    EncryptedExtensions,
    ServerCertificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    ClientCertificate,
    ClientKeyExchange,
    CertificateVerify,
    ClientChangeCipherSpec,
    ClientFinished,
    ServerChangeCipherSpec,
    ServerFinished,
    EndOfEarlyData,
    InternalFlush,
    InternalWrapup,
    HandshakeDone,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::HandshakeDone)
    }
}
