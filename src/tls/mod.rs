//! TLS wire types, handshake state, the backend-agnostic `Session` contract
//! (C5), and the two concrete backends that satisfy it (C11/C12).

pub mod legacy;
pub mod modern;
pub mod protocol_log;
pub mod session;
pub mod state;
pub mod wire;

pub use session::{create_session, Session, SecretSink, StepHooks, TlsVersion, VERSION_UNNEGOTIATED};
pub use state::HandshakeState;
