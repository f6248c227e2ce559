//! Library surface for the TLS conformance/fault-injection harness, split out
//! from the `tlstesttool` binary so integration tests (and, eventually, a
//! second binary embedding the same driver) can reach the configuration
//! model, the driver, and the two backends without re-parsing argv.

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod manipulation;
pub mod net;
pub mod server;
pub mod setup;
pub mod starttls;
pub mod tls;
