//! Server accept loop (C9): binds once, then drives one or two connections
//! through the handshake driver depending on whether the configured
//! handshake type requires a second connection to exercise resumption.
//!
//! Grounded on `tlstesttool`'s `startServerAcceptHandler` and the server
//! branch of `main()` (`TlsTestTool.cpp`): `listen` once, `accept` bounded by
//! `listenTimeout`, `setUpAndExecuteTlsSession` per connection, and for a
//! resumption handshake type, a second `accept`/session pair that reuses the
//! same session cache so the second handshake can resume the first.

use std::time::Duration;

use log::info;

use crate::config::Configuration;
use crate::driver;
use crate::error::Error;
use crate::net::TcpFacade;
use crate::setup::configure_session;
use crate::starttls;
use crate::tls::session::create_session;

/// Accepts and drives one connection to completion, mirroring
/// `setUpAndExecuteTlsSession`: configure the session, optionally run the
/// StartTLS preamble over the raw socket, hand the socket to the session,
/// then run the driver.
fn accept_and_run(config: &Configuration, listener: &std::net::TcpListener) -> Result<(), Error> {
    let listen_timeout = Duration::from_secs(config.timeouts.listen_s as u64);
    let mut tcp = TcpFacade::accept(listener, listen_timeout)?;
    info!(target: "Network", "Accepted a TCP/IP connection from {:?}", tcp.peer_addr()?);

    if config.starttls_protocol != crate::config::StartTlsProtocol::None {
        starttls::run(
            &mut tcp,
            config.starttls_protocol,
            false,
            Duration::from_secs(config.timeouts.tcp_receive_s as u64),
        )?;
    }

    let mut session = create_session(config)?;
    configure_session(config, session.as_mut())?;
    session.setup_session(tcp)?;
    driver::run(config, session.as_mut());
    Ok(())
}

/// Runs the server side of one invocation, mirroring the original's server
/// branch in `main()`: bind once, accept and drive one connection, and for a
/// resumption handshake type accept and drive a second.
pub fn run(config: &Configuration) -> Result<(), Error> {
    // Unlike the client, the server need not be told a specific interface;
    // an empty `host` (the default) binds every interface, mirroring the
    // original server's unrestricted asio acceptor.
    let bind_host = if config.host.is_empty() { "0.0.0.0" } else { &config.host };
    let listener = TcpFacade::listen(bind_host, config.port)?;
    info!(target: "Network", "Listening on {}:{}", bind_host, config.port);

    accept_and_run(config, &listener)?;

    if config.handshake_type.is_resumption() {
        info!(target: "TLS", "Waiting for a second connection to exercise the resumed handshake");
        accept_and_run(config, &listener)?;
    }

    info!(target: "TLS", "Server handled all connections");
    Ok(())
}
