//! The handshake driver (C6): sequences one connection's TLS lifecycle
//! against a [`Session`], dispatching the manipulation catalogue (C4) at its
//! four lifecycle points and coordinating teardown with the TCP transport.
//!
//! Grounded on `tlstesttool`'s free functions in `TlsTestTool.cpp`:
//! `configureCallbacks` (installs the pre/post-step manipulation dispatch),
//! `executeTlsSession` (the `pre_handshake -> perform_handshake ->
//! post_handshake -> drain application data -> session lifetime loop ->
//! close` sequence), and `waitForClosedTcpConnection`/`checkTcpConnection`.
//! Exceptions-as-control-flow become `Result`s here; every error path
//! mirrors one of that file's `catch` blocks.

use std::time::{Duration, Instant};

use log::info;

use crate::config::Configuration;
use crate::error::Error;
use crate::manipulation::Manipulation;
use crate::tls::session::StepHooks;
use crate::tls::{HandshakeState, Session};

/// Installs the manipulation catalogue as step hooks, mirroring
/// `configureCallbacks`'s two lambdas. Only the legacy backend invokes
/// these per-message; the modern backend invokes them once at each
/// handshake boundary (see [`crate::tls::session::StepHooks`]).
struct ManipulationHooks<'a> {
    manipulations: &'a [Manipulation],
}

impl<'a> StepHooks for ManipulationHooks<'a> {
    fn pre_step(&mut self, session: &mut dyn Session, _state: HandshakeState) {
        for manipulation in self.manipulations {
            if let Err(e) = manipulation.pre_step(session) {
                info!(target: "TLS", "pre_step manipulation failed: {}", e);
            }
        }
        // Draining `is_peer_closed` here, like `checkTcpConnection` in the
        // original, lets a non-blocking transport observe a peer-initiated
        // close in the same place the handshake itself polls for progress.
        let _ = session.is_peer_closed();
    }

    fn post_step(&mut self, session: &mut dyn Session, _state: HandshakeState) {
        for manipulation in self.manipulations {
            if let Err(e) = manipulation.post_step(session) {
                info!(target: "TLS", "post_step manipulation failed: {}", e);
            }
        }
        let _ = session.is_peer_closed();
    }
}

/// Spins on `is_peer_closed()` until it returns `true` or `timeout` elapses.
/// Mirrors `waitForClosedTcpConnection`: the timeout's expiry is logged, not
/// treated as a failure.
pub fn wait_for_closed_tcp(session: &mut dyn Session, timeout: Duration) {
    info!(
        target: "Network",
        "Wait at most {} s for closing of the TCP/IP connection.",
        timeout.as_secs()
    );
    let deadline = Instant::now() + timeout;
    loop {
        match session.is_peer_closed() {
            Ok(true) => return,
            Ok(false) => {}
            Err(_) => return,
        }
        if Instant::now() >= deadline {
            info!(target: "Network", "TCP/IP connection is still open.");
            return;
        }
    }
}

/// Runs one connection's full TLS lifecycle against an already-configured,
/// already-[`Session::setup_session`]'d session. Mirrors `executeTlsSession`
/// plus the renegotiation dispatch that `Manipulation::post_handshake`
/// defers to the driver.
pub fn run(config: &Configuration, session: &mut dyn Session) {
    let mut hooks = ManipulationHooks {
        manipulations: &config.manipulations,
    };

    for manipulation in &config.manipulations {
        if let Err(e) = manipulation.pre_handshake(session) {
            info!(target: "TLS", "pre_handshake manipulation failed: {}", e);
        }
    }

    if let Err(e) = session.perform_handshake(&mut hooks) {
        info!(target: "TLS", "TLS handshake failed: {}", e);
        wait_for_closed_tcp(session, Duration::from_secs(config.timeouts.wait_before_close_s as u64));
        return;
    }
    info!(target: "TLS", "Handshake successful.");

    for manipulation in &config.manipulations {
        if let Err(e) = manipulation.post_handshake(session) {
            info!(target: "TLS", "post_handshake manipulation failed: {}", e);
        }
    }

    // `Manipulation::post_handshake`'s `Renegotiate` arm only logs; it
    // defers the actual renegotiation to the driver, which alone has the
    // socket-level context (and, for the legacy backend, the previous
    // Finished verify_data) needed to run it. See S6.
    if config.manipulations.contains(&Manipulation::Renegotiate) {
        if let Err(e) = session.renegotiate() {
            info!(target: "TLS", "Renegotiation failed: {}", e);
            wait_for_closed_tcp(session, Duration::from_secs(config.timeouts.wait_before_close_s as u64));
            return;
        }
    }

    match session.is_peer_closed() {
        Ok(true) => {
            info!(target: "Network", "TCP/IP connection is closed.");
            return;
        }
        Ok(false) => {}
        Err(_) => return,
    }

    // The original peeks `connection->available()` non-blockingly before
    // ever calling `receiveApplicationData`, which the abstracted `Session`
    // trait has no equivalent for (reading is always a framed, blocking
    // call). Lowering the read timeout to the one-second window named by
    // this step keeps every subsequent `receive_application_data` call
    // bounded instead, so "up to 1s" remains an observable property of this
    // call and the lifetime loop below rather than a long library-default
    // stall.
    let _ = session.set_tcp_receive_timeout_seconds(1);

    if let Err(e) = drain_one_shot_application_data(session) {
        info!(target: "TLS", "Receiving application data failed: {}", e);
        wait_for_closed_tcp(session, Duration::from_secs(config.timeouts.wait_before_close_s as u64));
        return;
    }

    let lifetime = Duration::from_secs(config.timeouts.session_lifetime_s as u64);
    if !lifetime.is_zero() {
        if let Err(early_return) = run_session_lifetime_loop(session, lifetime) {
            info!(target: "TLS", "Closing failed: {}", early_return);
            wait_for_closed_tcp(session, Duration::from_secs(config.timeouts.wait_before_close_s as u64));
            return;
        }
    }

    if let Err(e) = session.close() {
        info!(target: "TLS", "Closing failed: {}", e);
        wait_for_closed_tcp(session, Duration::from_secs(config.timeouts.wait_before_close_s as u64));
        return;
    }
    wait_for_closed_tcp(session, Duration::from_secs(config.timeouts.wait_before_close_s as u64));
}

/// Mirrors `executeTlsSession`'s one-second best-effort wait for inbound
/// application data right after the handshake, logged as hex on arrival. A
/// read timeout or a graceful close both mean "nothing arrived in time",
/// not a failure; any other transport/handshake error is fatal to the step.
fn drain_one_shot_application_data(session: &mut dyn Session) -> Result<(), Error> {
    match session.receive_application_data() {
        Ok(data) if !data.is_empty() => {
            info!(target: "TLS", "Application data received: {}", hex::encode(&data));
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if e.is_graceful_close() => Ok(()),
        Err(Error::Transport(crate::error::TransportKind::Timeout, _)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Mirrors `executeTlsSession`'s `sessionLifetime` loop: poll every 100 ms,
/// draining application data and tolerating a graceful close, until either
/// the DUT closes first or the lifetime elapses.
fn run_session_lifetime_loop(session: &mut dyn Session, lifetime: Duration) -> Result<(), Error> {
    let start = Instant::now();
    while start.elapsed() < lifetime {
        if session.is_peer_closed()? {
            info!(target: "TLS", "The DUT closed the connection before the session lifetime expired");
            return Ok(());
        }
        match session.receive_application_data() {
            Ok(data) if !data.is_empty() => {
                info!(target: "TLS", "Application data received: {}", hex::encode(&data));
            }
            Ok(_) => {}
            Err(e) if e.is_graceful_close() => {}
            Err(Error::Transport(crate::error::TransportKind::Timeout, _)) => {}
            Err(e) => return Err(e),
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    if !session.is_peer_closed()? {
        info!(target: "TLS", "The DUT did not close the connection before the session lifetime expired");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn manipulation_hooks_do_not_panic_with_no_manipulations() {
        // Exercises the dispatch path without a real Session: constructing
        // ManipulationHooks over an empty slice must not require one.
        let manipulations: Vec<Manipulation> = Vec::new();
        let hooks = ManipulationHooks {
            manipulations: &manipulations,
        };
        let _ = hooks.manipulations.len();
    }

    #[test]
    fn session_lifetime_of_zero_skips_the_loop() {
        let config = Configuration::new();
        assert_eq!(config.timeouts.session_lifetime_s, 0);
    }
}
