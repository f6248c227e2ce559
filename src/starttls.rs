//! STARTTLS preamble (C10): the plaintext ASCII exchange that upgrades an
//! application connection to TLS, run before the handshake driver when
//! configured.
//!
//! Grounded on `tlstesttool`'s `StartTlsHandshake::executeStartTlsHandshake`
//! (`network/StartTlsHandshake.cpp`): a per-protocol pair of message
//! vectors (one for each role) exchanged in strict alternation, with one
//! side's first turn pre-seeded depending on protocol and role. This module
//! keeps that table-driven structure and collapses socket I/O onto
//! [`TcpFacade`] rather than an asio connection.

use std::time::{Duration, Instant};

use log::info;

use crate::config::StartTlsProtocol;
use crate::error::Error;
use crate::net::TcpFacade;

/// One script: a queue of message batches. Each batch is written as one or
/// more whole messages back to back (SMTP's second server turn sends two
/// lines before yielding the turn).
type Script = Vec<Vec<&'static str>>;

const SMTP_INITIAL_SERVER: &str = "220 mail.example.com SMTP service ready\r\n";
const SMTP_INITIAL_CLIENT: &str = "EHLO mail.example.com\r\n";
const SMTP_SECOND_SERVER: &str = "250-mail.example.com offers a warm hug of welcome\r\n";
const SMTP_THIRD_SERVER: &str = "250 STARTTLS\r\n";
const SMTP_SECOND_CLIENT: &str = "STARTTLS\r\n";
const SMTP_FINAL_SERVER: &str = "220 GO AHEAD\r\n";

const IMAP_INITIAL_CLIENT: &str = "CAPABILITY\r\n";
const IMAP_INITIAL_SERVER: &str = "CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED\r\n";
const IMAP_SECOND_SERVER: &str = "a OK CAPABILITY completed\r\n";
const IMAP_SECOND_CLIENT: &str = "a STARTTLS\r\n";
const IMAP_FINAL_SERVER: &str = "a OK BEGIN TLS NEGOTIATION\r\n";

const POP3_INITIAL_SERVER: &str = "+OK Service Ready\r\n";
const POP3_INITIAL_CLIENT: &str = "STLS\r\n";
const POP3_FINAL_SERVER: &str = "+OK Begin TLS negotiation\r\n";

const FTP_INITIAL_SERVER: &str = "211-Extensions supported\r\nAUTH TLS\r\n211 END\r\n";
const FTP_INITIAL_CLIENT: &str = "AUTH TLS\r\n";
const FTP_FINAL_SERVER: &str = "234 AUTH command ok. Initializing TLS connection.\r\n";

/// Returns this role's script and whether it speaks first.
fn script_for(protocol: StartTlsProtocol, is_client: bool) -> Result<(Script, bool), Error> {
    let (script, sends_first) = match protocol {
        StartTlsProtocol::Smtp if is_client => (vec![vec![SMTP_INITIAL_CLIENT], vec![SMTP_SECOND_CLIENT]], false),
        StartTlsProtocol::Smtp => (
            vec![vec![SMTP_INITIAL_SERVER], vec![SMTP_SECOND_SERVER, SMTP_THIRD_SERVER], vec![SMTP_FINAL_SERVER]],
            true,
        ),
        StartTlsProtocol::Imap if is_client => (vec![vec![IMAP_INITIAL_CLIENT], vec![IMAP_SECOND_CLIENT]], true),
        StartTlsProtocol::Imap => (
            vec![vec![IMAP_INITIAL_SERVER], vec![IMAP_SECOND_SERVER], vec![IMAP_FINAL_SERVER]],
            false,
        ),
        StartTlsProtocol::Pop3 if is_client => (vec![vec![POP3_INITIAL_CLIENT]], false),
        StartTlsProtocol::Pop3 => (vec![vec![POP3_INITIAL_SERVER], vec![POP3_FINAL_SERVER]], true),
        StartTlsProtocol::Ftp if is_client => (vec![vec![FTP_INITIAL_CLIENT]], false),
        StartTlsProtocol::Ftp => (vec![vec![FTP_INITIAL_SERVER], vec![FTP_FINAL_SERVER]], true),
        StartTlsProtocol::None => {
            return Err(Error::config(
                "a StartTLS protocol must be selected to execute a StartTLS handshake",
            ));
        }
    };
    Ok((script, sends_first))
}

/// Runs the preamble to completion, mirroring `executeStartTlsHandshake`'s
/// alternation loop: each side takes a turn, the role that was seeded to
/// speak first sends before receiving, and the loop ends once the script is
/// exhausted on the appropriate boundary for this role.
pub fn run(
    tcp: &mut TcpFacade,
    protocol: StartTlsProtocol,
    is_client: bool,
    receive_timeout: Duration,
) -> Result<(), Error> {
    let (mut remaining, mut sent_turn) = script_for(protocol, is_client)?;
    info!(target: "Network", "StartTLS handshake started");

    loop {
        if sent_turn {
            let batch = remaining.remove(0);
            for message in &batch {
                tcp.write_all(message.as_bytes())?;
                info!(target: "Network", "StartTLS message sent: {:?}", message);
            }
        } else {
            let received = receive_line(tcp, receive_timeout)?;
            info!(target: "Network", "StartTLS message received: {:?}", received);
        }
        sent_turn = !sent_turn;

        if is_client && remaining.is_empty() && sent_turn {
            break;
        }
        if !is_client && remaining.is_empty() {
            break;
        }
    }

    info!(target: "Network", "StartTLS handshake finished successfully");
    Ok(())
}

/// Polls for a CRLF-terminated line, mirroring the original's
/// `receiveStartTLSHandshakeMessage`'s 20 ms poll loop bounded by
/// `tcp_receive_timeout_s`.
fn receive_line(tcp: &mut TcpFacade, timeout: Duration) -> Result<String, Error> {
    let deadline = Instant::now() + timeout;
    let mut buf = Vec::new();
    loop {
        let chunk = tcp.read_available(256)?;
        if !chunk.is_empty() {
            buf.extend_from_slice(&chunk);
            if buf.ends_with(b"\r\n") {
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }
        } else if Instant::now() >= deadline {
            return Err(Error::Transport(
                crate::error::TransportKind::Timeout,
                "timed out waiting for a StartTLS message".to_string(),
            ));
        } else {
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_server_speaks_first() {
        let (script, sends_first) = script_for(StartTlsProtocol::Smtp, false).unwrap();
        assert!(sends_first);
        assert_eq!(script.len(), 3);
        assert_eq!(script[1], vec![SMTP_SECOND_SERVER, SMTP_THIRD_SERVER]);
    }

    #[test]
    fn imap_client_speaks_first() {
        let (_script, sends_first) = script_for(StartTlsProtocol::Imap, true).unwrap();
        assert!(sends_first);
    }

    #[test]
    fn none_protocol_is_rejected() {
        assert!(script_for(StartTlsProtocol::None, true).is_err());
    }
}
