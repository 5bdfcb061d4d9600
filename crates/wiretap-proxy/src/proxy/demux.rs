//! Protocol sniffing for the shared listener.
//!
//! A connection that opens with a well-formed HTTP/1.x request line is
//! plaintext; everything else, including connections that never produce a
//! full line in time, is handed to the TLS server.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE: u8 = 0x16;

const PEEK_SIZE: usize = 4096;
const PEEK_INTERVAL: Duration = Duration::from_millis(5);

static REQUEST_LINE_REGEX: OnceLock<Regex> = OnceLock::new();

fn request_line_regex() -> &'static Regex {
    REQUEST_LINE_REGEX.get_or_init(|| {
        Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+ [^\s]+ HTTP/\d\.\d\r?$").unwrap()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Tls,
}

/// Classify the bytes seen so far. `None` means more are needed.
pub fn classify(prefix: &[u8]) -> Option<Protocol> {
    let first = *prefix.first()?;
    if first == TLS_HANDSHAKE {
        return Some(Protocol::Tls);
    }

    let Some(end) = prefix.iter().position(|&b| b == b'\n') else {
        return (prefix.len() >= PEEK_SIZE).then_some(Protocol::Tls);
    };

    let line = std::str::from_utf8(&prefix[..end]).unwrap_or_default();
    if request_line_regex().is_match(line) {
        Some(Protocol::Http)
    } else {
        Some(Protocol::Tls)
    }
}

/// Peek at `stream` without consuming anything until it can be classified.
///
/// Returns `Ok(None)` when the peer closes before sending a byte.
pub async fn sniff(stream: &TcpStream, timeout: Duration) -> std::io::Result<Option<Protocol>> {
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; PEEK_SIZE];

    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(protocol) = classify(&buf[..n]) {
            return Ok(Some(protocol));
        }
        if Instant::now() >= deadline {
            return Ok(Some(Protocol::Tls));
        }
        tokio::time::sleep(PEEK_INTERVAL).await;
    }
}
