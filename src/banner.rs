//! The identification string exchange of RFC 4253 §4.2, performed on a
//! fresh stream before any binary packet.

use std::io::{BufRead, Write};

use crate::{Error, Result};

/// Lines the peer may print before its banner (MOTDs and the like) are
/// tolerated up to this count.
const MAX_PRELUDE_LINES: usize = 50;

/// Upper bound on a single identification line, terminators included.
const MAX_LINE_LENGTH: usize = 8192;

/// Both identification strings, kept verbatim (without terminators) since
/// they are mandatory hash inputs of every key-exchange.
#[derive(Debug, Clone)]
pub struct Banners {
    /// The identification we sent.
    pub local: String,

    /// The identification the peer sent.
    pub peer: String,
}

/// Write our banner and read the peer's, tolerating non-banner prelude
/// lines, accepting protocol versions `2.0` and `1.99` only.
pub fn exchange(
    reader: &mut impl BufRead,
    writer: &mut impl Write,
    local: &str,
) -> Result<Banners> {
    writer.write_all(local.as_bytes())?;
    writer.write_all(b"\r\n")?;
    writer.flush()?;

    for _ in 0..MAX_PRELUDE_LINES {
        let mut line = Vec::new();
        std::io::Read::take(&mut *reader, MAX_LINE_LENGTH as u64)
            .read_until(b'\n', &mut line)?;

        if line.is_empty() {
            return Err(Error::NoBanner);
        }

        while matches!(line.last(), Some(b'\r' | b'\n')) {
            line.pop();
        }

        let line = String::from_utf8_lossy(&line).into_owned();
        if !line.starts_with("SSH-") {
            tracing::debug!("Skipping pre-banner line from peer: `{line}`");
            continue;
        }

        if !line.starts_with("SSH-2.0-") && !line.starts_with("SSH-1.99-") {
            return Err(Error::UnsupportedVersion(line));
        }

        tracing::debug!("Peer identified as `{line}`");

        return Ok(Banners {
            local: local.to_owned(),
            peer: line,
        });
    }

    Err(Error::NoBanner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(peer: &[u8]) -> Result<Banners> {
        let mut sink = Vec::new();

        exchange(&mut std::io::Cursor::new(peer), &mut sink, "SSH-2.0-hawser_test")
    }

    #[test]
    fn accepts_a_version_2_banner() {
        let banners = read(b"SSH-2.0-OpenSSH_9.6\r\n").unwrap();

        assert_eq!(banners.peer, "SSH-2.0-OpenSSH_9.6");
        assert_eq!(banners.local, "SSH-2.0-hawser_test");
    }

    #[test]
    fn accepts_a_legacy_1_99_banner_after_a_prelude() {
        let banners = read(b"welcome to the machine\nSSH-1.99-Legacy\r\n").unwrap();

        assert_eq!(banners.peer, "SSH-1.99-Legacy");
    }

    #[test]
    fn rejects_a_version_1_banner() {
        assert!(matches!(
            read(b"SSH-1.5-Ancient\r\n"),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn reports_a_stream_that_ends_without_a_banner() {
        assert!(matches!(read(b"nothing to see here\n"), Err(Error::NoBanner)));
        assert!(matches!(read(b""), Err(Error::NoBanner)));
    }

    #[test]
    fn writes_our_banner_with_crlf() {
        let mut sink = Vec::new();
        exchange(
            &mut std::io::Cursor::new(&b"SSH-2.0-peer\r\n"[..]),
            &mut sink,
            "SSH-2.0-hawser_test",
        )
        .unwrap();

        assert_eq!(sink, b"SSH-2.0-hawser_test\r\n");
    }
}
