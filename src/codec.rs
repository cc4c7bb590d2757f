//! Binary-packet framing of RFC 4253 §6: length and padding, MAC, cipher
//! and compression, with one monotonic sequence number per direction.
//!
//! The codec is split into an [`Encoder`] and a [`Decoder`] half so the
//! transport can hand each to a different thread; neither half knows about
//! the other.

use std::io::{BufRead, BufReader, Read, Write};

use rand::Rng;

use crate::{Error, Result};

/// Maximum size of a whole packet, as bounded by RFC 4253 §6.1.
pub const PACKET_MAX_SIZE: usize = 35_000;

/// Size of the dispatcher's reusable payload buffer: the maximum packet
/// plus the length-field margin.
pub const RECV_BUFFER_SIZE: usize = PACKET_MAX_SIZE + 4;

const MIN_PAD_SIZE: usize = 4;
const MIN_ALIGN: usize = 8;
const MIN_PACKET_SIZE: usize = 16;

/// One direction of a negociated block or stream cipher, already keyed.
pub trait BlockCipher: Send {
    /// The cipher block size, never below 8 for padding purposes.
    fn block_size(&self) -> usize;

    /// Transform `buf` in place, advancing the cipher state.
    fn process(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// A keyed message authentication code.
pub trait Mac: Send {
    /// The tag size in bytes.
    fn size(&self) -> usize;

    /// Whether the tag covers the ciphertext (`*-etm@openssh.com`)
    /// instead of the plaintext.
    fn etm(&self) -> bool;

    /// Produce the tag over `seq || data`.
    fn sign(&mut self, seq: u32, data: &[u8]) -> Vec<u8>;

    /// Check a received tag over `seq || data`.
    fn verify(&mut self, seq: u32, data: &[u8], tag: &[u8])
        -> std::result::Result<(), digest::MacError>;
}

/// A negociated compression codec.
pub trait Compressor: Send {
    /// Whether activation is deferred until after user authentication
    /// (`zlib@openssh.com`).
    fn delayed(&self) -> bool;

    /// Compress a payload.
    fn compress(&mut self, buf: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a payload, bounded by [`PACKET_MAX_SIZE`].
    fn decompress(&mut self, buf: &[u8]) -> Result<Vec<u8>>;
}

/// The algorithm contexts of one direction, installed together when a
/// key-exchange concludes.
pub struct NewKeys {
    /// The cipher, or `None` to keep the direction in the clear.
    pub cipher: Option<Box<dyn BlockCipher>>,

    /// The MAC, or `None` for none.
    pub mac: Option<Box<dyn Mac>>,

    /// The compressor, or `None` for none.
    pub compressor: Option<Box<dyn Compressor>>,
}

impl std::fmt::Debug for NewKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewKeys")
            .field("cipher", &self.cipher.is_some())
            .field("mac", &self.mac.is_some())
            .field("compressor", &self.compressor.is_some())
            .finish()
    }
}

fn padding(payload: usize, block_size: usize, etm: bool) -> u8 {
    let align = block_size.max(MIN_ALIGN);

    // In etm mode the length field is neither encrypted nor padded.
    let size = if etm {
        std::mem::size_of::<u8>() + payload
    } else {
        std::mem::size_of::<u32>() + std::mem::size_of::<u8>() + payload
    };
    let padding = align - size % align;

    let padding = if padding < MIN_PAD_SIZE {
        padding + align
    } else {
        padding
    };

    if size + padding < block_size.max(MIN_PACKET_SIZE) {
        (padding + align) as u8
    } else {
        padding as u8
    }
}

/// The sending half of the codec.
pub struct Encoder<W> {
    inner: W,

    cipher: Option<Box<dyn BlockCipher>>,
    mac: Option<Box<dyn Mac>>,
    compressor: Option<Box<dyn Compressor>>,
    compressing: bool,

    seq: u32,
}

impl<W: Write> Encoder<W> {
    /// Wrap a writer; everything starts in the clear.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            cipher: None,
            mac: None,
            compressor: None,
            compressing: false,
            seq: 0,
        }
    }

    /// Encode and write one packet, advancing the send sequence number.
    pub fn send_one(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::Framing("a packet payload is at least the type byte"));
        }

        let (ty, plain_len) = (payload[0], payload.len());

        let compressed;
        let payload = if self.compressing {
            match &mut self.compressor {
                Some(compressor) => {
                    compressed = compressor.compress(payload)?;
                    &compressed[..]
                }
                None => payload,
            }
        } else {
            payload
        };

        let block_size = self.cipher.as_ref().map_or(MIN_ALIGN, |c| c.block_size());
        let etm = self.mac.as_ref().is_some_and(|m| m.etm());
        let padding = padding(payload.len(), block_size, etm);

        let mut packet = Vec::with_capacity(4 + 1 + payload.len() + padding as usize);
        packet.extend_from_slice(&((1 + payload.len() + padding as usize) as u32).to_be_bytes());
        packet.push(padding);
        packet.extend_from_slice(payload);

        let mut rng = rand::thread_rng();
        packet.resize_with(packet.len() + padding as usize, || rng.gen());

        let mut tag = match &mut self.mac {
            Some(mac) if !mac.etm() => mac.sign(self.seq, &packet),
            _ => Vec::new(),
        };

        if let Some(cipher) = &mut self.cipher {
            if etm {
                cipher.process(&mut packet[4..])?;
            } else {
                cipher.process(&mut packet)?;
            }
        }

        if etm {
            if let Some(mac) = &mut self.mac {
                tag = mac.sign(self.seq, &packet);
            }
        }

        self.inner.write_all(&packet)?;
        self.inner.write_all(&tag)?;
        self.inner.flush()?;

        tracing::trace!("-~> #{}: ^{ty:#x} ({plain_len} bytes)", self.seq);

        self.seq = self.seq.wrapping_add(1);

        Ok(())
    }

    /// Install a new send cipher.
    pub fn set_cipher(&mut self, cipher: Option<Box<dyn BlockCipher>>) {
        self.cipher = cipher;
    }

    /// Install a new send MAC.
    pub fn set_mac(&mut self, mac: Option<Box<dyn Mac>>) {
        self.mac = mac;
    }

    /// Install a new send compressor; delayed ones stay dormant until
    /// [`Encoder::start_compression`].
    pub fn set_compressor(&mut self, compressor: Option<Box<dyn Compressor>>) {
        self.compressing = compressor.as_ref().is_some_and(|c| !c.delayed());
        self.compressor = compressor;
    }

    /// Install every context of a direction at once.
    pub fn install(&mut self, keys: NewKeys) {
        self.set_cipher(keys.cipher);
        self.set_mac(keys.mac);
        self.set_compressor(keys.compressor);
    }

    /// Activate a delayed compressor.
    pub fn start_compression(&mut self) {
        if self.compressor.is_some() {
            self.compressing = true;
        }
    }

    /// Reset the send sequence number, legal only at a strict-kex key
    /// change.
    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    /// The next send sequence number.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// An upper bound on the bytes this codec adds around a payload,
    /// used by upper layers to size their windows.
    pub fn overhead_estimate(&self) -> usize {
        let align = self
            .cipher
            .as_ref()
            .map_or(MIN_ALIGN, |c| c.block_size())
            .max(MIN_ALIGN);
        let mac = self.mac.as_ref().map_or(0, |m| m.size());

        4 + 1 + 2 * align + mac
    }
}

/// The receiving half of the codec.
pub struct Decoder<R> {
    inner: BufReader<R>,

    cipher: Option<Box<dyn BlockCipher>>,
    mac: Option<Box<dyn Mac>>,
    compressor: Option<Box<dyn Compressor>>,
    compressing: bool,

    seq: u32,
}

impl<R: Read> Decoder<R> {
    /// Wrap an already-buffered reader, as handed over by the banner
    /// exchange; everything starts in the clear.
    pub fn from_reader(inner: BufReader<R>) -> Self {
        Self {
            inner,
            cipher: None,
            mac: None,
            compressor: None,
            compressing: false,
            seq: 0,
        }
    }

    fn truncated(err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(err)
        }
    }

    /// Read the first bytes of a packet, reporting a clean close at the
    /// packet boundary as an I/O error rather than a truncation.
    fn read_leading(inner: &mut BufReader<R>, buf: &mut [u8]) -> Result<()> {
        if inner.fill_buf()?.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }

        inner.read_exact(buf).map_err(Self::truncated)
    }

    fn read_rest(inner: &mut BufReader<R>, buf: &mut [u8]) -> Result<()> {
        inner.read_exact(buf).map_err(Self::truncated)
    }

    /// Block until one whole packet is available, decrypt, verify and
    /// decompress it, copy the plaintext payload into `out` and return
    /// its length.
    pub fn receive_one(&mut self, out: &mut [u8]) -> Result<usize> {
        let etm = self.mac.as_ref().is_some_and(|m| m.etm());
        let encrypted_length = self.cipher.is_some() && !etm;

        // `packet` holds `uint32 length || padlen || payload || padding`
        // in the clear once this block is done.
        let packet = if encrypted_length {
            let block_size = self.cipher.as_ref().map_or(MIN_ALIGN, |c| c.block_size());

            let mut packet = vec![0u8; block_size];
            Self::read_leading(&mut self.inner, &mut packet)?;
            if let Some(cipher) = &mut self.cipher {
                cipher.process(&mut packet)?;
            }

            let length = Self::checked_length(&packet[..4])?;
            if (4 + length) % block_size != 0 {
                return Err(Error::Framing("packet length breaks cipher alignment"));
            }

            packet.resize(4 + length, 0);
            Self::read_rest(&mut self.inner, &mut packet[block_size..])?;
            if let Some(cipher) = &mut self.cipher {
                cipher.process(&mut packet[block_size..])?;
            }

            if let Some(mac) = &mut self.mac {
                let mut tag = vec![0u8; mac.size()];
                Self::read_rest(&mut self.inner, &mut tag)?;

                mac.verify(self.seq, &packet, &tag)
                    .map_err(|_| Error::MacMismatch)?;
            }

            packet
        } else {
            // etm, or no cipher at all: the length field travels in the
            // clear either way.
            let mut head = [0u8; 4];
            Self::read_leading(&mut self.inner, &mut head)?;

            let length = Self::checked_length(&head)?;
            if etm {
                if let Some(cipher) = &self.cipher {
                    if length % cipher.block_size() != 0 {
                        return Err(Error::Framing("packet length breaks cipher alignment"));
                    }
                }
            }

            let mut packet = vec![0u8; 4 + length];
            packet[..4].copy_from_slice(&head);
            Self::read_rest(&mut self.inner, &mut packet[4..])?;

            if let Some(mac) = &mut self.mac {
                let mut tag = vec![0u8; mac.size()];
                Self::read_rest(&mut self.inner, &mut tag)?;

                mac.verify(self.seq, &packet, &tag)
                    .map_err(|_| Error::MacMismatch)?;
            }

            if let Some(cipher) = &mut self.cipher {
                cipher.process(&mut packet[4..])?;
            }

            packet
        };

        let padding = packet[4] as usize;
        let length = packet.len() - 4;
        if padding < MIN_PAD_SIZE || padding + 2 > length {
            return Err(Error::Framing("padding does not fit the packet"));
        }

        let payload = &packet[5..4 + length - padding];
        let written = if self.compressing {
            match &mut self.compressor {
                Some(compressor) => {
                    let plain = compressor.decompress(payload)?;
                    if plain.len() > out.len() {
                        return Err(Error::Framing("decompressed payload too large"));
                    }

                    out[..plain.len()].copy_from_slice(&plain);
                    plain.len()
                }
                None => return Err(Error::Framing("compression active without a codec")),
            }
        } else {
            if payload.len() > out.len() {
                return Err(Error::Framing("payload exceeds the receive buffer"));
            }

            out[..payload.len()].copy_from_slice(payload);
            payload.len()
        };

        tracing::trace!("<~- #{}: ^{:#x} ({} bytes)", self.seq, out[0], written);

        self.seq = self.seq.wrapping_add(1);

        Ok(written)
    }

    fn checked_length(head: &[u8]) -> Result<usize> {
        let length = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;

        if !(5..=PACKET_MAX_SIZE).contains(&length) {
            return Err(Error::Framing("packet length out of bounds"));
        }

        Ok(length)
    }

    /// Install a new receive cipher.
    pub fn set_cipher(&mut self, cipher: Option<Box<dyn BlockCipher>>) {
        self.cipher = cipher;
    }

    /// Install a new receive MAC.
    pub fn set_mac(&mut self, mac: Option<Box<dyn Mac>>) {
        self.mac = mac;
    }

    /// Install a new receive compressor; delayed ones stay dormant until
    /// [`Decoder::start_compression`].
    pub fn set_compressor(&mut self, compressor: Option<Box<dyn Compressor>>) {
        self.compressing = compressor.as_ref().is_some_and(|c| !c.delayed());
        self.compressor = compressor;
    }

    /// Install every context of a direction at once.
    pub fn install(&mut self, keys: NewKeys) {
        self.set_cipher(keys.cipher);
        self.set_mac(keys.mac);
        self.set_compressor(keys.compressor);
    }

    /// Activate a delayed compressor.
    pub fn start_compression(&mut self) {
        if self.compressor.is_some() {
            self.compressing = true;
        }
    }

    /// Reset the receive sequence number, legal only at a strict-kex key
    /// change.
    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    /// The next receive sequence number.
    pub fn seq(&self) -> u32 {
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::algorithm::{Cipher, Compress, Hmac};

    const KEY: [u8; 32] = [0x42; 32];
    const IV: [u8; 16] = [0x17; 16];
    const MAC_KEY: [u8; 32] = [0x99; 32];

    fn pair(cipher: &str, mac: &str) -> (Encoder<Vec<u8>>, impl FnOnce(Vec<u8>) -> Decoder<std::io::Cursor<Vec<u8>>>) {
        let cipher: Cipher = cipher.parse().unwrap();
        let mac: Hmac = mac.parse().unwrap();

        let mut encoder = Encoder::new(Vec::new());
        encoder.set_cipher(cipher.encryptor(&KEY[..cipher.key_size()], &IV[..cipher.iv_size()]).unwrap());
        encoder.set_mac(mac.keyed(&MAC_KEY[..]));

        let install = move |bytes: Vec<u8>| {
            let mut decoder = Decoder::from_reader(BufReader::new(std::io::Cursor::new(bytes)));
            decoder.set_cipher(cipher.decryptor(&KEY[..cipher.key_size()], &IV[..cipher.iv_size()]).unwrap());
            decoder.set_mac(mac.keyed(&MAC_KEY[..]));

            decoder
        };

        (encoder, install)
    }

    #[test]
    fn plaintext_roundtrip_counts_sequence_numbers() {
        let mut encoder = Encoder::new(Vec::new());
        encoder.send_one(&[20, 1, 2, 3]).unwrap();
        encoder.send_one(&[21]).unwrap();
        assert_eq!(encoder.seq(), 2);

        let mut decoder = Decoder::from_reader(BufReader::new(std::io::Cursor::new(encoder.inner)));
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        let len = decoder.receive_one(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[20, 1, 2, 3]);
        let len = decoder.receive_one(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[21]);
        assert_eq!(decoder.seq(), 2);
    }

    #[rstest]
    #[case("aes128-ctr", "hmac-sha2-256")]
    #[case("aes256-ctr", "hmac-sha2-512")]
    #[case("aes192-cbc", "hmac-sha1")]
    #[case("3des-cbc", "hmac-md5")]
    #[case("aes128-ctr", "hmac-sha2-256-etm@openssh.com")]
    #[case("aes256-cbc", "hmac-sha2-512-etm@openssh.com")]
    fn encrypted_roundtrip(#[case] cipher: &str, #[case] mac: &str) {
        let (mut encoder, install) = pair(cipher, mac);

        let payloads: [&[u8]; 3] = [&[50, 0, 0, 0, 1], &[99; 300], &[2]];
        for payload in payloads {
            encoder.send_one(payload).unwrap();
        }

        let mut decoder = install(encoder.inner);
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        for payload in payloads {
            let len = decoder.receive_one(&mut buf).unwrap();
            assert_eq!(&buf[..len], payload);
        }
    }

    #[rstest]
    #[case("aes128-ctr", "hmac-sha2-256")]
    #[case("aes128-ctr", "hmac-sha2-256-etm@openssh.com")]
    fn tampering_is_detected(#[case] cipher: &str, #[case] mac: &str) {
        let (mut encoder, install) = pair(cipher, mac);
        encoder.send_one(&[50, 1, 2, 3]).unwrap();

        let mut bytes = encoder.inner;
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let mut decoder = install(bytes);
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        assert!(matches!(decoder.receive_one(&mut buf), Err(Error::MacMismatch)));
    }

    #[test]
    fn a_stream_cut_mid_packet_is_a_truncation() {
        let mut encoder = Encoder::new(Vec::new());
        encoder.send_one(&[50, 1, 2, 3]).unwrap();

        let mut bytes = encoder.inner;
        bytes.truncate(bytes.len() - 3);

        let mut decoder = Decoder::from_reader(BufReader::new(std::io::Cursor::new(bytes)));
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        assert!(matches!(decoder.receive_one(&mut buf), Err(Error::Truncated)));
    }

    #[test]
    fn a_clean_close_at_the_boundary_is_not_a_truncation() {
        let mut decoder =
            Decoder::from_reader(BufReader::new(std::io::Cursor::new(Vec::<u8>::new())));
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        assert!(matches!(decoder.receive_one(&mut buf), Err(Error::Io(_))));
    }

    #[test]
    fn an_absurd_length_is_a_framing_error() {
        let mut bytes = vec![0xff, 0xff, 0xff, 0xff];
        bytes.extend_from_slice(&[0; 16]);

        let mut decoder = Decoder::from_reader(BufReader::new(std::io::Cursor::new(bytes)));
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        assert!(matches!(decoder.receive_one(&mut buf), Err(Error::Framing(_))));
    }

    #[test]
    fn sequence_numbers_reset_at_the_packet_boundary() {
        let (mut encoder, install) = pair("aes128-ctr", "hmac-sha2-256");
        encoder.send_one(&[21]).unwrap();
        encoder.reset_seq();
        assert_eq!(encoder.seq(), 0);
        encoder.send_one(&[5, 0]).unwrap();

        let mut decoder = install(encoder.inner);
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        decoder.receive_one(&mut buf).unwrap();
        decoder.reset_seq();
        let len = decoder.receive_one(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[5, 0]);
    }

    #[test]
    fn padding_respects_alignment_and_minimums() {
        for payload in [0usize, 1, 7, 8, 57, 255, 32_000] {
            for (block, etm) in [(8, false), (16, false), (16, true)] {
                let pad = padding(payload, block, etm) as usize;
                let size = if etm { 1 + payload } else { 5 + payload };

                assert!(pad >= MIN_PAD_SIZE);
                assert_eq!((size + pad) % block.max(MIN_ALIGN), 0);
            }
        }
    }

    #[test]
    fn delayed_compression_waits_for_activation() {
        let compress: Compress = "zlib@openssh.com".parse().unwrap();

        let mut encoder = Encoder::new(Vec::new());
        encoder.set_compressor(compress.compressor());

        let payload = vec![7u8; 600];
        encoder.send_one(&payload).unwrap();
        let before = encoder.inner.len();

        encoder.start_compression();
        encoder.send_one(&payload).unwrap();
        let after = encoder.inner.len() - before;
        assert!(after < before, "compressed packet should be smaller");

        let mut decoder = Decoder::from_reader(BufReader::new(std::io::Cursor::new(encoder.inner)));
        decoder.set_compressor(compress.compressor());

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let len = decoder.receive_one(&mut buf).unwrap();
        assert_eq!(&buf[..len], &payload[..]);

        decoder.start_compression();
        let len = decoder.receive_one(&mut buf).unwrap();
        assert_eq!(&buf[..len], &payload[..]);
    }

    #[test]
    fn immediate_compression_roundtrip() {
        let compress: Compress = "zlib".parse().unwrap();

        let mut encoder = Encoder::new(Vec::new());
        encoder.set_compressor(compress.compressor());
        let payload = vec![1u8; 2_000];
        encoder.send_one(&payload).unwrap();

        let mut decoder = Decoder::from_reader(BufReader::new(std::io::Cursor::new(encoder.inner)));
        decoder.set_compressor(compress.compressor());

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let len = decoder.receive_one(&mut buf).unwrap();
        assert_eq!(&buf[..len], &payload[..]);
    }

    #[test]
    fn overhead_estimate_covers_the_actual_overhead() {
        let (mut encoder, _) = pair("aes256-ctr", "hmac-sha2-512");
        let estimate = encoder.overhead_estimate();

        let payload = [50u8; 100];
        encoder.send_one(&payload).unwrap();

        assert!(encoder.inner.len() - payload.len() <= estimate);
    }
}
