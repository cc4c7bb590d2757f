use std::io::{Read, Write};

use strum::{AsRefStr, EnumString};

use crate::{
    codec::{self, PACKET_MAX_SIZE},
    Result,
};

/// SSH compression algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Compress {
    /// zlib compression, deferred until after user authentication
    /// (OpenSSH mode).
    #[strum(serialize = "zlib@openssh.com")]
    ZlibOpenssh,

    /// zlib compression.
    Zlib,

    /// No compression algorithm.
    #[default]
    None,
}

struct Flate {
    delayed: bool,
}

impl codec::Compressor for Flate {
    fn delayed(&self) -> bool {
        self.delayed
    }

    fn compress(&mut self, buf: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = libflate::zlib::Encoder::new(Vec::with_capacity(buf.len()))?;

        encoder.write_all(buf)?;

        Ok(encoder.finish().into_result()?)
    }

    fn decompress(&mut self, buf: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(buf.len());
        let decoder = libflate::zlib::Decoder::new(std::io::Cursor::new(buf))?;

        decoder
            .take(PACKET_MAX_SIZE as u64)
            .read_to_end(&mut buffer)?;

        Ok(buffer)
    }
}

impl Compress {
    /// Build the codec for one direction, or `None` when no compression
    /// was negociated.
    pub fn compressor(&self) -> Option<Box<dyn codec::Compressor>> {
        match self {
            Self::ZlibOpenssh => Some(Box::new(Flate { delayed: true })),
            Self::Zlib => Some(Box::new(Flate { delayed: false })),
            Self::None => None,
        }
    }
}
