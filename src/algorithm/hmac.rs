use std::marker::PhantomData;

use digest::OutputSizeUser;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use strum::{AsRefStr, EnumString};

use crate::codec;

/// SSH hmac algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Hmac {
    /// HMAC with sha-2-512 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-512-etm@openssh.com")]
    HmacSha512ETM,

    /// HMAC with sha-2-256 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-256-etm@openssh.com")]
    HmacSha256ETM,

    /// HMAC with sha-2-512 digest.
    #[strum(serialize = "hmac-sha2-512")]
    HmacSha512,

    /// HMAC with sha-2-256 digest.
    #[strum(serialize = "hmac-sha2-256")]
    HmacSha256,

    /// HMAC with sha-1 digest on encrypted message.
    #[strum(serialize = "hmac-sha1-etm@openssh.com")]
    HmacSha1ETM,

    /// HMAC with sha-1 digest.
    HmacSha1,

    /// HMAC with md5 digest on encrypted message.
    #[strum(serialize = "hmac-md5-etm@openssh.com")]
    HmacMd5ETM,

    /// HMAC with md5 digest.
    HmacMd5,

    /// No HMAC algorithm.
    #[default]
    None,
}

/// A keyed instance; the mac state is rebuilt from the key on every
/// packet, which keeps the struct trivially `Send`.
struct Keyed<D> {
    key: Vec<u8>,
    etm: bool,
    _digest: PhantomData<fn() -> D>,
}

impl<D: digest::Mac + digest::KeyInit> Keyed<D> {
    fn chained(&self, seq: u32, data: &[u8]) -> D {
        <D as digest::Mac>::new_from_slice(&self.key)
            .expect("HMAC accepts keys of any size")
            .chain_update(seq.to_be_bytes())
            .chain_update(data)
    }
}

impl<D: digest::Mac + digest::KeyInit> codec::Mac for Keyed<D> {
    fn size(&self) -> usize {
        <D as OutputSizeUser>::output_size()
    }

    fn etm(&self) -> bool {
        self.etm
    }

    fn sign(&mut self, seq: u32, data: &[u8]) -> Vec<u8> {
        self.chained(seq, data).finalize().into_bytes().to_vec()
    }

    fn verify(
        &mut self,
        seq: u32,
        data: &[u8],
        tag: &[u8],
    ) -> std::result::Result<(), digest::MacError> {
        self.chained(seq, data).verify_slice(tag)
    }
}

impl Hmac {
    /// Build a keyed instance from derived key material.
    pub fn keyed(&self, key: &[u8]) -> Option<Box<dyn codec::Mac>> {
        fn keyed<D: digest::Mac + digest::KeyInit + 'static>(
            key: &[u8],
            etm: bool,
        ) -> Option<Box<dyn codec::Mac>> {
            Some(Box::new(Keyed::<D> {
                key: key.to_vec(),
                etm,
                _digest: PhantomData,
            }))
        }

        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => {
                keyed::<hmac::Hmac<Sha512>>(key, self.etm())
            }
            Self::HmacSha256ETM | Self::HmacSha256 => {
                keyed::<hmac::Hmac<Sha256>>(key, self.etm())
            }
            Self::HmacSha1ETM | Self::HmacSha1 => keyed::<hmac::Hmac<Sha1>>(key, self.etm()),
            Self::HmacMd5ETM | Self::HmacMd5 => keyed::<hmac::Hmac<Md5>>(key, self.etm()),
            Self::None => None,
        }
    }

    /// The size of the keys to derive.
    pub fn key_size(&self) -> usize {
        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => Sha512::output_size(),
            Self::HmacSha256ETM | Self::HmacSha256 => Sha256::output_size(),
            Self::HmacSha1ETM | Self::HmacSha1 => Sha1::output_size(),
            Self::HmacMd5ETM | Self::HmacMd5 => Md5::output_size(),
            Self::None => 0,
        }
    }

    /// Whether the tag is computed over the ciphertext.
    pub fn etm(&self) -> bool {
        matches!(
            self,
            Self::HmacSha512ETM | Self::HmacSha256ETM | Self::HmacSha1ETM | Self::HmacMd5ETM
        )
    }
}
