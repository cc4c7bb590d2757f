use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use strum::{AsRefStr, EnumString};

use crate::{codec::BlockCipher, Error, Result};

/// SSH cipher algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cipher {
    /// AES-256 in counter (CTR) mode.
    Aes256Ctr,

    /// AES-192 in counter (CTR) mode.
    Aes192Ctr,

    /// AES-128 in counter (CTR) mode.
    Aes128Ctr,

    /// AES-256 in cipher block chaining (CBC) mode.
    Aes256Cbc,

    /// AES-192 in cipher block chaining (CBC) mode.
    Aes192Cbc,

    /// AES-128 in cipher block chaining (CBC) mode.
    Aes128Cbc,

    /// TripleDES in cipher block chaining (CBC) mode.
    #[strum(serialize = "3des-cbc")]
    TDesCbc,

    /// No cipher algorithm.
    #[default]
    None,
}

struct Keystream<C> {
    inner: C,
    block_size: usize,
}

impl<C: StreamCipher + Send> BlockCipher for Keystream<C> {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn process(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.try_apply_keystream(buf).map_err(|_| Error::Cipher)
    }
}

struct CbcEncrypt<C>(C);

impl<C: BlockEncryptMut + Send> BlockCipher for CbcEncrypt<C> {
    fn block_size(&self) -> usize {
        C::block_size()
    }

    fn process(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() % C::block_size() != 0 {
            return Err(Error::Cipher);
        }

        for block in buf.chunks_exact_mut(C::block_size()) {
            self.0
                .encrypt_block_mut(cipher::Block::<C>::from_mut_slice(block));
        }

        Ok(())
    }
}

struct CbcDecrypt<C>(C);

impl<C: BlockDecryptMut + Send> BlockCipher for CbcDecrypt<C> {
    fn block_size(&self) -> usize {
        C::block_size()
    }

    fn process(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() % C::block_size() != 0 {
            return Err(Error::Cipher);
        }

        for block in buf.chunks_exact_mut(C::block_size()) {
            self.0
                .decrypt_block_mut(cipher::Block::<C>::from_mut_slice(block));
        }

        Ok(())
    }
}

fn keystream<C>(key: &[u8], iv: &[u8], block_size: usize) -> Result<Option<Box<dyn BlockCipher>>>
where
    C: KeyIvInit + StreamCipher + Send + 'static,
{
    let inner = C::new_from_slices(key, iv).map_err(|_| Error::Cipher)?;

    Ok(Some(Box::new(Keystream { inner, block_size })))
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8]) -> Result<Option<Box<dyn BlockCipher>>>
where
    C: KeyIvInit + BlockEncryptMut + Send + 'static,
{
    Ok(Some(Box::new(CbcEncrypt(
        C::new_from_slices(key, iv).map_err(|_| Error::Cipher)?,
    ))))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8]) -> Result<Option<Box<dyn BlockCipher>>>
where
    C: KeyIvInit + BlockDecryptMut + Send + 'static,
{
    Ok(Some(Box::new(CbcDecrypt(
        C::new_from_slices(key, iv).map_err(|_| Error::Cipher)?,
    ))))
}

impl Cipher {
    /// Build the sealing direction of this cipher from derived key material.
    pub fn encryptor(&self, key: &[u8], iv: &[u8]) -> Result<Option<Box<dyn BlockCipher>>> {
        match self {
            // In CTR mode, encryption and decryption are the same
            Self::Aes256Ctr => keystream::<ctr::Ctr128BE<aes::Aes256>>(key, iv, 16),
            Self::Aes192Ctr => keystream::<ctr::Ctr128BE<aes::Aes192>>(key, iv, 16),
            Self::Aes128Ctr => keystream::<ctr::Ctr128BE<aes::Aes128>>(key, iv, 16),
            Self::Aes256Cbc => cbc_encrypt::<cbc::Encryptor<aes::Aes256>>(key, iv),
            Self::Aes192Cbc => cbc_encrypt::<cbc::Encryptor<aes::Aes192>>(key, iv),
            Self::Aes128Cbc => cbc_encrypt::<cbc::Encryptor<aes::Aes128>>(key, iv),
            Self::TDesCbc => cbc_encrypt::<cbc::Encryptor<des::TdesEde3>>(key, iv),
            Self::None => Ok(None),
        }
    }

    /// Build the opening direction of this cipher from derived key material.
    pub fn decryptor(&self, key: &[u8], iv: &[u8]) -> Result<Option<Box<dyn BlockCipher>>> {
        match self {
            Self::Aes256Ctr | Self::Aes192Ctr | Self::Aes128Ctr => self.encryptor(key, iv),
            Self::Aes256Cbc => cbc_decrypt::<cbc::Decryptor<aes::Aes256>>(key, iv),
            Self::Aes192Cbc => cbc_decrypt::<cbc::Decryptor<aes::Aes192>>(key, iv),
            Self::Aes128Cbc => cbc_decrypt::<cbc::Decryptor<aes::Aes128>>(key, iv),
            Self::TDesCbc => cbc_decrypt::<cbc::Decryptor<des::TdesEde3>>(key, iv),
            Self::None => Ok(None),
        }
    }

    /// The cipher block size.
    pub fn block_size(&self) -> usize {
        match self {
            Self::None | Self::TDesCbc => 8,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }

    /// The size of the keys to derive.
    pub fn key_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Aes128Cbc | Self::Aes128Ctr => 16,
            Self::TDesCbc | Self::Aes192Cbc | Self::Aes192Ctr => 24,
            Self::Aes256Cbc | Self::Aes256Ctr => 32,
        }
    }

    /// The size of the initialization vector to derive.
    pub fn iv_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::TDesCbc => 8,
            Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr => 16,
        }
    }
}
