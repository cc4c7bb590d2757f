use digest::{Digest, FixedOutputReset};
use secrecy::{ExposeSecret, SecretBox};

use crate::algorithm::{Cipher, Hmac};

/// Key material derived for one direction, per RFC 4253 §7.2.
pub(crate) struct Keys {
    /// Cipher _initialization vector_.
    iv: SecretBox<Vec<u8>>,

    /// Cipher _key_.
    key: SecretBox<Vec<u8>>,

    /// Hmac _key_.
    mac: SecretBox<Vec<u8>>,
}

impl Keys {
    /// Derive the client-to-server letters `A`, `C`, `E`.
    pub fn client_to_server<D: Digest + FixedOutputReset>(
        secret: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        mac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(secret, hash, b'A', session_id, cipher.iv_size()),
            key: Self::derive::<D>(secret, hash, b'C', session_id, cipher.key_size()),
            mac: Self::derive::<D>(secret, hash, b'E', session_id, mac.key_size()),
        }
    }

    /// Derive the server-to-client letters `B`, `D`, `F`.
    pub fn server_to_client<D: Digest + FixedOutputReset>(
        secret: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        mac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(secret, hash, b'B', session_id, cipher.iv_size()),
            key: Self::derive::<D>(secret, hash, b'D', session_id, cipher.key_size()),
            mac: Self::derive::<D>(secret, hash, b'F', session_id, mac.key_size()),
        }
    }

    /// `HASH(K || H || kind || session_id)`, extended with
    /// `HASH(K || H || accumulated)` blocks until `size` is reached;
    /// `secret` is the `mpint`-normalized shared secret.
    fn derive<D: Digest + FixedOutputReset>(
        secret: &[u8],
        hash: &[u8],
        kind: u8,
        session_id: &[u8],
        size: usize,
    ) -> SecretBox<Vec<u8>> {
        SecretBox::<Vec<u8>>::init_with_mut(|key| {
            let mut hasher = D::new()
                .chain_update((secret.len() as u32).to_be_bytes())
                .chain_update(secret)
                .chain_update(hash)
                .chain_update([kind])
                .chain_update(session_id);

            key.extend_from_slice(&hasher.finalize_reset());

            while key.len() < size {
                hasher = hasher
                    .chain_update((secret.len() as u32).to_be_bytes())
                    .chain_update(secret)
                    .chain_update(hash)
                    .chain_update(&*key);

                key.extend_from_slice(&hasher.finalize_reset());
            }

            key.truncate(size);
        })
    }

    /// The initialization vector bytes.
    pub fn iv(&self) -> &[u8] {
        self.iv.expose_secret()
    }

    /// The cipher key bytes.
    pub fn key(&self) -> &[u8] {
        self.key.expose_secret()
    }

    /// The MAC key bytes.
    pub fn mac(&self) -> &[u8] {
        self.mac.expose_secret()
    }
}

#[cfg(test)]
mod tests {
    use sha2::Sha256;

    use super::*;

    #[test]
    fn derivation_is_deterministic_and_sized() {
        let secret = [0x5a; 32];
        let hash = [0x11; 32];
        let session = [0x22; 32];

        let first = Keys::client_to_server::<Sha256>(
            &secret,
            &hash,
            &session,
            &Cipher::Aes256Ctr,
            &Hmac::HmacSha512,
        );
        let again = Keys::client_to_server::<Sha256>(
            &secret,
            &hash,
            &session,
            &Cipher::Aes256Ctr,
            &Hmac::HmacSha512,
        );

        assert_eq!(first.iv().len(), 16);
        assert_eq!(first.key().len(), 32);
        // sha-2-512 keys need two expansion rounds out of a sha-2-256 digest
        assert_eq!(first.mac().len(), 64);

        assert_eq!(first.key(), again.key());
        assert_eq!(first.mac(), again.mac());
    }

    #[test]
    fn directions_diverge() {
        let secret = [0x5a; 32];
        let hash = [0x11; 32];
        let session = [0x22; 32];

        let tx = Keys::client_to_server::<Sha256>(
            &secret,
            &hash,
            &session,
            &Cipher::Aes128Ctr,
            &Hmac::HmacSha256,
        );
        let rx = Keys::server_to_client::<Sha256>(
            &secret,
            &hash,
            &session,
            &Cipher::Aes128Ctr,
            &Hmac::HmacSha256,
        );

        assert_ne!(tx.key(), rx.key());
        assert_ne!(tx.iv(), rx.iv());
    }
}
