//! Per-connection configuration: target endpoint, algorithm wishlist and
//! the optional proxy / host-key collaborators.

use std::{net::TcpStream, sync::Arc, time::Duration};

use crate::{
    algorithm::{Cipher, Compress, Hmac, Kex},
    wire::NameList,
    Result,
};

/// Which address families name resolution may hand back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpPreference {
    /// Whatever the resolver returns first.
    #[default]
    Both,

    /// The first IPv4 address only.
    V4Only,

    /// The first IPv6 address only.
    V6Only,
}

/// The algorithms enabled for a session, each list in preference order.
#[derive(Debug, Clone)]
pub struct CryptoWishList {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Enabled algorithms for _server key signature_.
    pub host_keys: Vec<ssh_key::Algorithm>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<Hmac>,

    /// Enabled algorithms for _compression_.
    pub compressions: Vec<Compress>,
}

impl Default for CryptoWishList {
    fn default() -> Self {
        Self {
            kexs: vec![Kex::Curve25519Sha256, Kex::Curve25519Sha256Libssh],
            host_keys: vec![
                ssh_key::Algorithm::Ed25519,
                ssh_key::Algorithm::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP384,
                },
                ssh_key::Algorithm::Ecdsa {
                    curve: ssh_key::EcdsaCurve::NistP256,
                },
                ssh_key::Algorithm::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha512),
                },
                ssh_key::Algorithm::Rsa {
                    hash: Some(ssh_key::HashAlg::Sha256),
                },
                ssh_key::Algorithm::Rsa { hash: None },
                ssh_key::Algorithm::Dsa,
            ],
            ciphers: vec![
                Cipher::Aes256Ctr,
                Cipher::Aes192Ctr,
                Cipher::Aes128Ctr,
                Cipher::Aes256Cbc,
                Cipher::Aes192Cbc,
                Cipher::Aes128Cbc,
                Cipher::TDesCbc,
            ],
            macs: vec![
                Hmac::HmacSha512ETM,
                Hmac::HmacSha256ETM,
                Hmac::HmacSha512,
                Hmac::HmacSha256,
                Hmac::HmacSha1,
            ],
            compressions: vec![Compress::None, Compress::ZlibOpenssh],
        }
    }
}

impl CryptoWishList {
    /// The kex names as they go on the wire.
    pub(crate) fn kex_names(&self) -> NameList {
        NameList::from_iter(&self.kexs)
    }

    /// The host key algorithm names as they go on the wire.
    pub(crate) fn host_key_names(&self) -> NameList {
        NameList::from_iter(self.host_keys.iter().map(|algorithm| algorithm.as_str()))
    }

    /// The cipher names as they go on the wire.
    pub(crate) fn cipher_names(&self) -> NameList {
        NameList::from_iter(&self.ciphers)
    }

    /// The MAC names as they go on the wire.
    pub(crate) fn mac_names(&self) -> NameList {
        NameList::from_iter(&self.macs)
    }

    /// The compression names as they go on the wire.
    pub(crate) fn compression_names(&self) -> NameList {
        NameList::from_iter(&self.compressions)
    }
}

/// Group-size bounds forwarded to `diffie-hellman-group-exchange-*`
/// engines.
#[derive(Debug, Clone, Copy)]
pub struct DhGexParameters {
    /// Smallest acceptable group, in bits.
    pub min: u32,

    /// Preferred group size, in bits.
    pub preferred: u32,

    /// Largest acceptable group, in bits.
    pub max: u32,
}

impl Default for DhGexParameters {
    fn default() -> Self {
        Self {
            min: 2048,
            preferred: 3072,
            max: 8192,
        }
    }
}

/// A collaborator producing an already-connected socket, bypassing local
/// resolution and connect.
pub trait ProxyData: Send + Sync {
    /// Open a connection to `host:port` through the proxy.
    fn open_connection(&self, host: &str, port: u16, timeout: Duration) -> Result<TcpStream>;
}

/// A collaborator deciding whether a server host key is acceptable, a
/// known-hosts database typically.
pub trait ServerHostKeyVerifier: Send + Sync {
    /// Judge the raw host key blob presented by `host:port`; `false` or
    /// an error abort the key-exchange.
    fn verify(&self, host: &str, port: u16, algorithm: &str, key: &[u8]) -> Result<bool>;
}

/// Everything needed to reach and secure one connection.
#[derive(Clone)]
pub struct Profile {
    /// Target host name or address.
    pub host: String,

    /// Target port.
    pub port: u16,

    /// Address family restriction for name resolution.
    pub ip_preference: IpPreference,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Identification banner to send, without terminators.
    pub banner: String,

    /// The algorithms enabled for this session.
    pub wishlist: CryptoWishList,

    /// Group-exchange bounds.
    pub gex: DhGexParameters,

    /// Optional proxy collaborator.
    pub proxy: Option<Arc<dyn ProxyData>>,

    /// Optional host-key verification collaborator.
    pub verifier: Option<Arc<dyn ServerHostKeyVerifier>>,
}

impl Profile {
    /// A profile for `host:port` with every other knob at its default.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ip_preference: IpPreference::default(),
            connect_timeout: Duration::from_secs(30),
            banner: concat!("SSH-2.0-", env!("CARGO_PKG_NAME"), "_", env!("CARGO_PKG_VERSION"))
                .to_owned(),
            wishlist: CryptoWishList::default(),
            gex: DhGexParameters::default(),
            proxy: None,
            verifier: None,
        }
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ip_preference", &self.ip_preference)
            .field("connect_timeout", &self.connect_timeout)
            .field("banner", &self.banner)
            .field("proxy", &self.proxy.is_some())
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_wishlist_spells_wire_names() {
        let wishlist = CryptoWishList::default();

        assert!(wishlist.kex_names().contains("curve25519-sha256"));
        assert!(wishlist.host_key_names().contains("ssh-ed25519"));
        assert!(wishlist.cipher_names().contains("3des-cbc"));
        assert!(wishlist.mac_names().contains("hmac-sha2-512-etm@openssh.com"));
        assert!(wishlist.compression_names().contains("none"));
    }
}
