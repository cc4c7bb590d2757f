//! The key-exchange engine seam: the transport forwards every KEX-set
//! packet to a [`KexEngine`], which drives the exchange and calls back
//! through [`KexLink`] to emit packets and install freshly derived
//! contexts.

use crate::{
    codec::NewKeys,
    config::{CryptoWishList, DhGexParameters},
    Result,
};

mod keys;
pub(crate) use keys::Keys;

mod curve25519;
pub use curve25519::ClientKex;

/// What the transport exposes to an engine.
///
/// Handing the engine a trait object instead of the transport itself
/// breaks the ownership cycle between the two.
pub trait KexLink: Send + Sync {
    /// Emit one KEX packet; marks the key-exchange as ongoing, parking
    /// application senders until [`KexLink::kex_finished`].
    fn send_kex(&self, payload: &[u8]) -> Result<()>;

    /// Install the freshly derived send contexts, resetting the send
    /// sequence number when `reset_seq` (strict-kex) demands it.
    fn install_send(&self, keys: NewKeys, reset_seq: bool) -> Result<()>;

    /// Install the freshly derived receive contexts, resetting the
    /// receive sequence number when `reset_seq` (strict-kex) demands it.
    fn install_recv(&self, keys: NewKeys, reset_seq: bool) -> Result<()>;

    /// Mark the exchange as done and release parked application senders.
    fn kex_finished(&self);
}

/// The outcome of a completed key-exchange, as exposed to the
/// authentication and channel layers.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// The negociated key-exchange algorithm name.
    pub kex_algorithm: String,

    /// The negociated host key algorithm name.
    pub host_key_algorithm: String,

    /// The negociated cipher, client to server.
    pub client_to_server_cipher: String,

    /// The negociated cipher, server to client.
    pub server_to_client_cipher: String,

    /// The negociated MAC, client to server.
    pub client_to_server_mac: String,

    /// The negociated MAC, server to client.
    pub server_to_client_mac: String,

    /// The negociated compression, client to server.
    pub client_to_server_compression: String,

    /// The negociated compression, server to client.
    pub server_to_client_compression: String,

    /// The raw server host key blob.
    pub server_host_key: Vec<u8>,
}

/// A key-exchange engine consumed by the transport.
///
/// The transport forwards `SSH_MSG_KEXINIT`, `SSH_MSG_NEWKEYS` and every
/// message in the 30..=49 range here and nowhere else.
pub trait KexEngine: Send + Sync {
    /// Start the initial exchange or a re-keying; a no-op when one is
    /// already running.
    fn initiate(&self, wishlist: &CryptoWishList, gex: &DhGexParameters) -> Result<()>;

    /// Process one KEX-set payload; `None` means the transport is
    /// closing and every waiter must be released.
    fn handle_message(&self, payload: Option<&[u8]>) -> Result<()>;

    /// Whether both sides advertised `kex-strict-{c,s}-v00@openssh.com`
    /// in their first `KEXINIT`.
    fn is_strict(&self) -> bool;

    /// The exchange hash of the first completed exchange, stable for the
    /// life of the connection.
    fn session_id(&self) -> Option<Vec<u8>>;

    /// Block until the `nth` (1-indexed) exchange completes and return
    /// the negociated outcome.
    fn connection_info(&self, nth: usize) -> Result<ConnectionInfo>;
}
