//! Collection of error handling types and aliases.

use std::sync::Arc;

use thiserror::Error;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// SSH Key error.
    #[error(transparent)]
    Key(#[from] ssh_key::Error),

    /// Signature error during the key-exchange.
    #[error(transparent)]
    Signature(#[from] signature::Error),

    /// The peer never sent an identification banner.
    #[error("Peer closed the connection before sending an identification banner")]
    NoBanner,

    /// The peer identified with a protocol version this crate does not speak.
    #[error("Peer identified with an unsupported protocol version: `{0}`")]
    UnsupportedVersion(String),

    /// A packet could not be parsed off the wire.
    #[error("Malformed packet: {0}")]
    Framing(&'static str),

    /// The integrity check of an inbound packet failed.
    #[error("Packet failed the integrity check")]
    MacMismatch,

    /// The stream ended in the middle of a packet.
    #[error("Stream ended in the middle of a packet")]
    Truncated,

    /// The peer sent `SSH_MSG_DISCONNECT`.
    #[error("Peer disconnected with reason {code}: {reason}")]
    PeerDisconnect {
        /// The disconnect reason code.
        code: u32,

        /// The sanitized, human readable description sent by the peer.
        reason: String,
    },

    /// The peer sent `SSH_MSG_UNIMPLEMENTED`.
    #[error("Peer could not process one of our packets")]
    PeerUnimplemented,

    /// No registered handler covers the received message type.
    #[error("Peer sent a message of type {0} that no handler covers")]
    UnexpectedMessage(u8),

    /// The peer sent non-KEX traffic before the first key-exchange
    /// finished while `kex-strict` was negotiated.
    #[error("Peer sent a message of type {0} before the first key-exchange under strict-kex")]
    StrictKexViolation(u8),

    /// `send` was invoked from the dispatcher thread.
    #[error("Sending from the dispatcher thread would deadlock the transport")]
    Reentrancy,

    /// The asynchronous send queue is full.
    #[error("Peer forces replies faster than it reads them")]
    PeerFlooding,

    /// An operation was attempted on a closed transport.
    #[error("The transport is closed: {0}")]
    Closed(Arc<Error>),

    /// The connection has been closed on purpose by the local application.
    #[error("Disconnected by the application: {0}")]
    ByApplication(String),

    /// The key-exchange was torn down before it could complete.
    #[error("Key-exchange aborted, the transport is shutting down")]
    KexAborted,

    /// Protocol error in the key-exchange.
    #[error("Error in the key-exchange algorithm: {0}")]
    KexProtocol(&'static str),

    /// The server host key was refused by the verifier.
    #[error("The server host key was rejected")]
    HostKeyRejected,

    /// No common kex algorithm found between both sides.
    #[error("Unable to negociate a common kex algorithm")]
    NoCommonKex,

    /// No common host key algorithm found between both sides.
    #[error("Unable to negociate a common host key algorithm")]
    NoCommonKey,

    /// No common cipher algorithm found between both sides.
    #[error("Unable to negociate a common encryption algorithm")]
    NoCommonCipher,

    /// No common hmac algorithm found between both sides.
    #[error("Unable to negociate a common HMAC algorithm")]
    NoCommonHmac,

    /// No common compression algorithm found between both sides.
    #[error("Unable to negociate a common compression algorithm")]
    NoCommonCompression,

    /// An algorithm name negociated on the wire is not implemented here.
    #[error("The negociated algorithm is not supported")]
    UnsupportedAlgorithm,

    /// The hostname did not resolve to an address usable with the
    /// configured IP-version preference.
    #[error("Could not resolve `{0}` to a usable address")]
    Unresolved(String),

    /// Error while encrypting or decrypting messages.
    #[error("The cipher ended up in an error")]
    Cipher,
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
