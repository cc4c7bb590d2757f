#![doc = concat!(
    "[![crates.io](https://img.shields.io/crates/v/", env!("CARGO_PKG_NAME"), ")](https://crates.io/crates/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "[![docs.rs](https://img.shields.io/docsrs/", env!("CARGO_PKG_NAME"), ")](https://docs.rs/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "![license](https://img.shields.io/crates/l/", env!("CARGO_PKG_NAME"), ")"
)]
#![doc = ""]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! The [`Transport`] owns a single TCP connection and delivers the
//! transport-layer guarantees of [`RFC 4253`]: banner exchange, binary
//! packet framing, key-exchange sequencing and re-keying, ordered
//! dispatch to registered handlers, and an orderly, once-only close.
//! Authentication and channels are collaborators built on top of it.
//!
//! [`RFC 4253`]: https://datatracker.ietf.org/doc/html/rfc4253
//!
//! ### Supported algorithms
//!
//! #### Key-exchange:
//! see [`algorithm::Kex`].
//!
//! #### Encryption:
//!
//! see [`algorithm::Cipher`].
//!
//! #### MACs
//!
//! see [`algorithm::Hmac`].
//!
//! #### Compression:
//!
//! see [`algorithm::Compress`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::undocumented_unsafe_blocks
)]
#![forbid(unsafe_code)]

mod error;
pub use error::{Error, Result};

pub mod algorithm;
pub mod banner;
pub mod codec;
pub mod config;
pub mod kex;
pub mod msg;
pub mod wire;

mod queue;
mod router;
pub use router::{MessageHandler, MessageRouter};

mod transport;
pub use transport::{ConnectionMonitor, Transport};
