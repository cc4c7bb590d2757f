//! Algorithm implementations for **compression**, **encryption**,
//! **integrity** and **key-exchange** naming.

use std::str::FromStr;

use crate::{wire::NameList, Error, Result};

mod cipher;
pub use cipher::Cipher;

mod compress;
pub use compress::Compress;

mod hmac;
pub use hmac::Hmac;

mod kex;
pub use kex::Kex;

/// Resolve one negociated algorithm: the first of our names the peer also
/// offers, parsed into its enum.
pub(crate) fn preferred<T: FromStr>(
    ours: &NameList,
    theirs: &NameList,
    missing: fn() -> Error,
) -> Result<T> {
    ours.preferred_in(theirs)
        .ok_or_else(missing)?
        .parse()
        .map_err(|_| Error::UnsupportedAlgorithm)
}
