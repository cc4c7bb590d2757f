use strum::{AsRefStr, EnumString};

/// SSH key-exchange algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Kex {
    /// Curve25519 ECDH with sha-2-256 digest.
    Curve25519Sha256,

    /// Curve25519 ECDH with sha-2-256 digest (pre-RFC 8731).
    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_wire_spelling() {
        assert_eq!(Kex::Curve25519Sha256.as_ref(), "curve25519-sha256");
        assert_eq!(
            "curve25519-sha256@libssh.org".parse::<Kex>().unwrap(),
            Kex::Curve25519Sha256Libssh
        );
    }
}
