//! The **`SSH-TRANS`** messages this layer produces and consumes, and the
//! message-number constants used to route everything else.

use std::ops::RangeInclusive;

use crate::{
    wire::{NameList, Reader, Writer},
    Error, Result,
};

/// `SSH_MSG_DISCONNECT`.
pub const SSH_MSG_DISCONNECT: u8 = 1;
/// `SSH_MSG_IGNORE`.
pub const SSH_MSG_IGNORE: u8 = 2;
/// `SSH_MSG_UNIMPLEMENTED`.
pub const SSH_MSG_UNIMPLEMENTED: u8 = 3;
/// `SSH_MSG_DEBUG`.
pub const SSH_MSG_DEBUG: u8 = 4;
/// `SSH_MSG_SERVICE_REQUEST`.
pub const SSH_MSG_SERVICE_REQUEST: u8 = 5;
/// `SSH_MSG_SERVICE_ACCEPT`.
pub const SSH_MSG_SERVICE_ACCEPT: u8 = 6;
/// `SSH_MSG_EXT_INFO` (RFC 8308).
pub const SSH_MSG_EXT_INFO: u8 = 7;
/// `SSH_MSG_KEXINIT`.
pub const SSH_MSG_KEXINIT: u8 = 20;
/// `SSH_MSG_NEWKEYS`.
pub const SSH_MSG_NEWKEYS: u8 = 21;
/// `SSH_MSG_KEX_ECDH_INIT` (RFC 5656).
pub const SSH_MSG_KEX_ECDH_INIT: u8 = 30;
/// `SSH_MSG_KEX_ECDH_REPLY` (RFC 5656).
pub const SSH_MSG_KEX_ECDH_REPLY: u8 = 31;
/// `SSH_MSG_USERAUTH_SUCCESS`.
pub const SSH_MSG_USERAUTH_SUCCESS: u8 = 52;

/// The message numbers RFC 4253 §6 reserves for algorithm-specific
/// key-exchange messages.
pub const KEX_SPECIFIC_MESSAGES: RangeInclusive<u8> = 30..=49;

/// `SSH_DISCONNECT_BY_APPLICATION`, the reason code of a local polite close.
pub const SSH_DISCONNECT_BY_APPLICATION: u32 = 11;

/// Whether a message type is part of the key-exchange set forwarded to the
/// engine, and exempted from the strict-kex gate.
pub fn is_kex_message(ty: u8) -> bool {
    ty == SSH_MSG_KEXINIT || ty == SSH_MSG_NEWKEYS || KEX_SPECIFIC_MESSAGES.contains(&ty)
}

/// Sanitize peer-supplied text before it reaches logs or error values:
/// capped at 255 characters (the last three becoming `...`), every
/// character outside printable ASCII replaced with U+FFFD.
pub fn sanitize(text: &str) -> String {
    let mut clean: String = text
        .chars()
        .take(255)
        .map(|c| if (' '..='~').contains(&c) { c } else { '\u{FFFD}' })
        .collect();

    if text.chars().nth(255).is_some() {
        clean.truncate(clean.char_indices().nth(252).map_or(0, |(at, _)| at));
        clean.push_str("...");
    }

    clean
}

/// The `SSH_MSG_DISCONNECT` message.
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnect {
    /// Machine readable reason code.
    pub code: u32,

    /// Human readable description.
    pub description: String,

    /// RFC 3066 language tag.
    pub language: String,
}

impl Disconnect {
    /// Parse from a payload, sanitizing the description.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(&payload[1..]);

        Ok(Self {
            code: reader.u32()?,
            description: sanitize(&reader.utf8()?),
            language: reader.utf8().unwrap_or_default(),
        })
    }

    /// Encode with the leading message-type byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer
            .u8(SSH_MSG_DISCONNECT)
            .u32(self.code)
            .string(self.description.as_bytes())
            .string(self.language.as_bytes());

        writer.into_bytes()
    }
}

/// The `SSH_MSG_DEBUG` message.
#[derive(Debug, Clone)]
pub struct DebugMsg {
    /// Whether the peer asks for the message to be shown.
    pub always_display: bool,

    /// Sanitized message text.
    pub message: String,
}

impl DebugMsg {
    /// Parse from a payload, sanitizing the text.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(&payload[1..]);

        Ok(Self {
            always_display: reader.bool()?,
            message: sanitize(&reader.utf8()?),
        })
    }
}

/// The extension table carried by the most recent `SSH_MSG_EXT_INFO`
/// (RFC 8308); the peer may send it several times and each one replaces
/// the previous table in whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionInfo {
    /// Extension name to opaque payload.
    pub extensions: std::collections::HashMap<String, Vec<u8>>,
}

impl ExtensionInfo {
    /// Parse from a payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(&payload[1..]);
        let count = reader.u32()?;

        let mut extensions = std::collections::HashMap::new();
        for _ in 0..count {
            let name = reader.utf8()?;
            let value = reader.string()?.to_vec();

            extensions.insert(name, value);
        }

        Ok(Self { extensions })
    }

    /// Look up an extension payload by name.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.extensions.get(name).map(Vec::as_slice)
    }
}

/// The `SSH_MSG_KEXINIT` message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KexInit {
    /// Random cookie.
    pub cookie: [u8; 16],

    /// Key-exchange algorithm names.
    pub kex_algorithms: NameList,

    /// Server host key algorithm names.
    pub server_host_key_algorithms: NameList,

    /// Cipher names, client to server.
    pub encryption_algorithms_client_to_server: NameList,

    /// Cipher names, server to client.
    pub encryption_algorithms_server_to_client: NameList,

    /// MAC names, client to server.
    pub mac_algorithms_client_to_server: NameList,

    /// MAC names, server to client.
    pub mac_algorithms_server_to_client: NameList,

    /// Compression names, client to server.
    pub compression_algorithms_client_to_server: NameList,

    /// Compression names, server to client.
    pub compression_algorithms_server_to_client: NameList,

    /// Language tags, client to server.
    pub languages_client_to_server: NameList,

    /// Language tags, server to client.
    pub languages_server_to_client: NameList,

    /// Whether a guessed kex packet follows.
    pub first_kex_packet_follows: bool,
}

impl KexInit {
    /// Parse from a payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(&payload[1..]);

        let cookie = <[u8; 16]>::try_from(reader.bytes(16)?)
            .map_err(|_| Error::Framing("kexinit cookie"))?;

        let message = Self {
            cookie,
            kex_algorithms: reader.name_list()?,
            server_host_key_algorithms: reader.name_list()?,
            encryption_algorithms_client_to_server: reader.name_list()?,
            encryption_algorithms_server_to_client: reader.name_list()?,
            mac_algorithms_client_to_server: reader.name_list()?,
            mac_algorithms_server_to_client: reader.name_list()?,
            compression_algorithms_client_to_server: reader.name_list()?,
            compression_algorithms_server_to_client: reader.name_list()?,
            languages_client_to_server: reader.name_list()?,
            languages_server_to_client: reader.name_list()?,
            first_kex_packet_follows: reader.bool()?,
        };

        reader.u32()?; // reserved

        Ok(message)
    }

    /// Encode with the leading message-type byte; the exact bytes are a
    /// mandatory hash input and are kept by the caller.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer
            .u8(SSH_MSG_KEXINIT)
            .bytes(&self.cookie)
            .name_list(&self.kex_algorithms)
            .name_list(&self.server_host_key_algorithms)
            .name_list(&self.encryption_algorithms_client_to_server)
            .name_list(&self.encryption_algorithms_server_to_client)
            .name_list(&self.mac_algorithms_client_to_server)
            .name_list(&self.mac_algorithms_server_to_client)
            .name_list(&self.compression_algorithms_client_to_server)
            .name_list(&self.compression_algorithms_server_to_client)
            .name_list(&self.languages_client_to_server)
            .name_list(&self.languages_server_to_client)
            .bool(self.first_kex_packet_follows)
            .u32(0); // reserved

        writer.into_bytes()
    }
}

/// The `SSH_MSG_KEX_ECDH_INIT` message.
#[derive(Debug, Clone)]
pub struct EcdhInit {
    /// Client ephemeral public key.
    pub q_c: Vec<u8>,
}

impl EcdhInit {
    /// Encode with the leading message-type byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.u8(SSH_MSG_KEX_ECDH_INIT).string(&self.q_c);

        writer.into_bytes()
    }
}

/// The `SSH_MSG_KEX_ECDH_REPLY` message.
#[derive(Debug, Clone)]
pub struct EcdhReply {
    /// Server host key blob.
    pub k_s: Vec<u8>,

    /// Server ephemeral public key.
    pub q_s: Vec<u8>,

    /// Signature over the exchange hash.
    pub signature: Vec<u8>,
}

impl EcdhReply {
    /// Parse from a payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(&payload[1..]);

        Ok(Self {
            k_s: reader.string()?.to_vec(),
            q_s: reader.string()?.to_vec(),
            signature: reader.string()?.to_vec(),
        })
    }
}

/// Encode the bare `SSH_MSG_NEWKEYS` message.
pub fn newkeys() -> Vec<u8> {
    vec![SSH_MSG_NEWKEYS]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_control_characters() {
        assert_eq!(sanitize("go away\u{1}!"), "go away\u{FFFD}!");
        assert_eq!(sanitize("héllo"), "h\u{FFFD}llo");
    }

    #[test]
    fn sanitize_caps_at_255_characters() {
        let long = "a".repeat(300);
        let clean = sanitize(&long);

        assert_eq!(clean.chars().count(), 255);
        assert!(clean.ends_with("..."));
        assert!(sanitize(&"a".repeat(255)).chars().all(|c| c == 'a'));
    }

    #[test]
    fn disconnect_roundtrip() {
        let message = Disconnect {
            code: SSH_DISCONNECT_BY_APPLICATION,
            description: "bye".into(),
            language: String::new(),
        };

        let payload = message.encode();
        assert_eq!(payload[0], SSH_MSG_DISCONNECT);
        assert_eq!(Disconnect::decode(&payload).unwrap(), message);
    }

    #[test]
    fn kexinit_roundtrip() {
        let message = KexInit {
            cookie: [7; 16],
            kex_algorithms: NameList::from_iter(["curve25519-sha256", "ext-info-c"]),
            server_host_key_algorithms: NameList::from_iter(["ssh-ed25519"]),
            encryption_algorithms_client_to_server: NameList::from_iter(["aes128-ctr"]),
            encryption_algorithms_server_to_client: NameList::from_iter(["aes128-ctr"]),
            mac_algorithms_client_to_server: NameList::from_iter(["hmac-sha2-256"]),
            mac_algorithms_server_to_client: NameList::from_iter(["hmac-sha2-256"]),
            compression_algorithms_client_to_server: NameList::from_iter(["none"]),
            compression_algorithms_server_to_client: NameList::from_iter(["none"]),
            ..Default::default()
        };

        let payload = message.encode();
        assert_eq!(payload[0], SSH_MSG_KEXINIT);
        assert_eq!(KexInit::decode(&payload).unwrap(), message);
    }

    #[test]
    fn ext_info_parses_pairs() {
        let mut writer = Writer::new();
        writer
            .u8(SSH_MSG_EXT_INFO)
            .u32(2)
            .string(b"server-sig-algs")
            .string(b"rsa-sha2-256,rsa-sha2-512")
            .string(b"no-flow-control")
            .string(b"p");

        let info = ExtensionInfo::decode(&writer.into_bytes()).unwrap();

        assert_eq!(info.extensions.len(), 2);
        assert_eq!(info.get("no-flow-control"), Some(&b"p"[..]));
    }

    #[test]
    fn kex_message_set_matches_the_policy_table() {
        assert!(is_kex_message(SSH_MSG_KEXINIT));
        assert!(is_kex_message(SSH_MSG_NEWKEYS));
        assert!(is_kex_message(30));
        assert!(is_kex_message(49));
        assert!(!is_kex_message(SSH_MSG_IGNORE));
        assert!(!is_kex_message(50));
    }
}
