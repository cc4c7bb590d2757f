//! Primitives to read and write the **SSH wire types** of RFC 4251 §5
//! from/to byte buffers.

use crate::{Error, Result};

/// A cursor decoding SSH wire types from a byte slice.
pub struct Reader<'b> {
    buf: &'b [u8],
}

impl<'b> Reader<'b> {
    /// Wrap a byte slice for decoding.
    pub fn new(buf: &'b [u8]) -> Self {
        Self { buf }
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'b [u8]> {
        if self.buf.len() < n {
            return Err(Error::Framing("field extends past the end of the packet"));
        }

        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;

        Ok(head)
    }

    /// Consume a `byte`.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    /// Consume a `boolean`.
    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    /// Consume a `uint32`.
    pub fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes(4)?;

        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Consume a `string`, returning its contents.
    pub fn string(&mut self) -> Result<&'b [u8]> {
        let len = self.u32()? as usize;

        self.bytes(len)
    }

    /// Consume a `string` and decode it as UTF-8, lossily.
    pub fn utf8(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.string()?).into_owned())
    }

    /// Consume a `name-list`.
    pub fn name_list(&mut self) -> Result<NameList> {
        let blob = self.string()?;
        let text =
            std::str::from_utf8(blob).map_err(|_| Error::Framing("name-list is not ASCII"))?;

        Ok(NameList(if text.is_empty() {
            Vec::new()
        } else {
            text.split(',').map(str::to_owned).collect()
        }))
    }
}

/// A growable buffer encoding SSH wire types.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Start an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish and take the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw bytes.
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a `byte`.
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a `boolean`.
    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(value as u8)
    }

    /// Append a `uint32`.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_be_bytes())
    }

    /// Append a `string`.
    pub fn string(&mut self, contents: &[u8]) -> &mut Self {
        self.u32(contents.len() as u32).bytes(contents)
    }

    /// Append a `name-list`.
    pub fn name_list(&mut self, list: &NameList) -> &mut Self {
        self.string(list.to_string().as_bytes())
    }

    /// Append an `mpint` from unsigned big-endian magnitude bytes.
    pub fn mpint(&mut self, magnitude: &[u8]) -> &mut Self {
        self.string(&to_mpint(magnitude))
    }
}

/// Normalize unsigned big-endian magnitude bytes into `mpint` contents:
/// leading zeros stripped, a zero byte prepended when the high bit is set.
pub fn to_mpint(magnitude: &[u8]) -> Vec<u8> {
    let stripped = {
        let start = magnitude
            .iter()
            .position(|&byte| byte != 0)
            .unwrap_or(magnitude.len());

        &magnitude[start..]
    };

    match stripped.first() {
        Some(&byte) if byte & 0x80 != 0 => {
            let mut padded = Vec::with_capacity(stripped.len() + 1);
            padded.push(0);
            padded.extend_from_slice(stripped);

            padded
        }
        _ => stripped.to_vec(),
    }
}

/// A comma-separated list of algorithm names, in preference order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NameList(pub Vec<String>);

impl NameList {
    /// Build a list from anything that yields name-ish items.
    pub fn from_iter<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self(items.into_iter().map(|item| item.as_ref().to_owned()).collect())
    }

    /// The first of our names that also appears in `other`, which is how
    /// RFC 4253 §7.1 resolves every negociated algorithm.
    pub fn preferred_in(&self, other: &NameList) -> Option<&str> {
        self.0
            .iter()
            .find(|name| other.0.iter().any(|peer| peer == *name))
            .map(String::as_str)
    }

    /// Whether the list carries `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|item| item == name)
    }
}

impl std::fmt::Display for NameList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_scalars_and_strings() {
        let mut writer = Writer::new();
        writer.u8(42).bool(true).u32(0xdeadbeef).string(b"ssh-rsa");

        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);

        assert_eq!(reader.u8().unwrap(), 42);
        assert!(reader.bool().unwrap());
        assert_eq!(reader.u32().unwrap(), 0xdeadbeef);
        assert_eq!(reader.string().unwrap(), b"ssh-rsa");
        assert!(reader.is_empty());
    }

    #[test]
    fn rejects_short_fields() {
        let mut reader = Reader::new(&[0, 0, 0, 8, b'a']);

        assert!(matches!(reader.string(), Err(Error::Framing(_))));
    }

    #[test]
    fn name_list_roundtrip() {
        let list = NameList::from_iter(["curve25519-sha256", "ext-info-c"]);

        let mut writer = Writer::new();
        writer.name_list(&list);

        let bytes = writer.into_bytes();
        assert_eq!(Reader::new(&bytes).name_list().unwrap(), list);
    }

    #[test]
    fn empty_name_list_has_no_entries() {
        let mut writer = Writer::new();
        writer.name_list(&NameList::default());

        let bytes = writer.into_bytes();
        assert!(Reader::new(&bytes).name_list().unwrap().0.is_empty());
    }

    #[test]
    fn preferred_in_follows_our_order() {
        let ours = NameList::from_iter(["aes256-ctr", "aes128-ctr"]);
        let theirs = NameList::from_iter(["aes128-ctr", "aes256-ctr"]);

        assert_eq!(ours.preferred_in(&theirs), Some("aes256-ctr"));
        assert_eq!(theirs.preferred_in(&ours), Some("aes128-ctr"));
    }

    #[test]
    fn mpint_is_normalized() {
        assert_eq!(to_mpint(&[0, 0, 0x7f, 1]), vec![0x7f, 1]);
        assert_eq!(to_mpint(&[0x80, 1]), vec![0, 0x80, 1]);
        assert_eq!(to_mpint(&[0, 0]), Vec::<u8>::new());
    }
}
