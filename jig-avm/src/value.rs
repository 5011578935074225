//! Stack values

use jig_protocol::{TealType, TealValue};
use serde_bytes::ByteBuf;

/// Maximum length of a byte value on the stack
pub const MAX_BYTES_LEN: usize = 4096;

/// A value on the stack or in scratch space
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    /// Unsigned 64-bit integer
    Uint(u64),
    /// Byte string
    Bytes(Vec<u8>),
}

impl Default for StackValue {
    fn default() -> Self {
        StackValue::Uint(0)
    }
}

impl StackValue {
    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            StackValue::Uint(_) => "uint64",
            StackValue::Bytes(_) => "[]byte",
        }
    }

    /// Integer payload
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            StackValue::Uint(v) => Some(*v),
            StackValue::Bytes(_) => None,
        }
    }

    /// Bytes payload
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StackValue::Bytes(b) => Some(b),
            StackValue::Uint(_) => None,
        }
    }

    /// Stored form
    pub fn to_teal_value(&self) -> TealValue {
        match self {
            StackValue::Uint(v) => TealValue::from_uint(*v),
            StackValue::Bytes(b) => TealValue::from_bytes(b.clone()),
        }
    }

    /// Stack form of a stored value
    pub fn from_teal_value(v: &TealValue) -> Self {
        match v.kind {
            TealType::Uint => StackValue::Uint(v.uint),
            TealType::Bytes => StackValue::Bytes(v.bytes.to_vec()),
        }
    }
}

impl From<u64> for StackValue {
    fn from(v: u64) -> Self {
        StackValue::Uint(v)
    }
}

impl From<bool> for StackValue {
    fn from(v: bool) -> Self {
        StackValue::Uint(u64::from(v))
    }
}

impl From<Vec<u8>> for StackValue {
    fn from(v: Vec<u8>) -> Self {
        StackValue::Bytes(v)
    }
}

impl From<&[u8]> for StackValue {
    fn from(v: &[u8]) -> Self {
        StackValue::Bytes(v.to_vec())
    }
}

impl From<&ByteBuf> for StackValue {
    fn from(v: &ByteBuf) -> Self {
        StackValue::Bytes(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teal_value_conversion() {
        let v = StackValue::Bytes(b"abc".to_vec());
        assert_eq!(StackValue::from_teal_value(&v.to_teal_value()), v);
        let u = StackValue::Uint(42);
        assert_eq!(StackValue::from_teal_value(&u.to_teal_value()), u);
    }
}
