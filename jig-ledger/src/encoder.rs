//! Result encoding
//!
//! The output of `eval` is three canonical MessagePack values written back to
//! back with no framing: the block, the account map, then the box map.

use crate::{Error, Result};
use jig_protocol::encoding::{decode_next, encode};
use jig_protocol::{AccountData, Address, Block};
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::io::Cursor;

/// State reported after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    /// Committed block
    pub block: Block,
    /// Latest record of every reached account
    pub accounts: BTreeMap<Address, AccountData>,
    /// Box entries keyed by full box key
    pub boxes: BTreeMap<ByteBuf, ByteBuf>,
}

impl EvaluationResult {
    /// Concatenated canonical encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = encode(&self.block)?;
        out.extend(encode(&self.accounts)?);
        out.extend(encode(&self.boxes)?);
        Ok(out)
    }

    /// Read back a result written by [`EvaluationResult::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let block = decode_next(&mut cursor)
            .map_err(|e| Error::Decode(format!("block: {}", e)))?;
        let accounts = decode_next(&mut cursor)
            .map_err(|e| Error::Decode(format!("accounts: {}", e)))?;
        let boxes = decode_next(&mut cursor)
            .map_err(|e| Error::Decode(format!("boxes: {}", e)))?;
        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after result",
                bytes.len() - consumed
            )));
        }
        Ok(Self {
            block,
            accounts,
            boxes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::box_key;
    use jig_protocol::BlockHeader;

    fn sample() -> EvaluationResult {
        let mut accounts = BTreeMap::new();
        accounts.insert(Address([4; 32]), AccountData::with_balance(1_000));
        accounts.insert(Address([2; 32]), AccountData::default());
        let mut boxes = BTreeMap::new();
        boxes.insert(
            ByteBuf::from(box_key(9, &[0xff, 0x00])),
            ByteBuf::from(vec![1, 2, 3]),
        );
        EvaluationResult {
            block: Block {
                header: BlockHeader {
                    round: 1,
                    genesis_id: "algojig".to_string(),
                    timestamp: 1000,
                    ..Default::default()
                },
                payset: vec![],
            },
            accounts,
            boxes,
        }
    }

    #[test]
    fn test_decode_reads_back_all_three() {
        let result = sample();
        let bytes = result.encode().unwrap();
        assert_eq!(EvaluationResult::decode(&bytes).unwrap(), result);
    }

    #[test]
    fn test_box_keys_are_bin() {
        let bytes = encode(&sample().boxes).unwrap();
        // fixmap of 1, then bin8 header
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 0xc4);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0xc0);
        assert!(matches!(
            EvaluationResult::decode(&bytes),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = sample().encode().unwrap();
        assert!(EvaluationResult::decode(&bytes[..bytes.len() - 2]).is_err());
    }
}
