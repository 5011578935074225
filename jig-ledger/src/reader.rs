//! Transaction batch reader
//!
//! The input is a plain concatenation of encoded signed transactions with no
//! framing. Reading stops cleanly at end of stream; anything else that fails
//! to decode aborts the run.

use crate::error::{Error, Result};
use jig_protocol::encoding::decode_next;
use jig_protocol::SignedTxn;
use std::io::{Cursor, Read};

/// Decode every signed transaction in `reader`, in order
pub fn read_batch<R: Read>(mut reader: R) -> Result<Vec<SignedTxn>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut out = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let offset = cursor.position();
        let stxn: SignedTxn = decode_next(&mut cursor).map_err(|e| {
            Error::Decode(format!("signed transaction {} at byte {}: {}", out.len(), offset, e))
        })?;
        out.push(stxn);
    }

    tracing::debug!(count = out.len(), bytes = bytes.len(), "Read transaction batch");
    Ok(out)
}

/// Split a batch into groups.
///
/// A group is a maximal run of adjacent transactions with the same non-zero
/// group id. Transactions without a group id are singletons, and separate
/// runs are never merged even when their ids match.
pub fn partition_groups(batch: Vec<SignedTxn>) -> Vec<Vec<SignedTxn>> {
    let mut groups: Vec<Vec<SignedTxn>> = Vec::new();
    for stxn in batch {
        let extends_last = !stxn.txn.group.is_zero()
            && groups
                .last()
                .and_then(|g| g.last())
                .map_or(false, |prev| prev.txn.group == stxn.txn.group);
        match groups.last_mut() {
            Some(group) if extends_last => group.push(stxn),
            _ => groups.push(vec![stxn]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig_protocol::encoding::encode;
    use jig_protocol::{Digest, Transaction};

    fn stxn(group: u8, amount: u64) -> SignedTxn {
        SignedTxn {
            txn: Transaction {
                group: if group == 0 { Digest::ZERO } else { Digest([group; 32]) },
                amount,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_stream() {
        assert!(read_batch(&[][..]).unwrap().is_empty());
    }

    #[test]
    fn test_reads_concatenated_values() {
        let mut buf = Vec::new();
        for i in 1..=3 {
            buf.extend(encode(&stxn(0, i)).unwrap());
        }
        let batch = read_batch(buf.as_slice()).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2].txn.amount, 3);
    }

    #[test]
    fn test_truncated_stream_is_decode_error() {
        let mut buf = encode(&stxn(0, 1)).unwrap();
        let second = encode(&stxn(0, 2)).unwrap();
        buf.extend_from_slice(&second[..second.len() - 1]);
        assert!(matches!(read_batch(buf.as_slice()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(matches!(read_batch(&[0xc1u8][..]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_partition() {
        let batch = vec![
            stxn(0, 1),
            stxn(7, 2),
            stxn(7, 3),
            stxn(0, 4),
            stxn(0, 5),
            stxn(7, 6),
            stxn(8, 7),
        ];
        let groups = partition_groups(batch);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 2, 1, 1, 1, 1]);
        assert_eq!(groups[1][1].txn.amount, 3);
        assert_eq!(groups[4][0].txn.amount, 6);
    }
}
