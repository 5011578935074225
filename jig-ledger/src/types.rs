//! Types shared across the pipeline stages

use jig_protocol::{AccountData, Address, Block};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespace prefix of box entries in the key-value store
pub const BOX_PREFIX: &[u8] = b"bx:";

/// Kind of a creatable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CreatableKind {
    /// Asset
    Asset,
    /// Application
    Application,
}

impl CreatableKind {
    /// Byte used in storage keys
    pub fn tag(&self) -> u8 {
        match self {
            CreatableKind::Asset => 0,
            CreatableKind::Application => 1,
        }
    }
}

/// A creatable and its creator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreatableLocator {
    /// Asset or application id
    pub index: u64,
    /// Kind
    pub kind: CreatableKind,
    /// Creator address
    pub creator: Address,
}

/// Index record stored per creatable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorRecord {
    /// Creator address bytes
    pub creator: [u8; 32],
    /// Round the creatable appeared in
    pub round: u64,
}

/// Box entry key: `bx:` || app id (big endian) || name
pub fn box_key(app_id: u64, name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(BOX_PREFIX.len() + 8 + name.len());
    key.extend_from_slice(BOX_PREFIX);
    key.extend_from_slice(&app_id.to_be_bytes());
    key.extend_from_slice(name);
    key
}

/// Split a box entry key into app id and name
pub fn split_box_key(key: &[u8]) -> Option<(u64, &[u8])> {
    let rest = key.strip_prefix(BOX_PREFIX)?;
    if rest.len() < 8 {
        return None;
    }
    let (id, name) = rest.split_at(8);
    let id: [u8; 8] = id.try_into().ok()?;
    Some((u64::from_be_bytes(id), name))
}

/// State changes of one block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    /// Latest record of every account the block touched
    pub accounts: BTreeMap<Address, AccountData>,
    /// Creatables created (`Some(creator)`) or deleted (`None`)
    pub creatables: BTreeMap<(CreatableKind, u64), Option<Address>>,
    /// Key-value entries written (`Some`) or deleted (`None`)
    pub kv: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

/// Rewards bookkeeping of a block, checked by the committer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardsAudit {
    /// Balances of the touched accounts before the block
    pub balances_before: u64,
    /// Balances of the touched accounts after the block
    pub balances_after: u64,
    /// Rewards credited into touched accounts
    pub credited: u64,
    /// Rewards withdrawn from the pool at the start of the block
    pub withdrawn: u64,
}

impl RewardsAudit {
    /// Balances moved only by rewards
    pub fn conserved(&self) -> bool {
        let lhs = u128::from(self.balances_after) + u128::from(self.withdrawn);
        let rhs = u128::from(self.balances_before) + u128::from(self.credited);
        lhs == rhs
    }
}

/// A finalized block together with the state it produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// The block
    pub block: Block,
    /// State changes
    pub delta: StateDelta,
    /// Rewards bookkeeping
    pub audit: RewardsAudit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_key_layout() {
        let key = box_key(5, b"name");
        assert_eq!(&key[..3], b"bx:");
        assert_eq!(&key[3..11], &[0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(split_box_key(&key), Some((5, &b"name"[..])));
        assert_eq!(split_box_key(b"bx:123"), None);
        assert_eq!(split_box_key(b"zz:12345678"), None);
    }

    #[test]
    fn test_conservation() {
        let audit = RewardsAudit {
            balances_before: 1_000,
            balances_after: 990,
            credited: 5,
            withdrawn: 15,
        };
        assert!(audit.conserved());
        let broken = RewardsAudit {
            balances_after: 991,
            ..audit
        };
        assert!(!broken.conserved());
    }
}
