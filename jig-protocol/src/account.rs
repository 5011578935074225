//! Account state

use crate::address::Address;
use crate::encoding::{is_false, is_zero, KvKey};
use crate::params::ConsensusParams;
use crate::transaction::{AssetParams, StateSchema};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;

/// Participation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Not participating, earns rewards
    #[default]
    Offline,
    /// Participating
    Online,
    /// Excluded from rewards
    NotParticipating,
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v: u8 = match self {
            Status::Offline => 0,
            Status::Online => 1,
            Status::NotParticipating => 2,
        };
        serializer.serialize_u8(v)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Status::Offline),
            1 => Ok(Status::Online),
            2 => Ok(Status::NotParticipating),
            v => Err(de::Error::custom(format!("unknown account status {}", v))),
        }
    }
}

/// Type tag of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TealType {
    /// Byte slice
    #[default]
    Bytes,
    /// Unsigned 64-bit integer
    Uint,
}

impl Serialize for TealType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(match self {
            TealType::Bytes => 1,
            TealType::Uint => 2,
        })
    }
}

impl<'de> Deserialize<'de> for TealType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u64::deserialize(deserializer)? {
            1 => Ok(TealType::Bytes),
            2 => Ok(TealType::Uint),
            v => Err(de::Error::custom(format!("unknown value type {}", v))),
        }
    }
}

/// Value stored in application global or local state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TealValue {
    /// Bytes payload
    #[serde(rename = "tb", default, skip_serializing_if = "is_zero")]
    pub bytes: ByteBuf,
    /// Type tag
    #[serde(rename = "tt", default)]
    pub kind: TealType,
    /// Uint payload
    #[serde(rename = "ui", default, skip_serializing_if = "is_zero")]
    pub uint: u64,
}

impl TealValue {
    /// Uint value
    pub fn from_uint(v: u64) -> Self {
        Self {
            kind: TealType::Uint,
            uint: v,
            ..Default::default()
        }
    }

    /// Bytes value
    pub fn from_bytes(v: Vec<u8>) -> Self {
        Self {
            kind: TealType::Bytes,
            bytes: ByteBuf::from(v),
            ..Default::default()
        }
    }
}

/// Key-value state of an application
pub type TealKeyValue = BTreeMap<KvKey, TealValue>;

/// Holding of an asset
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetHolding {
    /// Amount held
    #[serde(rename = "a", default, skip_serializing_if = "is_zero")]
    pub amount: u64,
    /// Frozen flag
    #[serde(rename = "f", default, skip_serializing_if = "is_false")]
    pub frozen: bool,
}

/// Local state of an opted-in application
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppLocalState {
    /// Local schema
    #[serde(rename = "hsch", default, skip_serializing_if = "is_zero")]
    pub schema: StateSchema,
    /// Key-value state
    #[serde(rename = "tkv", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_value: TealKeyValue,
}

/// Parameters of a created application
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppParams {
    /// Approval program
    #[serde(rename = "approv", default, skip_serializing_if = "is_zero")]
    pub approval_program: ByteBuf,
    /// Clear state program
    #[serde(rename = "clearp", default, skip_serializing_if = "is_zero")]
    pub clear_state_program: ByteBuf,
    /// Extra program pages
    #[serde(rename = "epp", default, skip_serializing_if = "is_zero")]
    pub extra_program_pages: u32,
    /// Global key-value state
    #[serde(rename = "gs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub global_state: TealKeyValue,
    /// Global schema
    #[serde(rename = "gsch", default, skip_serializing_if = "is_zero")]
    pub global_state_schema: StateSchema,
    /// Local schema
    #[serde(rename = "lsch", default, skip_serializing_if = "is_zero")]
    pub local_state_schema: StateSchema,
}

/// Account record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountData {
    /// Balance in micro-units
    #[serde(rename = "algo", default, skip_serializing_if = "is_zero")]
    pub micro_algos: u64,
    /// Created assets
    #[serde(rename = "apar", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub asset_params: BTreeMap<u64, AssetParams>,
    /// Opted-in application local states
    #[serde(rename = "appl", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub app_local_states: BTreeMap<u64, AppLocalState>,
    /// Created applications
    #[serde(rename = "appp", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub app_params: BTreeMap<u64, AppParams>,
    /// Asset holdings
    #[serde(rename = "asset", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assets: BTreeMap<u64, AssetHolding>,
    /// Rewards level at last update
    #[serde(rename = "ebase", default, skip_serializing_if = "is_zero")]
    pub rewards_base: u64,
    /// Total rewards received
    #[serde(rename = "ern", default, skip_serializing_if = "is_zero")]
    pub rewarded_micro_algos: u64,
    /// Participation status
    #[serde(rename = "onl", default, skip_serializing_if = "is_zero")]
    pub status: Status,
    /// Selection key
    #[serde(rename = "sel", default, skip_serializing_if = "Address::is_zero")]
    pub selection_id: Address,
    /// Auth address
    #[serde(rename = "spend", default, skip_serializing_if = "Address::is_zero")]
    pub auth_addr: Address,
    /// State proof key
    #[serde(rename = "stprf", default, skip_serializing_if = "is_zero")]
    pub state_proof_id: ByteBuf,
    /// Number of boxes owned
    #[serde(rename = "tbx", default, skip_serializing_if = "is_zero")]
    pub total_boxes: u64,
    /// Bytes of box names and values owned
    #[serde(rename = "tbxb", default, skip_serializing_if = "is_zero")]
    pub total_box_bytes: u64,
    /// Extra program pages over created applications
    #[serde(rename = "teap", default, skip_serializing_if = "is_zero")]
    pub total_extra_app_pages: u32,
    /// Schema over created and opted-in applications
    #[serde(rename = "tsch", default, skip_serializing_if = "is_zero")]
    pub total_app_schema: StateSchema,
    /// Vote key
    #[serde(rename = "vote", default, skip_serializing_if = "Address::is_zero")]
    pub vote_id: Address,
    /// First voting round
    #[serde(rename = "voteFst", default, skip_serializing_if = "is_zero")]
    pub vote_first_valid: u64,
    /// Key dilution
    #[serde(rename = "voteKD", default, skip_serializing_if = "is_zero")]
    pub vote_key_dilution: u64,
    /// Last voting round
    #[serde(rename = "voteLst", default, skip_serializing_if = "is_zero")]
    pub vote_last_valid: u64,
}

impl AccountData {
    /// Record with a balance and nothing else
    pub fn with_balance(micro_algos: u64) -> Self {
        Self {
            micro_algos,
            ..Default::default()
        }
    }

    /// True for a record that holds nothing
    pub fn is_empty(&self) -> bool {
        *self == AccountData::default()
    }

    /// Minimum balance the account must keep
    pub fn min_balance(&self, proto: &ConsensusParams) -> u64 {
        let schema = &self.total_app_schema;
        let schema_cost = schema
            .num_uint
            .saturating_mul(proto.schema_min_balance_per_entry + proto.schema_uint_min_balance)
            .saturating_add(
                schema
                    .num_byte_slice
                    .saturating_mul(proto.schema_min_balance_per_entry + proto.schema_bytes_min_balance),
            );

        proto
            .min_balance
            .saturating_add(proto.min_balance.saturating_mul(self.assets.len() as u64))
            .saturating_add(
                proto
                    .app_flat_params_min_balance
                    .saturating_mul(self.app_params.len() as u64),
            )
            .saturating_add(
                proto
                    .app_flat_opt_in_min_balance
                    .saturating_mul(self.app_local_states.len() as u64),
            )
            .saturating_add(schema_cost)
            .saturating_add(
                proto
                    .app_flat_params_min_balance
                    .saturating_mul(u64::from(self.total_extra_app_pages)),
            )
            .saturating_add(proto.box_flat_min_balance.saturating_mul(self.total_boxes))
            .saturating_add(proto.box_byte_min_balance.saturating_mul(self.total_box_bytes))
    }

    /// Reward units held (whole units of balance)
    pub fn reward_units(&self, proto: &ConsensusParams) -> u64 {
        match self.status {
            Status::NotParticipating => 0,
            _ => self.micro_algos / proto.reward_unit,
        }
    }

    /// Bring pending rewards into the balance.
    ///
    /// Returns the amount credited.
    pub fn apply_rewards(&mut self, proto: &ConsensusParams, rewards_level: u64) -> u64 {
        let mut credited = 0;
        if self.status != Status::NotParticipating {
            let delta = rewards_level.saturating_sub(self.rewards_base);
            credited = self.reward_units(proto).saturating_mul(delta);
            self.micro_algos = self.micro_algos.saturating_add(credited);
            self.rewarded_micro_algos = self.rewarded_micro_algos.saturating_add(credited);
        }
        self.rewards_base = rewards_level;
        credited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    #[test]
    fn test_min_balance_base() {
        let proto = ConsensusParams::future();
        assert_eq!(AccountData::default().min_balance(&proto), 100_000);
    }

    #[test]
    fn test_min_balance_with_holdings_and_boxes() {
        let proto = ConsensusParams::future();
        let mut acct = AccountData::default();
        acct.assets.insert(5, AssetHolding::default());
        acct.total_boxes = 1;
        acct.total_box_bytes = 10;
        acct.total_app_schema = StateSchema {
            num_uint: 1,
            num_byte_slice: 1,
        };
        let expected = 100_000 + 100_000 + 2_500 + 4_000 + 28_500 + 50_000;
        assert_eq!(acct.min_balance(&proto), expected);
    }

    #[test]
    fn test_rewards_credited_by_units() {
        let proto = ConsensusParams::future();
        let mut acct = AccountData::with_balance(5_500_000);
        let credited = acct.apply_rewards(&proto, 3);
        assert_eq!(credited, 15);
        assert_eq!(acct.micro_algos, 5_500_015);
        assert_eq!(acct.rewards_base, 3);
        assert_eq!(acct.apply_rewards(&proto, 3), 0);
    }

    #[test]
    fn test_not_participating_earns_nothing() {
        let proto = ConsensusParams::future();
        let mut acct = AccountData::with_balance(5_000_000);
        acct.status = Status::NotParticipating;
        assert_eq!(acct.apply_rewards(&proto, 10), 0);
        assert_eq!(acct.rewards_base, 10);
    }

    #[test]
    fn test_empty_account_encodes_as_empty_map() {
        assert_eq!(encode(&AccountData::default()).unwrap(), vec![0x80]);
    }

    #[test]
    fn test_state_survives_encoding() {
        let mut acct = AccountData::with_balance(1);
        let mut params = AppParams::default();
        params
            .global_state
            .insert(KvKey::from("counter"), TealValue::from_uint(7));
        params
            .global_state
            .insert(KvKey(vec![0xfe]), TealValue::from_bytes(vec![1, 2]));
        acct.app_params.insert(9, params);
        let back: AccountData = decode(&encode(&acct).unwrap()).unwrap();
        assert_eq!(back, acct);
    }
}
