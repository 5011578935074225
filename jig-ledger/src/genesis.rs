//! Genesis bootstrap
//!
//! Builds round 0 of a fresh single-node ledger: the configured rewards pool
//! and fee sink, any seeded accounts and boxes, and a header pinning the
//! genesis identifiers, protocol, rewards state and timestamp.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::storage::Storage;
use crate::types::{split_box_key, CreatableKind, StateDelta};
use jig_protocol::encoding::decode_next;
use jig_protocol::{AccountData, Address, Block, BlockHeader, ConsensusParams};
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

/// Initial ledger contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenesisState {
    /// Seeded accounts
    pub accounts: BTreeMap<Address, AccountData>,
    /// Seeded key-value entries (full `bx:` keys)
    pub boxes: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Genesis timestamp
    pub timestamp: i64,
}

impl GenesisState {
    /// Empty genesis at `timestamp`
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Add a seeded account
    pub fn with_account(mut self, addr: Address, data: AccountData) -> Self {
        self.accounts.insert(addr, data);
        self
    }

    /// Add a seeded box entry
    pub fn with_box(mut self, app_id: u64, name: &[u8], value: Vec<u8>) -> Self {
        self.boxes.insert(crate::types::box_key(app_id, name), value);
        self
    }

    /// Decode a seed: an accounts mapping, optionally followed by a boxes
    /// mapping, in the same encoding `eval` writes
    pub fn from_seed<R: Read>(mut reader: R, timestamp: i64) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let mut cursor = Cursor::new(bytes.as_slice());

        let accounts: BTreeMap<Address, AccountData> = decode_next(&mut cursor)
            .map_err(|e| Error::Bootstrap(format!("seed accounts: {}", e)))?;

        let mut boxes = BTreeMap::new();
        if (cursor.position() as usize) < bytes.len() {
            let raw: BTreeMap<ByteBuf, ByteBuf> = decode_next(&mut cursor)
                .map_err(|e| Error::Bootstrap(format!("seed boxes: {}", e)))?;
            for (key, value) in raw {
                if split_box_key(&key).is_none() {
                    return Err(Error::Bootstrap(format!(
                        "seed box key 0x{} is not a box key",
                        hex::encode(&key)
                    )));
                }
                boxes.insert(key.into_vec(), value.into_vec());
            }
        }

        Ok(Self {
            accounts,
            boxes,
            timestamp,
        })
    }

    /// Read the seed file when it exists
    pub fn from_seed_file(path: &Path, timestamp: i64) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(path)?;
        Self::from_seed(std::io::BufReader::new(file), timestamp).map(Some)
    }

    /// Largest creatable index among seeded accounts
    fn max_creatable(&self) -> u64 {
        self.accounts
            .values()
            .flat_map(|a| a.asset_params.keys().chain(a.app_params.keys()))
            .copied()
            .max()
            .unwrap_or(0)
    }
}

/// Create a fresh ledger in `config.data_dir` and open it
pub async fn bootstrap(config: Config, genesis: GenesisState) -> Result<Ledger> {
    let proto = ConsensusParams::for_version(&config.genesis.protocol)
        .map_err(|e| Error::Bootstrap(e.to_string()))?;
    let rewards_pool = config.genesis.rewards_pool()?;
    let fee_sink = config.genesis.fee_sink()?;
    let genesis_hash = config.genesis.genesis_hash()?;

    if config.genesis.rewards_pool_balance < proto.min_balance {
        return Err(Error::Bootstrap(format!(
            "rewards pool balance {} below min {}",
            config.genesis.rewards_pool_balance, proto.min_balance
        )));
    }
    if rewards_pool == fee_sink {
        return Err(Error::Bootstrap(
            "rewards pool and fee sink must differ".to_string(),
        ));
    }

    let (block, delta) = genesis_block(&config, &proto, genesis, rewards_pool, fee_sink, genesis_hash)?;

    let storage = Storage::open(&config)
        .map_err(|e| Error::Bootstrap(format!("cannot create store: {}", e)))?;
    if let Some(round) = storage.latest_round()? {
        return Err(Error::Bootstrap(format!(
            "store at {} already holds a ledger at round {}",
            config.data_dir.display(),
            round
        )));
    }
    storage.write_block(&block, &delta)?;

    tracing::info!(
        genesis_id = %block.header.genesis_id,
        accounts = delta.accounts.len(),
        boxes = delta.kv.len(),
        txn_counter = block.header.txn_counter,
        timestamp = block.header.timestamp,
        "Genesis written"
    );

    Ledger::from_storage(config, Arc::new(storage)).await
}

fn genesis_block(
    config: &Config,
    proto: &ConsensusParams,
    genesis: GenesisState,
    rewards_pool: Address,
    fee_sink: Address,
    genesis_hash: jig_protocol::Digest,
) -> Result<(Block, StateDelta)> {
    let txn_counter = config
        .genesis
        .txn_counter
        .unwrap_or_else(|| genesis.max_creatable());

    let mut accounts = genesis.accounts;
    for (addr, balance, role) in [
        (rewards_pool, config.genesis.rewards_pool_balance, "rewards pool"),
        (fee_sink, config.genesis.fee_sink_balance, "fee sink"),
    ] {
        if let Some(seeded) = accounts.get(&addr) {
            if !seeded.auth_addr.is_zero() {
                return Err(Error::Bootstrap(format!(
                    "seeded account {} overlaps the {} and is rekeyed to {}",
                    addr, role, seeded.auth_addr
                )));
            }
        }
        accounts.insert(addr, AccountData::with_balance(balance));
    }

    let mut delta = StateDelta::default();
    for (addr, data) in &accounts {
        for id in data.asset_params.keys() {
            delta
                .creatables
                .insert((CreatableKind::Asset, *id), Some(*addr));
        }
        for id in data.app_params.keys() {
            delta
                .creatables
                .insert((CreatableKind::Application, *id), Some(*addr));
        }
    }
    delta.accounts = accounts;
    delta.kv = genesis
        .boxes
        .into_iter()
        .map(|(k, v)| (k, Some(v)))
        .collect();

    let header = BlockHeader {
        round: 0,
        genesis_id: config.genesis.genesis_id.clone(),
        genesis_hash,
        current_protocol: config.genesis.protocol.clone(),
        fee_sink,
        rewards_pool,
        rewards_level: 0,
        rewards_rate: 0,
        rewards_residue: 0,
        rewards_recalculation_round: proto.rewards_rate_refresh_interval,
        txn_counter,
        timestamp: genesis.timestamp,
        ..Default::default()
    };

    Ok((
        Block {
            header,
            payset: Vec::new(),
        },
        delta,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig_protocol::encoding::encode;
    use jig_protocol::{AppParams, AssetParams};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bootstrap_funds_mandatory_accounts() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        let ledger = bootstrap(config.clone(), GenesisState::new(1000))
            .await
            .unwrap();

        let pool = ledger
            .lookup_account(&config.genesis.rewards_pool().unwrap())
            .unwrap();
        assert_eq!(pool.micro_algos, 123_456_789);
        let sink = ledger.lookup_account(&config.genesis.fee_sink().unwrap()).unwrap();
        assert_eq!(sink.micro_algos, 0);

        let header = ledger.latest_header();
        assert_eq!(header.round, 0);
        assert_eq!(header.timestamp, 1000);
        assert_eq!(header.genesis_id, "algojig");
        assert_eq!(header.rewards_recalculation_round, 500_000);
        ledger.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_twice_fails() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        let ledger = bootstrap(config.clone(), GenesisState::new(1000))
            .await
            .unwrap();
        ledger.close().await.unwrap();

        let again = bootstrap(config, GenesisState::new(1000)).await;
        assert!(matches!(again, Err(Error::Bootstrap(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_unknown_protocol_and_poor_pool() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_root(dir.path());
        config.genesis.protocol = "v7".to_string();
        let result = bootstrap(config, GenesisState::new(1000)).await;
        assert!(matches!(result, Err(Error::Bootstrap(_))));

        let mut config = Config::with_root(dir.path());
        config.genesis.rewards_pool_balance = 10;
        let result = bootstrap(config, GenesisState::new(1000)).await;
        assert!(matches!(result, Err(Error::Bootstrap(_))));
    }

    #[tokio::test]
    async fn test_rekeyed_fee_sink_seed_rejected() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        let sink = config.genesis.fee_sink().unwrap();
        let mut data = AccountData::with_balance(5);
        data.auth_addr = Address([7; 32]);
        let genesis = GenesisState::new(1000).with_account(sink, data);
        let result = bootstrap(config, genesis).await;
        assert!(matches!(result, Err(Error::Bootstrap(_))));
    }

    #[tokio::test]
    async fn test_seeded_creatables_set_counter_and_index() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        let creator = Address([3; 32]);
        let mut data = AccountData::with_balance(10_000_000);
        data.asset_params.insert(
            12,
            AssetParams {
                total: 100,
                ..Default::default()
            },
        );
        data.app_params.insert(40, AppParams::default());
        let genesis = GenesisState::new(1000)
            .with_account(creator, data)
            .with_box(40, b"seeded", b"v".to_vec());
        let ledger = bootstrap(config, genesis).await.unwrap();

        assert_eq!(ledger.latest_header().txn_counter, 40);
        assert_eq!(
            ledger.lookup_creator(12, CreatableKind::Asset).unwrap(),
            Some(creator)
        );
        assert_eq!(
            ledger.lookup_creator(40, CreatableKind::Application).unwrap(),
            Some(creator)
        );
        let keys = ledger.lookup_keys_by_prefix(0, b"bx:", 0).unwrap();
        assert_eq!(keys.len(), 1);
        ledger.close().await.unwrap();
    }

    #[test]
    fn test_seed_decodes_accounts_then_boxes() {
        let mut accounts = BTreeMap::new();
        accounts.insert(Address([1; 32]), AccountData::with_balance(9));
        let mut boxes = BTreeMap::new();
        boxes.insert(
            ByteBuf::from(crate::types::box_key(1, b"k")),
            ByteBuf::from(b"v".to_vec()),
        );
        let mut seed = encode(&accounts).unwrap();
        let accounts_only = seed.clone();
        seed.extend(encode(&boxes).unwrap());

        let state = GenesisState::from_seed(seed.as_slice(), 5).unwrap();
        assert_eq!(state.accounts, accounts);
        assert_eq!(state.boxes.len(), 1);
        assert_eq!(state.timestamp, 5);

        let state = GenesisState::from_seed(accounts_only.as_slice(), 5).unwrap();
        assert!(state.boxes.is_empty());
    }

    #[test]
    fn test_seed_rejects_foreign_keys() {
        let accounts: BTreeMap<Address, AccountData> = BTreeMap::new();
        let mut boxes = BTreeMap::new();
        boxes.insert(ByteBuf::from(b"zz".to_vec()), ByteBuf::from(b"v".to_vec()));
        let mut seed = encode(&accounts).unwrap();
        seed.extend(encode(&boxes).unwrap());
        assert!(matches!(
            GenesisState::from_seed(seed.as_slice(), 5),
            Err(Error::Bootstrap(_))
        ));
    }
}
