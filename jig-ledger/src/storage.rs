//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `blocks` - Committed blocks (key: round, big endian)
//! - `accounts` - Latest account records (key: address)
//! - `creators` - Creatable index (key: kind || index)
//! - `kv` - Key-value entries, boxes among them (key: `bx:` || app || name)
//! - `meta` - Latest round
//!
//! Blocks and accounts are stored in their canonical wire encoding; the
//! creator index uses bincode records. Each block, genesis included, lands in
//! one atomic write batch.

use crate::{
    config::Config,
    error::{Error, Result},
    types::{CreatableKind, CreatableLocator, CreatorRecord, StateDelta},
};
use jig_protocol::encoding::{decode, encode};
use jig_protocol::{AccountData, Address, Block, ConsensusParams};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Column family names
const CF_BLOCKS: &str = "blocks";
const CF_ACCOUNTS: &str = "accounts";
const CF_CREATORS: &str = "creators";
const CF_KV: &str = "kv";
const CF_META: &str = "meta";

const META_LATEST: &[u8] = b"latest";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    path: PathBuf,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.path)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_CREATORS, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_KV, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::debug!(path = %path.display(), "Opened RocksDB");

        Ok(Self {
            db: Arc::new(db),
            path: path.clone(),
        })
    }

    // Column family options

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Point lookups dominate
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn creator_key(kind: CreatableKind, index: u64) -> [u8; 9] {
        let mut key = [0u8; 9];
        key[0] = kind.tag();
        key[1..].copy_from_slice(&index.to_be_bytes());
        key
    }

    // Block operations

    /// Write a block and its state changes in one atomic batch
    pub fn write_block(&self, block: &Block, delta: &StateDelta) -> Result<()> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_creators = self.cf_handle(CF_CREATORS)?;
        let cf_kv = self.cf_handle(CF_KV)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let round = block.round();
        let mut batch = WriteBatch::default();

        batch.put_cf(cf_blocks, round.to_be_bytes(), encode(block)?);

        for (addr, data) in &delta.accounts {
            if data.is_empty() {
                batch.delete_cf(cf_accounts, addr.as_bytes());
            } else {
                batch.put_cf(cf_accounts, addr.as_bytes(), encode(data)?);
            }
        }

        for ((kind, index), creator) in &delta.creatables {
            let key = Self::creator_key(*kind, *index);
            match creator {
                Some(creator) => {
                    let record = CreatorRecord {
                        creator: creator.0,
                        round,
                    };
                    batch.put_cf(cf_creators, key, bincode::serialize(&record)?);
                }
                None => batch.delete_cf(cf_creators, key),
            }
        }

        for (key, value) in &delta.kv {
            match value {
                Some(value) => batch.put_cf(cf_kv, key, value),
                None => batch.delete_cf(cf_kv, key),
            }
        }

        batch.put_cf(cf_meta, META_LATEST, round.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db.write_opt(batch, &write_opts)?;

        tracing::info!(
            round,
            txns = block.payset.len(),
            accounts = delta.accounts.len(),
            kv = delta.kv.len(),
            "Block written"
        );

        Ok(())
    }

    /// Latest committed round, `None` for an empty store
    pub fn latest_round(&self) -> Result<Option<u64>> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_LATEST)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt latest round".to_string()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Block at `round`
    pub fn get_block(&self, round: u64) -> Result<Option<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.get_cf(cf, round.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // Account operations

    /// Latest record of an account
    pub fn get_account(&self, addr: &Address) -> Result<Option<AccountData>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, addr.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Sum of reward units over all stored accounts
    pub fn total_reward_units(&self, proto: &ConsensusParams) -> Result<u64> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut total: u64 = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let data: AccountData = decode(&value)?;
            total = total.saturating_add(data.reward_units(proto));
        }
        Ok(total)
    }

    // Creatable operations

    /// Creator of a creatable
    pub fn get_creator(&self, kind: CreatableKind, index: u64) -> Result<Option<Address>> {
        let cf = self.cf_handle(CF_CREATORS)?;
        match self.db.get_cf(cf, Self::creator_key(kind, index))? {
            Some(bytes) => {
                let record: CreatorRecord = bincode::deserialize(&bytes)?;
                Ok(Some(Address(record.creator)))
            }
            None => Ok(None),
        }
    }

    /// Creatables of `kind` with index at most `max_index`, highest first
    pub fn list_creatables(
        &self,
        kind: CreatableKind,
        max_index: u64,
        max_results: usize,
    ) -> Result<Vec<CreatableLocator>> {
        let cf = self.cf_handle(CF_CREATORS)?;
        let start = Self::creator_key(kind, max_index);
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse))
        {
            if out.len() >= max_results {
                break;
            }
            let (key, value) = item?;
            if key.len() != 9 || key[0] != kind.tag() {
                break;
            }
            let mut index = [0u8; 8];
            index.copy_from_slice(&key[1..]);
            let record: CreatorRecord = bincode::deserialize(&value)?;
            out.push(CreatableLocator {
                index: u64::from_be_bytes(index),
                kind,
                creator: Address(record.creator),
            });
        }
        Ok(out)
    }

    // Key-value operations

    /// Value of a key-value entry
    pub fn get_kv(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(CF_KV)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    /// Keys starting with `prefix` in ascending byte order, at most `max`
    /// (0 is unbounded)
    pub fn keys_with_prefix(&self, prefix: &[u8], max: usize) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf_handle(CF_KV)?;
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push(key.to_vec());
            if max > 0 && out.len() >= max {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::box_key;
    use jig_protocol::BlockHeader;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        let storage = Storage::open(&config).unwrap();
        (dir, storage)
    }

    fn block(round: u64) -> Block {
        Block {
            header: BlockHeader {
                round,
                genesis_id: "algojig".to_string(),
                ..Default::default()
            },
            payset: vec![],
        }
    }

    #[test]
    fn test_empty_store() {
        let (_dir, storage) = open_temp();
        assert_eq!(storage.latest_round().unwrap(), None);
        assert!(storage.get_block(0).unwrap().is_none());
        assert!(storage.get_account(&Address([1; 32])).unwrap().is_none());
    }

    #[test]
    fn test_write_block_atomically_updates_state() {
        let (_dir, storage) = open_temp();
        let mut delta = StateDelta::default();
        delta
            .accounts
            .insert(Address([1; 32]), AccountData::with_balance(500));
        delta
            .creatables
            .insert((CreatableKind::Asset, 7), Some(Address([1; 32])));
        delta.kv.insert(box_key(3, b"a"), Some(b"one".to_vec()));
        delta.kv.insert(box_key(3, b"b"), Some(b"two".to_vec()));
        storage.write_block(&block(0), &delta).unwrap();

        assert_eq!(storage.latest_round().unwrap(), Some(0));
        assert_eq!(storage.get_block(0).unwrap().unwrap(), block(0));
        assert_eq!(
            storage.get_account(&Address([1; 32])).unwrap().unwrap().micro_algos,
            500
        );
        assert_eq!(
            storage.get_creator(CreatableKind::Asset, 7).unwrap(),
            Some(Address([1; 32]))
        );
        assert_eq!(storage.get_creator(CreatableKind::Application, 7).unwrap(), None);
        assert_eq!(storage.keys_with_prefix(b"bx:", 0).unwrap().len(), 2);
        assert_eq!(storage.keys_with_prefix(b"bx:", 1).unwrap().len(), 1);

        // Deletions and emptied accounts
        let mut delta = StateDelta::default();
        delta.accounts.insert(Address([1; 32]), AccountData::default());
        delta.creatables.insert((CreatableKind::Asset, 7), None);
        delta.kv.insert(box_key(3, b"a"), None);
        storage.write_block(&block(1), &delta).unwrap();

        assert_eq!(storage.latest_round().unwrap(), Some(1));
        assert!(storage.get_account(&Address([1; 32])).unwrap().is_none());
        assert_eq!(storage.get_creator(CreatableKind::Asset, 7).unwrap(), None);
        assert_eq!(
            storage.keys_with_prefix(b"bx:", 0).unwrap(),
            vec![box_key(3, b"b")]
        );
    }

    #[test]
    fn test_list_creatables_descending_by_kind() {
        let (_dir, storage) = open_temp();
        let mut delta = StateDelta::default();
        for i in [2u64, 5, 9] {
            delta
                .creatables
                .insert((CreatableKind::Asset, i), Some(Address([i as u8; 32])));
        }
        delta
            .creatables
            .insert((CreatableKind::Application, 4), Some(Address([4; 32])));
        storage.write_block(&block(0), &delta).unwrap();

        let assets = storage.list_creatables(CreatableKind::Asset, 6, 10).unwrap();
        let ids: Vec<u64> = assets.iter().map(|c| c.index).collect();
        assert_eq!(ids, vec![5, 2]);

        let apps = storage
            .list_creatables(CreatableKind::Application, 100, 10)
            .unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].creator, Address([4; 32]));

        let limited = storage.list_creatables(CreatableKind::Asset, 100, 1).unwrap();
        assert_eq!(limited[0].index, 9);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_reward_units_sum() {
        let (_dir, storage) = open_temp();
        let mut delta = StateDelta::default();
        delta
            .accounts
            .insert(Address([1; 32]), AccountData::with_balance(3_500_000));
        delta
            .accounts
            .insert(Address([2; 32]), AccountData::with_balance(1_000_000));
        storage.write_block(&block(0), &delta).unwrap();
        let proto = ConsensusParams::future();
        assert_eq!(storage.total_reward_units(&proto).unwrap(), 4);
    }
}
