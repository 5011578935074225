//! Configuration for the harness
//!
//! Every field has a fixed default, so a run without a config file behaves
//! identically on every machine. A TOML file passed with `--config` may
//! override any of them.

use crate::error::{Error, Result};
use jig_protocol::{Address, Digest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directory
    pub root_dir: PathBuf,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Signed transaction stream read by `eval`
    pub stxns_path: PathBuf,

    /// Optional genesis seed (accounts blob, optionally followed by boxes)
    pub seed_path: PathBuf,

    /// Log filter directive
    pub log_level: String,

    /// Account printed by `read`
    pub debug_account: String,

    /// Genesis configuration
    pub genesis: GenesisConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        let root = PathBuf::from("/tmp/jig");
        Self {
            data_dir: root.join("ledger"),
            stxns_path: root.join("stxns"),
            seed_path: root.join("genesis"),
            root_dir: root,
            log_level: "info".to_string(),
            debug_account: "CJIIMWTIVXBQAIF67IZMIMYUNTK3BN64OBDE7OEJYHJV2HMX63EMPQORB4".to_string(),
            genesis: GenesisConfig::default(),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: Self = toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.rocksdb.sync_writes {
            return Err(Error::Config(
                "rocksdb.sync_writes must be true".to_string(),
            ));
        }
        if self.rocksdb.write_buffer_size_mb == 0 {
            return Err(Error::Config("rocksdb.write_buffer_size_mb cannot be 0".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data_dir is required".to_string()));
        }
        Ok(())
    }

    /// Configuration rooted at `root`, with every path below it
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("ledger"),
            stxns_path: root.join("stxns"),
            seed_path: root.join("genesis"),
            root_dir: root,
            ..Default::default()
        }
    }

    /// Parsed debug account
    pub fn debug_account(&self) -> Result<Address> {
        parse_address("debug_account", &self.debug_account)
    }
}

/// Genesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Genesis id
    pub genesis_id: String,

    /// Genesis hash (hex)
    pub genesis_hash: String,

    /// Rewards pool address
    pub rewards_pool: String,

    /// Rewards pool balance (micro-units)
    pub rewards_pool_balance: u64,

    /// Fee sink address
    pub fee_sink: String,

    /// Fee sink balance (micro-units)
    pub fee_sink_balance: u64,

    /// Consensus protocol
    pub protocol: String,

    /// Timestamp used when `init` is given none
    pub default_timestamp: i64,

    /// Genesis transaction counter; derived from seeded creatables when unset
    pub txn_counter: Option<u64>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            genesis_id: "algojig".to_string(),
            genesis_hash: "9b0108e3f2512d361fd9017a9c078a60e38d52c544e93c57ebd839a9b9df7740"
                .to_string(),
            rewards_pool: "QUFXWWBONM6DM3HCLPAK4LYQJ2RT7H5ZW32DP5QQD5NDYQC2OA6BS42BZI".to_string(),
            rewards_pool_balance: 123_456_789,
            fee_sink: "XRBWO7FUJ7NOB6TOLBNEMLPHGEN7PWOSNNTUIG274DOAFWZ4533OR677SM".to_string(),
            fee_sink_balance: 0,
            protocol: jig_protocol::params::CONSENSUS_FUTURE.to_string(),
            default_timestamp: 1000,
            txn_counter: None,
        }
    }
}

impl GenesisConfig {
    /// Parsed genesis hash
    pub fn genesis_hash(&self) -> Result<Digest> {
        let bytes = hex::decode(&self.genesis_hash)
            .map_err(|e| Error::Config(format!("genesis_hash: {}", e)))?;
        Digest::from_slice(&bytes)
            .ok_or_else(|| Error::Config(format!("genesis_hash: expected 32 bytes, got {}", bytes.len())))
    }

    /// Parsed rewards pool address
    pub fn rewards_pool(&self) -> Result<Address> {
        parse_address("rewards_pool", &self.rewards_pool)
    }

    /// Parsed fee sink address
    pub fn fee_sink(&self) -> Result<Address> {
        parse_address("fee_sink", &self.fee_sink)
    }
}

fn parse_address(field: &str, text: &str) -> Result<Address> {
    text.parse()
        .map_err(|e| Error::Config(format!("{}: {}", field, e)))
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Fsync every write batch; must stay enabled
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/jig/ledger"));
        assert_eq!(config.stxns_path, PathBuf::from("/tmp/jig/stxns"));
        assert_eq!(config.genesis.rewards_pool_balance, 123_456_789);
        assert!(config.rocksdb.sync_writes);
    }

    #[test]
    fn test_default_addresses_parse() {
        let genesis = GenesisConfig::default();
        assert_eq!(
            hex::encode(genesis.rewards_pool().unwrap().0),
            "850b7b582e6b3c366ce25bc0ae2f104ea33f9fb9b6f437f6101f5a3c405a703c"
        );
        assert_eq!(
            hex::encode(genesis.fee_sink().unwrap().0),
            "bc43677cb44fdae0fa6e585a462de7311bf7d9d26b67441b5fe0dc02db3ceef6"
        );
        assert_eq!(
            hex::encode(Config::default().debug_account().unwrap().0),
            "1250865a68adc30020befa32c433146cd5b0b7dc70464fb889c1d35d1d97f6c8"
        );
        assert_eq!(genesis.genesis_hash().unwrap().0[0], 0x9b);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jig.toml");
        std::fs::write(
            &path,
            "log_level = \"debug\"\n[genesis]\ndefault_timestamp = 42\n",
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.genesis.default_timestamp, 42);
        assert_eq!(config.genesis.genesis_id, "algojig");
    }

    #[test]
    fn test_unsynced_writes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jig.toml");
        std::fs::write(&path, "[rocksdb]\nsync_writes = false\n").unwrap();
        match Config::from_file(&path) {
            Err(Error::Config(message)) => assert!(message.contains("sync_writes")),
            other => panic!("unexpected {:?}", other),
        }

        let mut config = Config::with_root(dir.path());
        config.rocksdb.sync_writes = false;
        assert!(matches!(
            crate::storage::Storage::open(&config),
            Err(Error::Config(_))
        ));
        assert!(!config.data_dir.exists());
    }

    #[test]
    fn test_bad_address_is_config_error() {
        let genesis = GenesisConfig {
            fee_sink: "nope".to_string(),
            ..Default::default()
        };
        assert!(matches!(genesis.fee_sink(), Err(Error::Config(_))));
    }
}
