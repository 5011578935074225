//! Command implementations behind the `algojig` binary
//!
//! Each command owns its ledger for the duration of the run and closes it on
//! every exit path.

use crate::commit::commit;
use crate::encoder::EvaluationResult;
use crate::genesis::{bootstrap, GenesisState};
use crate::ledger::Ledger;
use crate::reader::{partition_groups, read_batch};
use crate::snapshot;
use crate::types::BOX_PREFIX;
use crate::{Config, Error, Result};
use jig_avm::SourceMap;
use jig_protocol::SignedTxn;
use std::io::BufReader;

/// Wipe the store and write a fresh genesis.
///
/// The genesis is seeded from `seed_path` when that file exists.
pub async fn init(config: &Config, timestamp: Option<i64>) -> Result<()> {
    let timestamp = timestamp.unwrap_or(config.genesis.default_timestamp);
    if config.data_dir.exists() {
        std::fs::remove_dir_all(&config.data_dir)?;
    }
    std::fs::create_dir_all(&config.root_dir)?;

    let genesis = match GenesisState::from_seed_file(&config.seed_path, timestamp)? {
        Some(seeded) => {
            tracing::info!(
                path = %config.seed_path.display(),
                accounts = seeded.accounts.len(),
                boxes = seeded.boxes.len(),
                "Seeding genesis"
            );
            seeded
        }
        None => GenesisState::new(timestamp),
    };

    let ledger = bootstrap(config.clone(), genesis).await?;
    ledger.close().await
}

/// Evaluate the transaction file into one block and return the encoded
/// result
pub async fn eval(config: &Config) -> Result<Vec<u8>> {
    let file = std::fs::File::open(&config.stxns_path).map_err(|e| {
        Error::Decode(format!("cannot open {}: {}", config.stxns_path.display(), e))
    })?;
    let batch = read_batch(BufReader::new(file))?;
    tracing::info!(txns = batch.len(), "Batch read");

    let ledger = Ledger::open(config.clone()).await?;
    let result = run_eval(&ledger, batch).await;
    let closed = ledger.close().await;
    let out = result?;
    closed?;
    Ok(out)
}

async fn run_eval(ledger: &Ledger, batch: Vec<SignedTxn>) -> Result<Vec<u8>> {
    let counter_before = ledger.latest_header().txn_counter;

    let groups = partition_groups(batch.clone());
    let mut evaluator = ledger.start_evaluator(None)?;
    for group in &groups {
        ledger.verify_group(group)?;
        evaluator.apply_group(group)?;
    }
    let block = evaluator.finalize()?;
    commit(ledger, &mut evaluator).await?;

    let round = block.round();
    let counter_after = block.header.txn_counter;

    let mut addresses = snapshot::extract_addresses(&batch, ledger)?;
    addresses.extend(snapshot::extract_inner_addresses(&block));
    addresses.extend(snapshot::extract_creators(ledger, counter_before, counter_after)?);
    let accounts = snapshot::extract_accounts(ledger, &addresses)?;
    let boxes = snapshot::extract_boxes(ledger, round, BOX_PREFIX)?;

    tracing::info!(
        round,
        groups = groups.len(),
        accounts = accounts.len(),
        boxes = boxes.len(),
        "State extracted"
    );
    tracing::debug!("Metrics:\n{}", ledger.metrics().render());

    EvaluationResult {
        block,
        accounts,
        boxes,
    }
    .encode()
}

/// Fresh genesis at the default timestamp, then `eval`
pub async fn debug(config: &Config) -> Result<Vec<u8>> {
    init(config, None).await?;
    eval(config).await
}

/// Latest state of the configured debug account, rendered for humans
pub async fn read(config: &Config) -> Result<String> {
    let addr = config.debug_account()?;
    let ledger = Ledger::open(config.clone()).await?;
    let looked_up = ledger.lookup_account(&addr);
    let round = ledger.latest();
    ledger.close().await?;
    Ok(format!("{} at round {}:\n{:#?}", addr, round, looked_up?))
}

/// Assemble program text into base64 bytecode, a newline, and a JSON source
/// map.
///
/// The output carries exactly one newline; callers split on it. The map
/// names a single anonymous source.
pub fn compile(source: &str) -> Result<String> {
    let program = jig_avm::assemble(source)?;
    let map = SourceMap::new(vec![String::new()], &program.offset_to_line);
    let json = map
        .to_json()
        .map_err(|e| Error::Other(format!("source map: {}", e)))?;
    Ok(format!(
        "{}\n{}",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &program.bytecode),
        json
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_output_layout() {
        let out = compile("#pragma version 7\nint 1\n").unwrap();
        let parts: Vec<&str> = out.split('\n').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], "B4EB");
        let map: serde_json::Value = serde_json::from_str(parts[1]).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["sources"], serde_json::json!([""]));
        assert!(map["mappings"].is_string());
    }

    #[test]
    fn test_compile_error_is_avm_error() {
        assert!(matches!(compile("nosuchop\n"), Err(Error::Avm(_))));
    }

    #[tokio::test]
    async fn test_eval_without_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        std::fs::write(&config.stxns_path, b"").unwrap();
        assert!(matches!(eval(&config).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_init_then_empty_eval() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        init(&config, Some(77)).await.unwrap();
        std::fs::write(&config.stxns_path, b"").unwrap();

        let out = eval(&config).await.unwrap();
        let result = EvaluationResult::decode(&out).unwrap();
        assert_eq!(result.block.header.round, 1);
        assert_eq!(result.block.header.timestamp, 77);
        assert!(result.block.payset.is_empty());
        assert!(result.accounts.is_empty());

        let shown = read(&config).await.unwrap();
        assert!(shown.contains("at round 1"));
    }

    #[tokio::test]
    async fn test_init_wipes_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        init(&config, None).await.unwrap();
        std::fs::write(&config.stxns_path, b"").unwrap();
        eval(&config).await.unwrap();

        init(&config, None).await.unwrap();
        let ledger = Ledger::open(config.clone()).await.unwrap();
        assert_eq!(ledger.latest(), 0);
        ledger.close().await.unwrap();
    }
}
