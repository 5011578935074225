//! Single-writer commit actor
//!
//! All writes to the store go through one Tokio task. Callers hand it a
//! validated block and then wait on a `watch` channel that publishes the
//! latest durable round.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │     CommitHandle (Clone)     │  add_block(), wait(round)
//! └──────────────┬───────────────┘
//!                │ mpsc::channel (bounded)
//!                ▼
//! ┌──────────────────────────────┐
//! │     CommitActor (one task)   │
//! │  Storage::write_block()      │  one atomic, fsynced batch
//! └──────────────┬───────────────┘
//!                │ watch::Sender<Durable>
//!                ▼
//!          waiting callers
//! ```

use crate::metrics::Metrics;
use crate::storage::Storage;
use crate::types::StateDelta;
use crate::{Error, Result};
use jig_protocol::Block;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Message sent to the commit actor
#[derive(Debug)]
pub enum CommitMessage {
    /// Persist a block and its state changes
    AddBlock {
        /// Block to write
        block: Box<Block>,
        /// State changes of the block
        delta: Box<StateDelta>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Durability status published by the actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Durable {
    /// Latest round durably written
    pub round: u64,
    /// First write failure, after which the actor accepts no more blocks
    pub error: Option<String>,
}

/// Actor that owns all store writes
#[derive(Debug)]
pub struct CommitActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<CommitMessage>,

    /// Durable round publisher
    durable: watch::Sender<Durable>,

    /// Metrics
    metrics: Metrics,
}

impl CommitActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<CommitMessage>,
        durable: watch::Sender<Durable>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            mailbox,
            durable,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                CommitMessage::AddBlock { block, delta } => self.handle_add_block(&block, &delta),
                CommitMessage::Shutdown => break,
            }
        }
        tracing::debug!("Commit actor stopped");
    }

    fn handle_add_block(&mut self, block: &Block, delta: &StateDelta) {
        let round = block.round();
        if self.durable.borrow().error.is_some() {
            tracing::warn!(round, "Dropping block after earlier write failure");
            return;
        }

        let started = Instant::now();
        match self.storage.write_block(block, delta) {
            Ok(()) => {
                self.metrics
                    .commit_duration
                    .observe(started.elapsed().as_secs_f64());
                self.metrics.blocks_total.inc();
                self.durable.send_modify(|d| d.round = round);
            }
            Err(e) => {
                tracing::error!(round, "Error writing block: {}", e);
                self.durable
                    .send_modify(|d| d.error = Some(format!("round {}: {}", round, e)));
            }
        }
    }
}

/// Handle to communicate with the commit actor
#[derive(Clone, Debug)]
pub struct CommitHandle {
    sender: mpsc::Sender<CommitMessage>,
    durable: watch::Receiver<Durable>,
}

impl CommitHandle {
    /// Queue a block for writing
    pub async fn add_block(&self, block: Block, delta: StateDelta) -> Result<()> {
        self.sender
            .send(CommitMessage::AddBlock {
                block: Box::new(block),
                delta: Box::new(delta),
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))
    }

    /// Suspend until `round` is durable
    pub async fn wait(&self, round: u64) -> Result<()> {
        let mut durable = self.durable.clone();
        loop {
            {
                let status = durable.borrow_and_update();
                if status.round >= round {
                    return Ok(());
                }
                if let Some(e) = &status.error {
                    return Err(Error::Commit(e.clone()));
                }
            }
            durable
                .changed()
                .await
                .map_err(|_| Error::Concurrency("Durable channel closed".to_string()))?;
        }
    }

    /// Latest durable round
    pub fn durable_round(&self) -> u64 {
        self.durable.borrow().round
    }

    /// Ask the actor to stop
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CommitMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))
    }
}

/// Spawn the commit actor. `latest` is the round already durable in storage.
pub fn spawn_commit_actor(
    storage: Arc<Storage>,
    latest: u64,
    metrics: Metrics,
) -> (CommitHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(1000);
    let (durable_tx, durable_rx) = watch::channel(Durable {
        round: latest,
        error: None,
    });

    let actor = CommitActor::new(storage, receiver, durable_tx, metrics);
    let task = tokio::spawn(actor.run());

    (
        CommitHandle {
            sender,
            durable: durable_rx,
        },
        task,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use jig_protocol::BlockHeader;
    use tempfile::TempDir;

    fn block(round: u64) -> Block {
        Block {
            header: BlockHeader {
                round,
                ..Default::default()
            },
            payset: vec![],
        }
    }

    #[tokio::test]
    async fn test_add_block_then_wait() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(&Config::with_root(dir.path())).unwrap());
        let metrics = Metrics::new().unwrap();
        let (handle, task) = spawn_commit_actor(storage.clone(), 0, metrics.clone());

        handle.add_block(block(1), StateDelta::default()).await.unwrap();
        handle.wait(1).await.unwrap();

        assert_eq!(handle.durable_round(), 1);
        assert_eq!(storage.latest_round().unwrap(), Some(1));
        assert_eq!(metrics.blocks_total.get(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_durable_round_returns_immediately() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(&Config::with_root(dir.path())).unwrap());
        let (handle, task) = spawn_commit_actor(storage, 3, Metrics::new().unwrap());
        handle.wait(2).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_mailbox() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(&Config::with_root(dir.path())).unwrap());
        let (handle, task) = spawn_commit_actor(storage, 0, Metrics::new().unwrap());
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let result = handle.add_block(block(1), StateDelta::default()).await;
        assert!(matches!(result, Err(Error::Concurrency(_))));
        assert!(matches!(handle.wait(1).await, Err(Error::Concurrency(_))));
    }
}
