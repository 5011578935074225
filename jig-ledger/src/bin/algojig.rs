//! algojig command line

use anyhow::Context;
use clap::{Parser, Subcommand};
use jig_ledger::{harness, Config};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "algojig", about = "Deterministic single-node ledger harness")]
struct Cli {
    /// TOML file overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wipe the store and write a fresh genesis
    Init {
        /// Genesis timestamp
        timestamp: Option<i64>,
    },
    /// Evaluate the transaction file and write the result to stdout
    Eval,
    /// Print the debug account
    Read,
    /// Assemble a program ("-" reads stdin)
    Compile {
        /// Source file
        file: String,
    },
    /// Init at the default timestamp, then eval
    Debug,
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    match cli.command {
        Command::Init { timestamp } => {
            harness::init(&config, timestamp).await?;
        }
        Command::Eval => {
            let out = harness::eval(&config).await?;
            write_stdout(&out)?;
        }
        Command::Debug => {
            let out = harness::debug(&config).await?;
            write_stdout(&out)?;
        }
        Command::Read => {
            let shown = harness::read(&config).await?;
            eprintln!("{}", shown);
            return Ok(ExitCode::FAILURE);
        }
        Command::Compile { file } => {
            let source = if file == "-" {
                let mut text = String::new();
                std::io::stdin().read_to_string(&mut text)?;
                text
            } else {
                std::fs::read_to_string(&file).with_context(|| format!("reading {}", file))?
            };
            // Exactly one newline, between program and map
            write_stdout(harness::compile(&source)?.as_bytes())?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn write_stdout(bytes: &[u8]) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
