// Tiered block store.
// Copyright 2015-2023 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Command-line entry point exercising a tiered block store for manual
//! testing and demos. Each invocation is a fresh process: committed blocks
//! are rediscovered by the startup scan, but a temp block created by `put
//! --no-commit` will not survive past this process exiting, since the
//! startup scan purges leftover temp files from prior sessions (§6 of the
//! design). Multi-step two-phase demos therefore run as a single `demo`
//! invocation rather than as separate commands.

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Termination;

use clap::{Parser, Subcommand};
use tracing::{error, info, trace};

use tiered_block_store::config::TierLayoutConfig;
use tiered_block_store::{BlockStoreLocation, LockMode, TierAlias, TieredBlockStore};

mod log;
use log::LogGuard;

const DEMO_SESSION_ID: u64 = 1;

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Show debug trace to stdout.
    #[arg(long, short = 'D', global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create configured directories and report current tier/dir usage.
    Init {
        /// Path to a tier-layout config JSON file.
        config: PathBuf,
    },

    /// Write a file's contents as a committed block (create, write, commit).
    Put {
        config: PathBuf,
        block_id: u64,
        tier: TierAlias,
        file: PathBuf,
    },

    /// Print the location and size of a committed block.
    Get { config: PathBuf, block_id: u64 },

    /// Move a committed block to a different tier.
    Mv {
        config: PathBuf,
        block_id: u64,
        tier: TierAlias,
    },

    /// Remove a committed block.
    Rm { config: PathBuf, block_id: u64 },

    /// Print capacity and block counts for every configured dir.
    Stat { config: PathBuf },

    /// Run create -> write -> commit and create -> abort in one process,
    /// to exercise the two-phase write lifecycle end-to-end.
    Demo { config: PathBuf },
}

#[repr(u8)]
enum ExitCode {
    Ok = 0,
    Failed = 1,
}

impl Termination for ExitCode {
    fn report(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }
}

type CliResult<T> = std::result::Result<T, Box<dyn Error>>;

fn open_store(config_path: &PathBuf) -> CliResult<TieredBlockStore> {
    let text = fs::read_to_string(config_path)?;
    let config = TierLayoutConfig::from_json(&text)?;
    Ok(config.build_store()?)
}

fn run(command: &Command) -> CliResult<()> {
    match command {
        Command::Init { config } => {
            let store = open_store(config)?;
            print_stat(&store);
        }
        Command::Put {
            config,
            block_id,
            tier,
            file,
        } => {
            let store = open_store(config)?;
            let contents = fs::read(file)?;
            let location = BlockStoreLocation::any_dir(*tier);
            store.create_block_meta(DEMO_SESSION_ID, *block_id, location, contents.len() as u64)?;
            store
                .get_block_writer(DEMO_SESSION_ID, *block_id)?
                .write_all(&contents)?;
            let meta = store.commit_block(DEMO_SESSION_ID, *block_id)?;
            info!(block_id, size = meta.size, tier = %meta.dir.tier, "committed block");
        }
        Command::Get { config, block_id } => {
            let store = open_store(config)?;
            let lock_id = store.lock_block(DEMO_SESSION_ID, *block_id, LockMode::Read)?;
            let meta = store.get_block_meta(*block_id)?;
            println!("block {} : {} bytes in tier {}", block_id, meta.size, meta.dir.tier);
            store.unlock_block(lock_id)?;
        }
        Command::Mv {
            config,
            block_id,
            tier,
        } => {
            let store = open_store(config)?;
            let meta = store.move_block(DEMO_SESSION_ID, *block_id, BlockStoreLocation::any_dir(*tier))?;
            info!(block_id, tier = %meta.dir.tier, "moved block");
        }
        Command::Rm { config, block_id } => {
            let store = open_store(config)?;
            store.remove_block(DEMO_SESSION_ID, *block_id)?;
            info!(block_id, "removed block");
        }
        Command::Stat { config } => {
            let store = open_store(config)?;
            print_stat(&store);
        }
        Command::Demo { config } => {
            let store = open_store(config)?;
            let committed_loc = BlockStoreLocation::any_dir(TierAlias::Ssd);
            store.create_block_meta(DEMO_SESSION_ID, 1, committed_loc, 5)?;
            store
                .get_block_writer(DEMO_SESSION_ID, 1)?
                .write_all(b"hello")?;
            let meta = store.commit_block(DEMO_SESSION_ID, 1)?;
            println!("committed block 1 ({} bytes) in tier {}", meta.size, meta.dir.tier);

            store.create_block_meta(DEMO_SESSION_ID, 2, committed_loc, 5)?;
            store.abort_block(DEMO_SESSION_ID, 2)?;
            println!("created and aborted block 2");
            print_stat(&store);
        }
    }
    Ok(())
}

fn print_stat(store: &TieredBlockStore) {
    for dir in store.get_block_store_meta().dirs {
        println!(
            "{:?}[{}]: {}/{} bytes free, {} committed blocks",
            dir.location.tier,
            dir.location.dir,
            dir.available_bytes,
            dir.capacity_bytes,
            dir.committed_blocks.len()
        );
    }
}

fn initialize_log(args: &Args) -> Result<LogGuard, String> {
    let guard = log::init(args.debug)?;
    trace!("tracing enabled");
    Ok(guard)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = match initialize_log(&args) {
        Ok(guard) => guard,
        Err(message) => {
            eprintln!("Failed to initialize log system:");
            eprintln!("{message}");
            return ExitCode::Failed;
        }
    };

    match run(&args.command) {
        Ok(()) => ExitCode::Ok,
        Err(err) => {
            error!("{}", err);
            let mut cause: &dyn Error = err.as_ref();
            while let Some(c) = cause.source() {
                error!("  caused by: {}", c);
                cause = c;
            }
            ExitCode::Failed
        }
    }
}

#[test]
fn verify_clap() {
    use clap::CommandFactory;
    Args::command().debug_assert()
}
