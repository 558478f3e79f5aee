//! Administrative CLI for the lcore registry: list
//! claimed cores, clean stale entries left behind by crashed processes,
//! and manually claim/release a core for testing.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use st2110_core::lcore::{CleanAction, LcoreRegistry, LcoreRole, DEFAULT_MAX_LCORES};

#[derive(Parser, Debug)]
#[command(name = "st2110-lcctl", about = "Inspect and repair the ST 2110 lcore registry")]
struct Args {
    /// Directory holding the registry's shared segment and lock file.
    #[arg(long, default_value = "/var/run/st2110/lcore")]
    base_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_LCORES)]
    max_lcores: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every currently-claimed lcore.
    List,
    /// Reclaim entries left behind by processes that are no longer alive.
    Clean {
        /// Reclaim only this lcore id, regardless of liveness.
        #[arg(long)]
        lcore: Option<u32>,
    },
    /// Manually claim a core (mainly for integration tests).
    Claim {
        #[arg(long, default_value_t = -1, help = "NUMA socket, -1 for any")]
        socket: i32,
        #[arg(long, default_value_t = false)]
        cross_numa_fallback: bool,
    },
    /// Manually release a previously-claimed core.
    Release {
        #[arg(long)]
        lcore: u32,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut registry =
        LcoreRegistry::open(&args.base_dir, args.max_lcores).context("failed to open lcore registry")?;

    match args.command {
        Command::List => {
            let entries = registry.list();
            if entries.is_empty() {
                println!("no lcores claimed");
            }
            for e in entries {
                println!(
                    "lcore={:<3} pid={:<8} socket={:<3} role={} host={} user={}",
                    e.lcore_id, e.pid, e.socket, e.role, e.hostname, e.user
                );
            }
        }
        Command::Clean { lcore } => {
            let action = match lcore {
                Some(id) => CleanAction::SpecificLcore(id),
                None => CleanAction::DeadPids,
            };
            let reclaimed = registry.clean(action).context("clean failed")?;
            info!("reclaimed {reclaimed} lcore(s)");
        }
        Command::Claim { socket, cross_numa_fallback } => {
            let id = registry
                .claim(socket, LcoreRole::AppAllocated, cross_numa_fallback)
                .context("claim failed")?;
            println!("claimed lcore {id}");
        }
        Command::Release { lcore } => {
            registry.release(lcore).context("release failed")?;
            info!("released lcore {lcore}");
        }
    }

    Ok(())
}
