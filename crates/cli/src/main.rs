// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use bufjournal_cli::commands::{inspect, replay, scan};
use bufjournal_cli::telemetry;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bufjournal")]
#[command(about = "Inspect and replay bufjournal buffer directories", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List buffer generations and the names the next rotation would use
    Scan {
        /// Buffer directory
        dir: PathBuf,
    },
    /// Summarise a single .buf or .ids file
    Inspect {
        path: PathBuf,
    },
    /// Print every uncommitted record as one JSON object per line.
    /// The journal must not be running against the same directory.
    Replay {
        /// Buffer directory
        #[arg(long, short)]
        dir: PathBuf,

        /// Delete the replayed files once everything has been printed
        #[arg(long)]
        clean: bool,

        /// Stop after this many records (implies no cleanup)
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_logging(cli.verbose);

    match cli.command {
        Commands::Scan { dir } => scan::run(&dir),
        Commands::Inspect { path } => inspect::run(&path),
        Commands::Replay { dir, clean, limit } => {
            let stdout = std::io::stdout();
            let summary = replay::run(&dir, clean, limit, &mut stdout.lock())?;
            eprintln!(
                "replayed {} records, skipped {} committed{}",
                summary.replayed,
                summary.skipped,
                if summary.cleaned { ", legacy files removed" } else { "" }
            );
            Ok(())
        }
    }
}
