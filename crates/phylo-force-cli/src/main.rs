//! phyforce - force-directed layout for phylogenetic tree documents.
//!
//! `phyforce generate` writes a random tree document; `phyforce layout`
//! seeds it radially, relaxes it with the particle simulation and prints
//! the final coordinates together with the viewing limits.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

mod commands;
mod config;

use commands::{generate, layout};

/// phyforce - lay out phylogenetic trees with a force-directed simulation.
#[derive(Parser, Debug)]
#[command(
    name = "phyforce",
    author,
    version,
    about = "Force-directed layout for phylogenetic trees",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Lay out a tree document and print node positions as JSON.
    Layout {
        /// Tree document (nested JSON node records).
        input: PathBuf,

        /// Write the report to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON file with layout settings; missing fields use defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads for the background job (0 = single-thread).
        #[arg(short, long, env = config::THREADS_ENV)]
        threads: Option<usize>,

        /// Run the simulation on the calling thread; overrides --threads.
        #[arg(long)]
        single_thread: bool,

        /// Give up on a background layout after this many seconds.
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },

    /// Generate a random tree document.
    Generate {
        /// Number of nodes.
        #[arg(short, long, default_value_t = 100)]
        nodes: usize,

        /// Random seed.
        #[arg(short, long, default_value_t = 1)]
        seed: u64,

        /// Mark every k-th inner node as bounded.
        #[arg(long)]
        bounded_every: Option<usize>,

        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Layout {
            input,
            output,
            config,
            threads,
            single_thread,
            timeout_secs,
        } => {
            let args = layout::LayoutArgs {
                input,
                output,
                config,
                threads: if single_thread { Some(0) } else { threads },
                timeout_secs,
            };
            let report = layout::execute(&args)?;
            if args.output.is_some() && !cli.quiet {
                eprintln!(
                    "Laid out {} nodes ({}, {})",
                    report.nodes.len(),
                    report.mode,
                    report.outcome
                );
            }
        }

        Commands::Generate {
            nodes,
            seed,
            bounded_every,
            output,
        } => {
            generate::execute(&generate::GenerateArgs {
                nodes,
                seed,
                bounded_every,
                output,
            })?;
        }
    }

    Ok(())
}
