mod io;
mod run_fit;
mod run_greedy;
mod run_labels;

use run_fit::*;
use run_greedy::*;
use run_labels::*;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser)]
#[command(name = "nsbm")]
#[command(
    version,
    about = "Nested stochastic block model by MCMC",
    long_about = "Nested stochastic block model (NSBM) for graph community detection.\n\n\
                  Fits a hierarchy of block partitions to a weighted edge list by minimizing\n\
                  the description length with Markov chain Monte Carlo, then optionally\n\
                  samples the posterior for membership marginals and stability scores.",
    term_width = 80
)]
struct Cli {
    #[arg(short = 'v', long, global = true,
          help = "Enable verbose logging (sets RUST_LOG=info)")]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the nested hierarchy (and optionally sample its posterior)
    Fit(FitArgs),
    /// Flat greedy partition by modularity or CPM
    Greedy(GreedyArgs),
    /// Recompute level labels from a saved snapshot
    Labels(LabelsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Fit(args) => {
            fit(args)?;
        }
        Commands::Greedy(args) => {
            greedy(args)?;
        }
        Commands::Labels(args) => {
            labels(args)?;
        }
    }

    info!("Done");
    Ok(())
}
