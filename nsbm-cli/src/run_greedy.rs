use crate::io::*;

use clap::Args;
use log::info;
use nsbm::greedy::optimize;
use nsbm::options::GreedyOptions;
use nsbm::QualityFunction;

#[derive(Args, Debug, Clone)]
pub struct GreedyArgs {
    #[arg(required = true,
          help = "Edge list (`source target [weight]` per line, .gz ok)")]
    edges: Box<str>,

    #[arg(long, short, required = true,
          help = "Output file prefix",
          long_help = "Output file prefix.\n\
                       Generates: {out}.greedy.tsv.gz")]
    out: Box<str>,

    #[arg(long, help = "Treat edges as directed (symmetrized before optimizing)")]
    directed: bool,

    #[arg(long, help = "Number of vertices (default: largest index + 1)")]
    num_vertices: Option<usize>,

    #[arg(long, short = 'r', default_value_t = 1.0,
          help = "Resolution of the quality function")]
    resolution: f64,

    #[arg(long, help = "Constant Potts model instead of modularity")]
    cpm: bool,

    #[arg(long, default_value_t = 20,
          help = "Maximum local-moving passes per aggregation round")]
    max_local_iter: usize,

    #[arg(long, short = 's', default_value_t = 42, help = "Random seed")]
    seed: u64,
}

pub fn greedy(args: &GreedyArgs) -> anyhow::Result<()> {
    let graph = read_edge_list(&args.edges, args.directed, args.num_vertices)?;

    let quality = if args.cpm {
        QualityFunction::Cpm {
            resolution: args.resolution,
        }
    } else {
        QualityFunction::Modularity {
            resolution: args.resolution,
        }
    };

    let part = optimize(
        &graph,
        &GreedyOptions {
            quality,
            max_local_iter: args.max_local_iter,
            seed: args.seed,
            ..GreedyOptions::default()
        },
    )?;

    info!(
        "greedy: {} blocks, quality = {:.4}, aggregations = {}",
        part.num_blocks, part.quality, part.aggregations
    );

    write_level_labels(
        &[part.labels],
        &[0],
        None,
        &format!("{}.greedy.tsv.gz", args.out),
    )?;
    Ok(())
}
