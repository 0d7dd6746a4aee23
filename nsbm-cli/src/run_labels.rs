use crate::io::*;

use clap::Args;
use log::info;
use nsbm::{NestedSnapshot, Nsbm, NsbmOptions};

#[derive(Args, Debug, Clone)]
pub struct LabelsArgs {
    #[arg(required = true,
          help = "Edge list the snapshot was fit on")]
    edges: Box<str>,

    #[arg(long, required = true,
          help = "Snapshot JSON written by `fit`")]
    snapshot: Box<str>,

    #[arg(long, short, required = true,
          help = "Output file prefix",
          long_help = "Output file prefix.\n\
                       Generates: {out}.levels.tsv.gz")]
    out: Box<str>,

    #[arg(long, help = "Treat edges as directed")]
    directed: bool,

    #[arg(long, help = "Number of vertices (default: largest index + 1)")]
    num_vertices: Option<usize>,

    #[arg(long, help = "Leave level 0 out of the level labels")]
    skip_low: bool,

    #[arg(long, help = "Drop levels that repeat the level below")]
    prune: bool,
}

/// Recompute level labels from a snapshot without sampling
pub fn labels(args: &LabelsArgs) -> anyhow::Result<()> {
    let graph = read_edge_list(&args.edges, args.directed, args.num_vertices)?;
    let snapshot = NestedSnapshot::from_json(&read_string(&args.snapshot)?)?;

    let nsbm = Nsbm::new(NsbmOptions {
        return_low: !args.skip_low,
        prune: args.prune,
        ..NsbmOptions::default()
    });
    let result = nsbm.labels_from_snapshot(&graph, &snapshot)?;
    info!("{} levels, blocks = {:?}", result.depth(), result.blocks);

    write_level_labels(
        &result.labels,
        &result.label_levels,
        None,
        &format!("{}.levels.tsv.gz", args.out),
    )?;
    Ok(())
}
