use crate::io::*;

use anyhow::bail;
use clap::{Args, ValueEnum};
use log::info;
use nsbm::{ModelVariant, NestedSnapshot, Nsbm, NsbmOptions};
use serde::Serialize;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelArg {
    Plain,
    Dc,
    Planted,
}

impl From<ModelArg> for ModelVariant {
    fn from(m: ModelArg) -> Self {
        match m {
            ModelArg::Plain => ModelVariant::Plain,
            ModelArg::Dc => ModelVariant::DegreeCorrected,
            ModelArg::Planted => ModelVariant::Planted,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FitArgs {
    #[arg(required = true,
          help = "Edge list (`source target [weight]` per line, .gz ok)")]
    edges: Box<str>,

    #[arg(long, short, required = true,
          help = "Output file prefix",
          long_help = "Output file prefix.\n\
                       Generates: {out}.levels.tsv.gz, {out}.summary.json, {out}.snapshot.json\n\
                       and, with --draws > 0, {out}.marginal_{level}.tsv.gz, {out}.stability.tsv.gz,\n\
                       {out}.consistency.tsv.gz, {out}.affinity.tsv.gz")]
    out: Box<str>,

    #[arg(long, help = "Treat edges as directed")]
    directed: bool,

    #[arg(long, help = "Number of vertices (default: largest index + 1)")]
    num_vertices: Option<usize>,

    #[arg(long, help = "JSON file with the full option bundle",
          long_help = "JSON file with the full option bundle.\n\
                       Missing fields take their defaults; flags given on the command line win.")]
    options: Option<Box<str>>,

    #[arg(long, short = 'm', value_enum, help = "Level-0 model [default: dc]")]
    model: Option<ModelArg>,

    #[arg(long, help = "Reference partition for the planted model (one label per line)")]
    reference: Option<Box<str>>,

    #[arg(long, short = 'L', help = "Maximum number of hierarchy levels [default: 10]")]
    max_levels: Option<usize>,

    #[arg(long, help = "Pad the hierarchy with single-block levels up to this length")]
    hierarchy_length: Option<usize>,

    #[arg(long, short = 'i', help = "Sweep budget of each equilibration [default: 1000]")]
    max_sweeps: Option<usize>,

    #[arg(long, help = "Relative tolerance of the convergence monitor [default: 1e-6]")]
    tolerance: Option<f64>,

    #[arg(long, help = "Proposal temperature [default: 1.0]")]
    temperature: Option<f64>,

    #[arg(long, short = 's', help = "Random seed [default: 42]")]
    seed: Option<u64>,

    #[arg(long, short = 'j', help = "Worker threads for posterior chains (0 = all cores)")]
    jobs: Option<usize>,

    #[arg(long, short = 'c', help = "Posterior chains [default: 1]")]
    chains: Option<usize>,

    #[arg(long, short = 'd', help = "Posterior draws per chain (0 skips sampling) [default: 0]")]
    draws: Option<usize>,

    #[arg(long, help = "Nested sweeps between posterior draws [default: 1]")]
    thin: Option<usize>,

    #[arg(long, help = "Reject disconnected graphs")]
    require_connected: bool,

    #[arg(long, help = "Leave level 0 out of the level labels")]
    skip_low: bool,

    #[arg(long, help = "Drop levels that repeat the level below")]
    prune: bool,

    #[arg(long, help = "Skip the n x n co-clustering matrix")]
    no_affinity: bool,

    #[arg(long, help = "Continue from a snapshot written by an earlier run")]
    resume: Option<Box<str>>,
}

impl FitArgs {
    fn to_options(&self) -> anyhow::Result<NsbmOptions> {
        let mut opts: NsbmOptions = match &self.options {
            Some(file) => serde_json::from_str(&read_string(file)?)?,
            None => NsbmOptions::default(),
        };

        if let Some(m) = self.model {
            opts.model = m.into();
        }
        if let Some(x) = self.max_levels {
            opts.max_levels = x;
        }
        if let Some(x) = self.hierarchy_length {
            opts.hierarchy_length = x;
        }
        if let Some(x) = self.max_sweeps {
            opts.max_sweeps = x;
        }
        if let Some(x) = self.tolerance {
            opts.convergence_tolerance = x;
        }
        if let Some(x) = self.temperature {
            opts.temperature = x;
        }
        if let Some(x) = self.seed {
            opts.seed = x;
        }
        if let Some(x) = self.jobs {
            opts.n_jobs = x;
        }
        if let Some(x) = self.chains {
            opts.n_chains = x;
        }
        if let Some(x) = self.draws {
            opts.n_draws = x;
        }
        if let Some(x) = self.thin {
            opts.thin = x;
        }
        opts.require_connected |= self.require_connected;
        if self.skip_low {
            opts.return_low = false;
        }
        opts.prune |= self.prune;
        if self.no_affinity {
            opts.affinity = false;
        }
        Ok(opts)
    }
}

#[derive(Serialize)]
struct FitSummary<'a> {
    num_vertices: usize,
    num_edges: usize,
    status: String,
    entropy: f64,
    depth: usize,
    levels: &'a [usize],
    blocks: &'a [usize],
    level_entropies: &'a [f64],
    modularity: &'a [f64],
    adjacent_nmi: &'a [f64],
    uninformative: &'a [bool],
    reports: &'a [nsbm::sampler::EquilibrationReport],
    #[serde(skip_serializing_if = "Option::is_none")]
    mf_entropy: Option<&'a [f64]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_marginals: Option<&'a [Vec<usize>]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_stability: Option<&'a [Vec<f64>]>,
}

pub fn fit(args: &FitArgs) -> anyhow::Result<()> {
    let opts = args.to_options()?;

    info!("Reading edges from {}", args.edges);
    let graph = read_edge_list(&args.edges, args.directed, args.num_vertices)?;
    info!(
        "{} vertices, {} edges (total weight {:.2})",
        graph.num_vertices(),
        graph.num_edges(),
        graph.total_weight()
    );

    let mut nsbm = Nsbm::new(opts.clone());
    match (&args.reference, opts.model) {
        (Some(file), _) => nsbm = nsbm.with_reference(read_labels(file)?),
        (None, ModelVariant::Planted) if args.resume.is_none() => bail!("the planted model needs --reference"),
        _ => {}
    }

    let result = match &args.resume {
        Some(file) => {
            info!("Resuming from {}", file);
            let snapshot = NestedSnapshot::from_json(&read_string(file)?)?;
            nsbm.resume(&graph, &snapshot)?
        }
        None => nsbm.fit(&graph)?,
    };

    let out = &args.out;
    write_level_labels(
        &result.labels,
        &result.label_levels,
        result.vertices.as_deref(),
        &format!("{}.levels.tsv.gz", out),
    )?;

    let posterior = result.posterior.as_ref();
    let summary = FitSummary {
        num_vertices: graph.num_vertices(),
        num_edges: graph.num_edges(),
        status: result.status().to_string(),
        entropy: result.entropy,
        depth: result.depth(),
        levels: &result.levels,
        blocks: &result.blocks,
        level_entropies: &result.level_entropies,
        modularity: &result.modularity,
        adjacent_nmi: &result.adjacent_nmi,
        uninformative: &result.uninformative,
        reports: &result.reports,
        mf_entropy: posterior.map(|p| p.mf_entropy.as_slice()),
        group_marginals: posterior.map(|p| p.group_marginals.as_slice()),
        block_stability: posterior.map(|p| p.block_stability.as_slice()),
    };
    write_json(&summary, &format!("{}.summary.json", out))?;
    write_json(&result.snapshot, &format!("{}.snapshot.json", out))?;

    if let Some(p) = posterior {
        for (&l, m) in p.levels.iter().zip(&p.marginals) {
            write_matrix(m, &format!("{}.marginal_{}.tsv.gz", out, l))?;
        }
        let n = p.stability.first().map(|x| x.len()).unwrap_or(0);
        let stability = nalgebra::DMatrix::from_fn(n, p.stability.len(), |i, l| p.stability[l][i]);
        write_matrix(&stability, &format!("{}.stability.tsv.gz", out))?;
        write_matrix(&p.consistency, &format!("{}.consistency.tsv.gz", out))?;
        if let Some(affinity) = &p.affinity {
            write_matrix(affinity, &format!("{}.affinity.tsv.gz", out))?;
        }
    }

    info!(
        "blocks per level: {:?}, S = {:.4} ({})",
        result.blocks,
        result.entropy,
        result.status()
    );
    Ok(())
}
