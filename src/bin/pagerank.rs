use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use shardrank::algos::pagerank::PageRankOpts;
use shardrank::io::{write_shards, EdgeReader, LoadOpts, OutputOpts};
use shardrank::pipeline::{self, ClusterOpts};

#[derive(Parser, Debug)]
#[command(
    name = "pagerank",
    about = "Compute PageRank over a graph split across a simulated cluster of partitions.",
    long_about = None
)]
struct CliArgs {
    #[arg(long)]
    /// Edge list file, or directory of edge list files; `.gz` files are decompressed.
    input: PathBuf,

    #[arg(long)]
    /// Directory receiving the rank shards; created if missing.
    output: PathBuf,

    #[arg(long)]
    /// Treat edges as directed.
    is_directed: bool,

    #[arg(long)]
    /// Balance partitions by in-degree and pull values instead of balancing
    /// by out-degree and pushing partial sums.
    part_by_in: bool,

    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    /// Sequence balance weight added to every vertex; negative hashes vertices.
    alpha: i32,

    #[arg(long, default_value_t = 100)]
    /// Maximum number of epochs.
    iterations: usize,

    #[arg(long, default_value_t = 0.85)]
    /// The damping factor, in [0 . . 1].
    damping: f64,

    #[arg(long, default_value_t = 0.001)]
    /// Stop once the L1 residual falls below this; 0 runs every epoch.
    eps: f64,

    #[arg(long, default_value_t = 1)]
    /// Number of simulated cluster members.
    partitions: usize,

    #[arg(long)]
    /// Workers per partition; defaults to the available parallelism.
    threads: Option<usize>,

    #[arg(long)]
    /// Number of vertices; defaults to the largest id seen plus one.
    vertices: Option<usize>,

    #[arg(long, default_value_t = 6)]
    /// gzip level of the output shards.
    compression: u32,

    #[arg(long)]
    /// Show a progress bar.
    progress: bool,

    #[arg(long, default_value_t = 10)]
    /// Number of top ranked vertices to log.
    top: usize
}

fn init_envlogger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn run(args: CliArgs) -> Result<()> {
    let mut cluster = ClusterOpts {
        partitions: args.partitions,
        alpha: args.alpha,
        part_by_in: args.part_by_in,
        ..Default::default()
    };
    if let Some(threads) = args.threads {
        cluster.threads = threads;
    }
    let opts = PageRankOpts { iterations: args.iterations, damping: args.damping, eps: args.eps };
    let output = OutputOpts::new(&args.output, args.compression);
    let load = LoadOpts { vertices: args.vertices, ..LoadOpts::new(&args.input, args.is_directed) };

    // Catch bad options before reading anything
    cluster.validate()?;
    opts.validate()?;
    output.validate()?;
    load.validate()?;

    let start = Instant::now();
    let edges = EdgeReader::load(&load)
        .with_context(|| format!("Failed to load {}", args.input.display()))?;
    info!("Loaded in {:?}", start.elapsed());

    info!("Running on {} partitions with {} threads each", cluster.partitions, cluster.threads);
    let start = Instant::now();
    let (ranks, state) = pipeline::run(&edges, &cluster, &opts, args.progress)?;
    info!("{:?} after {} epochs in {:?}, residual {:e}, rank mass {}",
          state.state, state.epoch, start.elapsed(), state.residual, ranks.sum());

    for (i, (vertex, rank)) in ranks.top_k(args.top).into_iter().enumerate() {
        info!("#{}: {}\t{}", i + 1, vertex, rank);
    }

    let start = Instant::now();
    let shards = write_shards(&ranks, cluster.threads, &output)
        .with_context(|| format!("Failed to write ranks to {}", args.output.display()))?;
    info!("Saved {} shards in {:?}", shards.len(), start.elapsed());
    Ok(())
}

fn main() {
    init_envlogger();
    let args = CliArgs::parse();
    if let Err(e) = run(args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
