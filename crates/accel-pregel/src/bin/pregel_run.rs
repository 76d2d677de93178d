//! pregel-run - run a vertex-centric algorithm over a graph file
//!
//! Exit codes: 0 success, 1 usage, 2 connection failure, 3 illegal parameter
//! or config, 4 missing graph file, 5 graph file mismatch or malformed,
//! 6 run failed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use accel_pregel::graph_file;
use accel_pregel::pregel::{
    AlgorithmPolicy, EngineConfig, EngineError, ExecutorKind, Graph, IterationDriver, LabelPropagation,
    RankPropagation, Relaxation, VertexId,
};
use accel_pregel::GraphFileError;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algorithm {
    /// Delta PageRank; weights become 1/out-degree
    Rank,
    /// Multi-source shortest paths from the seeds
    Relax,
    /// Label propagation communities
    Label,
}

#[derive(Debug, Parser)]
#[command(name = "pregel-run", version, about = "Run a Pregel algorithm on an accelerated engine")]
struct Cli {
    /// Graph file: "vertex_count edge_count" then "src dst weight" triples
    graph: PathBuf,

    /// Expected vertex count
    vertices: usize,

    /// Expected edge count
    edges: usize,

    #[arg(short, long, value_enum, default_value = "rank")]
    algorithm: Algorithm,

    /// Seed vertex (repeatable)
    #[arg(short, long = "seed")]
    seeds: Vec<u32>,

    /// Worker count; overrides the config file
    #[arg(short, long)]
    workers: Option<usize>,

    /// Iteration limit; overrides the config file
    #[arg(short, long)]
    iterations: Option<usize>,

    #[arg(long, default_value_t = 0.85)]
    damping: f64,

    /// Run on the host instead of the device
    #[arg(long)]
    host: bool,

    /// YAML engine config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the JSON result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let code = if let Some(e) = err.downcast_ref::<EngineError>() {
        e.exit_code()
    } else if let Some(e) = err.downcast_ref::<GraphFileError>() {
        e.exit_code()
    } else {
        6
    };
    u8::try_from(code).unwrap_or(6)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.vertices == 0 || cli.edges == 0 {
        return Err(EngineError::illegal("vertex and edge counts must be positive").into());
    }

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::new(),
    };
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(iterations) = cli.iterations {
        config = config.with_max_iterations(iterations);
    }
    if cli.host {
        config = config.with_executor(ExecutorKind::Host);
    }
    config.validate()?;

    let graph = graph_file::load(&cli.graph, cli.vertices, cli.edges)
        .with_context(|| format!("reading {}", cli.graph.display()))?;
    let seeds = cli.seeds.iter().copied().map(VertexId::new).collect::<Vec<_>>();
    let mut graph = graph.with_seeds(seeds)?;

    let report = match cli.algorithm {
        Algorithm::Rank => {
            if !(0.0..1.0).contains(&cli.damping) {
                return Err(EngineError::illegal(format!("damping {} outside [0, 1)", cli.damping)).into());
            }
            graph.normalize_by_out_degree();
            execute(RankPropagation::new(cli.damping), config, &graph).await?
        }
        Algorithm::Relax => {
            if graph.seeds().is_empty() {
                return Err(EngineError::illegal("relaxation needs at least one --seed").into());
            }
            let sources = graph.seeds().len();
            execute(Relaxation::new(sources), config, &graph).await?
        }
        Algorithm::Label => execute(LabelPropagation::new(), config, &graph).await?,
    };

    match &cli.output {
        Some(path) => {
            let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
            serde_json::to_writer_pretty(file, &report)?;
        }
        None => {
            serde_json::to_writer_pretty(std::io::stdout().lock(), &report)?;
            println!();
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Report<V> {
    algorithm: &'static str,
    workers: usize,
    #[serde(flatten)]
    result: accel_pregel::RunResult<V>,
}

async fn execute<P: AlgorithmPolicy>(
    policy: P,
    config: EngineConfig,
    graph: &Graph,
) -> anyhow::Result<serde_json::Value> {
    let algorithm = policy.name();
    let workers = config.workers;
    let mut driver = IterationDriver::new(policy, config)?;
    let result = driver.run(graph).await?;
    let report = Report {
        algorithm,
        workers,
        result,
    };
    Ok(serde_json::to_value(&report)?)
}
