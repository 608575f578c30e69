// src/main.rs

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use treeforge::{
    Checksum, Config, DirStore, HostMounter, RunContext, Stage, StageEnv, StageKind, SystemRunner,
};

#[derive(Parser)]
#[command(name = "treeforge")]
#[command(author, version, about = "Verified source acquisition and tree installation", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    /// Extract an archive and copy paths into the tree
    Archive,
    /// Install RPM packages as one transaction
    Rpm,
    /// Pull OSTree commits into an output repository
    Ostree,
}

impl From<StageArg> for StageKind {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Archive => StageKind::Archive,
            StageArg::Rpm => StageKind::Rpm,
            StageArg::Ostree => StageKind::Ostree,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one stage against a tree and print its metadata as JSON
    Run {
        #[arg(value_enum)]
        stage: StageArg,

        /// Target tree
        #[arg(long)]
        tree: PathBuf,

        /// Stage options as JSON ('-' reads stdin)
        #[arg(long)]
        options: String,

        /// Checksum store root
        #[arg(long)]
        store: Option<PathBuf>,

        /// Scratch directory (default: temporary, removed at exit)
        #[arg(long)]
        scratch: Option<PathBuf>,

        /// Persistent cache directory
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Output directory (default: the tree)
        #[arg(long)]
        output: Option<PathBuf>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Manage the checksum store
    #[command(subcommand)]
    Store(StoreCommands),
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Verify a file against its checksum and add it
    Add {
        #[arg(long)]
        store: PathBuf,
        /// Source type, e.g. org.osbuild.files
        #[arg(long = "type", default_value = treeforge::FILES_SOURCE)]
        source_type: String,
        checksum: String,
        file: PathBuf,
    },
    /// Report which checksums are missing
    Check {
        #[arg(long)]
        store: PathBuf,
        #[arg(long = "type", default_value = treeforge::FILES_SOURCE)]
        source_type: String,
        #[arg(required = true)]
        checksums: Vec<String>,
    },
}

fn read_options(source: &str) -> Result<serde_json::Value> {
    let content = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read options from stdin")?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("Failed to read options from {}", source))?
    };
    serde_json::from_str(&content).context("Options are not valid JSON")
}

fn parse_checksums(values: &[String]) -> Result<Vec<Checksum>> {
    values
        .iter()
        .map(|v| Checksum::parse(v).map_err(anyhow::Error::from))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    stage: StageArg,
    tree: &Path,
    options: &str,
    store: Option<PathBuf>,
    scratch: Option<PathBuf>,
    cache: Option<PathBuf>,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = match config {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let store_root = store
        .or(config.store.clone())
        .ok_or_else(|| anyhow!("No checksum store given (--store or 'store' in the config file)"))?;
    let store = DirStore::new(&store_root)?;

    // Held until the end of the run so the directory outlives the stage
    let temp_scratch;
    let scratch_dir = match scratch {
        Some(dir) => dir,
        None => {
            temp_scratch = tempfile::TempDir::new().context("Failed to create scratch directory")?;
            temp_scratch.path().to_path_buf()
        }
    };
    let cache_dir = cache
        .or(config.cache_dir.clone())
        .unwrap_or_else(|| scratch_dir.join("cache"));
    let output_dir = output.unwrap_or_else(|| tree.to_path_buf());

    let kind = StageKind::from(stage);
    let stage = Stage::from_options(kind, read_options(options)?)?;
    let ctx = RunContext::new(scratch_dir, cache_dir, output_dir);

    let runner = SystemRunner;
    let mounter = HostMounter;
    let env = StageEnv {
        store: &store,
        runner: &runner,
        mounter: &mounter,
        tools: &config.tools,
    };

    info!("Running {} stage on {}", kind, tree.display());
    let metadata = stage
        .into_fetcher(env)
        .run(&ctx, tree)
        .inspect_err(|e| error!(category = e.category().as_str(), "{}", e))
        .with_context(|| format!("{} stage failed", kind))?;

    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            stage,
            tree,
            options,
            store,
            scratch,
            cache,
            output,
            config,
        } => cmd_run(stage, &tree, &options, store, scratch, cache, output, config),
        Commands::Store(StoreCommands::Add {
            store,
            source_type,
            checksum,
            file,
        }) => {
            let store = DirStore::new(&store)?;
            let checksum = Checksum::parse(&checksum)?;
            let path = store
                .insert(&source_type, &checksum, &file)
                .with_context(|| format!("Failed to add {}", file.display()))?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Store(StoreCommands::Check {
            store,
            source_type,
            checksums,
        }) => {
            let store = DirStore::new(&store)?;
            let missing = store.missing(&source_type, &parse_checksums(&checksums)?)?;
            if missing.is_empty() {
                return Ok(());
            }
            for checksum in &missing {
                println!("{}", checksum);
            }
            bail!("{} of {} checksum(s) missing", missing.len(), checksums.len())
        }
    }
}
