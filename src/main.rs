use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use test_impact::app::dto::{AffectedRequest, SelectRequest};
use test_impact::app::{Workspace, WorkspaceHandle};
use test_impact::cli;
use test_impact::config::ImpactConfig;
use test_impact::domain::hasher::HashMode;
use test_impact::logging::init_logging;
use test_impact::server::{http, mcp::ImpactMcpServer};

#[derive(Parser, Debug)]
#[command(
    name = "timpact",
    version,
    about = "Track code-element dependencies and select the tests affected by a change"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Directory for persisted snapshots and history (overrides config)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Content hashing mode (overrides config)
    #[arg(long, global = true, value_enum)]
    hash_mode: Option<HashModeArg>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HashModeArg {
    Normalized,
    Exact,
}

impl From<HashModeArg> for HashMode {
    fn from(arg: HashModeArg) -> Self {
        match arg {
            HashModeArg::Normalized => HashMode::Normalized,
            HashModeArg::Exact => HashMode::Exact,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the dependency graph and record a snapshot of every file
    Build,

    /// Show element changes in files since their last snapshot
    Changes {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Elements called by an element
    Deps { id: String },

    /// Elements that call an element
    Dependents { id: String },

    /// Elements and tests transitively affected by changing elements
    Impact {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Reverse-edge hops to follow (default: unbounded)
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Select tests for changed element ids
    Select {
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Detect changed files and select the tests to re-run
    Affected {
        /// Files to check (default: the whole workspace)
        paths: Vec<String>,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Export the graph as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record test execution results from a JSON file (`-` for stdin)
    Record { input: PathBuf },

    /// Start a server
    Serve {
        #[command(subcommand)]
        mode: ServeMode,
    },
}

#[derive(clap::Args, Debug)]
struct SelectionArgs {
    /// Time budget in milliseconds
    #[arg(long)]
    budget_ms: Option<u64>,

    /// Minimum confidence (default from config)
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum ServeMode {
    /// HTTP JSON API
    Http {
        #[arg(long, default_value = "127.0.0.1:8118")]
        addr: SocketAddr,
    },
    /// MCP over stdio
    Mcp,
}

fn load_config(cli: &Cli) -> Result<ImpactConfig> {
    let mut config = ImpactConfig::load(&cli.root)?;
    if let Some(dir) = &cli.cache_dir {
        config.workspace.cache_dir = dir.clone();
    }
    if let Some(mode) = cli.hash_mode {
        config.hasher.mode = mode.into();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let mut ws = Workspace::open(&cli.root, config)?;
    let json = cli.json;

    match cli.command {
        Commands::Build => cli::build_graph(&mut ws, json)?,
        Commands::Changes { paths } => cli::detect_changes(&mut ws, &paths, json)?,
        Commands::Deps { id } => cli::neighbors(&mut ws, &id, false, json)?,
        Commands::Dependents { id } => cli::neighbors(&mut ws, &id, true, json)?,
        Commands::Impact { ids, max_depth } => cli::test_impact(&mut ws, &ids, max_depth, json)?,
        Commands::Select { ids, selection } => cli::select(
            &mut ws,
            SelectRequest {
                changed: ids,
                time_budget_ms: selection.budget_ms,
                confidence_threshold: selection.threshold,
            },
            json,
        )?,
        Commands::Affected { paths, selection } => cli::affected(
            &mut ws,
            AffectedRequest {
                paths,
                time_budget_ms: selection.budget_ms,
                confidence_threshold: selection.threshold,
            },
            json,
        )?,
        Commands::Export { output } => cli::export(&mut ws, output.as_deref())?,
        Commands::Record { input } => cli::record_results(&mut ws, Path::new(&input), json)?,
        Commands::Serve { mode } => return serve(ws, mode),
    }
    ws.close()
}

fn serve(mut ws: Workspace, mode: ServeMode) -> Result<()> {
    let stats = ws.start()?.stats;
    tracing::info!(elements = stats.elements, tests = stats.tests, "Workspace ready");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let handle = WorkspaceHandle::spawn(ws)?;
        let served = match mode {
            ServeMode::Http { addr } => http::serve(handle.clone(), addr).await,
            ServeMode::Mcp => ImpactMcpServer::new(handle.clone()).serve_stdio().await,
        };
        handle.close().await?;
        served
    })
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
