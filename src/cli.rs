//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_catalog::CsvCatalog;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::sources::build_registry;
use crate::adapters::sqlite_store::SqliteStore;
use crate::domain::cascade::SourceRegistry;
use crate::domain::error::CascadeError;
use crate::domain::orchestrator::{Engine, RunOptions};
use crate::domain::report::RunReport;
use crate::domain::selection::{parse_tickers, select_tickers};
use crate::domain::settings::{parse_repair_override, EngineSettings};
use crate::domain::source::SourceId;
use crate::ports::catalog_port::CatalogPort;
use crate::ports::config_port::ConfigPort;

/// Exit status when at least one instrument could not be resolved.
pub const EXIT_INSTRUMENT_FAILURES: u8 = 10;

const DEFAULT_CATALOG: &str = "tickers.csv";
const DEFAULT_SITE_DIR: &str = "dist";

#[derive(Parser, Debug)]
#[command(name = "ohlcv-cascade", about = "Multi-source daily OHLCV ingestion")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long, global = true, default_value = "ohlcv-cascade.ini")]
    pub config: PathBuf,
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download new bars for enabled instruments
    Run {
        /// Ignore freshness and refetch full history
        #[arg(long)]
        force: bool,
        /// Comma-separated tickers to process instead of every enabled one
        #[arg(long)]
        ticker: Option<String>,
        /// Include sources marked slow
        #[arg(long)]
        all_sources: bool,
        #[arg(long = "skip-source")]
        skip_source: Vec<String>,
    },
    /// Apply the catalog file to the instrument table and download new entries
    Sync {
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        all_sources: bool,
    },
    /// Re-resolve rows attributed to a known-bad source
    Fix {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        classification: Option<String>,
        #[arg(long)]
        all_sources: bool,
    },
    /// Write the instrument table to the catalog file
    Export {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Summarise the store
    Status,
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.verbose);
    match dispatch(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,ohlcv_cascade={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, CascadeError> {
    FileConfigAdapter::from_file(path)
}

pub fn open_store(config: &dyn ConfigPort) -> Result<SqliteStore, CascadeError> {
    let store = SqliteStore::from_config(config)?;
    store.initialize_schema()?;
    Ok(store)
}

fn catalog_path(flag: Option<&PathBuf>, config: &dyn ConfigPort) -> PathBuf {
    flag.cloned()
        .or_else(|| config.get_string("catalog", "path").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG))
}

fn parse_skip(values: &[String]) -> Result<Vec<SourceId>, CascadeError> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::parse)
        .collect()
}

fn dispatch(cli: &Cli) -> Result<ExitCode, CascadeError> {
    let config = load_config(&cli.config)?;
    let settings = EngineSettings::from_config(&config)?;
    let store = open_store(&config)?;

    match &cli.command {
        Command::Run {
            force,
            ticker,
            all_sources,
            skip_source,
        } => {
            let options = RunOptions {
                force: *force,
                include_slow: *all_sources,
                skip_sources: parse_skip(skip_source)?,
            };
            let registry = build_registry(&config, &settings)?;
            let engine = Engine::new(&store, &registry, settings);
            let report = match ticker {
                Some(list) => {
                    let tickers = parse_tickers(list)?;
                    let selection = select_tickers(&store, &tickers)?;
                    engine.run_selected(&selection, &options)?
                }
                None => engine.run(&options)?,
            };
            println!("{report}");
            Ok(run_exit(&report))
        }
        Command::Sync {
            catalog,
            force,
            all_sources,
        } => {
            let catalog = CsvCatalog::new(catalog_path(catalog.as_ref(), &config));
            let options = RunOptions {
                force: *force,
                include_slow: *all_sources,
                ..RunOptions::default()
            };
            let registry = build_registry(&config, &settings)?;
            let engine = Engine::new(&store, &registry, settings).with_catalog(&catalog);
            let (sync, report) = engine.sync(&options)?;
            println!("{sync}");
            if !report.instruments.is_empty() {
                println!("{report}");
            }
            Ok(run_exit(&report))
        }
        Command::Fix {
            source,
            classification,
            all_sources,
        } => {
            let target = parse_repair_override(
                source.as_deref(),
                classification.as_deref(),
                settings.repair.as_ref(),
            )?;
            let options = RunOptions {
                include_slow: *all_sources,
                ..RunOptions::default()
            };
            let registry = build_registry(&config, &settings)?;
            let engine = Engine::new(&store, &registry, settings);
            let report = engine.repair(target, &options)?;
            println!("{report}");
            if report.has_failures() {
                Ok(ExitCode::from(EXIT_INSTRUMENT_FAILURES))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Export { catalog } => {
            let catalog = CsvCatalog::new(catalog_path(catalog.as_ref(), &config));
            let registry = SourceRegistry::new();
            let engine = Engine::new(&store, &registry, settings).with_catalog(&catalog);
            let written = engine.export()?;
            println!("Exported {written} instruments to {}", catalog.location());
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let catalog = CsvCatalog::new(catalog_path(None, &config));
            let site = config
                .get_string("site", "output_dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SITE_DIR));
            let registry = SourceRegistry::new();
            let engine = Engine::new(&store, &registry, settings).with_catalog(&catalog);
            let status = engine.status(Some(&site))?;
            println!("{status}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_exit(report: &RunReport) -> ExitCode {
    if report.was_cancelled() {
        (&CascadeError::Interrupted).into()
    } else if report.has_failures() {
        ExitCode::from(EXIT_INSTRUMENT_FAILURES)
    } else {
        ExitCode::SUCCESS
    }
}
