mod api;
mod cache;
mod cli;
mod clock;
mod config;
mod error;
mod http;
mod models;
mod session;
mod storage;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atelier", about = "Back-office client for the furniture storefront API")]
pub struct Args {
    #[arg(long, env = "ATELIER_BASE_URL", help = "API base URL (overrides config)")]
    pub base_url: Option<String>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Session file path (overrides config)")]
    pub session_file: Option<PathBuf>,

    #[arg(long, help = "Keep the session in memory only (nothing written to disk)")]
    pub ephemeral: bool,

    #[arg(long, help = "Debug output (requests, cache decisions)")]
    pub debug: bool,

    #[arg(long, help = "Trace-level output")]
    pub trace: bool,

    #[command(subcommand)]
    pub command: Option<cli::Command>,
}

fn init_logging(args: &Args) {
    let default = if args.trace {
        "atelier=trace"
    } else if args.debug {
        "atelier=debug"
    } else {
        "warn"
    };
    // RUST_LOG wins over the flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args);

    let mut cfg = if let Some(config_path) = &args.config {
        let mut cfg = config::Config::default();
        cfg.merge(config::Config::load_from(config_path)?);
        cfg
    } else {
        config::Config::load()?
    };

    if let Some(base_url) = &args.base_url {
        cfg.base_url = Some(base_url.clone());
    }
    if let Some(path) = &args.session_file {
        cfg.session.path = Some(path.clone());
    }

    if let Err(errors) = cfg.validate() {
        for err in &errors {
            eprintln!("Config error {}", err);
        }
        return Err(anyhow::anyhow!(
            "Invalid configuration ({} error(s))",
            errors.len()
        ));
    }

    tracing::debug!(
        base_url = cfg.base_url(),
        timeout_ms = cfg.timeout().as_millis() as u64,
        staleness_secs = cfg.staleness_window().as_secs(),
        inactivity_secs = cfg.inactivity_timeout().as_secs(),
        "configuration loaded"
    );

    let clock: Arc<dyn clock::Clock> = Arc::new(clock::SystemClock);
    let http = http::HttpClient::new(cfg.base_url(), cfg.timeout(), cfg.auth_policy());
    let api = Arc::new(api::StorefrontApi::new(http));
    let storage: Box<dyn storage::KeyValueStore> = if args.ephemeral {
        Box::new(storage::MemoryStore::new())
    } else {
        Box::new(storage::FileStore::open(&cfg.session_path()))
    };
    let session = session::SessionStore::new(
        storage,
        clock.clone(),
        cfg.inactivity_timeout(),
    );
    let cache = cache::ReferenceCache::new(api.clone(), clock, cfg.staleness_window());

    let ctx = cli::Context::new(cfg, api, session, cache);

    match args.command.clone().unwrap_or(cli::Command::Console) {
        cli::Command::Console => cli::run_console(&ctx),
        command => cli::run_once(&ctx, command),
    }
}
