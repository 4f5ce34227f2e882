use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stile_core::{
    load_solver_config, ApiState, BrowserVariant, DispatchQueue, HeaderProfilePool, ProxyPool,
    SessionLauncher, SolverConfig, Sweeper, TaskRegistry, WorkerOptions, WorkerPool,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] stile_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Turnstile solver daemon", long_about = None)]
pub struct Cli {
    /// Path to stile.toml; defaults apply when absent
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Listen host
    #[arg(long)]
    pub host: Option<String>,
    /// Listen port
    #[arg(long)]
    pub port: Option<u16>,
    /// Number of browser workers
    #[arg(long)]
    pub thread: Option<usize>,
    /// Per-solve timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Browser variant: chromium, chrome or msedge
    #[arg(long, value_name = "VARIANT")]
    pub browser_type: Option<String>,
    /// Static User-Agent override (random header profile otherwise)
    #[arg(long)]
    pub useragent: Option<String>,
    /// Run the browser with a visible window
    #[arg(long)]
    pub no_headless: bool,
    /// Enable proxy support
    #[arg(long)]
    pub proxy: bool,
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Loads the config file (or defaults) and applies flag overrides.
    pub fn resolve_config(&self) -> Result<SolverConfig> {
        let mut config = match &self.config {
            Some(path) => load_solver_config(path)?,
            None => SolverConfig::default(),
        };
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(threads) = self.thread {
            config.pool.threads = threads;
        }
        if let Some(timeout) = self.timeout {
            config.pool.solve_timeout_seconds = timeout;
        }
        if let Some(variant) = &self.browser_type {
            config.browser.variant = variant
                .parse::<BrowserVariant>()
                .map_err(AppError::InvalidArgument)?;
        }
        if let Some(useragent) = &self.useragent {
            config.headers.user_agent = Some(useragent.clone());
        }
        if self.no_headless {
            config.browser.headless = false;
        }
        if self.proxy {
            config.proxy.enabled = true;
        }
        Ok(config)
    }

    fn init_tracing(&self) {
        let default_directive = if self.debug { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    cli.init_tracing();
    let config = cli.resolve_config()?;

    let registry = Arc::new(TaskRegistry::new());
    let queue = DispatchQueue::new();

    let launcher = SessionLauncher::new(
        config.browser.clone(),
        HeaderProfilePool::from_config(&config.headers),
        ProxyPool::from_config(&config.proxy),
    );
    let pool = WorkerPool::start(
        Arc::clone(&registry),
        queue.clone(),
        Arc::new(launcher),
        WorkerOptions::from(&config.pool),
    );
    let sweeper = Sweeper::new(
        Arc::clone(&registry),
        config.sweep_interval(),
        config.retention_window(),
    )
    .spawn();

    let state = ApiState::new(Arc::clone(&registry), queue.clone());
    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    info!(
        addr = %config.listen_addr(),
        threads = config.pool.threads,
        variant = %config.browser.variant,
        "stiled listening"
    );

    axum::serve(listener, stile_core::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    pool.shutdown().await;
    sweeper.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_without_config_file() {
        let cli = Cli::parse_from(["stiled"]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.pool.threads, 4);
        assert_eq!(config.listen_addr(), "0.0.0.0:5072");
        assert!(config.browser.headless);
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nthreads = 8\n\n[server]\nport = 9000").unwrap();
        let cli = Cli::parse_from([
            "stiled",
            "--config",
            file.path().to_str().unwrap(),
            "--thread",
            "2",
            "--no-headless",
            "--browser-type",
            "msedge",
            "--useragent",
            "TestAgent/1.0",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.pool.threads, 2);
        assert_eq!(config.server.port, 9000);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.variant, BrowserVariant::Msedge);
        assert_eq!(config.headers.user_agent.as_deref(), Some("TestAgent/1.0"));
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let cli = Cli::parse_from(["stiled", "--browser-type", "firefox"]);
        assert!(matches!(
            cli.resolve_config(),
            Err(AppError::InvalidArgument(_))
        ));
    }
}
