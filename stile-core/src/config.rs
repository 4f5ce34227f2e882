use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read solver config {path}: {source}")]
    Read { source: io::Error, path: PathBuf },
    #[error("failed to parse solver config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level solver configuration. Every section has defaults so the daemon
/// can run without a config file; CLI flags override individual fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SolverConfig {
    pub server: ServerSection,
    pub pool: PoolSection,
    pub browser: BrowserSection,
    pub headers: HeadersSection,
    pub proxy: ProxySection,
    pub retention: RetentionSection,
}

impl SolverConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn solve_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.solve_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_seconds)
    }

    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention.retention_hours as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5072,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Number of workers, each owning one browser session.
    pub threads: usize,
    pub solve_timeout_seconds: u64,
    pub session_retry_attempts: u32,
    pub session_retry_backoff_seconds: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            threads: 4,
            solve_timeout_seconds: 30,
            session_retry_attempts: 3,
            session_retry_backoff_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserVariant {
    Chromium,
    Chrome,
    Msedge,
}

impl BrowserVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserVariant::Chromium => "chromium",
            BrowserVariant::Chrome => "chrome",
            BrowserVariant::Msedge => "msedge",
        }
    }

    /// Conventional executable location used when the config does not pin one.
    pub fn default_executable(&self) -> &'static str {
        match self {
            BrowserVariant::Chromium => "/usr/bin/chromium",
            BrowserVariant::Chrome => "/usr/bin/google-chrome",
            BrowserVariant::Msedge => "/usr/bin/microsoft-edge",
        }
    }
}

impl std::fmt::Display for BrowserVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BrowserVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Self::Chromium),
            "chrome" => Ok(Self::Chrome),
            "msedge" => Ok(Self::Msedge),
            other => Err(format!("unknown browser variant: {other}")),
        }
    }
}

impl Default for BrowserVariant {
    fn default() -> Self {
        BrowserVariant::Chromium
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub variant: BrowserVariant,
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window: [u32; 2],
    pub lang: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            variant: BrowserVariant::Chromium,
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            window: [520, 240],
            lang: None,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserSection {
    pub fn executable(&self) -> &str {
        self.executable_path
            .as_deref()
            .unwrap_or_else(|| self.variant.default_executable())
    }
}

/// Header-profile selection. `user_agent` pins a static User-Agent;
/// `browser` + `version` pin a profile from the built-in table; otherwise a
/// random profile is drawn per session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeadersSection {
    pub user_agent: Option<String>,
    pub browser: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub enabled: bool,
    pub endpoints: Vec<String>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub sweep_interval_seconds: u64,
    pub retention_hours: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 3600,
            retention_hours: 168,
        }
    }
}

pub fn load_solver_config<P: AsRef<Path>>(path: P) -> ConfigResult<SolverConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/stile.toml");
        let config = load_solver_config(path).expect("config should parse");
        assert_eq!(config.pool.threads, 2);
        assert_eq!(config.server.port, 5072);
        assert_eq!(config.browser.variant, BrowserVariant::Chromium);
        assert!(config.browser.headless);
    }

    #[test]
    fn defaults_cover_empty_config() {
        let config: SolverConfig = toml::from_str("").expect("empty config");
        assert_eq!(config.pool.threads, 4);
        assert_eq!(config.pool.solve_timeout_seconds, 30);
        assert_eq!(config.retention.retention_hours, 168);
        assert_eq!(config.listen_addr(), "0.0.0.0:5072");
    }

    #[test]
    fn missing_config_reports_path() {
        let err = load_solver_config("/nonexistent/stile.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/stile.toml"));
    }

    #[test]
    fn variant_round_trips() {
        for variant in [
            BrowserVariant::Chromium,
            BrowserVariant::Chrome,
            BrowserVariant::Msedge,
        ] {
            assert_eq!(variant.as_str().parse::<BrowserVariant>(), Ok(variant));
        }
        assert!("firefox".parse::<BrowserVariant>().is_err());
    }
}
