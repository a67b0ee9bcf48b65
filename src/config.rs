//! Console configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file at
//! all) yields a console that supervises the stock backend on port 3000.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::util::{get_default_backend_port, get_default_frontend_port, get_osc_port};

/// Top-level console configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Directory for per-start service logs, PID files and the console log
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Accumulating log for build and launch diagnostics
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,

    /// JSON configuration consumed by the supervised application
    #[serde(default = "default_app_config")]
    pub app_config: PathBuf,

    /// UDP port for the OSC monitor
    #[serde(default = "get_osc_port")]
    pub osc_port: u16,

    /// Readiness attempts per service (one attempt per interval)
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Seconds between readiness attempts
    #[serde(default = "default_readiness_interval")]
    pub readiness_interval_secs: u64,

    /// Seconds to wait for a supervised process to exit after the stop signal
    #[serde(default = "default_terminate_timeout")]
    pub terminate_timeout_secs: u64,

    /// Milliseconds between the graceful and the forceful signal when reclaiming a port
    #[serde(default = "default_reclaim_grace")]
    pub reclaim_grace_ms: u64,

    /// Ports reclaimed on launch that no supervised service binds itself
    #[serde(default = "default_reserved_ports")]
    pub reserved_ports: Vec<u16>,

    /// Directories created before the first spawn
    #[serde(default = "default_runtime_dirs")]
    pub runtime_dirs: Vec<PathBuf>,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Open the first service in the desktop browser after a successful launch
    #[serde(default)]
    pub open_browser: bool,

    /// Supervised services, launched in order
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

/// One supervised service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    pub port: u16,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (defaults to the console's)
    pub working_dir: Option<PathBuf>,

    /// Environment overrides applied on top of the console's environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Path probed for readiness (default: "/")
    #[serde(default = "default_readiness_path")]
    pub readiness_path: String,

    pub build: Option<BuildConfig>,
}

/// Build step run before spawn when the artifact is missing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    pub working_dir: Option<PathBuf>,

    /// File that must exist after a successful build
    pub artifact: PathBuf,
}

/// Restart policy for crashed services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    /// Sliding window in seconds for `max_restarts`
    #[serde(default = "default_restart_period")]
    pub period_secs: u64,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_restarts: default_max_restarts(),
            period_secs: default_restart_period(),
            restart_delay_secs: default_restart_delay(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_error_log() -> PathBuf {
    PathBuf::from("errors.log")
}

fn default_app_config() -> PathBuf {
    PathBuf::from("data").join("config.json")
}

fn default_readiness_attempts() -> u32 {
    30
}

fn default_readiness_interval() -> u64 {
    1
}

fn default_terminate_timeout() -> u64 {
    3
}

fn default_reclaim_grace() -> u64 {
    1000
}

fn default_reserved_ports() -> Vec<u16> {
    vec![get_default_frontend_port()]
}

fn default_runtime_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("dist").join("data"),
        PathBuf::from("dist").join("logs"),
    ]
}

fn default_readiness_path() -> String {
    "/".to_string()
}

fn default_max_restarts() -> usize {
    5
}

fn default_restart_period() -> u64 {
    300 // 5 minutes
}

fn default_restart_delay() -> u64 {
    3
}

fn default_services() -> Vec<ServiceConfig> {
    vec![ServiceConfig::backend()]
}

impl ServiceConfig {
    /// The stock backend: a node launcher serving HTTP and the bundled frontend
    pub fn backend() -> Self {
        Self {
            name: "backend".to_string(),
            port: get_default_backend_port(),
            command: "node".to_string(),
            args: vec!["dist/launcher.js".to_string()],
            working_dir: None,
            env: HashMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            readiness_path: default_readiness_path(),
            build: Some(BuildConfig {
                command: "npm".to_string(),
                args: vec!["run".to_string(), "build-backend".to_string()],
                working_dir: None,
                artifact: PathBuf::from("dist").join("index.js"),
            }),
        }
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.readiness_path)
    }

    /// Root page of the service, what an operator opens in a browser
    pub fn home_url(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }
}

impl ConsoleConfig {
    /// Load configuration from file, or use defaults if no file exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let config_dir = dirs::config_dir()?;
            let default_path = config_dir.join("stagehand").join("console.toml");
            if default_path.exists() {
                Some(default_path)
            } else {
                None
            }
        });

        if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Self = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            trace!("loaded config: {config:?}");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            anyhow::bail!("at least one service must be configured");
        }
        let mut names = std::collections::HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                anyhow::bail!("duplicate service name: {}", service.name);
            }
        }
        Ok(())
    }

    /// Every port reclaimed before a launch, services first, without duplicates
    pub fn managed_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = Vec::new();
        for port in self
            .services
            .iter()
            .map(|service| service.port)
            .chain(self.reserved_ports.iter().copied())
        {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports
    }

    pub fn pid_file(&self, service: &str) -> PathBuf {
        self.log_dir.join(format!("{service}.pid"))
    }

    pub fn console_log(&self) -> PathBuf {
        self.log_dir.join("stagehand.log")
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_millis(self.reclaim_grace_ms)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            error_log: default_error_log(),
            app_config: default_app_config(),
            osc_port: get_osc_port(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_secs: default_readiness_interval(),
            terminate_timeout_secs: default_terminate_timeout(),
            reclaim_grace_ms: default_reclaim_grace(),
            reserved_ports: default_reserved_ports(),
            runtime_dirs: default_runtime_dirs(),
            watchdog: WatchdogConfig::default(),
            open_browser: false,
            services: default_services(),
        }
    }
}
