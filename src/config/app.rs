//! Application configuration loading from config.toml
//!
//! Every field has a default, so an empty file (or a missing section) yields a
//! working configuration. Paths to external executables can also come from the
//! environment, which wins over the file.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_OUTPUT_DIR: &str = "data/invoices";
const DEFAULT_ATTACHMENTS_DIR: &str = "data/attachments";
const DEFAULT_PACKAGED_TEMPLATE: &str = "resources/templates/invoice.mustache";
const DEFAULT_DEV_TEMPLATE: &str = "templates/invoice.mustache";
const DEFAULT_LAUNCH_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_NEW_PAGE_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_CONTENT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PDF_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_NETWORK_IDLE_MS: u64 = 500;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_GREETING_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_SEND_DEADLINE_MS: u64 = 60_000;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database URL; `DATABASE_URL` overrides it
    pub database_url: Option<String>,
    pub paths: PathsConfig,
    pub browser: BrowserConfig,
    pub mail: MailConfig,
    pub send: SendConfig,
}

/// Where documents are written and templates are looked up.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory receiving the generated `{prefix}-Invoice-{number}.pdf` files
    pub output_dir: PathBuf,
    /// Directory stored attachments are copied into
    pub attachments_dir: PathBuf,
    /// Template locations tried in order: packaged layout first, then development layout
    pub templates: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            attachments_dir: PathBuf::from(DEFAULT_ATTACHMENTS_DIR),
            templates: vec![
                PathBuf::from(DEFAULT_PACKAGED_TEMPLATE),
                PathBuf::from(DEFAULT_DEV_TEMPLATE),
            ],
        }
    }
}

/// Headless browser location and per-step budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Path to `chromedriver`; falls back to `CHROMEDRIVER_PATH`, then a `PATH` search
    pub driver_path: Option<PathBuf>,
    /// Chrome/Chromium binary handed to the driver; `CHROME_BINARY` overrides it
    pub chrome_binary: Option<PathBuf>,
    pub launch_timeout_ms: u64,
    pub new_page_timeout_ms: u64,
    pub content_timeout_ms: u64,
    pub pdf_timeout_ms: u64,
    /// How long the page must stay free of in-flight requests to count as idle
    pub network_idle_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            driver_path: None,
            chrome_binary: None,
            launch_timeout_ms: DEFAULT_LAUNCH_TIMEOUT_MS,
            new_page_timeout_ms: DEFAULT_NEW_PAGE_TIMEOUT_MS,
            content_timeout_ms: DEFAULT_CONTENT_TIMEOUT_MS,
            pdf_timeout_ms: DEFAULT_PDF_TIMEOUT_MS,
            network_idle_ms: DEFAULT_NETWORK_IDLE_MS,
        }
    }
}

/// Step budgets of the rasterizer, as durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudgets {
    pub launch: Duration,
    pub new_page: Duration,
    pub content: Duration,
    pub pdf: Duration,
    pub network_idle: Duration,
}

impl BrowserConfig {
    #[must_use]
    pub const fn budgets(&self) -> StepBudgets {
        StepBudgets {
            launch: Duration::from_millis(self.launch_timeout_ms),
            new_page: Duration::from_millis(self.new_page_timeout_ms),
            content: Duration::from_millis(self.content_timeout_ms),
            pdf: Duration::from_millis(self.pdf_timeout_ms),
            network_idle: Duration::from_millis(self.network_idle_ms),
        }
    }

    /// Driver executable from the environment or the file, in that order.
    #[must_use]
    pub fn configured_driver_path(&self) -> Option<PathBuf> {
        std::env::var_os("CHROMEDRIVER_PATH")
            .map(PathBuf::from)
            .or_else(|| self.driver_path.clone())
    }

    #[must_use]
    pub fn configured_chrome_binary(&self) -> Option<PathBuf> {
        std::env::var_os("CHROME_BINARY")
            .map(PathBuf::from)
            .or_else(|| self.chrome_binary.clone())
    }
}

/// SMTP retry policy and socket timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub max_attempts: u32,
    /// Delay unit of the linear backoff: the wait after attempt `n` is `n * backoff_ms`
    pub backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub greeting_timeout_ms: u64,
    pub socket_timeout_ms: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            greeting_timeout_ms: DEFAULT_GREETING_TIMEOUT_MS,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
        }
    }
}

impl MailConfig {
    /// Wait before the next attempt once `attempts_made` attempts have failed.
    #[must_use]
    pub fn backoff_after(&self, attempts_made: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempts_made)))
    }
}

/// What to do when a send is requested for an invoice that is already being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateSendPolicy {
    /// Answer immediately with `AlreadySending`
    #[default]
    Reject,
    /// Wait until the in-flight send finishes, then proceed
    Queue,
}

/// Orchestrator-level policies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    /// Overall watchdog for one send request
    pub deadline_ms: u64,
    pub duplicate_sends: DuplicateSendPolicy,
    /// Also write a failed email log row when rendering or rasterizing fails
    pub log_render_failures: bool,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            deadline_ms: DEFAULT_SEND_DEADLINE_MS,
            duplicate_sends: DuplicateSendPolicy::default(),
            log_render_failures: false,
        }
    }
}

impl SendConfig {
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Loads the application configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse {}: {e}", path_ref.display()),
    })
}

/// Loads the configuration from `INVOICE_COURIER_CONFIG` or `./config.toml`.
///
/// A missing file is not an error: the defaults are used instead.
pub fn load_default_config() -> Result<AppConfig> {
    let path = std::env::var("INVOICE_COURIER_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if Path::new(&path).exists() {
        load_config(path)
    } else {
        tracing::info!("No configuration file at {}, using defaults", path);
        Ok(AppConfig::default())
    }
}
