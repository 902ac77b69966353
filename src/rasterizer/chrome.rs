//! Headless Chrome engine: a private chromedriver process plus one `WebDriver` session.
//!
//! `launch` starts chromedriver on a free local port, waits for it to accept a
//! session, and hands back a [`ChromeSession`] owning both. Content is written
//! straight into `about:blank` and the PDF comes from `DevTools` `Page.printToPDF`.
//!
//! Network idle means the page's load event has fired and no new resource
//! timing entry has completed for the whole idle window. Resource timing only
//! records finished fetches, so late requests are seen when they complete.

use super::{BrowserEngine, BrowserSession, PdfOptions, locate};
use crate::{
    config::BrowserConfig,
    errors::{Error, Result},
};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thirtyfour::error::WebDriverErrorInner;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::{ChromeCapabilities, ChromiumLikeCapabilities, DesiredCapabilities, WebDriver};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Number of completed resource fetches once the load event has fired, `-1` before.
const SETTLED_RESOURCES_SCRIPT: &str = "return document.readyState === 'complete' \
    ? performance.getEntriesByType('resource').length \
    : -1;";

const WRITE_DOCUMENT_SCRIPT: &str =
    "document.open(); document.write(arguments[0]); document.close();";

/// Launches headless Chrome through a chromedriver found on disk.
#[derive(Debug, Clone, Default)]
pub struct ChromeEngine {
    driver_path: Option<PathBuf>,
    chrome_binary: Option<PathBuf>,
}

impl ChromeEngine {
    /// Engine using the driver and binary from the config (environment first).
    #[must_use]
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            driver_path: config.configured_driver_path(),
            chrome_binary: config.configured_chrome_binary(),
        }
    }

    fn capabilities(&self) -> Result<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();
        caps.set_headless()?;
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--disable-setuid-sandbox")?;
        caps.add_arg("--disable-gpu")?;
        if let Some(binary) = &self.chrome_binary {
            caps.set_binary(&binary.to_string_lossy())?;
        }
        Ok(caps)
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let driver_path = locate::find_driver(self.driver_path.as_deref())?;
        let port = free_port()?;
        info!(driver = %driver_path.display(), port, "Starting chromedriver");

        let mut child = Command::new(&driver_path)
            .arg(format!("--port={port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::RasterizerUnavailable {
                message: format!("failed to start {}: {e}", driver_path.display()),
            })?;

        let caps = self.capabilities()?;
        let server_url = format!("http://127.0.0.1:{port}");
        let driver = open_session(&mut child, &server_url, &caps).await?;

        Ok(Box::new(ChromeSession {
            driver: Some(driver),
            child,
        }))
    }
}

/// Waits for the driver to listen, then asks it for a session.
///
/// Only "not listening yet" is retried; the caller's launch budget bounds the
/// wait. Any answer from the driver that is not a session (missing Chrome
/// binary, rejected capabilities) is returned at once as
/// [`Error::RasterizerUnavailable`] with the driver's own message.
async fn open_session(
    child: &mut Child,
    server_url: &str,
    caps: &ChromeCapabilities,
) -> Result<WebDriver> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(Error::RasterizerUnavailable {
                message: format!("chromedriver exited during startup ({status})"),
            });
        }
        match WebDriver::new(server_url, caps.clone()).await {
            Ok(driver) => return Ok(driver),
            Err(e) if matches!(e.as_inner(), WebDriverErrorInner::HttpError(_)) => {
                debug!("chromedriver not ready yet: {}", e);
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => {
                return Err(Error::RasterizerUnavailable {
                    message: e.to_string(),
                });
            }
        }
    }
}

/// A chromedriver process and the `WebDriver` session opened on it.
struct ChromeSession {
    driver: Option<WebDriver>,
    child: Child,
}

impl ChromeSession {
    fn driver(&self) -> Result<&WebDriver> {
        self.driver.as_ref().ok_or_else(|| Error::Browser {
            message: "browser session already closed".to_string(),
        })
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn open_page(&mut self) -> Result<()> {
        self.driver()?.goto("about:blank").await?;
        Ok(())
    }

    async fn load_content(&mut self, html: &str, idle_window: Duration) -> Result<()> {
        let driver = self.driver()?;
        driver
            .execute(WRITE_DOCUMENT_SCRIPT, vec![json!(html)])
            .await?;

        let mut idle = IdleTracker::new(idle_window);
        loop {
            let ret = driver.execute(SETTLED_RESOURCES_SCRIPT, Vec::new()).await?;
            if idle.observe(ret.json().as_i64().unwrap_or(-1), Instant::now()) {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn write_pdf(&mut self, destination: &Path, options: &PdfOptions) -> Result<()> {
        let devtools = ChromeDevTools::new(self.driver()?.handle.clone());
        let printed = devtools
            .execute_cdp_with_params(
                "Page.printToPDF",
                json!({
                    "printBackground": options.print_background,
                    "paperWidth": options.paper_width_in,
                    "paperHeight": options.paper_height_in,
                }),
            )
            .await?;

        let data = printed
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Browser {
                message: "Page.printToPDF returned no data".to_string(),
            })?;
        let bytes = STANDARD.decode(data).map_err(|e| Error::Browser {
            message: format!("invalid PDF payload: {e}"),
        })?;

        tokio::fs::write(destination, bytes).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { driver, mut child } = *self;

        let quit = match driver {
            Some(driver) => driver.quit().await.map_err(Error::from),
            None => Ok(()),
        };
        if let Err(e) = &quit {
            warn!("WebDriver quit failed, killing chromedriver anyway: {}", e);
        }

        match child.kill().await {
            Ok(()) => debug!("chromedriver stopped"),
            Err(e) => warn!("Failed to kill chromedriver: {}", e),
        }
        quit
    }
}

/// Decides network idle from successive resource counts.
#[derive(Debug)]
struct IdleTracker {
    window: Duration,
    /// Last count and when it was first seen
    settled: Option<(i64, Instant)>,
}

impl IdleTracker {
    const fn new(window: Duration) -> Self {
        Self {
            window,
            settled: None,
        }
    }

    /// Feeds one poll result; `true` once the count has held for the window.
    /// A negative count means the page is still loading.
    fn observe(&mut self, count: i64, now: Instant) -> bool {
        match self.settled {
            _ if count < 0 => self.settled = None,
            Some((last, since)) if last == count => return now - since >= self.window,
            _ => self.settled = Some((count, now)),
        }
        self.window.is_zero() && self.settled.is_some()
    }
}

/// Asks the OS for an unused local port.
fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
