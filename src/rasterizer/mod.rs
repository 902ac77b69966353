//! PDF rasterizer - drives a headless browser to turn invoice HTML into an A4 PDF.
//!
//! One call walks the session through
//! `Idle → Launching → PageOpen → ContentLoaded → PdfWritten → Closed`, with
//! `Failed` reachable from every non-terminal state. Each step runs under its
//! own budget and under the caller's [`Cancellation`]; a step that overruns
//! fails the whole call with [`Error::StepTimeout`] and is never retried.
//!
//! The browser is owned by exactly one call. Once launched it is closed before
//! `rasterize` returns, whichever step failed.

/// Chrome via chromedriver (`WebDriver` + `DevTools`)
pub mod chrome;
/// Executable discovery for the browser driver
pub mod locate;

use crate::{
    cancel::Cancellation,
    config::StepBudgets,
    errors::{Error, Result},
};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use chrome::ChromeEngine;

/// Upper bound for tearing a session down.
const CLOSE_BUDGET: Duration = Duration::from_secs(5);

/// Paper and background settings for the PDF export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfOptions {
    pub paper_width_in: f64,
    pub paper_height_in: f64,
    pub print_background: bool,
}

impl PdfOptions {
    /// A4 portrait with backgrounds printed.
    #[must_use]
    pub const fn a4() -> Self {
        Self {
            paper_width_in: 8.27,
            paper_height_in: 11.69,
            print_background: true,
        }
    }
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self::a4()
    }
}

/// Something that can start a headless browser.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Starts a browser process and returns a session owning it.
    ///
    /// Dropping the returned future before it resolves must not leak the process.
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// A running browser owned by one rasterization.
#[async_trait]
pub trait BrowserSession: Send {
    async fn open_page(&mut self) -> Result<()>;

    /// Replaces the page content with `html` and returns once no request has
    /// been in flight for `idle_window`.
    async fn load_content(&mut self, html: &str, idle_window: Duration) -> Result<()>;

    async fn write_pdf(&mut self, destination: &Path, options: &PdfOptions) -> Result<()>;

    /// Shuts the browser down. Called exactly once per session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Rasterizer life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterState {
    Idle,
    Launching,
    PageOpen,
    ContentLoaded,
    PdfWritten,
    Closed,
    Failed,
}

/// Budgeted steps; the label is what shows up in timeout messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterStep {
    Launch,
    NewPage,
    ContentLoad,
    PdfWrite,
}

impl RasterStep {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Launch => "Browser launch",
            Self::NewPage => "Browser new page",
            Self::ContentLoad => "Browser render",
            Self::PdfWrite => "PDF generation",
        }
    }
}

impl fmt::Display for RasterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Turns HTML into a PDF file through a [`BrowserEngine`].
#[derive(Clone)]
pub struct Rasterizer {
    engine: Arc<dyn BrowserEngine>,
    budgets: StepBudgets,
    options: PdfOptions,
}

impl Rasterizer {
    #[must_use]
    pub fn new(engine: Arc<dyn BrowserEngine>, budgets: StepBudgets) -> Self {
        Self {
            engine,
            budgets,
            options: PdfOptions::a4(),
        }
    }

    /// Renders `html` to a PDF at `destination`, creating parent directories.
    ///
    /// Returns the final state, which is [`RasterState::Closed`] on success.
    ///
    /// # Errors
    /// - [`Error::RasterizerUnavailable`] if the engine cannot find its executable
    /// - [`Error::StepTimeout`] if any step overruns its budget
    /// - [`Error::Cancelled`] if `cancel` fires mid-way
    /// - [`Error::Browser`] / [`Error::Io`] for anything else the browser or disk reports
    pub async fn rasterize(
        &self,
        html: &str,
        destination: &Path,
        cancel: &Cancellation,
    ) -> Result<RasterState> {
        let mut state = RasterState::Idle;
        advance(&mut state, RasterState::Launching);

        let mut session = match self
            .step(RasterStep::Launch, self.budgets.launch, cancel, self.engine.launch())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                advance(&mut state, RasterState::Failed);
                return Err(e);
            }
        };

        let outcome = self
            .drive(session.as_mut(), html, destination, cancel, &mut state)
            .await;

        // The session is released on every path, success or not.
        match tokio::time::timeout(CLOSE_BUDGET, session.close()).await {
            Ok(Ok(())) => debug!("Browser closed"),
            Ok(Err(e)) => warn!("Browser close reported an error: {}", e),
            Err(_) => warn!("Browser close timed out after {:?}", CLOSE_BUDGET),
        }

        match outcome {
            Ok(()) => {
                advance(&mut state, RasterState::Closed);
                info!(destination = %destination.display(), "PDF generated");
                Ok(state)
            }
            Err(e) => {
                advance(&mut state, RasterState::Failed);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        html: &str,
        destination: &Path,
        cancel: &Cancellation,
        state: &mut RasterState,
    ) -> Result<()> {
        self.step(RasterStep::NewPage, self.budgets.new_page, cancel, session.open_page())
            .await?;
        advance(state, RasterState::PageOpen);

        let idle_window = self.budgets.network_idle;
        self.step(
            RasterStep::ContentLoad,
            self.budgets.content,
            cancel,
            session.load_content(html, idle_window),
        )
        .await?;
        advance(state, RasterState::ContentLoaded);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.step(
            RasterStep::PdfWrite,
            self.budgets.pdf,
            cancel,
            session.write_pdf(destination, &self.options),
        )
        .await?;
        advance(state, RasterState::PdfWritten);

        Ok(())
    }

    async fn step<T>(
        &self,
        step: RasterStep,
        budget: Duration,
        cancel: &Cancellation,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        debug!(%step, "Rasterizer step started");
        match cancel.guard(tokio::time::timeout(budget, work)).await? {
            Ok(result) => result,
            Err(_) => {
                warn!(%step, ?budget, "Rasterizer step timed out");
                Err(Error::StepTimeout {
                    step: step.label().to_string(),
                    budget,
                })
            }
        }
    }
}

fn advance(state: &mut RasterState, next: RasterState) {
    debug!(from = ?*state, to = ?next, "Rasterizer state change");
    *state = next;
}
