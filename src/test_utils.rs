//! Shared test utilities for the invoice send pipeline.
//!
//! This module provides an in-memory database, fixture rows with sensible
//! defaults, and scriptable fakes for the browser engine and the mail transport.

#![allow(clippy::unwrap_used)]

use crate::{
    config::{AppConfig, StepBudgets},
    core::{
        customer,
        invoice::{self, NewInvoice, NewLineItem},
        settings as settings_ops,
    },
    entities::{self, settings},
    errors::{Error, Result},
    mailer::{AttemptOutcome, MailTransport, OutgoingMessage, SmtpParams},
    rasterizer::{BrowserEngine, BrowserSession, PdfOptions, RasterStep},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::DatabaseConnection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

/// Routes log output through the test harness. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("invoice_courier=debug"))
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all store-backed tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A configured settings row, not yet saved.
///
/// # Defaults
/// * company "ACME Corp", prefix "ACME", email `billing@acme.test`
/// * SMTP `smtp.example.com:587`, STARTTLS, with credentials
pub fn sample_settings() -> settings::Model {
    settings::Model {
        id: settings::SETTINGS_ID,
        company_name: "ACME Corp".to_string(),
        company_address: Some("1 Main Street\nSpringfield".to_string()),
        company_email: "billing@acme.test".to_string(),
        company_phone: Some("555-0100".to_string()),
        logo_base64: None,
        invoice_due_days: 30,
        invoice_prefix: "ACME".to_string(),
        smtp_host: Some("smtp.example.com".to_string()),
        smtp_port: 587,
        smtp_user: Some("billing@acme.test".to_string()),
        smtp_password: Some("secret".to_string()),
        smtp_secure: false,
        updated_at: chrono::Utc::now(),
    }
}

/// Creates a test customer named "Jane Customer" with the given email.
pub async fn create_test_customer(
    db: &DatabaseConnection,
    email: &str,
) -> Result<entities::customer::Model> {
    customer::create_customer(
        db,
        "Jane Customer".to_string(),
        email.to_string(),
        Some("42 Elm Road".to_string()),
    )
    .await
}

/// Invoice input with two lines totalling $150.00.
///
/// # Defaults
/// * "Consulting" 1 x $100.00, then "Support" 2 x $25.00
/// * issued 2024-01-15, due 2024-02-14, "Net 30"
pub fn new_invoice(customer_id: i64, invoice_number: &str) -> NewInvoice {
    NewInvoice {
        invoice_number: invoice_number.to_string(),
        customer_id,
        issue_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        due_date: NaiveDate::from_ymd_opt(2024, 2, 14).unwrap(),
        payment_terms: Some("Net 30".to_string()),
        notes: Some("Thanks!".to_string()),
        internal_memo: None,
        line_items: vec![
            NewLineItem {
                product_id: None,
                product_name: "Consulting".to_string(),
                description: Some("Architecture review".to_string()),
                unit_price: 100.0,
                quantity: 1.0,
            },
            NewLineItem {
                product_id: None,
                product_name: "Support".to_string(),
                description: None,
                unit_price: 25.0,
                quantity: 2.0,
            },
        ],
    }
}

/// Fresh database holding customer `a@b.com` and draft invoice #1001.
pub async fn setup_with_invoice() -> Result<(DatabaseConnection, entities::invoice::Model)> {
    let db = setup_test_db().await?;
    let customer = create_test_customer(&db, "a@b.com").await?;
    let invoice = invoice::create_invoice(&db, new_invoice(customer.id, "1001")).await?;
    Ok((db, invoice))
}

/// Same as [`setup_with_invoice`] with [`sample_settings`] saved.
pub async fn setup_configured() -> Result<(DatabaseConnection, entities::invoice::Model)> {
    let (db, invoice) = setup_with_invoice().await?;
    settings_ops::save_settings(&db, sample_settings()).await?;
    Ok((db, invoice))
}

/// The invoice template shipped in the repository.
pub fn template_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates/invoice.mustache")
}

/// Step budgets short enough for tests that expect a timeout.
pub const fn fast_budgets() -> StepBudgets {
    StepBudgets {
        launch: Duration::from_millis(250),
        new_page: Duration::from_millis(250),
        content: Duration::from_millis(250),
        pdf: Duration::from_millis(250),
        network_idle: Duration::ZERO,
    }
}

/// Application config for pipeline tests: output under `output_dir`, the
/// repository template, fast browser budgets, and 10ms mail backoff.
pub fn test_config(output_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.paths.output_dir = output_dir.join("out");
    config.paths.attachments_dir = output_dir.join("attachments");
    config.paths.templates = vec![template_path()];
    config.browser.launch_timeout_ms = 250;
    config.browser.new_page_timeout_ms = 250;
    config.browser.content_timeout_ms = 250;
    config.browser.pdf_timeout_ms = 250;
    config.browser.network_idle_ms = 0;
    config.mail.backoff_ms = 10;
    config.send.deadline_ms = 5_000;
    config
}

/// Polls `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Default)]
struct BrowserState {
    stall_at: Option<RasterStep>,
    unavailable: bool,
    launches: AtomicUsize,
    sessions: AtomicUsize,
    closes: AtomicUsize,
    last_html: Mutex<Option<String>>,
    last_options: Mutex<Option<PdfOptions>>,
}

/// In-process browser engine that records what the rasterizer asked of it.
///
/// `write_pdf` writes a small placeholder file. A stalled step never completes,
/// so only the step budget or cancellation can end it.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<BrowserState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stalling_at(step: RasterStep) -> Self {
        Self {
            state: Arc::new(BrowserState {
                stall_at: Some(step),
                ..BrowserState::default()
            }),
        }
    }

    /// Behaves as if no browser executable is installed.
    pub fn unavailable() -> Self {
        Self {
            state: Arc::new(BrowserState {
                unavailable: true,
                ..BrowserState::default()
            }),
        }
    }

    pub fn engine(&self) -> Arc<dyn BrowserEngine> {
        Arc::new(self.clone())
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Sessions handed out and not closed yet.
    pub fn live_sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst) - self.closes()
    }

    pub fn last_html(&self) -> Option<String> {
        self.state.last_html.lock().unwrap().clone()
    }

    pub fn last_options(&self) -> Option<PdfOptions> {
        *self.state.last_options.lock().unwrap()
    }
}

async fn stall_if(state: &BrowserState, step: RasterStep) {
    if state.stall_at == Some(step) {
        std::future::pending::<()>().await;
    }
}

#[async_trait]
impl BrowserEngine for FakeBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        if self.state.unavailable {
            return Err(Error::RasterizerUnavailable {
                message: "chromedriver not found on PATH; set CHROMEDRIVER_PATH".to_string(),
            });
        }
        stall_if(&self.state, RasterStep::Launch).await;
        self.state.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<BrowserState>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn open_page(&mut self) -> Result<()> {
        stall_if(&self.state, RasterStep::NewPage).await;
        Ok(())
    }

    async fn load_content(&mut self, html: &str, _idle_window: Duration) -> Result<()> {
        *self.state.last_html.lock().unwrap() = Some(html.to_string());
        stall_if(&self.state, RasterStep::ContentLoad).await;
        Ok(())
    }

    async fn write_pdf(&mut self, destination: &Path, options: &PdfOptions) -> Result<()> {
        *self.state.last_options.lock().unwrap() = Some(*options);
        stall_if(&self.state, RasterStep::PdfWrite).await;
        tokio::fs::write(destination, b"%PDF-1.4\n%fake\n").await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum MailScript {
    /// Transient failures for the first n attempts, then delivery
    FailFirst(u32),
    Fatal(String),
    /// Never completes
    Stall,
}

struct MailerState {
    script: MailScript,
    /// When set, each attempt waits for a permit before doing anything else
    gate: Option<Semaphore>,
    attempts: AtomicU32,
    attempt_times: Mutex<Vec<Instant>>,
    delivered: Mutex<Vec<OutgoingMessage>>,
}

/// Scriptable mail transport.
///
/// Transient failures read `connection refused (attempt n)`.
#[derive(Clone)]
pub struct FakeMailer {
    state: Arc<MailerState>,
}

impl FakeMailer {
    fn with(script: MailScript, gated: bool) -> Self {
        Self {
            state: Arc::new(MailerState {
                script,
                gate: gated.then(|| Semaphore::new(0)),
                attempts: AtomicU32::new(0),
                attempt_times: Mutex::new(Vec::new()),
                delivered: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Delivers every message on the first attempt.
    pub fn succeeding() -> Self {
        Self::with(MailScript::FailFirst(0), false)
    }

    pub fn failing_first(failures: u32) -> Self {
        Self::with(MailScript::FailFirst(failures), false)
    }

    pub fn always_failing() -> Self {
        Self::with(MailScript::FailFirst(u32::MAX), false)
    }

    pub fn fatal(message: &str) -> Self {
        Self::with(MailScript::Fatal(message.to_string()), false)
    }

    pub fn stalling() -> Self {
        Self::with(MailScript::Stall, false)
    }

    /// Succeeds, but every attempt blocks until [`open_gate`](Self::open_gate) lets it through.
    pub fn gated() -> Self {
        Self::with(MailScript::FailFirst(0), true)
    }

    /// Lets `attempts` gated attempts proceed.
    pub fn open_gate(&self, attempts: usize) {
        if let Some(gate) = &self.state.gate {
            gate.add_permits(attempts);
        }
    }

    pub fn transport(&self) -> Arc<dyn MailTransport> {
        Arc::new(self.clone())
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.attempt_times.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<OutgoingMessage> {
        self.state.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeMailer {
    async fn attempt(&self, _smtp: &SmtpParams, message: &OutgoingMessage) -> AttemptOutcome {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.attempt_times.lock().unwrap().push(Instant::now());

        if let Some(gate) = &self.state.gate {
            gate.acquire().await.unwrap().forget();
        }

        match &self.state.script {
            MailScript::FailFirst(failures) if attempt <= *failures => {
                AttemptOutcome::TransientFailure(format!("connection refused (attempt {attempt})"))
            }
            MailScript::FailFirst(_) => {
                self.state.delivered.lock().unwrap().push(message.clone());
                AttemptOutcome::Delivered
            }
            MailScript::Fatal(error) => AttemptOutcome::FatalFailure(error.clone()),
            MailScript::Stall => std::future::pending().await,
        }
    }
}
