use invoice_courier::{
    config::{self, database},
    errors::{Error, Result},
    mailer::SmtpTransport,
    pipeline::{SendOrchestrator, SendRequest},
    rasterizer::ChromeEngine,
};
use dotenvy::dotenv;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: invoice-courier <invoice_id> [recipient_email]";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; variables may also come from the environment directly
    dotenv().ok();

    // 3. Parse arguments
    let mut args = std::env::args().skip(1);
    let invoice_id = args
        .next()
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| Error::Config {
            message: USAGE.to_string(),
        })?;
    let recipient = args.next();

    // 4. Load configuration and open the store
    let app_config = config::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;
    let database_url = database::get_database_url(app_config.database_url.as_deref());
    let db = database::create_connection(&database_url)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Send and print the single reply
    let orchestrator = SendOrchestrator::new(
        db,
        &app_config,
        Arc::new(ChromeEngine::from_config(&app_config.browser)),
        Arc::new(SmtpTransport::new(&app_config.mail)),
    );
    let response = orchestrator
        .send(SendRequest::new(invoice_id, recipient))
        .await;

    let json = serde_json::to_string(&response).map_err(|e| Error::Config {
        message: e.to_string(),
    })?;
    println!("{json}");

    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
