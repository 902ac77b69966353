/// Application settings loaded from config.toml
pub mod app;

/// Database configuration and connection management
pub mod database;

pub use app::{
    AppConfig, BrowserConfig, DuplicateSendPolicy, MailConfig, PathsConfig, SendConfig,
    StepBudgets, load_config, load_default_config,
};
