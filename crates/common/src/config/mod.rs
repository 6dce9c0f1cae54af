//! Configuration management for DraftFlow services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{env}, config/local)
//! - Default values
//!
//! The loaded value is constructed once at process start and passed into the
//! engine and each capability client; there is no ambient global lookup.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Slack (chat transport) configuration
    pub slack: SlackConfig,

    /// Scheduler jobs configuration
    pub jobs: JobsConfig,

    /// OpenAI (generation backend) configuration
    pub openai: OpenAiConfig,

    /// PubMed (literature search backend) configuration
    #[serde(default)]
    pub pubmed: PubMedConfig,

    /// WordPress (publishing backend) configuration
    pub wordpress: WordPressConfig,

    /// Google Sheets (tabular source) configuration
    pub sheets: SheetsConfig,

    /// Workflow limits
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackConfig {
    /// Bot token (xoxb-...)
    pub bot_token: String,

    /// Request signing secret
    pub signing_secret: String,

    /// Default channel for workflow notifications
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Shared token protecting /jobs/* endpoints
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    /// API key
    pub api_key: String,

    /// Chat model
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// API base URL (for custom endpoints)
    #[serde(default = "default_openai_base")]
    pub api_base: String,

    /// Request timeout in seconds
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PubMedConfig {
    /// E-utilities base URL
    #[serde(default = "default_pubmed_base")]
    pub base_url: String,

    /// NCBI tool identifier
    #[serde(default = "default_ncbi_tool")]
    pub tool: String,

    /// NCBI contact email
    #[serde(default = "default_ncbi_email")]
    pub email: String,

    /// Optional NCBI API key
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WordPressConfig {
    /// Site base URL (no trailing slash)
    pub base_url: String,

    /// REST API username
    pub username: String,

    /// Application password
    pub app_password: String,

    /// Post type collection, usually "posts"
    #[serde(default = "default_wp_post_type")]
    pub post_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SheetsConfig {
    /// Google API key with Sheets read access
    pub api_key: String,

    /// Spreadsheet id
    pub spreadsheet_id: String,

    /// Worksheet name
    #[serde(default = "default_worksheet")]
    pub worksheet_name: String,

    /// Header cell naming the keyword column
    #[serde(default = "default_header_keyword")]
    pub header_keyword: String,

    /// Header cell naming the planned-date column
    #[serde(default = "default_header_planned_date")]
    pub header_planned_date: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Maximum articles started per planned date
    #[serde(default = "default_daily_max")]
    pub daily_max_articles: u64,

    /// Revision ceiling per stage
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,

    /// Days the retry affordance stays valid after an error
    #[serde(default = "default_retry_window_days")]
    pub retry_window_days: i64,

    /// Candidates fetched per literature search
    #[serde(default = "default_paper_retmax")]
    pub paper_retmax: usize,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_openai_model() -> String { "gpt-4.1-mini".to_string() }
fn default_openai_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_openai_timeout() -> u64 { 60 }
fn default_pubmed_base() -> String { "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string() }
fn default_ncbi_tool() -> String { "draftflow".to_string() }
fn default_ncbi_email() -> String { "example@example.com".to_string() }
fn default_wp_post_type() -> String { "posts".to_string() }
fn default_worksheet() -> String { "Sheet1".to_string() }
fn default_header_keyword() -> String { "keyword".to_string() }
fn default_header_planned_date() -> String { "planned_date".to_string() }
fn default_daily_max() -> u64 { 20 }
fn default_max_revisions() -> u32 { 3 }
fn default_retry_window_days() -> i64 { 7 }
fn default_paper_retmax() -> usize { 3 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            base_url: default_pubmed_base(),
            tool: default_ncbi_tool(),
            email: default_ncbi_email(),
            api_key: None,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            daily_max_articles: default_daily_max(),
            max_revisions: default_max_revisions(),
            retry_window_days: default_retry_window_days(),
            paper_retmax: default_paper_retmax(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SLACK__CHANNEL_ID=C0123456789
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the generation backend request timeout as Duration
    pub fn openai_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.timeout_secs)
    }
}
