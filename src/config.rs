use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Input, Password, Select};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::auth::{IdentityConfig, ManagerOptions};

const SANDBOX_OAUTH_BASE: &str = "https://account-d.docusign.com";
const SANDBOX_API_BASE: &str = "https://demo.docusign.net";
const PRODUCTION_OAUTH_BASE: &str = "https://account.docusign.com";
const PRODUCTION_API_BASE: &str = "https://www.docusign.net";

/// OAuth token manager for e-signature REST APIs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: CliArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Acquire a token with the JWT (service account) grant
    Jwt,
    /// Acquire a token with the interactive authorization code grant
    Login,
    /// Exchange a refresh token for a new token pair
    Refresh {
        /// Refresh token from a previous login
        #[arg(long, env = "REFRESH_TOKEN")]
        refresh_token: String,
    },
    /// Show the account id of the impersonated user (JWT grant)
    Userinfo,
    /// Show the organization id of the impersonated user (JWT grant)
    Organizations,
    /// Delete bulk user imports listed in a file, one id per line (JWT grant)
    DeleteBulkImports {
        /// Organization id
        #[arg(long, env = "ORGANIZATION_ID")]
        org_id: String,
        /// File with one import id per line
        #[arg(long, default_value = "bulkImports.txt")]
        file: String,
        /// Maximum deletes in flight
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CliArgs {
    /// Integration key (OAuth client id)
    #[arg(short = 'i', long, env = "INTEGRATION_KEY")]
    pub integration_key: Option<String>,

    /// User GUID impersonated by the JWT grant
    #[arg(short = 'u', long, env = "IMPERSONATION_USER_GUID")]
    pub user_guid: Option<String>,

    /// Secret key for the authorization code and refresh grants
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Requested scopes, separated by spaces, commas or '+'
    #[arg(short = 's', long, env = "SCOPES", default_value = "signature")]
    pub scopes: String,

    /// Redirect URI registered for the integration key (used in consent URLs)
    #[arg(long, env = "REDIRECT_URI", default_value = "http://localhost:5000")]
    pub redirect_uri: String,

    /// Authorization server base path
    #[arg(long, env = "OAUTH_BASE_PATH", default_value = SANDBOX_OAUTH_BASE)]
    pub oauth_base_path: String,

    /// eSignature API base path
    #[arg(long, env = "API_BASE_PATH", default_value = SANDBOX_API_BASE)]
    pub api_base_path: String,

    /// Admin API base path
    #[arg(long, env = "ADMIN_BASE_PATH", default_value = "https://api-d.docusign.net/management")]
    pub admin_base_path: String,

    /// Path to the RSA private key for the JWT grant
    #[arg(short = 'k', long, env = "PRIVATE_KEY_FILE", default_value = "private.key")]
    pub private_key_file: String,

    /// Loopback port for the authorization code callback
    #[arg(short, long, env = "LOOPBACK_PORT", default_value = "5000")]
    pub port: u16,

    /// Seconds to wait for the authorization code callback
    #[arg(long, env = "CALLBACK_TIMEOUT", default_value = "300")]
    pub callback_timeout: u64,

    /// Requested JWT token lifetime in seconds (max 3600)
    #[arg(long, env = "TOKEN_VALIDITY", default_value = "3600")]
    pub token_validity: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP max retries for resource calls
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "3")]
    pub http_retries: u32,

    /// Print URLs instead of opening a browser
    #[arg(long, env = "NO_BROWSER")]
    pub no_browser: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Identity
    pub integration_key: String,
    pub impersonation_user_guid: Option<String>,
    pub secret_key: Option<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,

    // Endpoints
    pub oauth_base_path: Url,
    pub api_base_path: Url,
    pub admin_base_path: Url,

    // Local resources
    pub private_key_file: PathBuf,
    pub loopback_port: u16,

    // Timeouts
    pub callback_timeout: u64,
    pub token_validity: u64,
    pub token_refresh_threshold: u64,

    // HTTP client
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    pub open_browser: bool,
    pub log_level: String,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > .env > defaults
    pub fn load(args: &CliArgs) -> Result<Self> {
        let config = Config {
            integration_key: args
                .integration_key
                .clone()
                .filter(|s| !s.is_empty())
                .context("INTEGRATION_KEY is required (use -i or set INTEGRATION_KEY env var)")?,

            impersonation_user_guid: args.user_guid.clone().filter(|s| !s.is_empty()),
            secret_key: args.secret_key.clone().filter(|s| !s.is_empty()),
            scopes: parse_scopes(&args.scopes),
            redirect_uri: args.redirect_uri.clone(),

            oauth_base_path: normalize_base_path(&args.oauth_base_path)
                .context("OAUTH_BASE_PATH is not a valid URL")?,
            api_base_path: normalize_base_path(&args.api_base_path)
                .context("API_BASE_PATH is not a valid URL")?,
            admin_base_path: normalize_base_path(&args.admin_base_path)
                .context("ADMIN_BASE_PATH is not a valid URL")?,

            private_key_file: expand_tilde(&args.private_key_file),
            loopback_port: args.port,

            callback_timeout: args.callback_timeout,
            token_validity: args.token_validity,
            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            http_request_timeout: args.http_timeout,
            http_max_retries: args.http_retries,

            open_browser: !args.no_browser,
            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.scopes.is_empty() {
            anyhow::bail!("SCOPES must name at least one scope");
        }
        if self.callback_timeout == 0 {
            anyhow::bail!("CALLBACK_TIMEOUT must be greater than zero");
        }
        Ok(())
    }

    /// Identity handed to the credential manager
    pub fn identity(&self) -> IdentityConfig {
        IdentityConfig {
            integration_key: self.integration_key.clone(),
            impersonation_user_guid: self.impersonation_user_guid.clone(),
            secret_key: self.secret_key.clone(),
            scopes: self.scopes.clone(),
            redirect_uri: self.redirect_uri.clone(),
            oauth_base: self.oauth_base_path.clone(),
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            token_validity: self.token_validity,
            callback_timeout: Duration::from_secs(self.callback_timeout),
            refresh_threshold: self.token_refresh_threshold,
            http_timeout: Duration::from_secs(self.http_request_timeout),
        }
    }
}

/// Split a scope list on spaces, commas or '+'
pub fn parse_scopes(s: &str) -> Vec<String> {
    s.split(|c: char| c == '+' || c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a base path, accepting a bare host such as `account-d.docusign.com`
pub fn normalize_base_path(s: &str) -> Result<Url> {
    let trimmed = s.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    Url::parse(&with_scheme).with_context(|| format!("Invalid base path: {}", s))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}


// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file, no integration key, and a terminal to ask on)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();
    let has_integration_key = std::env::var("INTEGRATION_KEY").is_ok();

    !env_file_exists && !has_integration_key && std::io::stdin().is_terminal()
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub integration_key: String,
    pub impersonation_user_guid: String,
    pub secret_key: String,
    pub private_key_file: String,
    pub oauth_base_path: String,
    pub api_base_path: String,
}

/// Run interactive setup to collect the integration identity
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("No configuration found. Let's set up your integration.");
    println!("Values are on the Apps and Keys page of your developer account.");
    println!();

    let integration_key: String = Input::new()
        .with_prompt("Integration key (INTEGRATION_KEY)")
        .interact_text()
        .context("Failed to read INTEGRATION_KEY")?;

    if integration_key.trim().is_empty() {
        anyhow::bail!("INTEGRATION_KEY cannot be empty");
    }

    let impersonation_user_guid: String = Input::new()
        .with_prompt("User GUID to impersonate for the JWT grant (IMPERSONATION_USER_GUID)")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read IMPERSONATION_USER_GUID")?;

    let secret_key: String = Password::new()
        .with_prompt("Secret key for the authorization code grant (SECRET_KEY, optional)")
        .allow_empty_password(true)
        .interact()
        .context("Failed to read SECRET_KEY")?;

    let private_key_file: String = Input::new()
        .with_prompt("Path to RSA private key (PRIVATE_KEY_FILE)")
        .default("private.key".to_string())
        .interact_text()
        .context("Failed to read PRIVATE_KEY_FILE")?;

    println!();
    let environments = vec!["sandbox (developer account)", "production"];
    let env_idx = Select::new()
        .with_prompt("Select environment")
        .items(&environments)
        .default(0)
        .interact()
        .context("Failed to read environment selection")?;

    let (oauth_base_path, api_base_path) = if env_idx == 0 {
        (SANDBOX_OAUTH_BASE, SANDBOX_API_BASE)
    } else {
        (PRODUCTION_OAUTH_BASE, PRODUCTION_API_BASE)
    };

    let config = InteractiveConfig {
        integration_key: integration_key.trim().to_string(),
        impersonation_user_guid: impersonation_user_guid.trim().to_string(),
        secret_key,
        private_key_file,
        oauth_base_path: oauth_base_path.to_string(),
        api_base_path: api_base_path.to_string(),
    };

    println!();
    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!();
        println!("Configuration saved to .env file");
    }

    println!();
    Ok(config)
}

impl InteractiveConfig {
    /// Export the collected values so clap's env fallbacks pick them up
    pub fn apply_to_env(&self) {
        std::env::set_var("INTEGRATION_KEY", &self.integration_key);
        std::env::set_var("IMPERSONATION_USER_GUID", &self.impersonation_user_guid);
        std::env::set_var("SECRET_KEY", &self.secret_key);
        std::env::set_var("PRIVATE_KEY_FILE", &self.private_key_file);
        std::env::set_var("OAUTH_BASE_PATH", &self.oauth_base_path);
        std::env::set_var("API_BASE_PATH", &self.api_base_path);
    }
}

/// Save configuration to .env file
fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# Generated by interactive setup

# Integration key (required)
INTEGRATION_KEY={}

# User impersonated by the JWT grant
IMPERSONATION_USER_GUID={}

# Secret key for the authorization code grant
SECRET_KEY={}

# RSA private key for the JWT grant
PRIVATE_KEY_FILE={}

# Endpoints
OAUTH_BASE_PATH={}
API_BASE_PATH={}

# Requested scopes
SCOPES=signature

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info
"#,
        config.integration_key,
        config.impersonation_user_guid,
        config.secret_key,
        config.private_key_file,
        config.oauth_base_path,
        config.api_base_path,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
