use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use esign_oauth::auth::{
    BrowserLauncher, Credential, CredentialManager, PrintUrl, SystemBrowser,
};
use esign_oauth::config::{self, Cli, Command, Config};
use esign_oauth::error::AuthError;
use esign_oauth::http_client::ApiHttpClient;
use esign_oauth::resources::{self, ResourceClient};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    // Check if interactive setup is needed (no .env and no integration key)
    if config::needs_interactive_setup() {
        match config::run_interactive_setup() {
            Ok(interactive_config) => interactive_config.apply_to_env(),
            Err(e) => {
                eprintln!("Setup failed: {:#}", e);
                return ExitCode::from(2);
            }
        }
    }

    let cli = Cli::parse();

    // Load configuration first (for log level)
    let config = match Config::load(&cli.args).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    init_logging(&config.log_level);

    tracing::info!("esign-oauth v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!(
        oauth_base = %config.oauth_base_path,
        api_base = %config.api_base_path,
        scopes = ?config.scopes,
        "Configuration loaded"
    );

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => exit_with(e),
    }
}

/// Initialize logging with the configured level; RUST_LOG takes precedence
fn init_logging(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// The single place that turns an error into a process exit status
fn exit_with(err: anyhow::Error) -> ExitCode {
    match err.downcast_ref::<AuthError>() {
        Some(AuthError::ConsentRequired { consent_url }) => {
            println!("Consent required. Grant access at:\n{}", consent_url);
            println!("Run the command again once consent has been granted.");
            ExitCode::SUCCESS
        }
        Some(auth_error) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::from(auth_error.exit_code().clamp(1, 255) as u8)
        }
        None => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let browser: Arc<dyn BrowserLauncher> = if config.open_browser {
        Arc::new(SystemBrowser::default())
    } else {
        Arc::new(PrintUrl)
    };

    let mut manager = CredentialManager::new(config.identity(), config.manager_options())?
        .with_browser(browser);

    match command {
        Command::Jwt => {
            let credential = service_account_login(&mut manager, config).await?;
            print_credential(&credential);
        }
        Command::Login => {
            println!(
                "Waiting for login on http://localhost:{} ...",
                config.loopback_port
            );
            let credential = manager
                .acquire_authorization_code_token(config.loopback_port)
                .await?;
            print_credential(&credential);
        }
        Command::Refresh { refresh_token } => {
            let credential = manager.refresh_with(&refresh_token).await?;
            print_credential(&credential);
        }
        Command::Userinfo => {
            service_account_login(&mut manager, config).await?;
            let token = manager.access_token().await?;
            let info = resource_client(config)?.user_info(&token).await?;
            let account = info
                .default_account()
                .context("User has no accounts")?;
            println!("Account ID: {}", account.account_id);
            println!(
                "REST API:   {}",
                account.rest_api_base(config.api_base_path.as_str())
            );
        }
        Command::Organizations => {
            service_account_login(&mut manager, config).await?;
            let token = manager.access_token().await?;
            let organizations = resource_client(config)?.organizations(&token).await?;
            match organizations.first() {
                Some(org) => println!("Organization ID: {}", org.id),
                None => println!("User does not belong to an organization"),
            }
        }
        Command::DeleteBulkImports {
            org_id,
            file,
            concurrency,
        } => {
            let import_ids = resources::read_import_ids(std::path::Path::new(&file)).await?;
            service_account_login(&mut manager, config).await?;
            let token = manager.access_token().await?;

            let outcomes = resource_client(config)?
                .delete_bulk_imports(&token, &org_id, import_ids, concurrency)
                .await;

            let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
            for outcome in &failed {
                if let Err(e) = &outcome.result {
                    eprintln!("  {}: {}", outcome.import_id, e);
                }
            }
            println!(
                "Deleted {} of {} bulk import(s)",
                outcomes.len() - failed.len(),
                outcomes.len()
            );
            if !failed.is_empty() {
                anyhow::bail!("{} bulk import deletion(s) failed", failed.len());
            }
        }
    }

    Ok(())
}

/// JWT grant; on consent_required opens the consent page before returning the error
async fn service_account_login(
    manager: &mut CredentialManager,
    config: &Config,
) -> Result<Credential, AuthError> {
    match manager
        .acquire_service_account_token_from_file(&config.private_key_file)
        .await
    {
        Ok(credential) => {
            tracing::info!(
                "Authentication successful (token: {}...)",
                credential.token_preview()
            );
            Ok(credential)
        }
        Err(e @ AuthError::ConsentRequired { .. }) => {
            manager.open_consent_page();
            Err(e)
        }
        Err(e) => Err(e),
    }
}

fn resource_client(config: &Config) -> Result<ResourceClient> {
    let http = ApiHttpClient::new(config.http_request_timeout, config.http_max_retries)?;
    Ok(ResourceClient::new(
        http,
        config.identity().userinfo_url(),
        config.admin_base_path.as_str(),
    ))
}

fn print_credential(credential: &Credential) {
    println!("Grant:         {:?}", credential.grant_kind());
    println!("Access token:  {}", credential.access_token);
    println!("Expires in:    {}s", credential.expires_in);
    println!("Expires at:    {}", credential.expires_at().to_rfc3339());
    if let Some(refresh_token) = credential.refresh_token() {
        println!("Refresh token: {}", refresh_token);
    }
}
