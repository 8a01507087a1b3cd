use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use super::browser::{BrowserLauncher, SystemBrowser};
use super::callback::CallbackListener;
use super::code_grant;
use super::consent;
use super::jwt;
use super::refresh;
use super::types::{Credential, GrantKind, IdentityConfig};
use crate::error::{AuthError, Result};

/// Authentication state for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    NoCredential,
    /// The JWT grant was refused until the user grants consent at
    /// `consent_url`. A credential held before the refusal is kept in
    /// `last_valid` but no longer handed out.
    AwaitingConsent {
        consent_url: String,
        last_valid: Option<Credential>,
    },
    Active(Credential),
    /// A grant failed; terminal for this run. The last good credential is
    /// kept for inspection but no longer handed out.
    Failed { last_valid: Option<Credential> },
}

/// Tunables for the credential manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Requested lifetime for JWT grant tokens
    pub token_validity: u64,
    /// How long the authorization code flow waits for the browser callback
    pub callback_timeout: Duration,
    /// Renew tokens that expire within this many seconds
    pub refresh_threshold: u64,
    pub http_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            token_validity: jwt::MAX_VALIDITY_SECS,
            callback_timeout: Duration::from_secs(300),
            refresh_threshold: 300,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Credential manager
/// Owns the live credential and drives the grant flows sequentially
pub struct CredentialManager {
    identity: IdentityConfig,

    /// HTTP client for token requests
    client: Client,

    /// Launcher for consent and login pages
    browser: Arc<dyn BrowserLauncher>,

    state: AuthState,

    /// Key used by the last successful JWT grant, for renewal
    signing_key: Option<Vec<u8>>,

    options: ManagerOptions,
}

impl CredentialManager {
    pub fn new(identity: IdentityConfig, options: ManagerOptions) -> Result<Self> {
        let client = Client::builder().timeout(options.http_timeout).build()?;

        Ok(Self {
            identity,
            client,
            browser: Arc::new(SystemBrowser::default()),
            state: AuthState::NoCredential,
            signing_key: None,
            options,
        })
    }

    /// Replace the browser launcher
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    pub fn identity(&self) -> &IdentityConfig {
        &self.identity
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// The active credential, if any
    pub fn credential(&self) -> Option<&Credential> {
        match &self.state {
            AuthState::Active(credential) => Some(credential),
            _ => None,
        }
    }

    /// Fails once the session has entered the terminal state
    fn ensure_not_failed(&self) -> Result<()> {
        if matches!(self.state, AuthState::Failed { .. }) {
            return Err(AuthError::SessionFailed);
        }
        Ok(())
    }

    /// Credential to carry into a non-active state
    fn take_last_valid(&mut self) -> Option<Credential> {
        match std::mem::replace(&mut self.state, AuthState::NoCredential) {
            AuthState::Active(credential) => Some(credential),
            AuthState::AwaitingConsent { last_valid, .. } | AuthState::Failed { last_valid } => {
                last_valid
            }
            AuthState::NoCredential => None,
        }
    }

    /// Apply the outcome of a grant to the state machine.
    /// A failure never overwrites the previous credential.
    fn settle(&mut self, result: Result<Credential>) -> Result<Credential> {
        match result {
            Ok(credential) => {
                tracing::debug!(
                    grant = ?credential.grant_kind(),
                    token = %credential.token_preview(),
                    "Credential replaced"
                );
                self.state = AuthState::Active(credential.clone());
                Ok(credential)
            }
            Err(AuthError::ConsentRequired { consent_url }) => {
                let last_valid = self.take_last_valid();
                self.state = AuthState::AwaitingConsent {
                    consent_url: consent_url.clone(),
                    last_valid,
                };
                Err(AuthError::ConsentRequired { consent_url })
            }
            Err(e) => {
                let last_valid = self.take_last_valid();
                tracing::error!("Grant failed: {}", e);
                self.state = AuthState::Failed { last_valid };
                Err(e)
            }
        }
    }

    /// Acquire a service account token with the JWT bearer grant
    pub async fn acquire_service_account_token(
        &mut self,
        private_key_pem: &[u8],
        validity_secs: u64,
    ) -> Result<Credential> {
        self.ensure_not_failed()?;

        let result =
            jwt::request_jwt_token(&self.client, &self.identity, private_key_pem, validity_secs).await;
        if result.is_ok() {
            self.signing_key = Some(private_key_pem.to_vec());
        }
        self.settle(result)
    }

    /// Same as [`Self::acquire_service_account_token`], reading the key from disk
    pub async fn acquire_service_account_token_from_file(
        &mut self,
        private_key_file: &Path,
    ) -> Result<Credential> {
        self.ensure_not_failed()?;

        let key = match jwt::read_private_key(private_key_file).await {
            Ok(key) => key,
            Err(e) => return self.settle(Err(e)),
        };
        let validity = self.options.token_validity;
        self.acquire_service_account_token(&key, validity).await
    }

    /// Run the interactive authorization code grant.
    ///
    /// Starts a loopback listener on `loopback_port`, opens the login page and
    /// waits (bounded by the callback timeout) for the redirect carrying the code.
    pub async fn acquire_authorization_code_token(&mut self, loopback_port: u16) -> Result<Credential> {
        self.ensure_not_failed()?;
        let result = self.authorization_code_flow(loopback_port).await;
        self.settle(result)
    }

    async fn authorization_code_flow(&self, loopback_port: u16) -> Result<Credential> {
        code_grant::client_secret(&self.identity)?;

        let listener = CallbackListener::bind(loopback_port).await?;
        let redirect_uri = consent::loopback_redirect_uri(listener.port());
        let login_url = consent::authorization_url(&self.identity, &redirect_uri);

        self.browser.open(&login_url);

        let code = listener.wait_for_code(self.options.callback_timeout).await?;
        code_grant::exchange_code(&self.client, &self.identity, &code).await
    }

    /// Refresh the active authorization code credential
    pub async fn refresh(&mut self) -> Result<Credential> {
        self.ensure_not_failed()?;

        let refresh_token = match &self.state {
            AuthState::Active(credential) => credential
                .refresh_token()
                .map(str::to_string)
                .ok_or(AuthError::RefreshUnavailable(credential.grant_kind()))?,
            _ => return Err(AuthError::NoCredential),
        };

        self.refresh_with(&refresh_token).await
    }

    /// Exchange an explicit refresh token, e.g. one saved by an earlier run
    pub async fn refresh_with(&mut self, refresh_token: &str) -> Result<Credential> {
        self.ensure_not_failed()?;

        if let AuthState::Active(credential) = &self.state {
            if credential.grant_kind() == GrantKind::ServiceAccount {
                return Err(AuthError::RefreshUnavailable(GrantKind::ServiceAccount));
            }
        }

        let result = refresh::refresh_access_token(&self.client, &self.identity, refresh_token).await;
        self.settle(result)
    }

    /// Get a usable access token, renewing it first if it expires soon.
    ///
    /// Authorization code credentials are refreshed; service account
    /// credentials repeat the JWT grant with the key used last time.
    pub async fn access_token(&mut self) -> Result<String> {
        self.ensure_not_failed()?;

        let credential = match &self.state {
            AuthState::Active(credential) => credential.clone(),
            AuthState::AwaitingConsent { consent_url, .. } => {
                return Err(AuthError::ConsentRequired {
                    consent_url: consent_url.clone(),
                })
            }
            _ => return Err(AuthError::NoCredential),
        };

        if !credential.is_expiring_within(self.options.refresh_threshold as i64) {
            return Ok(credential.access_token);
        }

        tracing::info!(
            "Access token expires at {}, renewing",
            credential.expires_at().to_rfc3339()
        );

        let renewed = match credential.grant_kind() {
            GrantKind::AuthorizationCode => self.refresh().await?,
            GrantKind::ServiceAccount => {
                let key = self
                    .signing_key
                    .clone()
                    .ok_or(AuthError::RefreshUnavailable(GrantKind::ServiceAccount))?;
                let validity = self.options.token_validity;
                self.acquire_service_account_token(&key, validity).await?
            }
        };

        Ok(renewed.access_token)
    }

    /// Open the pending consent page, if consent is what blocks the session
    pub fn open_consent_page(&self) -> Option<String> {
        match &self.state {
            AuthState::AwaitingConsent { consent_url, .. } => {
                self.browser.open(consent_url);
                Some(consent_url.clone())
            }
            _ => None,
        }
    }

    /// Create a manager already holding `credential` (no network required)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(identity: IdentityConfig, credential: Credential) -> Result<Self> {
        let mut manager = Self::new(identity, ManagerOptions::default())?;
        manager.state = AuthState::Active(credential);
        Ok(manager)
    }
}
