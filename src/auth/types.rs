// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use url::Url;

/// Integration identity and authorization server location
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// OAuth client id
    pub integration_key: String,
    /// Subject impersonated by the JWT grant
    pub impersonation_user_guid: Option<String>,
    /// Client secret for the authorization code and refresh grants
    pub secret_key: Option<String>,
    pub scopes: Vec<String>,
    /// Redirect registered for the integration key, used in consent URLs
    pub redirect_uri: String,
    pub oauth_base: Url,
}

impl IdentityConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.oauth_base.as_str().trim_end_matches('/'), path)
    }

    pub fn token_url(&self) -> String {
        self.endpoint("/oauth/token")
    }

    pub fn authorize_url(&self) -> String {
        self.endpoint("/oauth/auth")
    }

    pub fn userinfo_url(&self) -> String {
        self.endpoint("/oauth/userinfo")
    }

    /// JWT audience: the authorization server host, without scheme
    pub fn audience(&self) -> String {
        let host = self.oauth_base.host_str().unwrap_or_default();
        match self.oauth_base.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

/// Grant flow that produced a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// JWT bearer grant, impersonating a user via a signed assertion.
    /// Never carries a refresh token.
    ServiceAccount,

    /// Interactive authorization code grant.
    /// Always carries a refresh token after a successful exchange.
    AuthorizationCode,
}

/// Bearer credential produced by a grant or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// Seconds until expiration, as reported by the authorization server
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
    refresh_token: Option<String>,
    grant_kind: GrantKind,
}

impl Credential {
    pub fn service_account(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            expires_in,
            issued_at: Utc::now(),
            refresh_token: None,
            grant_kind: GrantKind::ServiceAccount,
        }
    }

    pub fn authorization_code(access_token: String, refresh_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            expires_in,
            issued_at: Utc::now(),
            refresh_token: Some(refresh_token),
            grant_kind: GrantKind::AuthorizationCode,
        }
    }

    pub fn grant_kind(&self) -> GrantKind {
        self.grant_kind
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(self.expires_in.min(u32::MAX as u64) as i64)
    }

    /// True if the token expires within `threshold_secs` from now
    pub fn is_expiring_within(&self, threshold_secs: i64) -> bool {
        self.expires_at() <= Utc::now() + Duration::seconds(threshold_secs)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Short token prefix safe for logs
    pub fn token_preview(&self) -> &str {
        let end = self
            .access_token
            .char_indices()
            .nth(20)
            .map(|(i, _)| i)
            .unwrap_or(self.access_token.len());
        &self.access_token[..end]
    }
}

/// Successful response from the token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[allow(dead_code)]
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Error body returned by the authorization server
#[derive(Debug, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Error code signalling that the user has not granted consent yet
pub const CONSENT_REQUIRED: &str = "consent_required";

/// Default lifetime assumed when the server omits `expires_in`
pub const DEFAULT_EXPIRES_IN: u64 = 3600;
