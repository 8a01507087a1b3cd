// Authorization code exchange

use reqwest::Client;

use super::token_endpoint;
use super::types::{Credential, IdentityConfig, DEFAULT_EXPIRES_IN};
use crate::error::{AuthError, Result};

/// Client secret from the identity, or a configuration error
pub(crate) fn client_secret(identity: &IdentityConfig) -> Result<&str> {
    identity
        .secret_key
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AuthError::Config("SECRET_KEY is required for the authorization code grant".to_string())
        })
}

/// Exchange an authorization code for an access/refresh token pair
pub async fn exchange_code(
    client: &Client,
    identity: &IdentityConfig,
    code: &str,
) -> Result<Credential> {
    tracing::info!("Exchanging authorization code for tokens...");

    let secret = client_secret(identity)?;
    let authorization = token_endpoint::basic_authorization(&identity.integration_key, secret);
    let form = [("grant_type", "authorization_code"), ("code", code)];

    let data = token_endpoint::post_token_form(
        client,
        &identity.token_url(),
        &form,
        Some(&authorization),
    )
    .await?;

    let refresh_token = data.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
        AuthError::MalformedResponse(
            "authorization code response does not contain refresh_token".to_string(),
        )
    })?;

    let credential = Credential::authorization_code(
        data.access_token,
        refresh_token,
        data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
    );

    tracing::info!(
        "Authorization code exchanged, expires: {}",
        credential.expires_at().to_rfc3339()
    );

    Ok(credential)
}
