// Token refresh logic

use reqwest::Client;

use super::code_grant::client_secret;
use super::token_endpoint;
use super::types::{Credential, IdentityConfig, DEFAULT_EXPIRES_IN};
use crate::error::Result;

/// Exchange a refresh token for a new credential.
///
/// The server rotates refresh tokens on use, so the returned credential's
/// refresh token replaces `refresh_token`. If the server does not send a new
/// one, the old one is carried over.
pub async fn refresh_access_token(
    client: &Client,
    identity: &IdentityConfig,
    refresh_token: &str,
) -> Result<Credential> {
    tracing::info!("Refreshing access token...");

    let secret = client_secret(identity)?;
    let authorization = token_endpoint::basic_authorization(&identity.integration_key, secret);
    let form = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];

    let data = token_endpoint::post_token_form(
        client,
        &identity.token_url(),
        &form,
        Some(&authorization),
    )
    .await?;

    let next_refresh = match data.refresh_token.filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => {
            tracing::warn!("Refresh response did not rotate the refresh token, keeping the old one");
            refresh_token.to_string()
        }
    };

    let credential = Credential::authorization_code(
        data.access_token,
        next_refresh,
        data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
    );

    tracing::info!(
        "Token refreshed, expires: {}",
        credential.expires_at().to_rfc3339()
    );

    Ok(credential)
}
