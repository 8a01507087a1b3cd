// Shared token endpoint request handling

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;

use super::types::{OAuthErrorBody, TokenResponse};
use crate::error::{AuthError, Result};

/// HTTP Basic authorization value for client credentials
pub fn basic_authorization(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", client_id, client_secret))
    )
}

/// Extract the OAuth error code from an error response body, if it has one
pub fn error_code(body: &str) -> Option<String> {
    serde_json::from_str::<OAuthErrorBody>(body)
        .ok()
        .map(|b| b.error)
}

/// POST a URL-encoded form to the token endpoint and decode the token response.
/// Non-success responses keep the raw body for diagnosis.
pub async fn post_token_form(
    client: &Client,
    url: &str,
    form: &[(&str, &str)],
    authorization: Option<&str>,
) -> Result<TokenResponse> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .form(form);

    if let Some(value) = authorization {
        request = request.header("Authorization", value);
    }

    let response = request.send().await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        tracing::error!(
            status = status.as_u16(),
            url = %url,
            response_body = %body,
            "Token request failed"
        );

        if let Ok(details) = serde_json::from_str::<OAuthErrorBody>(&body) {
            tracing::debug!(
                error = %details.error,
                description = ?details.error_description,
                "Authorization server error details"
            );
        }

        return Err(AuthError::AuthServer {
            status: status.as_u16(),
            body,
        });
    }

    let data: TokenResponse = serde_json::from_str(&body).map_err(|e| {
        AuthError::MalformedResponse(format!("token response is not valid JSON: {}", e))
    })?;

    if data.access_token.is_empty() {
        return Err(AuthError::MalformedResponse(
            "token response does not contain access_token".to_string(),
        ));
    }

    Ok(data)
}
