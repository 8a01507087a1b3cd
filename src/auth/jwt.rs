// JWT bearer (service account) grant

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::consent;
use super::token_endpoint;
use super::types::{Credential, IdentityConfig, CONSENT_REQUIRED, DEFAULT_EXPIRES_IN};
use crate::error::{AuthError, Result};

pub(crate) const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Longest token lifetime the authorization server accepts for this grant
pub const MAX_VALIDITY_SECS: u64 = 3600;

/// Claims of the signed assertion exchanged for an access token
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
}

/// Read PEM private key material from disk
pub async fn read_private_key(path: &Path) -> Result<Vec<u8>> {
    tracing::debug!("Reading private key from {}", path.display());
    tokio::fs::read(path)
        .await
        .map_err(|source| AuthError::LocalResource {
            path: path.to_path_buf(),
            source,
        })
}

/// Build the claims for an assertion issued at `now` (unix seconds)
pub fn assertion_claims(identity: &IdentityConfig, validity_secs: u64, now: i64) -> Result<AssertionClaims> {
    let subject = identity
        .impersonation_user_guid
        .as_ref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AuthError::Config("IMPERSONATION_USER_GUID is required for the JWT grant".to_string())
        })?;

    let validity = validity_secs.clamp(1, MAX_VALIDITY_SECS) as i64;

    Ok(AssertionClaims {
        iss: identity.integration_key.clone(),
        sub: subject.clone(),
        aud: identity.audience(),
        iat: now,
        exp: now + validity,
        scope: identity.scopes.join(" "),
    })
}

/// Sign the assertion with an RSA private key (RS256)
pub fn sign_assertion(claims: &AssertionClaims, private_key_pem: &[u8]) -> Result<String> {
    let key = EncodingKey::from_rsa_pem(private_key_pem)?;
    let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key)?;
    Ok(token)
}

/// Exchange a freshly signed assertion for a service account credential.
///
/// A `consent_required` answer becomes [`AuthError::ConsentRequired`] with the
/// URL the user has to visit; every other failure is returned as-is.
pub async fn request_jwt_token(
    client: &Client,
    identity: &IdentityConfig,
    private_key_pem: &[u8],
    validity_secs: u64,
) -> Result<Credential> {
    tracing::info!(
        "Requesting JWT user token for {} via {}",
        identity.impersonation_user_guid.as_deref().unwrap_or("<unset>"),
        identity.audience()
    );

    let claims = assertion_claims(identity, validity_secs, Utc::now().timestamp())?;
    let assertion = sign_assertion(&claims, private_key_pem)?;

    let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];

    let data = match token_endpoint::post_token_form(client, &identity.token_url(), &form, None).await {
        Ok(data) => data,
        Err(AuthError::AuthServer { status, body }) => {
            if token_endpoint::error_code(&body).as_deref() == Some(CONSENT_REQUIRED) {
                let consent_url = consent::consent_url(identity);
                tracing::warn!("Consent required, consent URL: {}", consent_url);
                return Err(AuthError::ConsentRequired { consent_url });
            }
            return Err(AuthError::AuthServer { status, body });
        }
        Err(e) => return Err(e),
    };

    let credential = Credential::service_account(
        data.access_token,
        data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
    );

    tracing::info!(
        "JWT token acquired, expires: {}",
        credential.expires_at().to_rfc3339()
    );

    Ok(credential)
}
