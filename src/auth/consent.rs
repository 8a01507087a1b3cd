// Consent and authorization URL construction

use super::types::IdentityConfig;

/// Scope the JWT grant needs consent for on top of the requested scopes
const IMPERSONATION_SCOPE: &str = "impersonation";

/// Join scopes the way the authorization page expects them
pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join("+")
}

/// Build the URL a user opens to grant the integration consent to impersonate them.
///
/// The JWT grant itself never requests `impersonation`, but the first consent
/// must include it or the server keeps answering `consent_required`.
pub fn consent_url(identity: &IdentityConfig) -> String {
    let mut scopes = Vec::with_capacity(identity.scopes.len() + 1);
    scopes.push(IMPERSONATION_SCOPE.to_string());
    scopes.extend(
        identity
            .scopes
            .iter()
            .filter(|s| s.as_str() != IMPERSONATION_SCOPE)
            .cloned(),
    );

    format!(
        "{}?response_type=code&scope={}&client_id={}&redirect_uri={}",
        identity.authorize_url(),
        join_scopes(&scopes),
        identity.integration_key,
        identity.redirect_uri
    )
}

/// Build the login URL for the authorization code grant, redirecting to `redirect_uri`
pub fn authorization_url(identity: &IdentityConfig, redirect_uri: &str) -> String {
    format!(
        "{}?response_type=code&scope={}&client_id={}&redirect_uri={}",
        identity.authorize_url(),
        join_scopes(&identity.scopes),
        identity.integration_key,
        redirect_uri
    )
}

/// Redirect URI pointing at the loopback listener
pub fn loopback_redirect_uri(port: u16) -> String {
    format!("http://localhost:{}", port)
}
