//! Minimal resource API calls that consume a credential.
//!
//! Only the fields needed to locate an account or organization are modelled.

use std::path::Path;

use futures::stream::{self, StreamExt};
use reqwest::Method;
use serde::Deserialize;

use crate::error::{AuthError, Result};
use crate::http_client::ApiHttpClient;

/// Response of the `/oauth/userinfo` endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub base_uri: Option<String>,
}

impl UserInfo {
    /// The account flagged as default, or the first one listed
    pub fn default_account(&self) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.is_default)
            .or_else(|| self.accounts.first())
    }
}

impl Account {
    /// eSignature REST API base for this account. Accounts without a
    /// `base_uri` use the configured `fallback` host.
    pub fn rest_api_base(&self, fallback: &str) -> String {
        let host = self.base_uri.as_deref().unwrap_or(fallback);
        format!("{}/restapi", host.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganizationList {
    #[serde(default)]
    organizations: Vec<Organization>,
}

/// Result of deleting one bulk import
#[derive(Debug)]
pub struct BulkDeleteOutcome {
    pub import_id: String,
    pub result: Result<()>,
}

/// Client for the account and admin endpoints
pub struct ResourceClient {
    http: ApiHttpClient,
    userinfo_url: String,
    admin_base: String,
}

impl ResourceClient {
    pub fn new(http: ApiHttpClient, userinfo_url: String, admin_base: &str) -> Self {
        Self {
            http,
            userinfo_url,
            admin_base: admin_base.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, access_token: &str) -> Result<T> {
        let response = self.http.send(Method::GET, url, access_token).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AuthError::MalformedResponse(format!("unexpected response from {}: {}", url, e)))
    }

    /// Fetch the caller's identity and accounts
    pub async fn user_info(&self, access_token: &str) -> Result<UserInfo> {
        let info: UserInfo = self.get_json(&self.userinfo_url, access_token).await?;
        tracing::info!("User {} has {} account(s)", info.sub, info.accounts.len());
        Ok(info)
    }

    /// List organizations the caller belongs to
    pub async fn organizations(&self, access_token: &str) -> Result<Vec<Organization>> {
        let url = format!("{}/v2/organizations", self.admin_base);
        let list: OrganizationList = self.get_json(&url, access_token).await?;
        if list.organizations.is_empty() {
            tracing::warn!("User does not belong to an organization");
        }
        Ok(list.organizations)
    }

    /// Delete bulk user imports with at most `concurrency` requests in flight.
    /// Returns one outcome per id so partial failures stay visible.
    pub async fn delete_bulk_imports(
        &self,
        access_token: &str,
        organization_id: &str,
        import_ids: Vec<String>,
        concurrency: usize,
    ) -> Vec<BulkDeleteOutcome> {
        tracing::info!(
            "Deleting {} bulk import(s) with concurrency {}",
            import_ids.len(),
            concurrency
        );

        stream::iter(import_ids)
            .map(|import_id| async move {
                let url = format!(
                    "{}/v2/organizations/{}/imports/bulk_users/{}",
                    self.admin_base, organization_id, import_id
                );
                let result = self
                    .http
                    .send(Method::DELETE, &url, access_token)
                    .await
                    .map(|_| ());

                match &result {
                    Ok(()) => tracing::info!("Deleted bulk import {}", import_id),
                    Err(e) => tracing::error!("Failed to delete bulk import {}: {}", import_id, e),
                }

                BulkDeleteOutcome { import_id, result }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}

/// Read bulk import ids from a text file, one per line. Blank lines are skipped.
pub async fn read_import_ids(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AuthError::LocalResource {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(parse_import_ids(&text))
}

fn parse_import_ids(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
