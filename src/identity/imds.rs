//! Instance Metadata Service
//!
//! Production hosts get their ledger configuration and managed-identity
//! tokens from the link-local metadata endpoint. IMDS must be reached
//! without any proxy, so the client here is built with proxies disabled.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::identity::credential::{AccessToken, TokenCredential};

pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";
pub const LEDGER_RESOURCE: &str = "https://confidential-ledger.azure.com";

const USER_DATA_API_VERSION: &str = "2021-01-01";
const TOKEN_API_VERSION: &str = "2018-02-01";

/// Client for the instance metadata endpoint
#[derive(Clone)]
pub struct ImdsClient {
    endpoint: String,
    http_client: Client,
}

impl ImdsClient {
    pub fn new() -> LedgerResult<Self> {
        Self::with_endpoint(DEFAULT_IMDS_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> LedgerResult<Self> {
        let http_client = Client::builder()
            .no_proxy()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| LedgerError::ConfigError(format!("Failed to create IMDS client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Fetch the VM user data and parse it as a JSON document.
    pub async fn user_data(&self) -> LedgerResult<serde_json::Value> {
        let url = format!(
            "{}/metadata/instance/compute/userData?api-version={}&format=text",
            self.endpoint, USER_DATA_API_VERSION
        );
        debug!("Fetching user data from IMDS");

        let response = self
            .http_client
            .get(&url)
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| LedgerError::ConfigError(format!("IMDS user data request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(LedgerError::ConfigError(format!(
                "IMDS user data request failed: HTTP {}",
                response.status()
            )));
        }

        let encoded = response
            .text()
            .await
            .map_err(|e| LedgerError::ConfigError(format!("Failed to read IMDS user data: {}", e)))?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| LedgerError::ConfigError(format!("IMDS user data is not base64: {}", e)))?;

        let user_data = serde_json::from_slice(&decoded)
            .map_err(|e| LedgerError::ConfigError(format!("IMDS user data is not JSON: {}", e)))?;

        info!("Loaded configuration from IMDS user data");
        Ok(user_data)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: ExpiresOn,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresOn {
    Seconds(i64),
    Text(String),
}

impl ExpiresOn {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let seconds = match self {
            ExpiresOn::Seconds(seconds) => *seconds,
            ExpiresOn::Text(text) => text.trim().parse().ok()?,
        };
        DateTime::from_timestamp(seconds, 0)
    }
}

/// Tokens for the ledger resource from the host's managed identity.
pub struct ManagedIdentityCredential {
    imds: ImdsClient,
    resource: String,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(imds: ImdsClient) -> Self {
        Self {
            imds,
            resource: LEDGER_RESOURCE.to_string(),
            client_id: None,
        }
    }

    /// Select a user-assigned identity.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self) -> LedgerResult<AccessToken> {
        let url = format!("{}/metadata/identity/oauth2/token", self.imds.endpoint);
        let mut query = vec![
            ("api-version", TOKEN_API_VERSION),
            ("resource", self.resource.as_str()),
        ];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .imds
            .http_client
            .get(&url)
            .query(&query)
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| {
                LedgerError::AuthenticationFailure(format!("Managed identity request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::AuthenticationFailure(format!(
                "Managed identity token request failed: HTTP {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            LedgerError::AuthenticationFailure(format!("Invalid managed identity token response: {}", e))
        })?;

        let expires_on = token
            .expires_on
            .to_datetime()
            .unwrap_or_else(|| Utc::now() + Duration::minutes(5));

        debug!("Acquired managed identity token expiring at {}", expires_on);
        Ok(AccessToken::new(token.access_token, expires_on))
    }
}
