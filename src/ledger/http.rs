//! HTTP Ledger Transport
//!
//! Talks to the confidential ledger data-plane REST API.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::identity::TokenCredential;
use crate::ledger::entry::{
    AppendReceipt, CollectionId, EntryPage, LedgerEntry, PageState, TransactionId, TransactionStatus,
};
use crate::ledger::transport::LedgerTransport;

pub const DEFAULT_API_VERSION: &str = "2022-05-13";
const TRANSACTION_ID_HEADER: &str = "x-ms-ccf-transaction-id";
const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    state: PageState,
    #[serde(rename = "@nextLink", default)]
    next_link: Option<String>,
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: TransactionStatus,
}

/// Ledger transport over HTTPS
#[derive(Clone)]
pub struct HttpLedgerTransport {
    endpoint: Url,
    api_version: String,
    http_client: Client,
    credential: Arc<dyn TokenCredential>,
}

impl HttpLedgerTransport {
    pub fn new(
        endpoint: &str,
        credential: Arc<dyn TokenCredential>,
        request_timeout: Duration,
    ) -> LedgerResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| LedgerError::ConfigError(format!("Invalid ledger endpoint {:?}: {}", endpoint, e)))?;

        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            api_version: DEFAULT_API_VERSION.to_string(),
            http_client,
            credential,
        })
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> LedgerResult<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| LedgerError::ConfigError(format!("Invalid ledger path {:?}: {}", path, e)))
    }

    /// Attach a fresh bearer token and a client request id.
    async fn authorize(&self, request: RequestBuilder) -> LedgerResult<RequestBuilder> {
        let token = self.credential.get_token().await?;
        let mut bearer = HeaderValue::try_from(format!("Bearer {}", token.token))
            .map_err(|e| LedgerError::AuthenticationFailure(format!("Invalid access token characters: {}", e)))?;
        bearer.set_sensitive(true);

        Ok(request
            .header(AUTHORIZATION, bearer)
            .header(CLIENT_REQUEST_ID_HEADER, Uuid::new_v4().to_string()))
    }

    async fn send(&self, request: RequestBuilder) -> LedgerResult<Response> {
        let response = self.authorize(request).await?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = LedgerError::from_status(status.as_u16(), body);
        if let LedgerError::ServiceRejected { .. } = error {
            error!("Ledger rejected request: {}", error);
        }
        Err(error)
    }

    /// Resolve a `@nextLink` against the endpoint. Links to any other origin
    /// are refused so the bearer token never leaves the ledger.
    fn continuation_url(&self, next_link: &str) -> LedgerResult<Url> {
        let url = self.url(next_link)?;
        let same_origin = url.scheme() == self.endpoint.scheme()
            && url.host_str() == self.endpoint.host_str()
            && url.port_or_known_default() == self.endpoint.port_or_known_default();
        if !same_origin {
            return Err(LedgerError::UnexpectedResponse(format!(
                "Continuation link {} is outside ledger endpoint {}",
                url.origin().ascii_serialization(),
                self.endpoint.origin().ascii_serialization()
            )));
        }
        Ok(url)
    }

    fn parse_page(collection: &CollectionId, body: ListResponse) -> EntryPage {
        EntryPage {
            entries: body
                .entries
                .into_iter()
                .map(|raw| Self::parse_entry(collection, raw))
                .collect(),
            continuation: body.next_link,
            state: body.state,
        }
    }

    fn parse_entry(collection: &CollectionId, raw: serde_json::Value) -> LedgerResult<LedgerEntry> {
        let transaction_id: TransactionId = match raw.get("transactionId").and_then(|v| v.as_str()) {
            Some(text) => text
                .parse()
                .map_err(|_| LedgerError::malformed(None, format!("Invalid transactionId {:?}", text)))?,
            None => return Err(LedgerError::malformed(None, "Ledger entry without a transactionId")),
        };

        // Blank or invalid ids are filed under the collection being listed.
        let collection_id = raw
            .get("collectionId")
            .and_then(|v| v.as_str())
            .and_then(|id| CollectionId::new(id).ok())
            .unwrap_or_else(|| collection.clone());

        let payload = serde_json::to_vec(&raw)
            .map_err(|e| LedgerError::malformed(Some(transaction_id), e.to_string()))?;

        Ok(LedgerEntry {
            transaction_id,
            collection_id,
            payload,
        })
    }
}

#[async_trait]
impl LedgerTransport for HttpLedgerTransport {
    async fn append(&self, collection: &CollectionId, payload: Vec<u8>) -> LedgerResult<AppendReceipt> {
        let mut url = self.url("app/transactions")?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version)
            .append_pair("collectionId", collection.as_str());

        let request = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let response = self.send(request).await?;

        let transaction_id = response
            .headers()
            .get(TRANSACTION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());

        debug!(
            "Ledger accepted append to {} (transaction {:?})",
            collection, transaction_id
        );

        Ok(AppendReceipt {
            collection_id: collection.clone(),
            transaction_id,
        })
    }

    async fn fetch_page(
        &self,
        collection: &CollectionId,
        continuation: Option<&str>,
    ) -> LedgerResult<EntryPage> {
        let url = match continuation {
            // nextLink already carries the api-version and collection.
            Some(next_link) => self.continuation_url(next_link)?,
            None => {
                let mut url = self.url("app/transactions")?;
                url.query_pairs_mut()
                    .append_pair("api-version", &self.api_version)
                    .append_pair("collectionId", collection.as_str());
                url
            }
        };

        let response = self.send(self.http_client.get(url)).await?;
        let body: ListResponse = response.json().await?;
        Ok(Self::parse_page(collection, body))
    }

    async fn transaction_status(&self, transaction_id: &TransactionId) -> LedgerResult<TransactionStatus> {
        let mut url = self.url(&format!("app/transactions/{}/status", transaction_id))?;
        url.query_pairs_mut().append_pair("api-version", &self.api_version);

        let response = self.send(self.http_client.get(url)).await?;
        let body: StatusResponse = response.json().await?;
        Ok(body.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticTokenCredential;

    fn transport(endpoint: &str) -> HttpLedgerTransport {
        let credential = Arc::new(StaticTokenCredential::new("token").unwrap());
        HttpLedgerTransport::new(endpoint, credential, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let credential = Arc::new(StaticTokenCredential::new("token").unwrap());
        assert!(matches!(
            HttpLedgerTransport::new("not a url", credential, Duration::from_secs(5)),
            Err(LedgerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_next_link_resolves_against_endpoint() {
        let transport = transport("https://contoso.confidential-ledger.azure.com");
        let url = transport
            .url("/app/transactions?api-version=2022-05-13&collectionId=ContosoHrSqlLogs&fromTransactionId=2.101")
            .unwrap();
        assert_eq!(url.host_str(), Some("contoso.confidential-ledger.azure.com"));
        assert_eq!(url.path(), "/app/transactions");
        assert!(url.query().unwrap().contains("fromTransactionId=2.101"));
    }

    #[test]
    fn test_next_link_to_other_origin_is_refused() {
        let transport = transport("https://contoso.confidential-ledger.azure.com");
        assert!(transport
            .continuation_url("/app/transactions?fromTransactionId=2.101")
            .is_ok());
        assert!(transport
            .continuation_url("https://contoso.confidential-ledger.azure.com:443/app/transactions")
            .is_ok());

        for foreign in [
            "https://attacker.example/app/transactions",
            "http://contoso.confidential-ledger.azure.com/app/transactions",
            "https://contoso.confidential-ledger.azure.com:8443/app/transactions",
            "//attacker.example/app/transactions",
        ] {
            assert!(
                matches!(
                    transport.continuation_url(foreign),
                    Err(LedgerError::UnexpectedResponse(_))
                ),
                "{} was followed",
                foreign
            );
        }
    }

    #[test]
    fn test_parse_page_keeps_raw_entry() {
        let body: ListResponse = serde_json::from_str(
            r#"{"state":"Ready","@nextLink":"/app/transactions?x=1","entries":[
                {"contents":"SELECT 1","collectionId":"ContosoHrSqlLogs","transactionId":"2.7"},
                {"contents":17,"transactionId":"2.8"}
            ]}"#,
        )
        .unwrap();

        let page = HttpLedgerTransport::parse_page(&CollectionId::default(), body);
        assert_eq!(page.continuation.as_deref(), Some("/app/transactions?x=1"));
        assert_eq!(page.entries.len(), 2);
        let second = page.entries[1].as_ref().unwrap();
        assert_eq!(second.transaction_id, TransactionId::new(2, 8));
        assert_eq!(second.collection_id, CollectionId::default());
        assert!(String::from_utf8_lossy(&second.payload).contains("17"));
    }

    #[test]
    fn test_bad_entries_do_not_spoil_the_page() {
        let body: ListResponse = serde_json::from_str(
            r#"{"entries":[
                {"contents":"a","collectionId":"ContosoHrSqlLogs","transactionId":"2.1"},
                {"contents":"b","collectionId":"","transactionId":"2.2"},
                {"contents":"c"},
                {"contents":"d","transactionId":"two.four"},
                {"contents":"e","collectionId":"ContosoHrSqlLogs","transactionId":"2.5"}
            ]}"#,
        )
        .unwrap();

        let page = HttpLedgerTransport::parse_page(&CollectionId::default(), body);
        assert_eq!(page.entries.len(), 5);
        assert!(page.entries[0].is_ok());
        assert_eq!(
            page.entries[1].as_ref().unwrap().collection_id,
            CollectionId::default()
        );
        assert!(matches!(
            page.entries[2],
            Err(LedgerError::MalformedEntry { transaction_id: None, .. })
        ));
        assert!(matches!(
            page.entries[3],
            Err(LedgerError::MalformedEntry { transaction_id: None, .. })
        ));
        assert!(page.entries[4].is_ok());
    }
}
