//! Configuration
//!
//! Defaults, then an optional TOML file, then `LEDGER_AUDIT__*` environment
//! variables (e.g. `LEDGER_AUDIT__LEDGER_NAME`, `LEDGER_AUDIT__RETRY__MAX_ATTEMPTS`).

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::audit::layer::LedgerAuditLayer;
use crate::audit::logger::AuditLogger;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{CollectionId, DEFAULT_COLLECTION};
use crate::ledger::http::DEFAULT_API_VERSION;
use crate::ledger::pager::ListOptions;
use crate::ledger::retry::RetryPolicy;

const ENV_PREFIX: &str = "LEDGER_AUDIT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Use `identity.access_token` as issued.
    Token,
    /// Ask the instance metadata service for managed identity tokens.
    ManagedIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub mode: IdentityMode,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub ledger_name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub collection_id: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
    pub loading_poll_interval_ms: u64,
    pub max_loading_polls: usize,
    pub retry: RetryConfig,
    pub audit_targets: Vec<String>,
    pub identity: IdentityConfig,
    pub bootstrap_from_imds: bool,
}

impl LedgerConfig {
    /// Load configuration from defaults, `path` (if given and present) and
    /// the environment.
    pub fn load(path: Option<&Path>) -> LedgerResult<Self> {
        let mut builder = Config::builder()
            .set_default("collection_id", DEFAULT_COLLECTION)?
            .set_default("api_version", DEFAULT_API_VERSION)?
            .set_default("request_timeout_secs", 30)?
            .set_default("loading_poll_interval_ms", 500)?
            .set_default("max_loading_polls", 20)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 200)?
            .set_default("retry.max_delay_ms", 5000)?
            .set_default("retry.jitter", 0.2)?
            .set_default("audit_targets", vec!["sqlx::query"])?
            .set_default("identity.mode", "token")?
            .set_default("bootstrap_from_imds", false)?;

        if let Some(path) = path {
            info!("Loading ledger configuration from: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let config: LedgerConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("audit_targets")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Fill in values published through the VM user data document.
    pub fn apply_imds_user_data(&mut self, user_data: &serde_json::Value) {
        if let Some(name) = user_data.get("ConfidentialLedgerName").and_then(|v| v.as_str()) {
            self.ledger_name = Some(name.to_string());
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.ledger_name.is_none() && self.endpoint.is_none() {
            return Err(LedgerError::ConfigError(
                "Either ledger_name or endpoint must be set".to_string(),
            ));
        }
        self.collection()?;
        if self.request_timeout_secs == 0 {
            return Err(LedgerError::ConfigError(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.identity.mode == IdentityMode::Token
            && self.identity.access_token.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            return Err(LedgerError::ConfigError(
                "identity.access_token is required when identity.mode = \"token\"".to_string(),
            ));
        }
        Ok(())
    }

    /// Ledger endpoint; an explicit `endpoint` wins over `ledger_name`.
    pub fn endpoint_url(&self) -> LedgerResult<String> {
        match (&self.endpoint, &self.ledger_name) {
            (Some(endpoint), _) => Ok(endpoint.clone()),
            (None, Some(name)) => Ok(format!("https://{}.confidential-ledger.azure.com", name)),
            (None, None) => Err(LedgerError::ConfigError(
                "Either ledger_name or endpoint must be set".to_string(),
            )),
        }
    }

    pub fn collection(&self) -> LedgerResult<CollectionId> {
        CollectionId::new(self.collection_id.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
        .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
        .with_jitter(self.retry.jitter)
    }

    pub fn list_options(&self) -> ListOptions {
        ListOptions {
            retry: self.retry_policy(),
            loading_poll_interval: Duration::from_millis(self.loading_poll_interval_ms),
            max_loading_polls: self.max_loading_polls,
        }
    }

    /// Capture layer for the configured event targets.
    pub fn audit_layer(&self, logger: AuditLogger) -> LedgerAuditLayer {
        LedgerAuditLayer::new(logger, self.audit_targets.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::load(None).unwrap();
        assert_eq!(config.collection_id, "ContosoHrSqlLogs");
        assert_eq!(config.api_version, "2022-05-13");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.audit_targets, vec!["sqlx::query".to_string()]);
        assert_eq!(config.identity.mode, IdentityMode::Token);
        assert_eq!(config.retry_policy().max_attempts(), 3);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
ledger_name = "contoso-ledger"
collection_id = "PayrollSqlLogs"
request_timeout_secs = 5

[retry]
max_attempts = 6

[identity]
mode = "managed_identity"
"#
        )
        .unwrap();

        let config = LedgerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ledger_name.as_deref(), Some("contoso-ledger"));
        assert_eq!(config.collection().unwrap().as_str(), "PayrollSqlLogs");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.identity.mode, IdentityMode::ManagedIdentity);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.endpoint_url().unwrap(),
            "https://contoso-ledger.confidential-ledger.azure.com"
        );
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = LedgerConfig::load(Some(Path::new("/nonexistent/ledger-audit.toml"))).unwrap();
        assert!(config.ledger_name.is_none());
    }

    #[test]
    fn test_validation() {
        let mut config = LedgerConfig::load(None).unwrap();
        assert!(config.validate().is_err());

        config.endpoint = Some("https://127.0.0.1:8443".to_string());
        assert!(config.validate().is_err());

        config.identity.access_token = Some("token".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint_url().unwrap(), "https://127.0.0.1:8443");

        config.collection_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_audit_targets_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, r#"audit_targets = ["sqlx::query", "diesel"]"#).unwrap();

        let config = LedgerConfig::load(Some(file.path())).unwrap();
        assert_eq!(
            config.audit_targets,
            vec!["sqlx::query".to_string(), "diesel".to_string()]
        );
    }

    #[test]
    fn test_imds_user_data_sets_ledger_name() {
        let mut config = LedgerConfig::load(None).unwrap();
        config.apply_imds_user_data(&serde_json::json!({
            "ContosoHRDatabase": "Server=tcp:contoso.database.windows.net",
            "ConfidentialLedgerName": "contoso-prod"
        }));
        assert_eq!(config.ledger_name.as_deref(), Some("contoso-prod"));
    }
}
