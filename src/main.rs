use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_audit::audit::{AuditLogger, ChainVerifier, LedgerReader, ReviewOutcome};
use ledger_audit::config::{IdentityMode, LedgerConfig};
use ledger_audit::identity::{
    CachedCredential, ImdsClient, ManagedIdentityCredential, StaticTokenCredential, TokenCredential,
};
use ledger_audit::ledger::{wait_for_commit, HttpLedgerTransport, LedgerTransport, TransactionId};

#[derive(Parser)]
#[command(
    name = "ledger-audit",
    version,
    about = "Append to and review audit collections in a confidential ledger"
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Ledger name, overriding configuration
    #[arg(long, value_name = "NAME", global = true)]
    ledger_name: Option<String>,

    /// Collection to use, overriding configuration
    #[arg(long, value_name = "ID", global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every message in the collection and a review summary
    Read {
        /// Emit one JSON object per entry
        #[arg(long)]
        json: bool,
        /// Print detailed review status
        #[arg(short, long)]
        verbose: bool,
    },
    /// Append a single message
    Append {
        message: String,
        /// Wait until the ledger reports the entry committed
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 60, value_name = "SECS")]
        wait_timeout: u64,
    },
    /// Show the commit status of a transaction
    Status { transaction_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli).await?;
    let collection = config.collection()?;
    let transport = Arc::new(build_transport(&config)?);

    match cli.command {
        Commands::Read { json, verbose } => {
            let reader = LedgerReader::new(transport).with_options(config.list_options());
            let mut verifier = ChainVerifier::new(collection.clone());
            let mut records = reader.read_all(&collection);

            while let Some(item) = records.next().await {
                match &item {
                    Ok(record) if json => println!("{}", serde_json::to_string(record)?),
                    Ok(record) => println!("{}", record.message),
                    Err(err) if err.aborts_read() => eprintln!("❌ {}", err),
                    Err(err) => eprintln!("⚠️ {}", err),
                }
                if !verifier.observe(item) {
                    break;
                }
            }

            let report = verifier.finish();
            eprintln!("{}", report.summary());
            if verbose {
                eprintln!("{}", report.detailed_status());
            }

            match report.outcome() {
                ReviewOutcome::Aborted => std::process::exit(1),
                ReviewOutcome::CompleteWithUnreadableEntries => std::process::exit(2),
                ReviewOutcome::Complete if !report.is_ordered() => std::process::exit(2),
                ReviewOutcome::Complete => {}
            }
        }
        Commands::Append {
            message,
            wait,
            wait_timeout,
        } => {
            let logger = AuditLogger::new(transport.clone(), collection)?;
            let receipt = logger.try_log(message).await?;

            match receipt.transaction_id {
                Some(transaction_id) => {
                    println!("{}", transaction_id);
                    if wait {
                        wait_for_commit(
                            transport.as_ref(),
                            &transaction_id,
                            Duration::from_secs(1),
                            Duration::from_secs(wait_timeout),
                        )
                        .await?;
                        info!("Transaction {} committed", transaction_id);
                    }
                }
                None if wait => {
                    return Err(anyhow!("Ledger did not return a transaction id to wait on"));
                }
                None => println!("accepted"),
            }
        }
        Commands::Status { transaction_id } => {
            let transaction_id: TransactionId = transaction_id.parse()?;
            let status = transport.transaction_status(&transaction_id).await?;
            println!("{} {:?}", transaction_id, status);
        }
    }

    Ok(())
}

async fn load_config(cli: &Cli) -> Result<LedgerConfig> {
    let mut config = LedgerConfig::load(cli.config.as_deref())?;

    if let Some(name) = &cli.ledger_name {
        config.ledger_name = Some(name.clone());
    }
    if let Some(collection) = &cli.collection {
        config.collection_id = collection.clone();
    }

    if config.bootstrap_from_imds && config.ledger_name.is_none() && config.endpoint.is_none() {
        let user_data = ImdsClient::new()?
            .user_data()
            .await
            .context("Failed to bootstrap configuration from IMDS")?;
        config.apply_imds_user_data(&user_data);
    }

    config.validate()?;
    Ok(config)
}

fn build_transport(config: &LedgerConfig) -> Result<HttpLedgerTransport> {
    let credential: Arc<dyn TokenCredential> = match config.identity.mode {
        IdentityMode::Token => {
            let token = config.identity.access_token.clone().unwrap_or_default();
            Arc::new(StaticTokenCredential::new(token)?)
        }
        IdentityMode::ManagedIdentity => {
            let mut credential = ManagedIdentityCredential::new(ImdsClient::new()?);
            if let Some(client_id) = &config.identity.client_id {
                credential = credential.with_client_id(client_id.clone());
            }
            Arc::new(CachedCredential::new(credential))
        }
    };

    let endpoint = config.endpoint_url()?;
    info!("Using ledger {}", endpoint);
    let transport = HttpLedgerTransport::new(&endpoint, credential, config.request_timeout())?
        .with_api_version(config.api_version.clone());
    Ok(transport)
}
