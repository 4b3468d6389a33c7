//! inboxkit developer CLI.
//!
//! # Usage
//!
//! ```bash
//! # Register (or resume) an installation for a wallet on the dev network
//! inboxkit --key-hex $DB_KEY --wallet-key $WALLET_KEY create
//!
//! # Resume it later, by address only
//! inboxkit --key-hex $DB_KEY --address 0xabc... build
//!
//! # Log out and erase the local store
//! inboxkit --key-hex $DB_KEY --address 0xabc... logout --delete
//! ```

mod wallet;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::{bail, WrapErr};
use inboxkit_core::{
    AccountIdentity, ApiEndpoint, Client, ClientError, ClientManager, ClientOptions,
    EncryptionKey, Environment, LifecycleState, Signer,
};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::wallet::WalletSigner;

/// Client identity and local store tool for inboxkit
#[derive(Parser, Debug)]
#[command(name = "inboxkit")]
#[command(about = "Create, resume and retire inboxkit installations")]
#[command(version)]
struct Cli {
    /// Network environment (local, dev, production)
    #[arg(long, env = "INBOXKIT_ENV", default_value = "dev")]
    env: Environment,

    /// Remote API endpoint override
    #[arg(long, env = "INBOXKIT_API_URL")]
    api_url: Option<String>,

    /// Root directory for local stores
    #[arg(long, env = "INBOXKIT_DB_DIR")]
    db_dir: Option<PathBuf>,

    /// 32-byte database encryption key as hex
    #[arg(long, env = "INBOXKIT_DB_KEY", hide_env_values = true)]
    key_hex: Option<String>,

    /// Wallet private key as hex (signs new installations)
    #[arg(long, env = "INBOXKIT_WALLET_KEY", hide_env_values = true)]
    wallet_key: Option<String>,

    /// Account address, when no wallet key is given
    #[arg(long)]
    address: Option<String>,

    /// Seconds to wait for the wallet signature
    #[arg(long, default_value_t = 60)]
    signing_timeout: u64,

    /// Seconds to wait for each network call
    #[arg(long, default_value_t = 30)]
    network_timeout: u64,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log filter when `RUST_LOG` is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh random database key and wallet key
    GenKeys,
    /// Register a new installation, or reuse the one stored locally
    Create {
        /// Skip the history sync request for a new installation
        #[arg(long)]
        no_history_sync: bool,
    },
    /// Resume the locally stored installation
    Build,
    /// Close the local store, optionally erasing it
    Logout {
        /// Erase the local store, including a revoked or unregistered one
        #[arg(long)]
        delete: bool,
    },
    /// Revoke the locally stored installation
    Revoke,
    /// Print the resolved namespace without touching the store
    Namespace,
}

#[derive(Serialize)]
struct ClientReport {
    identity: String,
    environment: String,
    installation_id: String,
    created_at: u64,
    revoked: bool,
    new_installation: bool,
    store_path: PathBuf,
    remote_endpoint: String,
    history_sync_endpoint: String,
    network_error: Option<String>,
}

impl ClientReport {
    fn from_client(client: &Client) -> Self {
        let installation = client.installation();
        let namespace = client.namespace();
        Self {
            identity: client.identity().to_string(),
            environment: client.environment().to_string(),
            installation_id: installation.installation_id().to_string(),
            created_at: installation.created_at(),
            revoked: installation.is_revoked(),
            new_installation: client.is_new_installation(),
            store_path: namespace.store_path.clone(),
            remote_endpoint: namespace.remote_endpoint.to_string(),
            history_sync_endpoint: namespace.history_sync_endpoint.to_string(),
            network_error: client.network_error().map(ToString::to_string),
        }
    }
}

impl Cli {
    fn options(&self) -> eyre::Result<ClientOptions> {
        let mut options = ClientOptions::default()
            .with_env(self.env)
            .with_signing_timeout(Duration::from_secs(self.signing_timeout))
            .with_network_timeout(Duration::from_secs(self.network_timeout));
        if let Some(url) = &self.api_url {
            options = options.with_api_url(ApiEndpoint::parse(url)?);
        }
        if let Some(dir) = &self.db_dir {
            options = options.with_db_directory(dir);
        }
        Ok(options)
    }

    fn key(&self) -> eyre::Result<EncryptionKey> {
        let Some(key_hex) = &self.key_hex else {
            bail!("a database key is required: pass --key-hex or set INBOXKIT_DB_KEY");
        };
        EncryptionKey::from_hex(key_hex).wrap_err("invalid database key")
    }

    fn wallet(&self) -> eyre::Result<WalletSigner> {
        let Some(wallet_key) = &self.wallet_key else {
            bail!("a wallet key is required: pass --wallet-key or set INBOXKIT_WALLET_KEY");
        };
        WalletSigner::from_hex(wallet_key)
    }

    fn identity(&self) -> eyre::Result<AccountIdentity> {
        if let Some(address) = &self.address {
            return Ok(AccountIdentity::ethereum_str(address)?);
        }
        Ok(self.wallet()?.identity())
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> eyre::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

fn describe(report: &ClientReport) -> String {
    let mut lines = vec![
        format!("identity:          {}", report.identity),
        format!("environment:       {}", report.environment),
        format!("installation id:   {}", report.installation_id),
        format!("created at:        {}", report.created_at),
        format!("new installation:  {}", report.new_installation),
        format!("store path:        {}", report.store_path.display()),
        format!("remote endpoint:   {}", report.remote_endpoint),
        format!("history sync:      {}", report.history_sync_endpoint),
    ];
    if let Some(err) = &report.network_error {
        lines.push(format!("network error:     {err}"));
    }
    lines.join("\n")
}

/// Whether `logout --delete` may erase the store after `build` failed with `err`.
///
/// A revoked installation, an interrupted deletion and a store that never got
/// an installation can only be erased, not built. Key and lock errors stay
/// fatal.
fn erasable(
    err: &ClientError,
    manager: &ClientManager,
    identity: &AccountIdentity,
    options: &ClientOptions,
) -> eyre::Result<bool> {
    Ok(match err {
        ClientError::RevokedInstallation { .. } | ClientError::PartialDeletion { .. } => true,
        ClientError::NotFound { .. } => manager.namespace(identity, options)?.store_path.exists(),
        _ => false,
    })
}

async fn run(cli: &Cli, manager: &ClientManager) -> eyre::Result<()> {
    match &cli.command {
        Command::GenKeys => {
            let db_key = format!("0x{}", hex::encode(rand::random::<[u8; 32]>()));
            let wallet_key = WalletSigner::random().private_key_hex();
            cli.print(
                &serde_json::json!({ "db_key": db_key, "wallet_key": wallet_key }),
                || format!("INBOXKIT_DB_KEY={db_key}\nINBOXKIT_WALLET_KEY={wallet_key}"),
            )?;
        }
        Command::Create { no_history_sync } => {
            let signer = cli.wallet()?;
            let options = cli.options()?.with_history_sync(!no_history_sync);
            let client = manager.create(&signer, &cli.key()?, &options).await?;
            let report = ClientReport::from_client(&client);
            manager.logout(client, false)?;
            cli.print(&report, || describe(&report))?;
        }
        Command::Build => {
            let client = manager
                .build(&cli.identity()?, &cli.key()?, &cli.options()?)
                .await?;
            let report = ClientReport::from_client(&client);
            manager.logout(client, false)?;
            cli.print(&report, || describe(&report))?;
        }
        Command::Logout { delete } => {
            let identity = cli.identity()?;
            let options = cli.options()?;
            let state = match manager.build(&identity, &cli.key()?, &options).await {
                Ok(client) => manager.logout(client, *delete)?,
                Err(err) if *delete && erasable(&err, manager, &identity, &options)? => {
                    tracing::warn!("erasing local store without a live client: {err}");
                    manager.retry_deletion(&identity, &options)?;
                    LifecycleState::LoggedOutDeleted
                }
                Err(err) => return Err(err.into()),
            };
            cli.print(&serde_json::json!({ "state": state.to_string() }), || {
                format!("state: {state}")
            })?;
        }
        Command::Revoke => {
            let installation =
                manager.revoke_installation(&cli.identity()?, &cli.key()?, &cli.options()?)?;
            cli.print(
                &serde_json::json!({
                    "installation_id": installation.installation_id().to_string(),
                    "revoked": installation.is_revoked(),
                }),
                || format!("revoked installation {}", installation.installation_id()),
            )?;
        }
        Command::Namespace => {
            let namespace = manager.namespace(&cli.identity()?, &cli.options()?)?;
            cli.print(
                &serde_json::json!({
                    "environment": namespace.environment.to_string(),
                    "store_path": namespace.store_path,
                    "remote_endpoint": namespace.remote_endpoint.to_string(),
                    "history_sync_endpoint": namespace.history_sync_endpoint.to_string(),
                }),
                || {
                    format!(
                        "store path:      {}\nremote endpoint: {}\nhistory sync:    {}",
                        namespace.store_path.display(),
                        namespace.remote_endpoint,
                        namespace.history_sync_endpoint
                    )
                },
            )?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let manager = ClientManager::new();
    run(&cli, &manager).await
}
