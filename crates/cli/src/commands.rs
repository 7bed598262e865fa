//! CLI commands

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use upkeep_core::{ClientConfig, FileStore};
use upkeep_http::{ParsedBody, SessionManager, SoapAction, SoapGateway};

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and persist the session
    Login {
        /// Account name
        #[arg(short, long)]
        username: String,

        /// Account password
        #[arg(short, long, env = "UPKEEP_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// End the persisted session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Issue an authenticated GET and print the body
    Get {
        /// Path relative to the base URL, e.g. /assets
        path: String,
    },

    /// Force a token refresh
    Refresh,

    /// List assets
    Assets,

    /// Print a master-data list, e.g. `locations`
    Lookup { kind: String },

    /// Send an asset operation to the ERP SOAP gateway
    Erp {
        #[arg(value_enum)]
        action: ErpAction,

        /// Envelope fields as `Element=value`
        #[arg(value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum ErpAction {
    Add,
    Edit,
    Delete,
}

impl From<ErpAction> for SoapAction {
    fn from(action: ErpAction) -> Self {
        match action {
            ErpAction::Add => Self::AddAsset,
            ErpAction::Edit => Self::EditAsset,
            ErpAction::Delete => Self::DeleteAsset,
        }
    }
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(element, _)| !element.is_empty())
        .map(|(element, value)| (element.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected Element=value, got {raw:?}"))
}

fn session(config: &ClientConfig) -> Result<SessionManager> {
    let store = FileStore::in_dir(&config.resolve_state_dir());
    SessionManager::from_config(config, Arc::new(store)).context("failed to create client")
}

fn print_json(value: &JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Commands {
    pub async fn execute(self, config: &ClientConfig) -> Result<()> {
        match self {
            Self::Login { username, password } => {
                let client = session(config)?;
                client.login(&username, &password).await?;
                let name = client
                    .profile()
                    .map(|p| p.name)
                    .filter(|name| !name.is_empty())
                    .unwrap_or(username);
                println!("Logged in as {name}");
            }
            Self::Logout => {
                let client = session(config)?;
                client.restore().await?;
                client.logout().await;
                println!("Logged out");
            }
            Self::Whoami => {
                let client = session(config)?;
                if !client.restore().await? {
                    bail!("not logged in");
                }
                match client.profile() {
                    Some(profile) => print_json(&serde_json::to_value(profile)?)?,
                    None => println!("Logged in (no cached profile)"),
                }
            }
            Self::Get { path } => {
                let client = session(config)?;
                match client.get(&path).await? {
                    ParsedBody::Null => {}
                    ParsedBody::Json(value) => print_json(&value)?,
                    ParsedBody::Text(text) => println!("{text}"),
                }
            }
            Self::Refresh => {
                let client = session(config)?;
                if !client.restore().await? {
                    bail!("not logged in");
                }
                if client.refresh().await.is_none() {
                    bail!("session ended, please log in again");
                }
                info!("session refreshed");
                println!("Session refreshed");
            }
            Self::Assets => {
                let client = session(config)?;
                let assets = client.list_assets().await?;
                print_json(&serde_json::to_value(assets)?)?;
            }
            Self::Lookup { kind } => {
                let client = session(config)?;
                let entries = client.lookup(&kind).await?;
                print_json(&serde_json::to_value(entries)?)?;
            }
            Self::Erp { action, fields } => {
                let url = config
                    .soap_url
                    .as_deref()
                    .context("soap_url is not configured")?;
                let gateway =
                    SoapGateway::new(url, Duration::from_secs(config.request_timeout_secs))?;
                let fields: Vec<(&str, &str)> = fields
                    .iter()
                    .map(|(element, value)| (element.as_str(), value.as_str()))
                    .collect();
                let reply = gateway.call(action.into(), &fields).await?;
                if reply.is_fault() {
                    bail!(
                        "ERP rejected the request: {}",
                        reply.fault_message().unwrap_or("SOAP fault")
                    );
                }
                println!("{}", reply.body);
            }
        }
        Ok(())
    }
}
