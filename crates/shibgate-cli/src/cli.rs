use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use shibgate_auth::AttributeProtocol;

#[derive(Parser)]
#[command(name = "shibgate")]
#[command(about = "Shibgate CLI: provision local accounts from federated sign-on")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./shibgate.toml when present)
    #[arg(short, long, global = true, env = "SHIBGATE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one provisioning visit for an attribute set
    Visit(VisitArgs),
    /// Show an account's state as JSON
    Status(StatusArgs),
    /// Print the next free uid number in the directory
    NextUid,
    /// Load and validate configuration
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Protocol {
    /// Shibboleth SP attribute names
    Shibboleth,
    /// AAF Rapid Connect claim names
    RapidConnect,
}

impl From<Protocol> for AttributeProtocol {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Shibboleth => AttributeProtocol::Shibboleth,
            Protocol::RapidConnect => AttributeProtocol::RapidConnect,
        }
    }
}

#[derive(clap::Args)]
pub struct VisitArgs {
    /// Attribute vocabulary (overrides federation.protocol)
    #[arg(long)]
    pub protocol: Option<Protocol>,
    /// JSON file with the raw attributes or decoded claims
    #[arg(short, long)]
    pub attributes: PathBuf,
    /// The user accepted the terms of service
    #[arg(long)]
    pub consent: bool,
    /// Return path supplied by the caller
    #[arg(long)]
    pub return_path: Option<String>,
}

#[derive(clap::Args)]
pub struct StatusArgs {
    /// Persistent id of the account
    pub persistent_id: String,
}
