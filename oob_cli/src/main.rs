use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use oob_sdk::{
    AnyInvitation, CreateInvitationConfig, Error, EventBus, InMemoryRepository, OutOfBandApi,
    OutOfBandConfig, OutOfBandDependencies, OutOfBandRecord, ProtocolRegistry,
    StaticRoutingProvider,
    definitions::{
        ConnectionManager, ConnectionRecord, DidResolver, DispatchTarget, HandshakeConfig,
        MessageDispatcher, MessageSender, ResolvedService,
    },
    invitation::{ConnectionInvitation, url::fetch_invitation},
    messages::AgentMessage,
};
use tracing::{info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "oob")]
#[command(about = "Create and inspect out-of-band invitations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, help = "Agent configuration file (JSON)")]
    config: Option<PathBuf>,
    #[arg(short, long, help = "Agent label, overrides the configuration file")]
    label: Option<String>,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an invitation and print its URL
    Create {
        #[arg(short, long, help = "Endpoint to receive messages at")]
        endpoint: Vec<String>,
        #[arg(short, long, default_value = "https://example.com/ssi")]
        domain: Url,
        #[arg(short, long)]
        alias: Option<String>,
        #[arg(long)]
        goal_code: Option<String>,
        #[arg(long, help = "Allow the invitation to be used more than once")]
        multi_use: bool,
        #[arg(long, help = "Create a connection protocol invitation")]
        legacy: bool,
    },
    /// Print the invitation carried by (or linked from) a URL as JSON
    #[command(arg_required_else_help = true)]
    Decode { url: String },
    /// Rewrite an out-of-band invitation URL as a connection invitation URL
    #[command(arg_required_else_help = true)]
    Legacy {
        url: String,
        #[arg(short, long, default_value = "https://example.com/ssi")]
        domain: Url,
    },
}

/// Collaborators of an agent that is never online: invitations can be
/// created, but nothing can be sent or accepted.
struct Offline;

fn offline() -> Error {
    Error::Collaborator("this agent is offline".to_string())
}

#[async_trait]
impl ConnectionManager for Offline {
    async fn find_by_id(&self, _connection_id: &str) -> Result<Option<ConnectionRecord>, Error> {
        Ok(None)
    }

    async fn find_by_invitation_did(&self, _did: &str) -> Result<Vec<ConnectionRecord>, Error> {
        Ok(Vec::new())
    }

    async fn find_all_by_out_of_band_id(
        &self,
        _out_of_band_id: &str,
    ) -> Result<Vec<ConnectionRecord>, Error> {
        Ok(Vec::new())
    }

    async fn accept_out_of_band_invitation(
        &self,
        _record: &OutOfBandRecord,
        _config: HandshakeConfig,
    ) -> Result<ConnectionRecord, Error> {
        Err(offline())
    }
}

#[async_trait]
impl DidResolver for Offline {
    async fn resolve_services(&self, did: &str) -> Result<Vec<ResolvedService>, Error> {
        trace!("not resolving {did}");
        Ok(Vec::new())
    }
}

#[async_trait]
impl MessageSender for Offline {
    async fn send_to_connection(
        &self,
        _connection: &ConnectionRecord,
        _message: AgentMessage,
    ) -> Result<(), Error> {
        Err(offline())
    }
}

#[async_trait]
impl MessageDispatcher for Offline {
    async fn dispatch(&self, _message: AgentMessage, _target: DispatchTarget) -> Result<(), Error> {
        Err(offline())
    }
}

async fn read_config(args: &Cli) -> Result<OutOfBandConfig, Error> {
    let mut config = match &args.config {
        Some(path) => {
            trace!("reading configuration from {}", path.display());
            OutOfBandConfig::from_file(path).await?
        }
        None => OutOfBandConfig::new("oob"),
    };

    if let Some(label) = &args.label {
        config.label = label.clone();
    }

    Ok(config)
}

fn build_api(config: OutOfBandConfig) -> OutOfBandApi {
    let offline = Arc::new(Offline);

    let deps = OutOfBandDependencies {
        repository: Arc::new(InMemoryRepository::new()),
        routing: Arc::new(StaticRoutingProvider::from_config(&config)),
        resolver: offline.clone(),
        connections: offline.clone(),
        sender: offline.clone(),
        dispatcher: offline,
        features: Arc::new(ProtocolRegistry::with_handshake_protocols()),
        v2_handler: None,
    };

    OutOfBandApi::new(config, deps, &EventBus::default())
}

fn to_json(invitation: &AnyInvitation) -> Result<String, Error> {
    let json = match invitation {
        AnyInvitation::OutOfBand(invitation) => serde_json::to_string_pretty(invitation),
        AnyInvitation::OutOfBandV2(invitation) => serde_json::to_string_pretty(invitation),
        AnyInvitation::Connection(invitation) => serde_json::to_string_pretty(invitation),
        AnyInvitation::Connectionless(message) => serde_json::to_string_pretty(message),
    }?;

    Ok(json)
}

async fn run() -> Result<(), Error> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if args.verbose {
                    "oob=trace,oob_sdk=trace"
                } else {
                    "oob=info,oob_sdk=info"
                }
                .into()
            }),
        )
        .init();

    let mut config = read_config(&args).await?;

    match args.command {
        Commands::Create {
            endpoint,
            domain,
            alias,
            goal_code,
            multi_use,
            legacy,
        } => {
            if !endpoint.is_empty() {
                config.default_endpoints = endpoint;
            }

            let api = build_api(config);
            let invitation_config = CreateInvitationConfig {
                alias,
                goal_code,
                multi_use_invitation: multi_use,
                ..Default::default()
            };

            let url = if legacy {
                let (record, invitation) = api.create_legacy_invitation(invitation_config).await?;
                info!("created legacy invitation {}", record.invitation.id());

                invitation.to_url(&domain)?
            } else {
                let record = api.create_invitation(invitation_config).await?;
                info!("created invitation {}", record.invitation.id());

                record
                    .invitation
                    .as_v1()
                    .ok_or(Error::Internal)?
                    .to_url(&domain)?
            };

            println!("{url}");
        }
        Commands::Decode { url } => {
            let invitation = fetch_invitation(&url).await?;
            info!("decoded invitation {}", invitation.id());

            println!("{}", to_json(&invitation)?);
        }
        Commands::Legacy { url, domain } => {
            let AnyInvitation::OutOfBand(invitation) = fetch_invitation(&url).await? else {
                return Err(Error::InvalidConfiguration(
                    "only out-of-band 1.x invitations have a legacy form".into(),
                ));
            };

            let legacy = ConnectionInvitation::from_out_of_band(&invitation)?;
            trace!("converted invitation {}", legacy.id);

            println!("{}", legacy.to_url(&domain)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
