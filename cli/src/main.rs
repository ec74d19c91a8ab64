// onionrelay — onion routing overlay node and control CLI
//
// Runs the registry, relays and users as HTTP services, or all of them at
// once, and talks to running nodes for sending and inspection.

mod api;
mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::future::try_join_all;
use onionrelay_core::relay::routes;
use onionrelay_core::topology::NodeAddress;
use onionrelay_core::{Directory, Transport};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "onionrelay")]
#[command(about = "Onion routing overlay over fixed three-hop circuits", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay directory
    Registry,
    /// Run one onion relay
    Relay {
        #[arg(short, long)]
        id: u32,
    },
    /// Run one user node
    User {
        #[arg(short, long)]
        id: u32,
    },
    /// Run registry, relays and users in one process
    Network {
        #[arg(short, long)]
        relays: Option<u32>,
        #[arg(short, long)]
        users: Option<u32>,
    },
    /// Ask a running user to send a message
    Send {
        #[arg(short, long)]
        from: u32,
        #[arg(short, long)]
        to: u32,
        message: String,
    },
    /// Show which nodes are up
    Status,
    /// Read a running node's last-seen state
    Inspect {
        #[command(subcommand)]
        target: InspectTarget,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum InspectTarget {
    Relay {
        id: u32,
        /// Also print the relay's private key
        #[arg(long)]
        private_key: bool,
    },
    User {
        id: u32,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config::Config::resolve_path(cli.config.as_deref())?;
    let config = config::Config::load_from(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Commands::Registry => cmd_registry(config).await,
        Commands::Relay { id } => cmd_relay(config, id).await,
        Commands::User { id } => cmd_user(config, id).await,
        Commands::Network { relays, users } => cmd_network(config, relays, users).await,
        Commands::Send { from, to, message } => cmd_send(config, from, to, message).await,
        Commands::Status => cmd_status(config).await,
        Commands::Inspect { target } => cmd_inspect(config, target).await,
        Commands::Config { action } => cmd_config(config, &config_path, action),
    }
}

fn clients(config: &config::Config) -> (Arc<dyn Directory>, Arc<dyn Transport>) {
    (
        Arc::new(api::HttpDirectory::new(config.network.registry_addr())),
        Arc::new(api::HttpTransport::new(config.network.clone())),
    )
}

async fn cmd_registry(config: config::Config) -> Result<()> {
    let (_, serve) = server::start_registry(&config.network)?;
    println!(
        "{} Registry listening on {}",
        "✓".green(),
        config.network.registry_addr().to_string().bright_cyan()
    );
    serve.await.context("Registry server error")?;
    Ok(())
}

async fn cmd_relay(config: config::Config, id: u32) -> Result<()> {
    let (directory, transport) = clients(&config);
    let (router, serve) = server::start_relay(id, &config.network, directory, transport)
        .await
        .context("Relay failed to start")?;
    println!(
        "{} Relay {} up at {} (key {})",
        "✓".green(),
        id,
        config.network.relay_address(id).to_string().bright_cyan(),
        router.fingerprint()?.bright_yellow()
    );
    serve.await.context("Relay server error")?;
    Ok(())
}

async fn cmd_user(config: config::Config, id: u32) -> Result<()> {
    let (directory, transport) = clients(&config);
    let (user, serve) = server::start_user(id, &config.network, directory, transport)?;
    println!(
        "{} User {} up at {}",
        "✓".green(),
        id,
        user.address().to_string().bright_cyan()
    );
    serve.await.context("User server error")?;
    Ok(())
}

async fn cmd_network(config: config::Config, relays: Option<u32>, users: Option<u32>) -> Result<()> {
    let relays = relays.unwrap_or(config.launch.relays);
    let users = users.unwrap_or(config.launch.users);
    let (directory, transport) = clients(&config);

    println!("{}", "Starting onion overlay...".bold());
    println!();

    let (_, registry) = server::start_registry(&config.network)?;
    println!(
        "  {} Registry  {}",
        "✓".green(),
        config.network.registry_addr()
    );

    // The registry has to be serving before relays can register
    let registry = tokio::spawn(registry);

    let mut servers = Vec::new();

    for id in 1..=relays {
        let (_, serve) =
            server::start_relay(id, &config.network, directory.clone(), transport.clone())
                .await
                .with_context(|| format!("Relay {} failed to start", id))?;
        servers.push(serve);
        println!("  {} Relay {:<3} {}", "✓".green(), id, config.network.relay_address(id));
    }

    for id in 1..=users {
        let (_, serve) = server::start_user(id, &config.network, directory.clone(), transport.clone())?;
        servers.push(serve);
        println!("  {} User {:<4} {}", "✓".green(), id, config.network.user_address(id));
    }

    println!();
    println!("{}", "Try:".bold());
    if users >= 2 {
        println!(
            "  {}",
            "onionrelay send --from 1 --to 2 \"hello\"".bright_green()
        );
    }
    println!("  {}", "onionrelay status".bright_green());

    let nodes = try_join_all(servers);
    tokio::select! {
        result = registry => { result?.context("Registry server error")?; }
        result = nodes => { result.context("Node server error")?; }
    }
    Ok(())
}

async fn cmd_send(config: config::Config, from: u32, to: u32, message: String) -> Result<()> {
    api::send_via_user(&config.network, from, to, &message).await?;

    let sender = config.network.resolve(config.network.user_address(from))?;
    let circuit: Option<Vec<u32>> = api::fetch_result(sender, routes::LAST_CIRCUIT).await?;

    println!("{} Sent to user {}", "✓".green(), to);
    if let Some(circuit) = circuit {
        let path: Vec<String> = circuit.iter().map(|id| id.to_string()).collect();
        println!("  Circuit: {}", path.join(" → ").bright_cyan());
    }
    Ok(())
}

async fn cmd_status(config: config::Config) -> Result<()> {
    let topology = &config.network;
    println!("{}", "Overlay Status".bold());
    println!();

    let registry_up = api::is_live(topology.registry_addr()).await;
    print_liveness("Registry", topology.registry_addr().port().into(), registry_up);

    if registry_up {
        let relays = api::fetch_registry(topology).await?;
        println!("  Registered relays: {}", relays.len().to_string().bright_cyan());
        for record in relays {
            let address = topology.relay_address(record.id);
            let up = match topology.resolve(address) {
                Ok(addr) => api::is_live(addr).await,
                Err(_) => false,
            };
            print_liveness(&format!("Relay {}", record.id), address.value(), up);
        }
    }

    for id in 1..=config.launch.users {
        let address = topology.user_address(id);
        let up = api::is_live(topology.resolve(address)?).await;
        print_liveness(&format!("User {}", id), address.value(), up);
    }
    Ok(())
}

fn print_liveness(name: &str, port: u64, up: bool) {
    let marker = if up { "●".green() } else { "○".red() };
    println!("  {} {:<10} :{}", marker, name, port);
}

async fn cmd_inspect(config: config::Config, target: InspectTarget) -> Result<()> {
    let topology = &config.network;
    match target {
        InspectTarget::Relay { id, private_key } => {
            let addr = topology.resolve(topology.relay_address(id))?;
            let encrypted: Option<String> =
                api::fetch_result(addr, routes::LAST_RECEIVED_ENCRYPTED).await?;
            let decrypted: Option<String> =
                api::fetch_result(addr, routes::LAST_RECEIVED_DECRYPTED).await?;
            let destination: Option<NodeAddress> =
                api::fetch_result(addr, routes::LAST_DESTINATION).await?;

            println!("{}", format!("Relay {}", id).bold());
            println!("  Last encrypted:   {}", preview(encrypted.as_deref()));
            println!("  Last decrypted:   {}", preview(decrypted.as_deref()));
            println!(
                "  Last destination: {}",
                destination
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "(none)".to_string())
                    .bright_cyan()
            );

            if private_key {
                let key: Option<String> = api::fetch_result(addr, routes::PRIVATE_KEY).await?;
                println!();
                println!("{}", "⚠️  Private key (test use only)".bright_red().bold());
                println!("{}", key.unwrap_or_default());
            }
        }
        InspectTarget::User { id } => {
            let addr = topology.resolve(topology.user_address(id))?;
            let received: Option<String> =
                api::fetch_result(addr, routes::LAST_RECEIVED_MESSAGE).await?;
            let sent: Option<String> = api::fetch_result(addr, routes::LAST_SENT_MESSAGE).await?;
            let circuit: Option<Vec<u32>> = api::fetch_result(addr, routes::LAST_CIRCUIT).await?;

            println!("{}", format!("User {}", id).bold());
            println!("  Last received: {}", preview(received.as_deref()));
            println!("  Last sent:     {}", preview(sent.as_deref()));
            println!(
                "  Last circuit:  {}",
                circuit
                    .map(|ids| format!("{:?}", ids))
                    .unwrap_or_else(|| "(none)".to_string())
                    .bright_cyan()
            );
        }
    }
    Ok(())
}

/// First 64 characters, enough to tell envelopes apart
fn preview(value: Option<&str>) -> String {
    match value {
        None => "(none)".to_string(),
        Some(text) if text.chars().count() > 64 => {
            let head: String = text.chars().take(64).collect();
            format!("{}… ({} chars)", head, text.chars().count())
        }
        Some(text) => text.to_string(),
    }
}

fn cmd_config(
    mut config: config::Config,
    path: &std::path::Path,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save_to(path)?;
            println!("{} {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!("  File: {}", path.display().to_string().bright_cyan());
            println!();
            for (key, value) in config.list() {
                println!("  {:<16} {}", key, value);
            }
        }
    }
    Ok(())
}
