use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use portwatch_service::Monitor;
use portwatch_service::config::Config;
use portwatch_service::registry::ServiceTarget;

#[derive(Parser)]
#[command(name = "portwatch", version, about = "Tenant-scoped TCP service monitor")]
struct Cli {
    /// Config file path (defaults to $XDG_CONFIG_HOME/portwatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides database.path
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring scheduler until interrupted
    Run,

    /// Register or update a service
    Add {
        #[arg(short, long)]
        tenant: String,

        #[arg(long)]
        host: String,

        #[arg(short, long)]
        port: u32,

        /// Defaults to host/port
        #[arg(short, long)]
        alias: Option<String>,

        /// Seconds between checks, defaults to registry.default_interval_seconds
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Remove a service by alias or by host and port
    Remove {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long, conflicts_with_all = ["host", "port"], required_unless_present = "host")]
        alias: Option<String>,

        #[arg(long, requires = "port")]
        host: Option<String>,

        #[arg(short, long, requires = "host")]
        port: Option<u16>,
    },

    /// List a tenant's services
    List {
        #[arg(short, long)]
        tenant: String,

        #[arg(long)]
        json: bool,
    },

    /// Show a tenant's service count
    Quota {
        #[arg(short, long)]
        tenant: String,

        /// Recount from stored services before printing
        #[arg(long)]
        resync: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init_tracing();

    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_ref())?.with_env_overrides();
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    if let Commands::Config = cli.command {
        print!("{config}");
        return Ok(());
    }

    let monitor = Monitor::open(&config).await?;
    let result = execute(&monitor, &config, cli.command).await;
    monitor.close();
    result
}

async fn execute(monitor: &Monitor, config: &Config, command: Commands) -> Result<()> {
    let registry = monitor.registry();

    match command {
        Commands::Run => {
            let shutdown = CancellationToken::new();
            let handle = monitor.scheduler().spawn(shutdown.clone());

            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            shutdown.cancel();
            handle.await?;
        }
        Commands::Add { tenant, host, port, alias, interval } => {
            let interval = interval.unwrap_or(config.registry.default_interval_seconds);
            let record = registry.register(&tenant, &host, port, alias.as_deref(), interval).await?;
            println!(
                "{} -> {} every {}s ({})",
                record.alias,
                record.endpoint(),
                record.interval_seconds,
                record.status
            );
        }
        Commands::Remove { tenant, alias, host, port } => {
            let target = match (alias, host, port) {
                (Some(alias), _, _) => ServiceTarget::Alias(alias),
                (None, Some(host), Some(port)) => ServiceTarget::Endpoint { host, port },
                _ => anyhow::bail!("either --alias or both --host and --port are required"),
            };
            registry.unregister(&tenant, &target).await?;
            println!("Removed {target}");
        }
        Commands::List { tenant, json } => {
            let services = registry.list(&tenant).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&services)?);
            } else if services.is_empty() {
                println!("No services registered for tenant {tenant}");
            } else {
                for record in services {
                    println!(
                        "{:<24} {:<30} {:<5} every {}s, last {} next {}",
                        record.alias,
                        record.endpoint(),
                        record.status.as_str(),
                        record.interval_seconds,
                        record.last_check_time.format("%Y-%m-%d %H:%M:%S"),
                        record.next_check_time.format("%Y-%m-%d %H:%M:%S"),
                    );
                }
            }
        }
        Commands::Quota { tenant, resync } => {
            let quota = registry.quota();
            let count =
                if resync { quota.resync(&tenant).await? } else { quota.host_count(&tenant).await? };
            let user_type = quota
                .get(&tenant)
                .await?
                .map(|user| user.user_type)
                .unwrap_or_else(|| config.registry.default_user_type.clone());
            println!("tenant {tenant} ({user_type}): {count} services");
        }
        Commands::Config => print!("{config}"),
    }

    Ok(())
}
