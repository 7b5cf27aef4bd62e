use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use scan_coordinator::config::load_config;
use scan_coordinator::lifecycle::startup::{CAPTCHA_QUEUE, EXTRA_QUEUE, WORKER_DICT};
use scan_coordinator::server::{Endpoint, SharedStateClient};

#[derive(Parser)]
#[command(name = "coordinator-ctl")]
#[command(about = "Inspect a running scan coordinator", long_about = None)]
struct Cli {
    /// Read endpoint and authkey from this configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Endpoint override (`host:port` or socket path).
    #[arg(short, long)]
    address: Option<String>,

    /// Authkey override.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List published resources
    Resources,
    /// Show queue occupancy
    Queues,
    /// Dump the worker table
    Workers,
    /// Push a JSON item onto a queue
    Push {
        /// Queue name
        queue: String,
        /// Item as JSON
        item: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = connect(&cli)?;

    match cli.command {
        Commands::Resources => {
            let resources = client.resources().await?;
            println!("{}", serde_json::to_string_pretty(&resources)?);
        }
        Commands::Queues => {
            for name in [CAPTCHA_QUEUE, EXTRA_QUEUE] {
                let queue = client.queue(name).await?;
                println!("{:<14} {}", name, queue.len().await?);
            }
        }
        Commands::Workers => {
            let workers = client.table(WORKER_DICT).await?.items().await?;
            let mut ids: Vec<_> = workers.keys().cloned().collect();
            ids.sort();
            for id in ids {
                println!("{:>4}  {}", id, workers[&id]);
            }
        }
        Commands::Push { queue, item } => {
            let item: Value = serde_json::from_str(&item)?;
            let len = client.queue(&queue).await?.put(&item).await?;
            println!("{} now holds {} item(s)", queue, len);
        }
    }

    Ok(())
}

fn connect(cli: &Cli) -> Result<SharedStateClient, Box<dyn std::error::Error>> {
    if let (Some(address), Some(key)) = (&cli.address, &cli.key) {
        return Ok(SharedStateClient::new(Endpoint::parse(address), key.clone()));
    }

    let config = load_config(&cli.config)?;
    let address = cli.address.clone().or(config.manager.address.clone());
    let endpoint = Endpoint::resolve(address.as_deref(), &config.directory());
    let key = cli.key.clone().unwrap_or(config.manager.authkey);
    Ok(SharedStateClient::new(endpoint, key))
}
