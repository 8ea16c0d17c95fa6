use clap::{Parser, Subcommand};
use std::path::PathBuf;

use update_relay::config::schema::redact_url;
use update_relay::config::{load_config, load_from_env, RelayConfig};
use update_relay::limiter::Store;
use update_relay::publisher::RabbitPublisher;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Operations CLI for the update relay", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults plus environment when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration (secrets redacted)
    Config,
    /// Check broker health
    Broker,
    /// Connect to the configured admission store
    Store,
    /// Declare the destination queue
    DeclareQueue,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config: RelayConfig = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    match cli.command {
        Commands::Config => {
            println!("{:#?}", config);
        }
        Commands::Broker => {
            let publisher = RabbitPublisher::new(&config.publisher)?;
            let broker = redact_url(&config.publisher.url);
            if publisher.check().await {
                println!("Broker at {} is healthy", broker);
                publisher.close().await;
            } else {
                eprintln!("Error: broker at {} is not healthy", broker);
                std::process::exit(1);
            }
        }
        Commands::Store => match Store::from_config(&config.store).await {
            Ok(store) => println!("Admission store ready ({:?})", store.backend()),
            Err(e) => {
                eprintln!("Error: admission store unavailable: {}", e);
                std::process::exit(1);
            }
        },
        Commands::DeclareQueue => {
            let publisher = RabbitPublisher::new(&config.publisher)?;
            publisher.declare_queue(&config.publisher.queue).await?;
            publisher.close().await;
            println!("Queue '{}' declared", config.publisher.queue);
        }
    }

    Ok(())
}
