//! graphq - inspect a graph connection from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graph_relational::{Config, GraphConnection, QueryBuilder};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "graphq")]
#[command(about = "Query and health tool for graph-relational connections")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "GRAPHQ_CONFIG")]
    config: Option<PathBuf>,

    /// Connection name (defaults to the configured default)
    #[arg(long)]
    connection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the connection; exits non-zero when it is down
    Ping,

    /// Print the resolved connection config (password redacted)
    Config,

    /// Count nodes carrying a label
    Count {
        #[arg(short, long)]
        label: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,graph_relational=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;
    let connection = config.connection(cli.connection.as_deref())?.clone();

    match cli.command {
        Commands::Config => {
            let yaml = serde_yaml::to_string(&connection.redacted())
                .context("Failed to render connection config")?;
            println!("# connection: {}\n{}", connection.name, yaml);
            Ok(())
        }
        Commands::Ping => {
            let name = connection.name.clone();
            let alive = match GraphConnection::connect(connection).await {
                Ok(graph) => {
                    let alive = graph.ping().await;
                    graph.disconnect().await;
                    alive
                }
                Err(e) => {
                    tracing::error!(connection = %name, error = %e, "Connect failed");
                    false
                }
            };
            println!("{name}: {}", if alive { "up" } else { "down" });
            if !alive {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Count { label } => {
            let graph = GraphConnection::connect(connection)
                .await
                .context("Failed to connect to Neo4j")?;
            let total = graph
                .count(&QueryBuilder::new(label.as_str()))
                .await
                .with_context(|| format!("Failed to count `{label}` nodes"))?;
            graph.disconnect().await;
            println!("{total}");
            Ok(())
        }
    }
}
