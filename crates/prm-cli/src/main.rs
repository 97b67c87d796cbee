use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prm_storage::Database;
use prm_sync::SyncConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "prm-cli")]
#[command(about = "Property review manager command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API (default).
    Serve,
    /// Ingest reviews once and print a summary.
    Ingest {
        /// Print the full ingestion report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Apply migrations and seed the property catalog.
    Migrate,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("PRM_LOG_JSON")
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => prm_web::serve_from_env().await?,
        Commands::Ingest { json } => {
            let report = prm_sync::run_ingestion_once_from_env().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "ingest complete: source={} reviews={} new={} properties={} channels={}",
                    report.metadata.source,
                    report.metadata.total_reviews,
                    report.metadata.new_reviews,
                    report.properties.len(),
                    report.metadata.channels.join(",")
                );
            }
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let db = Database::bootstrap(&config.database_url)
                .await
                .with_context(|| format!("bootstrapping {}", config.database_url))?;
            let properties = db.properties().count().await?;
            info!(database_url = %config.database_url, properties, "database ready");
            println!("migrate complete: properties={properties}");
            db.close().await;
        }
    }

    Ok(())
}
