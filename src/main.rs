use clap::{Parser, Subcommand};
use mosdac_rag::Result;
use mosdac_rag::commands::{ask, ingest, search, serve, show_status};
use mosdac_rag::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mosdac-rag")]
#[command(about = "Retrieval-augmented question answering over MOSDAC documentation")]
#[command(version)]
struct Cli {
    /// Base directory holding config.toml and the vector index (default: ~/.mosdac-rag)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, models and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest an NDJSON file of documents into a namespace
    Ingest {
        /// File with one {"id", "text", "url"?, "title"?} record per line
        file: PathBuf,
        /// Namespace to write into, e.g. "mosdac" or "mosdac-pdf"
        #[arg(long, short)]
        namespace: String,
    },
    /// Search namespaces without generating an answer
    Search {
        query: String,
        /// Namespace to search; repeat for several (default: configured namespaces)
        #[arg(long = "namespace", short)]
        namespaces: Vec<String>,
        /// Results per namespace (default: configured top_k)
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Answer a single question
    Ask { question: String },
    /// Start the HTTP chat server
    Serve {
        /// Address to bind (default: configured host)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (default: configured port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show connectivity and index contents
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir()?,
    };

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&Config::load(&config_dir)?);
        } else {
            run_interactive_config(&config_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&config_dir)?;
    match cli.command {
        Commands::Config { .. } => {}
        Commands::Ingest { file, namespace } => {
            ingest(&config, &file, &namespace).await?;
        }
        Commands::Search {
            query,
            namespaces,
            limit,
        } => {
            search(&config, &query, namespaces, limit).await?;
        }
        Commands::Ask { question } => {
            ask(&config, &question).await?;
        }
        Commands::Serve { host, port } => {
            serve(&config, host, port).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
