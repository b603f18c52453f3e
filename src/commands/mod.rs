#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{LanceVectorIndex, SearchResult, VectorIndex};
use crate::embeddings::OllamaClient;
use crate::indexer::{IngestionPipeline, IngestionStats};
use crate::query::QueryPipeline;
use crate::retrieval::Retriever;
use crate::server;

const SNIPPET_CHARS: usize = 200;

/// Long-lived clients shared by every operation of one invocation
struct Services {
    ollama: Arc<OllamaClient>,
    index: Arc<LanceVectorIndex>,
}

impl Services {
    async fn connect(config: &Config) -> Result<Self> {
        let ollama = OllamaClient::new(config).context("Failed to create Ollama client")?;
        let index = LanceVectorIndex::new(config).await.with_context(|| {
            format!(
                "Failed to open vector index at {}",
                config.vector_database_path().display()
            )
        })?;

        Ok(Self {
            ollama: Arc::new(ollama),
            index: Arc::new(index),
        })
    }

    fn retriever(&self, config: &Config) -> Retriever {
        Retriever::from_config(
            Arc::clone(&self.ollama) as _,
            Arc::clone(&self.index) as _,
            &config.retrieval,
        )
    }

    fn query_pipeline(&self, config: &Config) -> QueryPipeline {
        QueryPipeline::from_config(self.retriever(config), Arc::clone(&self.ollama) as _, config)
    }
}

/// Ingest an NDJSON file into a namespace
#[inline]
pub async fn ingest(config: &Config, file: &Path, namespace: &str) -> Result<()> {
    let services = Services::connect(config).await?;
    let pipeline = IngestionPipeline::new(
        Arc::clone(&services.ollama) as _,
        Arc::clone(&services.index) as _,
        config.chunking,
    )
    .context("Invalid chunking configuration")?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(format!("Ingesting {}", file.display()));

    let result = pipeline
        .ingest_file_with_progress(file, namespace, |stats| {
            bar.set_message(format!(
                "line {}: {} documents, {} chunks, {} failed",
                stats.lines_read,
                stats.documents_ingested,
                stats.chunks_indexed,
                stats.documents_failed
            ));
        })
        .await;
    bar.finish_and_clear();

    let stats = result.with_context(|| {
        format!(
            "Ingestion of {} into {} aborted",
            file.display(),
            namespace
        )
    })?;
    print_ingestion_summary(namespace, &stats);

    Ok(())
}

fn print_ingestion_summary(namespace: &str, stats: &IngestionStats) {
    println!(
        "{}",
        style(format!("Ingestion into '{}' complete", namespace))
            .bold()
            .green()
    );
    println!("  Lines read: {}", stats.lines_read);
    println!("  Documents ingested: {}", stats.documents_ingested);
    println!("  Chunks indexed: {}", stats.chunks_indexed);

    if stats.chunks_rejected > 0 {
        println!(
            "  Chunks rejected: {}",
            style(stats.chunks_rejected).yellow()
        );
    }
    if stats.documents_failed > 0 {
        println!(
            "  Documents failed: {}",
            style(stats.documents_failed).yellow()
        );
        for failure in &stats.failures {
            println!(
                "    line {} ({}): {}",
                failure.line, failure.stage, failure.reason
            );
        }
    }
}

/// Print the top results of each namespace for a query
#[inline]
pub async fn search(
    config: &Config,
    query: &str,
    namespaces: Vec<String>,
    limit: Option<usize>,
) -> Result<()> {
    let services = Services::connect(config).await?;
    let namespaces = if namespaces.is_empty() {
        config.retrieval.namespaces.clone()
    } else {
        namespaces
    };
    let limit = limit.unwrap_or(config.retrieval.top_k);

    let retrieval = services
        .retriever(config)
        .retrieve(query, &namespaces, limit)
        .await
        .context("Search failed")?;

    for group in &retrieval.hits {
        println!(
            "{} ({} results)",
            style(&group.namespace).bold().cyan(),
            group.results.len()
        );
        if group.results.is_empty() {
            println!("  No matches");
        }
        for (rank, result) in group.results.iter().enumerate() {
            print_search_result(rank + 1, result);
        }
        println!();
    }

    for failure in &retrieval.failures {
        println!(
            "{} {}: {}",
            style("⚠ Search failed in").yellow(),
            failure.namespace,
            failure.reason
        );
    }

    Ok(())
}

fn print_search_result(rank: usize, result: &SearchResult) {
    let metadata = &result.chunk.metadata;
    let label = metadata.title.as_deref().unwrap_or(metadata.id.as_str());
    println!(
        "  {}. {} {}",
        rank,
        style(format!("[{:.3}]", result.score)).dim(),
        style(label).bold()
    );
    if let Some(url) = &metadata.url {
        println!("     {}", style(url).underlined());
    }
    println!("     {}", snippet(&result.chunk.text));
}

fn snippet(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= SNIPPET_CHARS {
        return flattened;
    }
    let mut short: String = flattened.chars().take(SNIPPET_CHARS).collect();
    short.push('…');
    short
}

/// Answer one question and print it
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<()> {
    let services = Services::connect(config).await?;
    let pipeline = services.query_pipeline(config);

    let answer = pipeline
        .answer(question)
        .await
        .context("Failed to answer question")?;

    if answer.degraded {
        eprintln!(
            "{}",
            style("⚠ Some namespaces could not be searched; the answer may be incomplete.")
                .yellow()
        );
    }
    println!("{}", answer.answer);

    Ok(())
}

/// Run the chat server until interrupted
#[inline]
pub async fn serve(config: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }
    let address = server_config
        .socket_addr()
        .context("Invalid server address")?;

    let services = Services::connect(config).await?;
    match services.ollama.health_check() {
        Ok(()) => info!(
            "Ollama connected at {}:{}",
            config.ollama.host, config.ollama.port
        ),
        Err(e) => {
            warn!("Ollama is reachable but unhealthy: {}", e);
            eprintln!("Warning: Ollama may not be ready. Questions may fail until it is.");
        }
    }

    let known = services
        .index
        .namespaces()
        .await
        .context("Failed to list namespaces")?;
    for namespace in &config.retrieval.namespaces {
        if !known.contains(namespace) {
            warn!(
                "Namespace {} has not been ingested yet; searches will fail for it",
                namespace
            );
        }
    }

    let pipeline = Arc::new(services.query_pipeline(config));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    eprintln!(
        "{} http://{}",
        style("Chat server listening on").green(),
        address
    );
    server::serve(listener, pipeline)
        .await
        .context("Chat server failed")?;

    Ok(())
}

/// Show configuration health and index contents
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("📊 MOSDAC RAG Status Report").bold().cyan());
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(config) {
        Ok(client) => match client.health_check() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!(
                    "   📋 Embedding model: {} ({} dimensions)",
                    config.ollama.model, config.ollama.embedding_dimension
                );
                println!("   💬 Chat model: {}", config.completion.model);
            }
            Err(e) => {
                println!("   ⚠️  Ollama: Connected but unhealthy - {:#}", e);
            }
        },
        Err(e) => {
            println!("   ❌ Ollama: Failed to connect - {:#}", e);
        }
    }
    println!();

    println!("🔍 Vector Index Status:");
    let index = match LanceVectorIndex::new(config).await {
        Ok(index) => {
            println!("   ✅ LanceDB: {}", index.path().display());
            index
        }
        Err(e) => {
            error!("Failed to open vector index: {}", e);
            println!("   ❌ LanceDB: {}", e);
            return Ok(());
        }
    };

    let namespaces = index
        .namespaces()
        .await
        .context("Failed to list namespaces")?;
    if namespaces.is_empty() {
        println!("   📭 No namespaces ingested yet");
    }
    for namespace in &namespaces {
        match index.count(namespace).await {
            Ok(count) => println!("   📚 {}: {} chunks", namespace, count),
            Err(e) => println!("   ⚠️  {}: {}", namespace, e),
        }
    }
    println!();

    println!("🧭 Retrieval:");
    for namespace in &config.retrieval.namespaces {
        let marker = if namespaces.contains(namespace) {
            "✅"
        } else {
            "❌"
        };
        println!("   {} {}", marker, namespace);
    }
    println!(
        "   Top {} per namespace, {}s timeout, {:?} on failure",
        config.retrieval.top_k, config.retrieval.timeout_seconds, config.retrieval.failure_policy
    );

    Ok(())
}
