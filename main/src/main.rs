mod orchestrator;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{
    storage::{db::SurrealDbClient, types::document::Document},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use orchestrator::{Orchestrator, PipelineOutcome, PipelineRequest};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "ragctl",
    version,
    about = "Chat with your PDF documents through retrieval-augmented generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more documents into the vector store
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask a question about the ingested documents
    Ask {
        question: String,
        /// Number of chunks to retrieve as answer context
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// List the ingested documents
    List,
    /// Delete one document and its chunks
    Delete { document_id: String },
    /// Remove every document from the store
    Clear {
        /// Confirm deletion of all documents
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let mut config = get_config().context("failed to load configuration")?;
    if let Commands::Ask { top_k: Some(k), .. } = &cli.command {
        config.retrieval_top_k = *k;
    }

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .context("failed to connect to the vector store")?,
    );
    db.ensure_initialized(&config)
        .await
        .context("failed to initialize the vector store")?;

    let embedding_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedding_provider = Arc::new(
        EmbeddingProvider::from_config(&config, Some(embedding_client))
            .context("failed to build the embedding provider")?,
    );

    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let llm_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_base_url),
    ));

    // Ctrl-C flips the token; in-flight calls finish, no new ones start.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(Arc::clone(&db), embedding_provider, llm_client, &config);

    match cli.command {
        Commands::Ingest { paths } => {
            for path in paths {
                let outcome = orchestrator
                    .execute(
                        PipelineRequest::Ingest { path: path.clone() },
                        &cancel,
                    )
                    .await
                    .with_context(|| format!("failed to ingest {}", path.display()))?;
                if let PipelineOutcome::Ingested(report) = outcome {
                    let note = if report.replaced {
                        ", replaced previous version"
                    } else {
                        ""
                    };
                    println!(
                        "ragctl: \"{}\" ingested ({} chunks{note})",
                        path.display(),
                        report.chunk_count
                    );
                }
            }
        }
        Commands::Ask { question, .. } => {
            let outcome = orchestrator
                .execute(PipelineRequest::Answer { question }, &cancel)
                .await
                .context("failed to answer the question")?;
            if let PipelineOutcome::Answered(answer) = outcome {
                println!("{}", answer.content);
                if answer.is_grounded() {
                    println!();
                    println!("Sources:");
                    let mut names: HashMap<String, String> = HashMap::new();
                    for reference in &answer.references {
                        if !names.contains_key(&reference.document_id) {
                            let name = db
                                .get_item::<Document>(&reference.document_id)
                                .await?
                                .map_or_else(|| reference.document_id.clone(), |d| d.file_name);
                            names.insert(reference.document_id.clone(), name);
                        }
                        let name = names
                            .get(&reference.document_id)
                            .cloned()
                            .unwrap_or_default();
                        println!(
                            "  {name} (chunk {}, score {:.3})",
                            reference.seq, reference.score
                        );
                    }
                }
            }
        }
        Commands::List => {
            let documents = Document::list(&db).await?;
            if documents.is_empty() {
                println!("No documents ingested yet");
            } else {
                println!(
                    "{:<36}  {:<32}  {:>10}  {:>5}  {:>6}",
                    "ID", "Name", "Size", "Pages", "Chunks"
                );
                for doc in &documents {
                    println!(
                        "{:<36}  {:<32}  {:>10}  {:>5}  {:>6}",
                        doc.id,
                        doc.file_name,
                        doc.human_size(),
                        doc.pages,
                        doc.chunk_count
                    );
                }
                println!("Total documents: {}", documents.len());
            }
        }
        Commands::Delete { document_id } => {
            let removed = Document::delete_with_chunks(&document_id, &db)
                .await
                .with_context(|| format!("failed to delete document {document_id}"))?;
            println!("ragctl: \"{}\" has been deleted", removed.file_name);
        }
        Commands::Clear { force } => {
            if !force {
                anyhow::bail!("refusing to delete every document without --force");
            }
            Document::clear_all(&db)
                .await
                .context("failed to clear the store")?;
            println!("All documents have been deleted");
        }
    }

    Ok(())
}
