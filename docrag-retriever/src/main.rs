use clap::{Parser, Subcommand};
use docrag_retriever::config::DocragConfig;
use docrag_retriever::service::DocragService;
use docrag_retriever::status::format_file_size;
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "docrag.toml";

/// Index a directory of documents and retrieve passages relevant to a question.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ./docrag.toml when it exists)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to index, overriding `[index] root`
    #[arg(short, long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the index up to date, then exit
    Index {
        /// Re-index every document even if its content is unchanged
        #[arg(long)]
        full: bool,
    },
    /// Keep the index current until interrupted
    Watch,
    /// Retrieve the passages most relevant to a question
    Query {
        question: String,
        /// Maximum number of passages
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Minimum cosine similarity (-1.0 to 1.0)
        #[arg(short, long)]
        min_score: Option<f32>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show document counts, queue size and failures
    Status {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List indexed documents grouped by category
    List {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show document, chunk and byte totals of the index
    CacheStats,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<DocragConfig> {
    let mut config = match &args.config {
        Some(path) => DocragConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            DocragConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => DocragConfig::default(),
    };
    if let Some(root) = &args.root {
        config.index.root = root.clone();
    }
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.logging.level);

    match args.command {
        Commands::Index { full } => {
            let service = DocragService::open(config).await?;
            let stats = service.index_once(full).await?;
            let status = service.status().await?;
            service.shutdown().await;

            println!(
                "Indexed {} documents ({} chunks), {} unchanged, {} removed, {} failed",
                stats.documents_indexed,
                stats.chunks_written,
                stats.documents_unchanged,
                stats.documents_removed,
                stats.documents_failed
            );
            for failure in &status.failures {
                println!(
                    "  failed: {} [{}] {}",
                    failure.path,
                    failure
                        .error_kind
                        .map(|kind| kind.to_string())
                        .unwrap_or_default(),
                    failure.error_message.as_deref().unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Watch => {
            let root = config.index.root.clone();
            let service = DocragService::start(config).await?;
            info!("Watching {} (Ctrl-C to stop)", root.display());
            tokio::signal::ctrl_c().await?;
            info!("Interrupted, shutting down");
            service.shutdown().await;
            Ok(())
        }
        Commands::Query {
            question,
            top_k,
            min_score,
            format,
        } => {
            let service = DocragService::open(config).await?;
            let result = service.retrieve(&question, top_k, min_score).await;
            service.shutdown().await;
            let result = result?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                OutputFormat::Summary => {
                    if result.is_empty() {
                        println!("No relevant passages found.");
                    }
                    for (rank, passage) in result.passages.iter().enumerate() {
                        println!(
                            "{}. [{:.3}] {} (chunk {})",
                            rank + 1,
                            passage.score,
                            passage.source_path,
                            passage.sequence
                        );
                    }
                }
                OutputFormat::Full => {
                    println!("{}", result.context());
                }
            }
            Ok(())
        }
        Commands::Status { format } => {
            let service = DocragService::open(config).await?;
            let status = service.status().await;
            let database = service.database_info().await;
            service.shutdown().await;
            let (status, database) = (status?, database?);

            match format {
                OutputFormat::Json => {
                    let output = serde_json::json!({
                        "index": status,
                        "database": database,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Documents: {}", status.total_documents);
                    println!("  indexed: {}", status.indexed_documents);
                    println!("  pending: {}", status.pending_documents);
                    println!("  failed:  {}", status.failed_documents);
                    println!("Chunks: {}", status.total_chunks);
                    println!(
                        "Embedding model: {}",
                        status.embedding_model.as_deref().unwrap_or("(none)")
                    );
                    match status.last_updated {
                        Some(at) => println!("Last updated: {}", at.to_rfc3339()),
                        None => println!("Last updated: never"),
                    }

                    if format == OutputFormat::Full {
                        println!("Database: {}", database.database_path);
                        if let Some(bytes) = database.file_size_bytes {
                            println!("  size: {}", format_file_size(bytes));
                        }
                        if let Some(version) = &database.sqlite_version {
                            println!("  sqlite: {version}");
                        }
                        if let Some(mode) = &database.journal_mode {
                            println!("  journal mode: {mode}");
                        }
                        for failure in &status.failures {
                            println!(
                                "Failed: {} [{}] {}",
                                failure.path,
                                failure
                                    .error_kind
                                    .map(|kind| kind.to_string())
                                    .unwrap_or_default(),
                                failure.error_message.as_deref().unwrap_or_default()
                            );
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::List { format } => {
            let service = DocragService::open(config).await?;
            let groups = service.list_documents().await;
            service.shutdown().await;
            let groups = groups?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&groups)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    if groups.is_empty() {
                        println!("No indexed documents.");
                    }
                    for group in &groups {
                        println!("{} ({})", group.category.label(), group.documents.len());
                        for doc in &group.documents {
                            if format == OutputFormat::Full {
                                println!(
                                    "  {} | {} | {} chunks | {}",
                                    doc.path,
                                    doc.size,
                                    doc.chunk_count,
                                    doc.indexed_at
                                        .map(|at| at.to_rfc3339())
                                        .unwrap_or_default()
                                );
                            } else {
                                println!("  {} ({})", doc.path, doc.size);
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::CacheStats => {
            let service = DocragService::open(config).await?;
            let stats = service.cache_stats().await;
            service.shutdown().await;
            let stats = stats?;

            println!("Total documents: {}", stats.total_documents);
            println!("Total chunks: {}", stats.total_chunks);
            println!(
                "Total size: {}",
                format_file_size(stats.total_size_bytes)
            );
            Ok(())
        }
    }
}
