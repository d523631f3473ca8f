use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use walkdir::WalkDir;

use knowledge_datastore::{
    get_provider, Config, Context, DatasetGetOpts, IngestInput, IngestPipeline, QdrantStore,
    Store, Where, WhereDocument,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Embedding provider, overrides EMBEDDING_PROVIDER
    #[arg(short = 'p', long, global = true)]
    provider: Option<String>,

    /// Embedding model, overrides EMBEDDING_MODEL
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    /// Give up after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a file, or every supported file under a directory
    Ingest {
        path: PathBuf,

        #[arg(short, long)]
        dataset: String,

        /// File type for every input, e.g. ".md" or "text/plain"
        #[arg(short, long)]
        filetype: Option<String>,
    },

    /// Rank documents in a dataset by similarity to a query
    Search {
        query: String,

        #[arg(short, long)]
        dataset: String,

        #[arg(short = 'k', long, default_value_t = 4, allow_negative_numbers = true)]
        num_documents: i64,

        /// Metadata filter as key=value, repeatable
        #[arg(short = 'w', long = "where", value_parser = parse_key_val)]
        where_filter: Vec<(String, String)>,

        /// Only documents containing this text, repeatable
        #[arg(long)]
        contains: Vec<String>,
    },

    /// List datasets
    Datasets,

    /// Show one dataset
    Get {
        dataset: String,

        /// Include stored documents
        #[arg(long)]
        documents: bool,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn init_tracing(level: &str) {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn collect_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    init_tracing(&config.processing.log_level);

    if let Some(provider) = &args.provider {
        config.embedding.provider = provider.clone();
    }
    let mut provider = get_provider(&config.embedding.provider, &config.embedding)?;
    if let Some(model) = &args.model {
        provider.use_embedding_model(model);
    }
    provider.configure()?;
    info!(provider = provider.name(), config = %provider.config(), "Embedding provider ready");
    let embedder = provider.embedding_func()?;

    let store: Arc<dyn Store> = Arc::new(QdrantStore::new(
        config.vector_db.clone(),
        Arc::clone(&embedder),
    )?);

    let ctx = match args.timeout {
        Some(secs) => Context::background().with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    match args.command {
        Command::Ingest {
            path,
            dataset,
            filetype,
        } => {
            let pipeline = IngestPipeline::builder_for_provider(dataset, Arc::clone(&store), provider.as_ref())?
                .with_splitter_opts(config.text_splitter.clone())
                .with_processing(&config.processing)
                .build()?;

            let files = collect_files(&path);
            if files.is_empty() {
                println!("No files found under {:?}", path);
                return Ok(());
            }

            let mut inputs = Vec::with_capacity(files.len());
            for file in &files {
                let mut input = IngestInput::from_path(file)
                    .await
                    .with_context(|| format!("opening {:?}", file))?;
                if let Some(filetype) = &filetype {
                    input.filetype = filetype.clone();
                }
                inputs.push(input);
            }

            let results = pipeline.ingest_batch(&ctx, inputs).await;
            let mut failed = 0;
            for result in &results {
                match result {
                    Ok(report) => println!("{}: {} chunks", report.source_id, report.chunks),
                    Err(e) => {
                        failed += 1;
                        println!("{}", e);
                    }
                }
            }
            println!(
                "Ingested {} of {} documents into {}",
                results.len() - failed,
                results.len(),
                pipeline.dataset_id()
            );
            if failed > 0 {
                bail!("{} documents failed", failed);
            }
        }
        Command::Search {
            query,
            dataset,
            num_documents,
            where_filter,
            contains,
        } => {
            let where_filter: Where = where_filter.into_iter().collect();
            let where_document: Vec<WhereDocument> =
                contains.into_iter().map(WhereDocument::contains).collect();
            let documents = store
                .similarity_search(&ctx, &query, num_documents, &dataset, &where_filter, &where_document)
                .await?;
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        Command::Datasets => {
            let datasets = store.list_datasets(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&datasets)?);
        }
        Command::Get {
            dataset,
            documents,
            offset,
            limit,
        } => {
            let opts = DatasetGetOpts {
                include_documents: documents,
                offset,
                limit,
            };
            let dataset = store.get_dataset(&ctx, &dataset, &opts).await?;
            println!("{}", serde_json::to_string_pretty(&dataset)?);
        }
    }

    Ok(())
}
