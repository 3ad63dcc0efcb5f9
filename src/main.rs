use std::sync::Arc;

use clap::Parser;
use docsift::{
    DataDir,
    DiskRegistry,
    EngineConfig,
    FileTextExtractor,
    SearchService,
    api::{self, SearchRequest, VectorSearchRequest},
    cli::{
        AddArgs,
        Cli,
        Command,
        ListArgs,
        SearchArgs,
        VectorSearchArgs,
    },
    document::IndexedDocument,
    error,
    registry::DocumentRegistry,
    search::{EngineHealth, IndexOutcome, VectorWrite},
    walker,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = EngineConfig::from_env()?.with_model(cli.model.as_deref())?;
    let registry: Arc<dyn DocumentRegistry> = Arc::new(DiskRegistry::open(
        &data_dir.registry_db(),
        &data_dir.files_dir()?,
    )?);
    let service = SearchService::from_config(
        &config,
        registry,
        Arc::new(FileTextExtractor),
        &data_dir.snapshots_dir()?,
    )?;

    let result = run(&service, cli.command).await;
    service.shutdown().await;
    result
}

async fn run(service: &SearchService, command: Command) -> error::Result<()> {
    match command {
        Command::Add(args) => cmd_add(service, &args).await,
        Command::Remove(args) => {
            let outcome = service.delete(&args.id).await?;
            println!("Removed {}", args.id);
            if let VectorWrite::Failed { error } = &outcome.vector {
                eprintln!("Warning: {}", error.user_message());
            }
            Ok(())
        }
        Command::List(args) => cmd_list(service, &args),
        Command::Search(args) => {
            service.initialize().await?;
            cmd_search(service, args).await
        }
        Command::Vsearch(args) => cmd_vsearch(service, args).await,
        Command::Rebuild(args) => {
            match service.rebuild_vectors().await {
                Ok(summary) if args.json => print_json(&summary)?,
                Ok(summary) => println!(
                    "Rebuilt semantic index: {} documents, {} chunks \
                     ({} skipped)",
                    summary.documents, summary.chunks, summary.skipped
                ),
                Err(e) => eprintln!("Error: {}", e.user_message()),
            }
            Ok(())
        }
        Command::Sync(args) => {
            service.initialize().await?;
            let summary = service.synchronize().await?;
            if args.json {
                print_json(&summary)?;
            } else {
                println!(
                    "Synced: {} added, {} updated, {} removed, {} skipped",
                    summary.added,
                    summary.updated,
                    summary.removed,
                    summary.skipped
                );
                if summary.vector_failures > 0 {
                    eprintln!(
                        "Warning: {} documents could not be indexed for \
                         semantic search",
                        summary.vector_failures
                    );
                }
            }
            Ok(())
        }
        Command::Status(args) => {
            service.initialize().await?;
            let stats = api::index_stats(service).await;
            let health = service.health();
            if args.json {
                #[derive(Serialize)]
                #[serde(rename_all = "camelCase")]
                struct Status {
                    #[serde(flatten)]
                    health: EngineHealth,
                    vector_available: bool,
                }
                print_json(&Status {
                    health,
                    vector_available: stats.vector_available,
                })?;
            } else {
                println!("Documents: {}", stats.document_count);
                println!(
                    "Lexical index: {}",
                    if health.lexical_ready { "ready" } else { "not ready" }
                );
                println!("Semantic index: {}", health.vector_status);
                println!(
                    "Semantic search available: {}",
                    stats.vector_available
                );
                println!(
                    "  {} chunks from {} documents",
                    health.vector.chunk_count, health.vector.document_count
                );
            }
            Ok(())
        }
    }
}

async fn cmd_add(service: &SearchService, args: &AddArgs) -> error::Result<()> {
    #[derive(Serialize)]
    struct Added {
        document: IndexedDocument,
        outcome: IndexOutcome,
    }

    let files = walker::expand_paths(&args.paths)?;
    if files.is_empty() {
        eprintln!("No supported files found.");
        return Ok(());
    }

    let mut added = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = std::fs::read(&file.absolute_path)?;
        let name = file
            .absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| {
                file.relative_path.to_string_lossy().to_string()
            });
        let (document, outcome) = service.upload(&name, None, &bytes).await?;

        if !args.json {
            let semantic = match &outcome.vector {
                VectorWrite::Skipped => "skipped".to_string(),
                VectorWrite::Applied { chunks, .. } => {
                    format!("{chunks} chunks")
                }
                VectorWrite::Failed { error } => {
                    error.user_message().to_string()
                }
            };
            if outcome.indexed {
                println!("{}  {}  (semantic: {semantic})", document.id, name);
            } else {
                println!(
                    "{}  {}  (stored, no extractable text)",
                    document.id, name
                );
            }
        }
        added.push(Added { document, outcome });
    }

    if args.json {
        print_json(&added)?;
    }
    Ok(())
}

fn cmd_list(service: &SearchService, args: &ListArgs) -> error::Result<()> {
    let documents = service.registry().list_all()?;
    if args.json {
        return print_json(&documents);
    }
    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in &documents {
        println!(
            "{}  {:>10}  {}",
            doc.id, doc.file_size, doc.original_name
        );
    }
    Ok(())
}

async fn cmd_search(
    service: &SearchService,
    args: SearchArgs,
) -> error::Result<()> {
    let request = SearchRequest {
        query: args.query,
        limit: args.limit,
        offset: args.offset,
        file_types: (!args.file_types.is_empty()).then_some(args.file_types),
    };
    let response = api::search(service, &request).await?;

    if args.json {
        return print_json(&response);
    }
    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, doc) in response.results.iter().enumerate() {
        println!(
            "{:>3}. {}  {}",
            request.offset + i + 1,
            doc.id,
            doc.original_name
        );
    }
    println!(
        "{} of {} matches ({} ms)",
        response.results.len(),
        response.total,
        response.elapsed_ms
    );
    Ok(())
}

async fn cmd_vsearch(
    service: &SearchService,
    args: VectorSearchArgs,
) -> error::Result<()> {
    let request = VectorSearchRequest {
        query: args.query,
        limit: args.limit,
    };
    let response = api::vector_search(service, &request).await;

    if args.json {
        return print_json(&response);
    }
    match (response.data, response.error) {
        (Some(chunks), _) if chunks.is_empty() => println!("No results."),
        (Some(chunks), _) => {
            for (i, chunk) in chunks.iter().enumerate() {
                println!(
                    "{:>3}. {:.3}  {}  {} #{}",
                    i + 1,
                    chunk.score,
                    chunk.document_id,
                    chunk.document.original_name,
                    chunk.sequence
                );
                let preview: String = chunk.text.chars().take(160).collect();
                println!("     {}", preview.replace('\n', " "));
            }
        }
        (None, error) => {
            eprintln!("Error: {}", error.unwrap_or_default());
        }
    }
    Ok(())
}
