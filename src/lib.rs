//! docsift - keyword and semantic search over an evolving document collection.
//!
//! docsift keeps two indexes over the documents in a [`DocumentRegistry`]:
//! an in-memory lexical index built on
//! [Tantivy](https://github.com/quickwit-oss/tantivy), and a chunked
//! embedding index persisted as timestamped snapshots. The
//! [`SearchService`] writes to both, answers paginated keyword queries and
//! semantic queries, and keeps lexical search working when the embedding
//! backend is missing or rate limited.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docsift::{
//!     EngineConfig, FileTextExtractor, MemoryRegistry, SearchService,
//!     lexical::SearchOptions,
//! };
//!
//! # async fn run() -> docsift::Result<()> {
//! let config = EngineConfig::from_env()?.with_model(Some("hashing"))?;
//! let service = SearchService::from_config(
//!     &config,
//!     Arc::new(MemoryRegistry::new()),
//!     Arc::new(FileTextExtractor),
//!     std::path::Path::new("/tmp/docsift-snapshots"),
//! )?;
//! service.initialize().await?;
//!
//! service.upload("notes.md", None, b"Rust programming notes").await?;
//!
//! let page = service.search("programming", &SearchOptions::default()).await?;
//! for doc in &page.results {
//!     println!("{} {}", doc.id, doc.original_name);
//! }
//!
//! match service.vector_search("systems languages", 4).await {
//!     Ok(chunks) => println!("{} semantic hits", chunks.len()),
//!     Err(e) => eprintln!("{}", e.user_message()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod disk_registry;
pub mod doc_id;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod incremental;
pub mod ingestion;
pub mod lexical;
pub mod model_manager;
pub mod registry;
pub mod search;
pub mod snapshot;
pub mod vector_index;
pub mod vector_store;
pub mod walker;

pub use config::EngineConfig;
pub use data_dir::DataDir;
pub use disk_registry::DiskRegistry;
pub use doc_id::DocumentId;
pub use document::IndexedDocument;
pub use error::{Error, Result};
pub use extract::FileTextExtractor;
pub use lexical::LexicalIndex;
pub use model_manager::ModelManager;
pub use registry::{DocumentRegistry, MemoryRegistry};
pub use search::SearchService;
pub use vector_index::{VectorError, VectorIndex};
