use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Keyword and semantic search over uploaded documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding backend: a ColBERT model ID, a local model path, or
    /// `hashing[:dim]`. Overrides DOCSIFT_MODEL.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload files (or every supported file under a directory) and index them
    Add(AddArgs),
    /// Delete a document from the store and both indexes
    Remove(RemoveArgs),
    /// List stored documents
    List(ListArgs),
    /// Keyword search over content and file names
    Search(SearchArgs),
    /// Semantic search over document chunks
    #[command(name = "vsearch")]
    Vsearch(VectorSearchArgs),
    /// Rebuild the semantic index from all stored documents
    Rebuild(JsonArgs),
    /// Bring both indexes in line with the document store
    Sync(JsonArgs),
    /// Show index health and statistics
    Status(JsonArgs),
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Files or directories to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Document ID
    pub id: String,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Number of results to skip
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Only return these file types (repeatable: -t pdf -t md)
    #[arg(short = 't', long = "type")]
    pub file_types: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct VectorSearchArgs {
    /// The search query
    pub query: String,

    /// Number of chunks to return (1-20)
    #[arg(short = 'n', long, default_value = "4")]
    pub limit: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docsift", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.limit, 10);
                assert_eq!(args.offset, 0);
                assert!(args.file_types.is_empty());
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_filters() {
        let cli = Cli::parse_from([
            "docsift", "search", "rust", "-n", "2", "--offset", "4", "-t",
            "pdf", "-t", "md",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.limit, 2);
                assert_eq!(args.offset, 4);
                assert_eq!(args.file_types, vec!["pdf", "md"]);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_vsearch_and_globals() {
        let cli = Cli::parse_from([
            "docsift",
            "vsearch",
            "meaning",
            "--model",
            "hashing",
            "-vv",
        ]);
        assert_eq!(cli.model.as_deref(), Some("hashing"));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Vsearch(args) => assert_eq!(args.limit, 4),
            _ => panic!("expected vsearch command"),
        }
    }

    #[test]
    fn add_requires_paths() {
        assert!(Cli::try_parse_from(["docsift", "add"]).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
