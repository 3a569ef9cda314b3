//! hybridrag: run hybrid retrieval over a directory of JSON documents.
//!
//! ```bash
//! hybridrag query "start a fire" --corpus ./corpus --principal ./alice.json
//! hybridrag query "boiling water" -c ./corpus -p ./alice.json -n 5 --filter lang=en --json
//! hybridrag explain --corpus ./corpus --principal ./alice.json --chunk fire:0
//! ```

mod corpus;
mod output;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hybridrag_core::access::AccessFilter;
use hybridrag_core::config::{resolve_with_base, Config};
use hybridrag_core::traits::{ChunkStore, Embedder};
use hybridrag_core::types::Principal;
use hybridrag_embed::get_default_embedder;
use hybridrag_hybrid::{FusionStrategy, SearchRequest};

#[derive(Parser, Debug)]
#[command(name = "hybridrag", version, about = "Hybrid keyword + vector retrieval with access control")]
struct Cli {
    /// Directory holding config.toml / config.<env>.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search the corpus as a given principal
    Query {
        text: String,
        #[arg(short, long)]
        corpus: String,
        /// JSON file describing the principal
        #[arg(short, long)]
        principal: PathBuf,
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
        /// Weighted fusion with this share on the vector list (default: RRF)
        #[arg(long)]
        alpha: Option<f32>,
        /// Metadata equality filter, repeatable
        #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        json: bool,
    },
    /// Show the access decision for one chunk
    Explain {
        #[arg(short, long)]
        corpus: String,
        #[arg(short, long)]
        principal: PathBuf,
        #[arg(long)]
        chunk: String,
    },
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    let (k, v) = s.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if k.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((k.trim().to_string(), v.trim().to_string()))
}

fn load_principal(path: &Path) -> Result<Principal> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading principal {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing principal {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load_from(&cli.config_dir)?;
    let settings = config.retrieval()?;
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Query { text, corpus, principal, top_k, alpha, filters, json } => {
            let principal = load_principal(&principal)?;
            let embedder = get_default_embedder(settings.vector_dim)?;
            let docs = corpus::load_documents(&resolve_with_base(&cwd, &corpus))?;
            let mut indexed = corpus::index_documents(docs, embedder.as_ref(), settings)?;
            if let Some(alpha) = alpha {
                indexed.retriever = indexed.retriever.with_strategy(FusionStrategy::alpha(alpha)?)?;
            }

            let mut request = SearchRequest::new(text.clone(), principal).with_vector(embedder.embed_query(&text)?);
            if let Some(k) = top_k {
                request = request.with_top_k(k);
            }
            for (k, v) in filters {
                request = request.with_filter(k, v);
            }
            let resp = indexed.retriever.search(request).await?;
            let rendered = if json { output::format_json(&text, &resp) } else { output::format_human(&text, &resp) };
            println!("{rendered}");
        }
        Commands::Explain { corpus, principal, chunk } => {
            let principal = load_principal(&principal)?;
            let docs = corpus::load_documents(&resolve_with_base(&cwd, &corpus))?;
            let store = hybridrag_core::store::InMemoryChunkStore::from_chunks(docs.into_iter().flat_map(corpus::CorpusDoc::into_chunks));
            let found = store.get(&chunk).ok_or_else(|| anyhow!(hybridrag_core::Error::NotFound(format!("chunk '{chunk}'"))))?;
            let decision = AccessFilter::new().evaluate(&principal, &found.metadata);
            println!("{}", output::format_decision(&principal.id, &found, decision));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_argument_parsing() {
        assert_eq!(parse_filter("lang = en").unwrap(), ("lang".to_string(), "en".to_string()));
        assert!(parse_filter("lang").is_err());
        assert!(parse_filter("=en").is_err());
    }

    #[test]
    fn cli_parses_query_command() {
        let cli = Cli::parse_from(["hybridrag", "query", "fire", "-c", "corpus", "-p", "p.json", "-n", "3", "--filter", "lang=en"]);
        match cli.command {
            Commands::Query { text, top_k, filters, .. } => {
                assert_eq!(text, "fire");
                assert_eq!(top_k, Some(3));
                assert_eq!(filters.len(), 1);
            }
            Commands::Explain { .. } => panic!("wrong command"),
        }
    }
}
