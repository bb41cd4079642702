use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::InquireError;
use tracing_subscriber::EnvFilter;

use filelens::config::{self, Config};
use filelens::content::{self, FileType};
use filelens::files::{list_directory, FileRef, FileSource, LocalFileSource};
use filelens::semantic::{
    EmbeddingProvider, FastEmbedProvider, Index, IndexCache, SearchResult, SearchStatus,
    SemanticSearchError, SemanticSearchService,
};
use filelens::storage::BackendLocal;

mod cli;

const INDEX_DIR: &str = "indexes";

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {percent}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(message);
    pb
}

fn load_model(service: &SemanticSearchService) -> anyhow::Result<()> {
    let status = service.check_availability();
    if status.is_ready() {
        return Ok(());
    }

    let pb = progress_bar("Loading model");
    let result = service.load_model(&|p| pb.set_position((p * 100.0) as u64));
    pb.finish_and_clear();

    result.map_err(|e| {
        let hint = SearchStatus::for_error(&e);
        anyhow::Error::new(e).context(hint.to_string())
    })
}

/// Build the index for `file`, loading the model only when the cache misses.
fn index_file(
    service: &SemanticSearchService,
    source: &dyn FileSource,
    file: &Path,
) -> anyhow::Result<Arc<Index>> {
    let file_ref = FileRef::from_path(file);
    let file_type = FileType::from_name(&file_ref.name);
    let raw = source.fetch(&file_ref)?;
    let content = content::parse(&raw, file_type)
        .with_context(|| format!("failed to parse {}", file.display()))?;

    let build = |service: &SemanticSearchService| {
        let pb = progress_bar("Building search index");
        let result = service.build_index(&content, file_type, &|p| {
            pb.set_position((p * 100.0) as u64)
        });
        pb.finish_and_clear();
        result
    };

    match build(service) {
        Err(e) if e.is_model_missing() => {
            load_model(service)?;
            Ok(build(service)?)
        }
        Err(SemanticSearchError::NoContent) => {
            bail!("{} has no searchable content", file.display())
        }
        other => Ok(other?),
    }
}

fn print_results(query: &str, results: &[SearchResult]) -> anyhow::Result<()> {
    eprintln!("{}", SearchStatus::for_results(query, results));
    if !results.is_empty() {
        println!("{}", serde_json::to_string_pretty(results)?);
    }
    Ok(())
}

fn interactive(
    service: &SemanticSearchService,
    index: Arc<Index>,
    top_k: usize,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let session = service.session();

    loop {
        let query = match inquire::Text::new("Search:").prompt() {
            Ok(query) if query.trim().is_empty() => break,
            Ok(query) => query,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => break,
            Err(err) => bail!("An error occurred: {}", err),
        };

        match runtime.block_on(session.submit(index.clone(), query.clone(), top_k)) {
            Some(Ok(results)) => print_results(&query, &results)?,
            Some(Err(e)) => eprintln!("{}", SearchStatus::for_error(&e)),
            None => {}
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    let base_path = config::base_path()?;
    let config = Config::load_with(&base_path)?;

    let provider = Arc::new(FastEmbedProvider::new(
        &config.semantic_search,
        base_path.clone(),
    )?);
    let source = Arc::new(LocalFileSource::new()?);
    let store = Arc::new(BackendLocal::new(base_path.join(INDEX_DIR))?);

    let mut service = SemanticSearchService::new(provider.clone(), source.clone(), &config);
    if config.cache.enabled {
        service = service.with_cache(IndexCache::new(store.clone(), provider.model_id()));
    }

    match args.command {
        cli::Command::Status {} => {
            let status = service.check_availability();
            let output = serde_json::json!({
                "model": provider.model_id(),
                "status": status,
                "dimensions": provider.dimensions(),
                "base_path": base_path,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        cli::Command::Load {} => {
            load_model(&service)?;
            println!(
                "{} ready ({} dimensions)",
                provider.model_id(),
                provider.dimensions().unwrap_or_default()
            );
        }

        cli::Command::Index { file } => {
            let index = index_file(&service, source.as_ref(), &file)?;
            println!(
                "{}: {} fragments indexed ({} dimensions)",
                file.display(),
                index.len(),
                index.dimensions()
            );
        }

        cli::Command::Search {
            file,
            query,
            top_k,
            interactive: is_interactive,
        } => {
            let index = index_file(&service, source.as_ref(), &file)?;
            load_model(&service)?;

            let top_k = top_k.unwrap_or(config.search.top_k);
            if is_interactive {
                return interactive(&service, index, top_k);
            }

            let query = query.unwrap_or_default();
            let results = service.search(&index, &query, Some(top_k))?;
            print_results(&query, &results)?;
        }

        cli::Command::Dir { dir, query, top_k } => {
            let files = list_directory(&dir)?;
            load_model(&service)?;

            let pb = progress_bar("Indexing directory");
            let directory = service.build_directory_index(&files, &|p| {
                pb.set_position((p * 100.0) as u64)
            });
            pb.finish_and_clear();
            let directory = directory?;

            log::info!(
                "{} files indexed, {} fragments",
                directory.file_count,
                directory.index.len()
            );

            if directory.index.is_empty() {
                bail!("no searchable files in {}", dir.display());
            }

            let results = service.search_directory(&directory.index, &query, top_k)?;
            print_results(&query, &results)?;
        }

        cli::Command::Cache {
            action: cli::CacheAction::Clear { models },
        } => {
            let removed = IndexCache::new(store, provider.model_id()).clear();
            println!("{} cached indexes removed", removed);

            if models {
                provider
                    .clear_model_cache()
                    .context("failed to delete model files")?;
                println!("model files removed");
            }
        }
    }

    Ok(())
}
