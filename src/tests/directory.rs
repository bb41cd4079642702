use std::cell::RefCell;
use std::sync::Arc;

use crate::config::Config;
use crate::files::{list_directory, FileRef, LocalFileSource};
use crate::semantic::{
    DirectoryIndexer, EmbeddingError, Location, SemanticSearchError, SemanticSearchService,
    StatusKind,
};
use crate::tests::support::{FakeFileSource, FakeProvider};

const PEOPLE_CSV: &str = "name,city\nAnn,Oslo\nBo,Rome\n";
const NOTES_TXT: &str = "Trip planning for Oslo.\n\nBudget spreadsheet notes.";

#[test]
fn test_failing_file_is_skipped() {
    let provider = Arc::new(FakeProvider::ready(16));
    let source = Arc::new(
        FakeFileSource::new()
            .with_file("a.csv", PEOPLE_CSV)
            .with_failing("b.csv")
            .with_file("c.txt", NOTES_TXT),
    );
    let indexer = DirectoryIndexer::new(provider.clone(), source.clone(), 20);

    let progress = RefCell::new(Vec::new());
    let result = indexer
        .index_files(&source.refs(), &|p| progress.borrow_mut().push(p))
        .unwrap();

    assert_eq!(result.file_count, 2);
    assert_eq!(result.index.len(), 4);
    assert_eq!(source.fetched(), vec!["a.csv", "b.csv", "c.txt"]);
    // one batch per readable file
    assert_eq!(provider.embed_calls(), 2);
    assert_eq!(provider.embedded_texts(), 4);

    let progress = progress.into_inner();
    assert_eq!(progress.len(), 3);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));

    let first = &result.index.entries()[0].fragment;
    assert_eq!(first.text, "name,city\nAnn,Oslo");
    assert_eq!(first.location, Location::Row(1));
    assert_eq!(first.source.as_ref().unwrap().name, "a.csv");

    let sources: Vec<&str> = result
        .index
        .iter()
        .map(|e| e.fragment.source.as_ref().unwrap().name.as_str())
        .collect();
    assert_eq!(sources, vec!["a.csv", "a.csv", "c.txt", "c.txt"]);
}

#[test]
fn test_only_supported_files_are_fetched() {
    let provider = Arc::new(FakeProvider::ready(16));
    let source = Arc::new(
        FakeFileSource::new()
            .with_file("notes.md", "# Title\n\nBody text.")
            .with_file("photo.png", "binary"),
    );
    let mut files = source.refs();
    files.push(FileRef {
        name: "nested.json".into(),
        location: "mem://nested.json".into(),
        is_dir: true,
    });

    let indexer = DirectoryIndexer::new(provider, source.clone(), 20);
    let result = indexer.index_files(&files, &|_| {}).unwrap();

    assert_eq!(source.fetched(), vec!["notes.md"]);
    assert_eq!(result.file_count, 1);
}

#[test]
fn test_not_ready_fails_before_fetching() {
    let provider = Arc::new(FakeProvider::with_status(16, StatusKind::NeedsDownload));
    let source = Arc::new(FakeFileSource::new().with_file("a.csv", PEOPLE_CSV));
    let indexer = DirectoryIndexer::new(provider, source.clone(), 20);

    let result = indexer.index_files(&source.refs(), &|_| {});
    assert!(matches!(
        result,
        Err(SemanticSearchError::Embedding(EmbeddingError::ModelNotReady(
            StatusKind::NeedsDownload
        )))
    ));
    assert!(source.fetched().is_empty());
}

#[test]
fn test_embedding_failure_skips_file() {
    let provider = Arc::new(FakeProvider::ready(16).failing_on("Rome"));
    let source = Arc::new(
        FakeFileSource::new()
            .with_file("a.csv", PEOPLE_CSV)
            .with_file("c.txt", NOTES_TXT),
    );
    let indexer = DirectoryIndexer::new(provider, source.clone(), 20);

    let result = indexer.index_files(&source.refs(), &|_| {}).unwrap();
    assert_eq!(result.file_count, 1);
    assert!(result
        .index
        .iter()
        .all(|e| e.fragment.source.as_ref().unwrap().name == "c.txt"));
}

#[test]
fn test_no_eligible_files() {
    let provider = Arc::new(FakeProvider::ready(16));
    let source = Arc::new(FakeFileSource::new().with_file("image.gif", "GIF89a"));
    let indexer = DirectoryIndexer::new(provider.clone(), source.clone(), 20);

    let result = indexer.index_files(&source.refs(), &|_| {}).unwrap();
    assert!(result.index.is_empty());
    assert_eq!(result.file_count, 0);
    assert_eq!(provider.embed_calls(), 0);
}

#[test]
fn test_chunk_cap_per_file() {
    let provider = Arc::new(FakeProvider::ready(16));
    let lines: String = (0..50).map(|i| format!("line number {i}\n")).collect();
    let source = Arc::new(FakeFileSource::new().with_file("long.txt", &lines));
    let indexer = DirectoryIndexer::new(provider, source.clone(), 5);

    let result = indexer.index_files(&source.refs(), &|_| {}).unwrap();
    assert_eq!(result.index.len(), 5);
}

#[test]
fn test_directory_search_one_result_per_file() {
    let provider = Arc::new(FakeProvider::ready(16));
    let source = Arc::new(
        FakeFileSource::new()
            .with_file("a.csv", PEOPLE_CSV)
            .with_file("c.txt", NOTES_TXT)
            .with_file("d.json", r#"{"trip": "Oslo", "days": 3}"#),
    );
    let service = SemanticSearchService::new(provider, source.clone(), &Config::default());

    let directory = service
        .build_directory_index(&source.refs(), &|_| {})
        .unwrap();
    assert_eq!(directory.file_count, 3);

    let results = service
        .search_directory(&directory.index, "Trip planning for Oslo.", None)
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].fragment.source.as_ref().unwrap().name, "c.txt");
    assert!((results[0].score - 1.0).abs() < 1e-5);

    let top = service
        .search_directory(&directory.index, "Trip planning for Oslo.", Some(2))
        .unwrap();
    assert_eq!(top.len(), 2);
}

#[test]
fn test_local_directory_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.csv"), PEOPLE_CSV).unwrap();
    std::fs::write(tmp.path().join("c.txt"), NOTES_TXT).unwrap();
    std::fs::write(tmp.path().join("skip.bin"), [0u8, 1, 2]).unwrap();
    std::fs::create_dir(tmp.path().join("sub.md")).unwrap();

    let files = list_directory(tmp.path()).unwrap();
    let provider = Arc::new(FakeProvider::ready(16));
    let indexer = DirectoryIndexer::new(provider, Arc::new(LocalFileSource::new().unwrap()), 20);

    let result = indexer.index_files(&files, &|_| {}).unwrap();
    assert_eq!(result.file_count, 2);
    assert_eq!(result.index.len(), 4);
}
