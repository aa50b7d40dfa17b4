use super::*;
use crate::db::Database;
use crate::dirs::{StageDirs, dir_is_empty, list_files};
use std::fs;
use std::io::Write;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

async fn stage_layout() -> (StageDirs, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let dirs = StageDirs::new(temp_dir.path());
    dirs.ensure().await.unwrap();
    (dirs, temp_dir)
}

fn build_zip(dest: &std::path::Path, entries: &[(&str, &str)]) {
    let file = fs::File::create(dest).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

// --- ArchiveExtractor ---

#[tokio::test]
async fn extract_moves_contents_to_pass_and_archive_to_done() {
    let (dirs, _guard) = stage_layout().await;
    build_zip(
        &dirs.all().join("combo.zip"),
        &[("creds.txt", "a:b\n"), ("sub/more.txt", "c:d\n")],
    );

    let extractor = ArchiveExtractor::new(dirs.spool());
    let outcome = extractor
        .extract(dirs.all(), dirs.pass(), dirs.done(), dirs.errors())
        .await
        .unwrap();

    assert_eq!(outcome, StageOutcome { processed: 1, failed: 0 });
    assert!(dir_is_empty(dirs.all()).unwrap(), "archive must leave all/");
    assert!(dirs.done().join("combo.zip").exists(), "archive must land in done/");

    let pass_names: Vec<String> = list_files(dirs.pass())
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(
        pass_names,
        vec!["creds.txt", "more.txt"],
        "contents are flattened into pass/"
    );
}

#[tokio::test]
async fn extract_routes_corrupt_archive_to_errors_and_continues() {
    let (dirs, _guard) = stage_layout().await;
    fs::write(dirs.all().join("broken.zip"), b"not a zip").unwrap();
    build_zip(&dirs.all().join("good.zip"), &[("ok.txt", "fine\n")]);

    let extractor = ArchiveExtractor::new(dirs.spool());
    let outcome = extractor
        .extract(dirs.all(), dirs.pass(), dirs.done(), dirs.errors())
        .await
        .unwrap();

    assert_eq!(outcome, StageOutcome { processed: 1, failed: 1 });
    assert!(
        dirs.errors().join("broken.zip").exists(),
        "failed archive is preserved in errors/, never deleted"
    );
    assert!(dirs.done().join("good.zip").exists());
    assert!(dirs.pass().join("ok.txt").exists());
}

#[tokio::test]
async fn extract_requeues_nested_archives_into_all() {
    let (dirs, _guard) = stage_layout().await;

    // Build an inner zip, then wrap it in an outer zip
    let scratch = TempDir::new().unwrap();
    let inner_path = scratch.path().join("inner.zip");
    build_zip(&inner_path, &[("deep.txt", "nested line\n")]);
    let inner_bytes = fs::read(&inner_path).unwrap();

    let outer = dirs.all().join("outer.zip");
    let file = fs::File::create(&outer).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    writer.start_file("inner.zip", options).unwrap();
    writer.write_all(&inner_bytes).unwrap();
    writer.start_file("top.txt", options).unwrap();
    writer.write_all(b"top line\n").unwrap();
    writer.finish().unwrap();

    let extractor = ArchiveExtractor::new(dirs.spool());

    // First pass: outer is unpacked, inner.zip re-enters all/
    extractor
        .extract(dirs.all(), dirs.pass(), dirs.done(), dirs.errors())
        .await
        .unwrap();
    assert!(dirs.all().join("inner.zip").exists(), "nested archive requeued");
    assert!(dirs.pass().join("top.txt").exists());

    // Second pass: inner is unpacked too
    extractor
        .extract(dirs.all(), dirs.pass(), dirs.done(), dirs.errors())
        .await
        .unwrap();
    assert!(dir_is_empty(dirs.all()).unwrap());
    assert!(dirs.pass().join("deep.txt").exists());
}

#[tokio::test]
async fn extract_suffixes_colliding_output_names() {
    let (dirs, _guard) = stage_layout().await;
    build_zip(&dirs.all().join("first.zip"), &[("list.txt", "one\n")]);
    build_zip(&dirs.all().join("second.zip"), &[("list.txt", "two\n")]);

    let extractor = ArchiveExtractor::new(dirs.spool());
    extractor
        .extract(dirs.all(), dirs.pass(), dirs.done(), dirs.errors())
        .await
        .unwrap();

    assert!(dirs.pass().join("list.txt").exists());
    assert!(
        dirs.pass().join("list (1).txt").exists(),
        "second file with the same name must be suffixed, both preserved"
    );
}

// --- TextConverter ---

#[tokio::test]
async fn convert_normalizes_line_endings_and_consumes_input() {
    let (dirs, _guard) = stage_layout().await;
    fs::write(dirs.pass().join("dump.csv"), b"a:b\r\nc:d\r\ne:f").unwrap();

    let converter = TextConverter;
    let outcome = converter
        .convert(dirs.pass(), dirs.txt(), dirs.errors())
        .await
        .unwrap();

    assert_eq!(outcome, StageOutcome { processed: 1, failed: 0 });
    assert!(dir_is_empty(dirs.pass()).unwrap());

    let output = fs::read_to_string(dirs.txt().join("dump.txt")).unwrap();
    assert_eq!(output, "a:b\nc:d\ne:f\n", "CRLF normalized, trailing newline added");
}

#[tokio::test]
async fn convert_decodes_invalid_utf8_lossily() {
    let (dirs, _guard) = stage_layout().await;
    fs::write(dirs.pass().join("weird.bin"), [b'o', b'k', 0xFF, b'\n']).unwrap();

    let converter = TextConverter;
    converter
        .convert(dirs.pass(), dirs.txt(), dirs.errors())
        .await
        .unwrap();

    let output = fs::read_to_string(dirs.txt().join("weird.txt")).unwrap();
    assert!(output.starts_with("ok"), "valid prefix preserved: {output:?}");
    assert!(
        output.contains('\u{FFFD}'),
        "invalid bytes become replacement characters"
    );
}

#[tokio::test]
async fn convert_on_empty_directory_is_a_no_op() {
    let (dirs, _guard) = stage_layout().await;

    let outcome = TextConverter
        .convert(dirs.pass(), dirs.txt(), dirs.errors())
        .await
        .unwrap();

    assert_eq!(outcome, StageOutcome::default());
}

// --- FingerprintLineStore ---

async fn line_store(dirs: &StageDirs) -> (FingerprintLineStore, NamedTempFile) {
    let db_file = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(db_file.path()).await.unwrap());
    (FingerprintLineStore::new(db, dirs.store()), db_file)
}

#[tokio::test]
async fn store_absorbs_unique_lines_and_drains_txt() {
    let (dirs, _guard) = stage_layout().await;
    let (store, _db_guard) = line_store(&dirs).await;

    fs::write(dirs.txt().join("a.txt"), "one\ntwo\n").unwrap();
    fs::write(dirs.txt().join("b.txt"), "two\nthree\n\n").unwrap();

    let outcome = store.store(dirs.txt(), dirs.errors()).await.unwrap();

    assert_eq!(outcome, StageOutcome { processed: 2, failed: 0 });
    assert!(dir_is_empty(dirs.txt()).unwrap(), "txt/ must be drained");

    let stored = fs::read_to_string(store.output_file()).unwrap();
    let mut lines: Vec<&str> = stored.lines().collect();
    lines.sort_unstable();
    assert_eq!(
        lines,
        vec!["one", "three", "two"],
        "duplicate and empty lines are dropped"
    );
}

#[tokio::test]
async fn store_rerun_absorbs_nothing_new() {
    let (dirs, _guard) = stage_layout().await;
    let (store, _db_guard) = line_store(&dirs).await;

    fs::write(dirs.txt().join("a.txt"), "alpha\nbeta\n").unwrap();
    store.store(dirs.txt(), dirs.errors()).await.unwrap();

    // Same content arrives again (at-least-once delivery)
    fs::write(dirs.txt().join("a.txt"), "alpha\nbeta\n").unwrap();
    store.store(dirs.txt(), dirs.errors()).await.unwrap();

    let stored = fs::read_to_string(store.output_file()).unwrap();
    assert_eq!(
        stored.lines().count(),
        2,
        "re-delivered lines must not be stored twice"
    );
}

#[tokio::test]
async fn store_deduplicates_within_a_single_file() {
    let (dirs, _guard) = stage_layout().await;
    let (store, _db_guard) = line_store(&dirs).await;

    fs::write(dirs.txt().join("a.txt"), "same\nsame\nsame\n").unwrap();
    store.store(dirs.txt(), dirs.errors()).await.unwrap();

    let stored = fs::read_to_string(store.output_file()).unwrap();
    assert_eq!(stored, "same\n");
}
