use super::*;
use std::fs;
use std::io::Write;
use tempfile::TempDir;

/// Build a small ZIP archive on disk with the given (name, contents) entries
fn build_zip(dir: &std::path::Path, name: &str, entries: &[(&str, &str)]) -> std::path::PathBuf {
    let archive_path = dir.join(name);
    let file = fs::File::create(&archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options = ::zip::write::FileOptions::default();

    for (entry_name, contents) in entries {
        writer.start_file(*entry_name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();

    archive_path
}

#[test]
fn detect_archive_type_by_extension() {
    use std::path::Path;

    assert_eq!(detect_archive_type(Path::new("a.zip")), Some(ArchiveType::Zip));
    assert_eq!(detect_archive_type(Path::new("a.ZIP")), Some(ArchiveType::Zip));
    assert_eq!(detect_archive_type(Path::new("a.rar")), Some(ArchiveType::Rar));
    assert_eq!(detect_archive_type(Path::new("a.r00")), Some(ArchiveType::Rar));
    assert_eq!(detect_archive_type(Path::new("a.7z")), Some(ArchiveType::SevenZip));
    assert_eq!(detect_archive_type(Path::new("a.txt")), None);
    assert_eq!(detect_archive_type(Path::new("noext")), None);
}

#[test]
fn is_archive_matches_detection() {
    use std::path::Path;

    assert!(is_archive(Path::new("dump.zip")));
    assert!(is_archive(Path::new("dump.7z")));
    assert!(!is_archive(Path::new("dump.txt")));
}

#[test]
fn zip_extraction_produces_every_entry() {
    let temp_dir = TempDir::new().unwrap();
    let archive = build_zip(
        temp_dir.path(),
        "combo.zip",
        &[("one.txt", "alpha\n"), ("sub/two.txt", "beta\n")],
    );

    let dest = temp_dir.path().join("out");
    let files = extract_archive(&archive, &dest).unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(fs::read_to_string(dest.join("one.txt")).unwrap(), "alpha\n");
    assert_eq!(
        fs::read_to_string(dest.join("sub/two.txt")).unwrap(),
        "beta\n"
    );
}

#[test]
fn zip_extraction_of_empty_archive_yields_no_files() {
    let temp_dir = TempDir::new().unwrap();
    let archive = build_zip(temp_dir.path(), "empty.zip", &[]);

    let dest = temp_dir.path().join("out");
    let files = extract_archive(&archive, &dest).unwrap();
    assert!(files.is_empty());
}

#[test]
fn corrupt_zip_fails_with_stage_error() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("broken.zip");
    fs::write(&archive, b"this is not a zip file").unwrap();

    let dest = temp_dir.path().join("out");
    let err = extract_archive(&archive, &dest).unwrap_err();
    assert_eq!(err.kind(), "stage_failed");
}

#[test]
fn unknown_extension_fails_with_stage_error() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("data.bin");
    fs::write(&file, b"xx").unwrap();

    let dest = temp_dir.path().join("out");
    let err = extract_archive(&file, &dest).unwrap_err();
    assert_eq!(err.kind(), "stage_failed");
    assert!(
        err.to_string().contains("unknown archive type"),
        "unexpected message: {err}"
    );
}

#[test]
fn collect_files_walks_nested_directories() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
    fs::write(temp_dir.path().join("top.txt"), "x").unwrap();
    fs::write(temp_dir.path().join("a/b/deep.txt"), "y").unwrap();

    let files = collect_files(temp_dir.path()).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|p| p.ends_with("top.txt")));
    assert!(files.iter().any(|p| p.ends_with("a/b/deep.txt")));
}
