
use super::*;
use tempfile::NamedTempFile;

/// Open a fresh store backed by a temp file; the file handle must stay
/// alive for the duration of the test.
pub(super) async fn open_store() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Minimal valid submission for tests
pub(super) fn new_task(name: &str) -> NewTask {
    NewTask {
        submitter_id: 100,
        chat_id: 200,
        file_name: name.to_string(),
        declared_size: Some(1024),
        kind: crate::types::FileKind::Archive,
        remote_handle: format!("handle-{name}"),
    }
}
