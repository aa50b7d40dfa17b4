//! Stage directory convention
//!
//! The download pool and the orchestrator never call each other; they hand
//! work over through these directories. File presence in a directory is the
//! authoritative signal that the producing stage finished with that item,
//! which is what makes every component independently restartable.
//!
//! Layout under the configured root:
//!
//! | Dir      | Contains                         | Written by    | Consumed by   |
//! |----------|----------------------------------|---------------|---------------|
//! | `all/`   | downloaded archives              | download pool | extract stage |
//! | `txt/`   | downloaded/converted text        | pool, convert | store stage   |
//! | `pass/`  | archive contents (post-extract)  | extract stage | convert stage |
//! | `done/`  | processed archives               | extract stage | —             |
//! | `errors/`| files whose stage failed         | any stage     | —             |
//! | `spool/` | in-progress fetches              | download pool | download pool |
//! | `store/` | record-store output              | store stage   | —             |
//!
//! The directory names are part of the on-disk contract and must not change.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{FileKind, TaskId};

/// The five stage directories plus the fetch spool and store output,
/// rooted under one configured path
#[derive(Clone, Debug)]
pub struct StageDirs {
    root: PathBuf,
    all: PathBuf,
    pass: PathBuf,
    txt: PathBuf,
    done: PathBuf,
    errors: PathBuf,
    spool: PathBuf,
    store: PathBuf,
}

impl StageDirs {
    /// Build the directory layout under `root` (nothing is created yet)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            all: root.join("all"),
            pass: root.join("pass"),
            txt: root.join("txt"),
            done: root.join("done"),
            errors: root.join("errors"),
            spool: root.join("spool"),
            store: root.join("store"),
            root,
        }
    }

    /// Create every directory that does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        for dir in [
            &self.all,
            &self.pass,
            &self.txt,
            &self.done,
            &self.errors,
            &self.spool,
            &self.store,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// The configured root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Downloaded archives, input of the extract stage
    pub fn all(&self) -> &Path {
        &self.all
    }

    /// Extracted archive contents, input of the convert stage
    pub fn pass(&self) -> &Path {
        &self.pass
    }

    /// Text files, input of the store stage
    pub fn txt(&self) -> &Path {
        &self.txt
    }

    /// Archives that finished extraction
    pub fn done(&self) -> &Path {
        &self.done
    }

    /// Files whose stage failed; kept for operator inspection
    pub fn errors(&self) -> &Path {
        &self.errors
    }

    /// In-progress fetches; contents here are never pipeline input
    pub fn spool(&self) -> &Path {
        &self.spool
    }

    /// Record-store output directory
    pub fn store(&self) -> &Path {
        &self.store
    }

    /// Stage-0 routing: where a downloaded file of `kind` belongs
    pub fn route(&self, kind: FileKind) -> &Path {
        match kind {
            FileKind::Archive => &self.all,
            FileKind::Text => &self.txt,
        }
    }

    /// Deterministic spool path for a task's in-progress fetch
    ///
    /// The task id prefix lets recovery match leftover spool files back to
    /// their tasks after a crash.
    pub fn spool_path(&self, id: TaskId, file_name: &str) -> PathBuf {
        self.spool.join(format!("{}-{}", id.0, file_name))
    }

    /// The directories a task's file may legitimately sit in between
    /// download and completion (everything except spool and store output)
    pub fn stage_dirs(&self) -> [(&'static str, &Path); 5] {
        [
            ("all", self.all.as_path()),
            ("pass", self.pass.as_path()),
            ("txt", self.txt.as_path()),
            ("done", self.done.as_path()),
            ("errors", self.errors.as_path()),
        ]
    }

    /// Locate `file_name` across the stage directories
    ///
    /// Returns the first directory label holding the file, scanning in the
    /// pipeline's own order.
    pub fn locate(&self, file_name: &str) -> Option<&'static str> {
        self.stage_dirs()
            .into_iter()
            .find(|(_, dir)| dir.join(file_name).exists())
            .map(|(label, _)| label)
    }
}

/// Whether a directory has no entries at all
///
/// A missing directory counts as empty; the stage would have nothing to do
/// either way.
pub fn dir_is_empty(dir: &Path) -> Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// List the plain files directly under a directory, sorted by name
///
/// Subdirectories are skipped; stage processors deposit flat files.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
