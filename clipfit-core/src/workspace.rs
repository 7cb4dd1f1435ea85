use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Request-scoped scratch directory, removed with everything in it when
/// dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub async fn create(root: &Path) -> io::Result<Self> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || -> io::Result<Self> {
            std::fs::create_dir_all(&root)?;
            let dir = tempfile::Builder::new().prefix("clip-").tempdir_in(&root)?;
            Ok(Self { dir })
        })
        .await
        .map_err(io::Error::other)?
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn parts_dir(&self) -> PathBuf {
        self.dir.path().join("parts")
    }
}
