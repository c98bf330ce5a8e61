//! Writes staged bundles to disk, one directory per closure

use crate::graph::StagedBundle;
use crate::Result;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct BundleWriter {
    /// Remove an existing bundle directory before writing into it
    pub clean: bool,
}

impl BundleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Write every bundle concurrently, returning the written entry files in input order
    ///
    /// Bundle directories are disjoint. The first failure aborts the remaining writes.
    pub async fn write_all(&self, bundles: &[StagedBundle]) -> Result<Vec<PathBuf>> {
        let mut tasks = JoinSet::new();
        for (index, bundle) in bundles.iter().cloned().enumerate() {
            let clean = self.clean;
            tasks.spawn(async move {
                let file = write_one(bundle, clean).await?;
                Ok::<_, crate::Error>((index, file))
            });
        }

        let mut written = vec![PathBuf::new(); bundles.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Ok((index, file)) => written[index] = file,
                Err(err) => {
                    tasks.abort_all();
                    return Err(err);
                }
            }
        }
        Ok(written)
    }
}

async fn write_one(bundle: StagedBundle, clean: bool) -> Result<PathBuf> {
    if clean && tokio::fs::try_exists(&bundle.dir).await? {
        tokio::fs::remove_dir_all(&bundle.dir).await?;
    }
    tokio::fs::create_dir_all(&bundle.dir).await?;
    let file = bundle.file();
    tokio::fs::write(&file, bundle.code.as_bytes()).await?;
    debug!("Wrote bundle {} to {}", bundle.id, file.display());
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staged(root: &std::path::Path, id: &str, code: &str) -> StagedBundle {
        StagedBundle {
            id: id.to_string(),
            dir: root.join(id),
            filename: "__init__.py".to_string(),
            code: code.to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_all() {
        let dir = TempDir::new().unwrap();
        let bundles = vec![
            staged(dir.path(), "a", "_default = handler\n"),
            staged(dir.path(), "b", "x = 1\n_default = x\n"),
        ];
        let written = BundleWriter::new().write_all(&bundles).await.unwrap();

        assert_eq!(written, vec![dir.path().join("a/__init__.py"), dir.path().join("b/__init__.py")]);
        let code = std::fs::read_to_string(&written[1]).unwrap();
        assert_eq!(code, "x = 1\n_default = x\n");
    }

    #[tokio::test]
    async fn test_clean_removes_stale_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/stale.py"), "old").unwrap();

        let bundles = vec![staged(dir.path(), "a", "_default = f\n")];
        BundleWriter::new().clean(true).write_all(&bundles).await.unwrap();
        assert!(!dir.path().join("a/stale.py").exists());
        assert!(dir.path().join("a/__init__.py").exists());
    }

    #[tokio::test]
    async fn test_write_failure_aborts() {
        let dir = TempDir::new().unwrap();
        // A regular file where the bundle directory should go
        std::fs::write(dir.path().join("a"), "not a directory").unwrap();

        let bundles = vec![staged(dir.path(), "a", "_default = f\n")];
        let err = BundleWriter::new().write_all(&bundles).await.unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
