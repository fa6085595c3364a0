use crate::domain::ports::Storage;
use crate::utils::error::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Local filesystem storage. Relative paths resolve against `base_path`,
/// absolute paths are used as they are.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

impl Storage for LocalStorage {
    fn resolve(&self, path: &str) -> PathBuf {
        Path::new(&self.base_path).join(path)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = tokio::fs::read(self.resolve(path)).await?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.resolve(path);
        ensure_parent(&full_path).await?;
        tokio::fs::write(full_path, data).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .unwrap_or(false)
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from);
        let target = self.resolve(to);
        ensure_parent(&target).await?;

        match tokio::fs::rename(&source, &target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(e.into()),
            Err(e) => {
                // rename 無法跨檔案系統，改用複製後刪除
                tracing::debug!(
                    "Rename {} -> {} failed ({}), copying instead",
                    source.display(),
                    target.display(),
                    e
                );
                tokio::fs::copy(&source, &target).await?;
                tokio::fs::remove_file(&source).await?;
                Ok(())
            }
        }
    }

    async fn remove_file(&self, path: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
