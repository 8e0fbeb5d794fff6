use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use domain_compute::repository::KeyValueStore;

/// One file per key in a directory. Other processes may add or remove entries
/// at any time, so a vanished file is never an error.
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(&['/', '\\'][..]) {
            anyhow::bail!("Invalid key: {key:?}");
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Unable to create {}", self.dir.display()))?;
        // Readers never see a half written value.
        let staging = self.dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&staging, value).await?;
        tokio::fs::rename(&staging, &path)
            .await
            .with_context(|| format!("Unable to write {}", path.display()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match tokio::fs::read_to_string(self.path(key)?).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.path(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn purge_older_than(&self, max_age: Duration) -> anyhow::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let stale = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= max_age);
            if !metadata.is_file() || !stale {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}
