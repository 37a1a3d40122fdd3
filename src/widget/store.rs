use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

use super::WidgetSnapshot;

/// Cross-process key/value store the widget reads from.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn write(&self, snapshot: &WidgetSnapshot) -> anyhow::Result<()>;
    async fn read(&self) -> anyhow::Result<Option<WidgetSnapshot>>;
}

/// Flat JSON object on disk, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write(&self, snapshot: &WidgetSnapshot) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        // keep keys other writers may have added
        let mut map = read_map(&self.path).await?.unwrap_or_default();
        map.extend(snapshot.to_map());
        let body = serde_json::to_vec_pretty(&map).context("encode widget snapshot")?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename into {}", self.path.display()))?;
        Ok(())
    }

    async fn read(&self) -> anyhow::Result<Option<WidgetSnapshot>> {
        Ok(read_map(&self.path)
            .await?
            .and_then(|m| WidgetSnapshot::from_map(&m)))
    }
}

async fn read_map(path: &PathBuf) -> anyhow::Result<Option<BTreeMap<String, Value>>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    match serde_json::from_slice(&bytes) {
        Ok(m) => Ok(Some(m)),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "widget snapshot unreadable; overwriting");
            Ok(None)
        }
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory store that can be told to corrupt the next N writes.
    #[derive(Default)]
    pub struct MemorySnapshotStore {
        pub value: Mutex<Option<WidgetSnapshot>>,
        pub writes: AtomicUsize,
        pub corrupt_writes: AtomicUsize,
    }

    impl MemorySnapshotStore {
        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        pub fn current(&self) -> Option<WidgetSnapshot> {
            *self.value.lock().unwrap()
        }
    }

    #[async_trait]
    impl SnapshotStore for MemorySnapshotStore {
        async fn write(&self, snapshot: &WidgetSnapshot) -> anyhow::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut stored = *snapshot;
            let pending = self.corrupt_writes.load(Ordering::SeqCst);
            if pending > 0 {
                self.corrupt_writes.store(pending - 1, Ordering::SeqCst);
                stored.today_calories += 1.0;
            }
            *self.value.lock().unwrap() = Some(stored);
            Ok(())
        }

        async fn read(&self) -> anyhow::Result<Option<WidgetSnapshot>> {
            Ok(self.current())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meals::model::Nutrients;
    use crate::widget::Goals;

    #[tokio::test]
    async fn file_store_round_trip_keeps_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared").join("widget.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, br#"{"theme":"dark"}"#).await.unwrap();

        let store = FileSnapshotStore::new(&path);
        let snap = WidgetSnapshot::new(
            &Nutrients {
                calories: 500.0,
                ..Default::default()
            },
            2,
            Goals::default(),
        );
        store.write(&snap).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(snap));

        let raw: BTreeMap<String, Value> =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(raw["theme"], Value::from("dark"));
    }

    #[tokio::test]
    async fn missing_or_corrupt_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widget.json");
        let store = FileSnapshotStore::new(&path);
        assert_eq!(store.read().await.unwrap(), None);
        tokio::fs::write(&path, b"{oops").await.unwrap();
        assert_eq!(store.read().await.unwrap(), None);
    }
}
