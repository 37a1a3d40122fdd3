use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::store::SnapshotStore;
use super::WidgetSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("widget snapshot read back differently after retry")]
    Mismatch,
    #[error("widget store: {0:#}")]
    Store(anyhow::Error),
    #[error("widget publisher stopped")]
    Closed,
}

/// Hands snapshots to a background writer that coalesces bursts.
#[derive(Clone)]
pub struct WidgetPublisher {
    tx: Arc<watch::Sender<Option<WidgetSnapshot>>>,
}

impl WidgetPublisher {
    /// Starts the writer. Snapshots published within `debounce` of the first
    /// unwritten one collapse into a single write of the newest value.
    pub fn spawn(store: Arc<dyn SnapshotStore>, debounce: Duration) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = watch::channel::<Option<WidgetSnapshot>>(None);
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                tokio::time::sleep(debounce).await;
                let latest = *rx.borrow_and_update();
                let Some(snapshot) = latest else { continue };
                match write_verified(store.as_ref(), &snapshot).await {
                    Ok(()) => debug!(
                        calories = snapshot.today_calories,
                        items = snapshot.today_item_count,
                        "widget snapshot published"
                    ),
                    Err(e) => warn!(error = %e, "widget snapshot publish failed"),
                }
            }
            debug!("widget publisher stopped");
        });
        (Self { tx: Arc::new(tx) }, handle)
    }

    pub fn publish(&self, snapshot: WidgetSnapshot) -> Result<(), PublishError> {
        self.tx
            .send(Some(snapshot))
            .map_err(|_| PublishError::Closed)
    }
}

/// Write, read back, compare; one retry on mismatch. Writes are whole
/// snapshots so replaying them is harmless.
pub async fn write_verified(
    store: &dyn SnapshotStore,
    snapshot: &WidgetSnapshot,
) -> Result<(), PublishError> {
    for attempt in 1..=2 {
        store.write(snapshot).await.map_err(PublishError::Store)?;
        match store.read().await.map_err(PublishError::Store)? {
            Some(back) if back == *snapshot => return Ok(()),
            back => warn!(attempt, ?back, "widget snapshot read-back mismatch"),
        }
    }
    Err(PublishError::Mismatch)
}
