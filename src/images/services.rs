use std::collections::HashSet;

use anyhow::Context;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::inference::client::sniff_mime;
use crate::storage::{image_key, StorageClient};

/// Stores one capture's image and returns the id all of its records share.
/// A failing store is logged and the capture continues without an image.
pub async fn upload_capture_image(storage: &dyn StorageClient, body: Bytes) -> Option<Uuid> {
    if body.is_empty() {
        return None;
    }
    let id = Uuid::new_v4();
    let key = image_key(id);
    let content_type = sniff_mime(&body);
    match storage.put_object(&key, body, content_type).await {
        Ok(()) => {
            debug!(image_id = %id, %key, "capture image stored");
            Some(id)
        }
        Err(e) => {
            warn!(error = %e, %key, "failed to store capture image; continuing without it");
            None
        }
    }
}

/// Deletes every candidate image that nothing in `referenced` still points to.
/// Returns how many were deleted.
pub async fn delete_orphaned_images(
    storage: &dyn StorageClient,
    candidates: impl IntoIterator<Item = Uuid>,
    referenced: &HashSet<Uuid>,
) -> usize {
    let orphans: HashSet<Uuid> = candidates
        .into_iter()
        .filter(|id| !referenced.contains(id))
        .collect();
    let mut deleted = 0;
    for id in orphans {
        let key = image_key(id);
        match storage.delete_object(&key).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(error = %e, %key, "failed to delete orphaned image"),
        }
    }
    deleted
}

pub async fn presign_image(storage: &dyn StorageClient, image_id: Uuid) -> anyhow::Result<String> {
    const TTL_SECS: u64 = 30 * 60;
    let key = image_key(image_id);
    storage
        .presign_get(&key, TTL_SECS)
        .await
        .with_context(|| format!("presign url for {}", key))
}
