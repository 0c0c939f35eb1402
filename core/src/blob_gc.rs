//! Reference-counted cleanup of binary attachments.
//!
//! Blobs live in an external store and are referenced by id from
//! image-like parts. The collector walks every conversation, builds the
//! live set, and deletes whatever the blob store holds beyond it. It is
//! best-effort and opportunistic: triggered after rehydration and after
//! destructive operations, never on a timer, and never blocking the
//! operation that triggered it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use colloquy_protocol::BlobId;
use colloquy_protocol::Conversation;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::BlobStoreError;

/// One stored binary attachment.
#[derive(Debug, Clone)]
pub struct BlobItem {
    pub mime_type: String,
    pub bytes: Bytes,
}

/// The narrow interface the data layer needs from a blob backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, item: BlobItem) -> Result<BlobId, BlobStoreError>;
    async fn get_url_by_id(&self, id: &BlobId) -> Result<Option<String>, BlobStoreError>;
    async fn list_ids(&self) -> Result<Vec<BlobId>, BlobStoreError>;
    async fn delete_many(&self, ids: &[BlobId]) -> Result<(), BlobStoreError>;
}

/// Every blob id referenced from `conversations`. Void fragments do not
/// count: they are bookkeeping, not durable content.
pub fn referenced_blob_ids(conversations: &[Arc<Conversation>]) -> HashSet<BlobId> {
    let mut referenced = HashSet::new();
    for conversation in conversations {
        for message in &conversation.messages {
            for fragment in &message.fragments {
                if fragment.is_void() {
                    continue;
                }
                if let Some(id) = fragment.part.referenced_blob_id() {
                    referenced.insert(id.clone());
                }
            }
        }
    }
    referenced
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    Completed { deleted: usize },
    /// An empty live set is indistinguishable from a truncated read of
    /// conversation state, so the collector refuses to treat it as
    /// "delete everything".
    SkippedEmptyReferenceSet,
    /// Another pass is in flight; only one runs at a time.
    AlreadyRunning,
}

#[derive(Clone)]
pub struct BlobGarbageCollector {
    store: Arc<dyn BlobStore>,
    gate: Arc<Mutex<()>>,
}

impl BlobGarbageCollector {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Delete every stored blob that no conversation references.
    pub async fn collect_unreferenced(
        &self,
        conversations: &[Arc<Conversation>],
    ) -> Result<GcOutcome, BlobStoreError> {
        let Ok(_gate) = self.gate.try_lock() else {
            return Ok(GcOutcome::AlreadyRunning);
        };

        let referenced = referenced_blob_ids(conversations);
        if referenced.is_empty() {
            debug!("no referenced blobs; skipping collection");
            return Ok(GcOutcome::SkippedEmptyReferenceSet);
        }

        let stored = self.store.list_ids().await?;
        let doomed: Vec<BlobId> = stored
            .into_iter()
            .filter(|id| !referenced.contains(id))
            .collect();
        if doomed.is_empty() {
            return Ok(GcOutcome::Completed { deleted: 0 });
        }
        self.store.delete_many(&doomed).await?;
        info!("collected {} unreferenced blob(s)", doomed.len());
        Ok(GcOutcome::Completed {
            deleted: doomed.len(),
        })
    }

    /// Fire-and-forget collection over a snapshot of conversations.
    /// Outside a tokio runtime this is a no-op; the next trigger retries.
    pub fn spawn_collect(&self, conversations: Vec<Arc<Conversation>>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime; deferring blob collection");
            return;
        };
        let collector = self.clone();
        handle.spawn(async move {
            if let Err(e) = collector.collect_unreferenced(&conversations).await {
                warn!("blob collection failed: {e}");
            }
        });
    }
}

impl std::fmt::Debug for BlobGarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobGarbageCollector").finish_non_exhaustive()
    }
}

/// Process-local blob store, the default backend for tests and for
/// clients that have not configured an external one.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<std::collections::HashMap<BlobId, BlobItem>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, item: BlobItem) -> Result<BlobId, BlobStoreError> {
        let id = BlobId::new(uuid::Uuid::new_v4().to_string());
        self.blobs.lock().await.insert(id.clone(), item);
        Ok(id)
    }

    async fn get_url_by_id(&self, id: &BlobId) -> Result<Option<String>, BlobStoreError> {
        Ok(self
            .blobs
            .lock()
            .await
            .get(id)
            .map(|_| format!("blob:mem/{id}")))
    }

    async fn list_ids(&self) -> Result<Vec<BlobId>, BlobStoreError> {
        Ok(self.blobs.lock().await.keys().cloned().collect())
    }

    async fn delete_many(&self, ids: &[BlobId]) -> Result<(), BlobStoreError> {
        let mut blobs = self.blobs.lock().await;
        for id in ids {
            blobs.remove(id);
        }
        Ok(())
    }
}
