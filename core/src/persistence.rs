//! The versioned local document store.
//!
//! In-memory state is authoritative; this adapter only mirrors it.
//! A persister task subscribes to the store's committed snapshots and
//! serializes a filtered view (no incognito conversations, no blank
//! conversations, no abort handles) with an atomic temp-file + rename, so
//! a crash mid-write can never corrupt the previous document.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use colloquy_protocol::Conversation;
use colloquy_protocol::LiveFileId;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::config::DocumentPersistence;
use crate::error::PersistenceError;
use crate::migration;
use crate::store::StoreSnapshot;

/// Filename of the conversation document inside the colloquy home.
pub const DOCUMENT_FILENAME: &str = "conversations.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatDocument {
    pub version: u32,
    pub conversations: Vec<Conversation>,
}

fn document_path(config: &Config) -> PathBuf {
    config.home.join(DOCUMENT_FILENAME)
}

/// Load and upgrade the persisted document.
///
/// Loading runs, in order: the version-to-version converter when the
/// document predates the current schema, then the normalization pass over
/// every conversation. Individually corrupt conversations are salvaged or
/// skipped, never allowed to take the document down with them. A missing
/// file is an empty store, not an error.
pub async fn load_conversations(
    config: &Config,
    live_files: &HashSet<LiveFileId>,
) -> Result<Vec<Conversation>, PersistenceError> {
    let path = document_path(config);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let raw: Value = serde_json::from_str(&text)?;

    // Documents written before the version envelope existed count as the
    // oldest supported schema.
    let version = raw
        .get("version")
        .and_then(Value::as_u64)
        .map_or(3, |v| v as u32);
    if version > migration::DOCUMENT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(version));
    }
    if version < migration::DOCUMENT_VERSION {
        info!("upgrading conversation document from v{version}");
    }

    let raw_conversations = raw.get("conversations").and_then(Value::as_array);
    let mut conversations = Vec::new();
    for raw_conversation in raw_conversations.into_iter().flatten() {
        match migration::recreate_conversation(raw_conversation, live_files) {
            Some(conversation) => conversations.push(conversation),
            None => warn!("skipping unrecognizable conversation in {path:?}"),
        }
    }
    Ok(conversations)
}

/// The view of a snapshot that goes to disk.
fn filter_snapshot(snapshot: &StoreSnapshot) -> ChatDocument {
    ChatDocument {
        version: migration::DOCUMENT_VERSION,
        conversations: snapshot
            .conversations
            .iter()
            .filter(|c| !c.is_incognito && !c.is_blank())
            .map(|c| (**c).clone())
            .collect(),
    }
}

/// Serialize `document` atomically under the configured home.
pub async fn write_document(
    config: &Config,
    document: &ChatDocument,
) -> Result<(), PersistenceError> {
    tokio::fs::create_dir_all(&config.home).await?;
    let content = serde_json::to_string_pretty(document)?;
    let path = document_path(config);
    let tmp_path = config
        .home
        .join(format!(".{DOCUMENT_FILENAME}.{}.tmp", Uuid::new_v4().simple()));

    let write_result = write_and_rename(&tmp_path, &path, content.as_bytes()).await;
    if write_result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    write_result.map_err(PersistenceError::Io)
}

async fn write_and_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    match tokio::fs::rename(tmp_path, path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            tokio::fs::remove_file(path).await?;
            tokio::fs::rename(tmp_path, path).await
        }
        Err(e) => Err(e),
    }
}

/// Spawn the background subscriber that mirrors committed snapshots to
/// disk. Returns when the store (and with it the watch sender) goes away.
pub fn spawn_persister(
    config: Config,
    mut snapshots: watch::Receiver<StoreSnapshot>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            if config.persistence == DocumentPersistence::None {
                continue;
            }
            let document = filter_snapshot(&snapshots.borrow_and_update());
            if let Err(e) = write_document(&config, &document).await {
                warn!("failed to persist conversation document: {e}");
            }
        }
    })
}
