#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use colloquy_core::ChatStore;
use colloquy_core::TokenEstimator;
use colloquy_core::blob_gc::BlobGarbageCollector;
use colloquy_core::blob_gc::BlobItem;
use colloquy_core::blob_gc::BlobStore;
use colloquy_core::blob_gc::InMemoryBlobStore;
use colloquy_core::config::Config;
use colloquy_core::model_registry::fallback_model_profile;
use colloquy_core::persistence;
use colloquy_protocol::Fragment;
use colloquy_protocol::Message;
use colloquy_protocol::Part;
use colloquy_protocol::Role;
use colloquy_protocol::parts::DataRef;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn test_store() -> ChatStore {
    ChatStore::new(TokenEstimator::new(fallback_model_profile("test-model")))
}

/// New conversation -> one user message -> delete-last semantics, end to
/// end through the public surface.
#[test]
fn single_conversation_lifecycle() {
    let mut store = test_store();
    assert_eq!(store.len(), 1);
    let id = store.conversations()[0].id;

    store.append_message(&id, Message::from_text(Role::User, "Hi"));
    let conversation = store.conversation(&id).unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert!(conversation.token_count > 0);

    let next = store.delete_conversations(&[id], None);
    assert_eq!(store.len(), 1);
    let survivor = store.conversation(&next).unwrap();
    assert_ne!(survivor.id, id);
    assert!(survivor.messages.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn mutations_reach_disk_and_rehydrate() {
    let dir = TempDir::new().unwrap();
    let config = Config::with_home(dir.path());

    let mut store = test_store();
    let _persister = persistence::spawn_persister(config.clone(), store.subscribe());

    let id = store.conversations()[0].id;
    store.set_user_title(&id, Some("kept title".to_string()));
    store.append_message(&id, Message::from_text(Role::User, "write me down"));
    let token = store.set_abort_handle(&id).unwrap();

    // The persister is asynchronous; wait until the mutated state, not
    // just some earlier snapshot, has reached disk.
    let mut loaded = Vec::new();
    for _ in 0..200 {
        loaded = persistence::load_conversations(&config, &HashSet::new())
            .await
            .unwrap();
        if loaded.iter().any(|c| !c.messages.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(
        loaded.iter().any(|c| !c.messages.is_empty()),
        "persister never wrote the mutated document"
    );
    drop(token);
    let rehydrated =
        ChatStore::from_conversations(loaded, TokenEstimator::new(fallback_model_profile("t")));
    let conversation = rehydrated
        .conversations()
        .iter()
        .find(|c| c.id == id)
        .expect("conversation survived the round trip");
    assert_eq!(conversation.title(), Some("kept title"));
    assert_eq!(conversation.messages[0].text(), "write me down");
    // The abort handle is transient and must be gone after load.
    assert!(conversation.abort_handle.is_none());
    assert!(conversation.token_count > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn destructive_operations_trigger_blob_collection() {
    let blob_store = Arc::new(InMemoryBlobStore::new());
    let kept = blob_store
        .put(BlobItem {
            mime_type: "image/png".to_string(),
            bytes: bytes::Bytes::from_static(b"kept"),
        })
        .await
        .unwrap();
    let doomed = blob_store
        .put(BlobItem {
            mime_type: "image/png".to_string(),
            bytes: bytes::Bytes::from_static(b"doomed"),
        })
        .await
        .unwrap();

    let mut store = test_store();
    let gc = BlobGarbageCollector::new(blob_store.clone());
    store.attach_blob_gc(gc.clone());
    let id = store.conversations()[0].id;

    let image = |blob_id: &colloquy_protocol::BlobId| {
        Fragment::content(Part::image_ref(
            DataRef::Blob {
                blob_id: blob_id.clone(),
                mime_type: "image/png".to_string(),
                byte_count: None,
            },
            None,
            Some(32),
            Some(32),
        ))
    };
    store.append_message(&id, Message::new(Role::User, vec![image(&kept)]));
    let doomed_message = Message::new(Role::User, vec![image(&doomed)]);
    let doomed_message_id = doomed_message.id;
    store.append_message(&id, doomed_message);

    store.delete_message(&id, &doomed_message_id);

    // Collection is fire-and-forget and single-flight, so a triggered
    // pass may be skipped while another is still running. Keep nudging
    // until the store converges.
    for _ in 0..100 {
        if blob_store.list_ids().await.unwrap().len() == 1 {
            break;
        }
        gc.collect_unreferenced(store.conversations()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(blob_store.list_ids().await.unwrap(), vec![kept]);
}
