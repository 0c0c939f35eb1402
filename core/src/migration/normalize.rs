//! In-memory normalization, run on every load and every import.
//!
//! The value-level pass repairs structure (renamed discriminator keys,
//! fragments with no discriminator at all); the typed pass repairs
//! semantics (stranded placeholders, dangling live-file bindings,
//! notification flags that must not survive a reload). Both are
//! idempotent.

use std::collections::HashSet;
use std::sync::Arc;

use colloquy_protocol::Conversation;
use colloquy_protocol::Fragment;
use colloquy_protocol::FragmentKind;
use colloquy_protocol::LiveFileId;
use colloquy_protocol::Message;
use colloquy_protocol::Part;
use colloquy_protocol::message::UserFlag;
use serde_json::Value;
use tracing::debug;

/// Marker appended to the text of a placeholder that never resolved.
pub const DID_NOT_COMPLETE: &str = "(did not complete)";

/// Discriminator key used by early fragment serializations.
const LEGACY_KIND_KEY: &str = "ft";

/// Structural cleanup of one raw conversation value.
pub fn normalize_conversation_value(conversation: &mut Value) {
    let Some(messages) = conversation
        .get_mut("messages")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for message in messages.iter_mut() {
        let Some(fragments) = message.get_mut("fragments").and_then(Value::as_array_mut) else {
            continue;
        };
        for fragment in fragments.iter_mut() {
            rename_legacy_kind_key(fragment);
        }
        let before = fragments.len();
        fragments.retain(|f| f.get("kind").is_some_and(Value::is_string));
        if fragments.len() < before {
            debug!(
                "dropped {} fragment(s) with no discriminator",
                before - fragments.len()
            );
        }
    }
}

fn rename_legacy_kind_key(fragment: &mut Value) {
    let Some(obj) = fragment.as_object_mut() else {
        return;
    };
    if obj.contains_key("kind") {
        return;
    }
    if let Some(kind) = obj.remove(LEGACY_KIND_KEY) {
        obj.insert("kind".to_string(), kind);
    }
}

/// Semantic cleanup of a typed conversation.
///
/// `live_files` is the set of live-file bindings the caller can still
/// resolve; bindings outside it are released. Callers without a live-file
/// service pass the empty set.
pub fn normalize_conversation(
    mut conversation: Conversation,
    live_files: &HashSet<LiveFileId>,
) -> Conversation {
    // Transient state never survives a load.
    conversation.abort_handle = None;

    conversation.messages = conversation
        .messages
        .into_iter()
        .map(|message| {
            if message_needs_cleanup(&message, live_files) {
                Arc::new(clean_message((*message).clone(), live_files))
            } else {
                message
            }
        })
        .collect();
    conversation
}

fn message_needs_cleanup(message: &Message, live_files: &HashSet<LiveFileId>) -> bool {
    message.pending_incomplete
        || message.has_flag(UserFlag::NotifyComplete)
        || message.fragments.iter().any(|f| fragment_needs_cleanup(f, live_files))
}

fn fragment_needs_cleanup(fragment: &Fragment, live_files: &HashSet<LiveFileId>) -> bool {
    if matches!(fragment.part, Part::Placeholder { .. }) {
        return true;
    }
    match &fragment.kind {
        FragmentKind::Attachment {
            live_file_id: Some(id),
            ..
        } => !live_files.contains(id),
        FragmentKind::Attachment { .. } | FragmentKind::Content | FragmentKind::Void => false,
    }
}

fn clean_message(mut message: Message, live_files: &HashSet<LiveFileId>) -> Message {
    // A message still marked pending after a reload was interrupted; its
    // placeholders below become visible errors, so the flag comes off.
    message.pending_incomplete = false;
    message.set_flag(UserFlag::NotifyComplete, false);
    message.fragments = message
        .fragments
        .into_iter()
        .map(|f| clean_fragment(f, live_files))
        .collect();
    message
}

fn clean_fragment(mut fragment: Fragment, live_files: &HashSet<LiveFileId>) -> Fragment {
    if let Part::Placeholder { text, .. } = &fragment.part {
        // A placeholder that survived to a load is an operation that never
        // finished. The user must see why the message looks incomplete.
        // The fragment id and origin are kept: this is a conversion, not a
        // duplication.
        let error = Part::error(format!("{text} {DID_NOT_COMPLETE}"));
        fragment.kind = FragmentKind::Content;
        fragment.part = error;
        return fragment;
    }
    if let FragmentKind::Attachment { live_file_id, .. } = &mut fragment.kind {
        if live_file_id.as_ref().is_some_and(|id| !live_files.contains(id)) {
            debug!("releasing dangling live-file binding on {}", fragment.fragment_id);
            *live_file_id = None;
        }
    }
    fragment
}
