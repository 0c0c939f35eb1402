//! Schema migration for data at rest.
//!
//! Two converter families run over raw JSON values before anything is
//! deserialized into the typed model:
//!
//! - version-to-version converters ([`v3`]) reshape older document
//!   layouts into the current one. Message-shape detection is structural
//!   (presence of a `fragments` array), never a per-message version tag,
//!   because one imported payload may legitimately mix shapes.
//! - the normalization pass ([`normalize`]) runs on every load and every
//!   import, also over payloads that already look current, to coalesce
//!   foreign or reconstructed objects into canonical shape.
//!
//! Every converter is idempotent, and recovery is by substitution: a
//! sub-shape that cannot be mapped becomes a clearly-marked error
//! fragment instead of failing the surrounding conversation.

pub mod normalize;
pub mod v3;

use std::collections::HashSet;
use std::sync::Arc;

use colloquy_protocol::Conversation;
use colloquy_protocol::ConversationId;
use colloquy_protocol::Fragment;
use colloquy_protocol::LiveFileId;
use colloquy_protocol::Message;
use colloquy_protocol::MessageId;
use colloquy_protocol::Part;
use colloquy_protocol::Role;
use colloquy_protocol::now_ms;
use serde_json::Value;
use tracing::warn;

/// Current persisted document schema version.
pub const DOCUMENT_VERSION: u32 = 4;

pub use v3::is_current_shape;

/// Upgrade and clean one raw conversation value in place: legacy messages
/// gain fragment lists, fragment discriminators are renamed and validated.
pub fn migrate_conversation_value(conversation: &mut Value) {
    if let Some(messages) = conversation
        .get_mut("messages")
        .and_then(Value::as_array_mut)
    {
        for message in messages.iter_mut() {
            if !is_current_shape(message) {
                v3::upgrade_message_value(message);
            }
        }
    }
    normalize::normalize_conversation_value(conversation);
}

/// Rebuild a typed conversation from an externally-supplied value.
///
/// This is the import boundary: migration and normalization are mandatory
/// here even for payloads that already look current. Returns `None` only
/// when the value is not recognizably a conversation at all.
pub fn recreate_conversation(
    value: &Value,
    live_files: &HashSet<LiveFileId>,
) -> Option<Conversation> {
    if !value.is_object() {
        warn!("refusing to recreate a conversation from a non-object value");
        return None;
    }
    let mut raw = value.clone();
    migrate_conversation_value(&mut raw);

    let conversation = match serde_json::from_value::<Conversation>(raw.clone()) {
        Ok(c) => c,
        Err(e) => {
            warn!("conversation did not deserialize cleanly, salvaging: {e}");
            salvage_conversation(&raw)?
        }
    };
    Some(normalize::normalize_conversation(conversation, live_files))
}

/// Field-by-field reconstruction for values the typed parse rejects.
/// Messages keep as much as can be identified; fragments that cannot be
/// mapped are substituted with error fragments.
fn salvage_conversation(raw: &Value) -> Option<Conversation> {
    let obj = raw.as_object()?;
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| ConversationId::from_string(s).ok())
        .unwrap_or_default();
    let persona_id = obj
        .get("persona_id")
        .and_then(Value::as_str)
        .unwrap_or(colloquy_protocol::conversation::DEFAULT_PERSONA_ID)
        .to_string();
    let created = obj.get("created").and_then(Value::as_i64).unwrap_or_else(now_ms);
    let updated = obj.get("updated").and_then(Value::as_i64).unwrap_or(created);

    let mut conversation = Conversation::new(persona_id, false);
    conversation.id = id;
    conversation.created = created;
    conversation.updated = updated;
    conversation.user_title = obj
        .get("user_title")
        .and_then(Value::as_str)
        .map(str::to_string);
    conversation.auto_title = obj
        .get("auto_title")
        .and_then(Value::as_str)
        .map(str::to_string);

    let raw_messages = obj.get("messages").and_then(Value::as_array);
    for raw_message in raw_messages.into_iter().flatten() {
        match serde_json::from_value::<Message>(raw_message.clone()) {
            Ok(message) => conversation.messages.push(Arc::new(message)),
            Err(e) => {
                if let Some(message) = salvage_message(raw_message) {
                    warn!("salvaged message {} after parse error: {e}", message.id);
                    conversation.messages.push(Arc::new(message));
                } else {
                    warn!("dropping unidentifiable message: {e}");
                }
            }
        }
    }
    Some(conversation)
}

fn salvage_message(raw: &Value) -> Option<Message> {
    let obj = raw.as_object()?;
    let role = obj
        .get("role")
        .cloned()
        .and_then(|r| serde_json::from_value::<Role>(r).ok())
        .unwrap_or(Role::User);

    let mut fragments = Vec::new();
    for raw_fragment in obj
        .get("fragments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match serde_json::from_value::<Fragment>(raw_fragment.clone()) {
            Ok(fragment) => fragments.push(fragment),
            Err(e) => {
                fragments.push(Fragment::content(Part::error(format!(
                    "unrecoverable content ({e})"
                ))));
            }
        }
    }

    let mut message = Message::new(role, fragments);
    if let Some(id) = obj
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| MessageId::from_string(s).ok())
    {
        message.id = id;
    }
    if let Some(created) = obj.get("created").and_then(Value::as_i64) {
        message.created = created;
        message.updated = obj.get("updated").and_then(Value::as_i64).unwrap_or(created);
    }
    Some(message)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn migration_is_idempotent_on_legacy_messages() {
        let legacy = json!({
            "id": ConversationId::new().to_string(),
            "persona_id": "default",
            "created": 1_700_000_000_000i64,
            "updated": 1_700_000_000_000i64,
            "messages": [
                {"id": MessageId::new().to_string(), "role": "user", "text": "original words", "created": 1_700_000_000_000i64}
            ]
        });

        let mut once = legacy.clone();
        migrate_conversation_value(&mut once);
        let mut twice = once.clone();
        migrate_conversation_value(&mut twice);
        assert_eq!(once, twice);

        // The recovered text is exactly the original flat text.
        let conversation = recreate_conversation(&legacy, &HashSet::new()).unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].text(), "original words");
    }

    #[test]
    fn recreate_tolerates_mixed_shape_messages() {
        let payload = json!({
            "id": ConversationId::new().to_string(),
            "persona_id": "default",
            "created": 1i64,
            "updated": 2i64,
            "messages": [
                {"id": MessageId::new().to_string(), "role": "user", "text": "old shape", "created": 1i64},
                serde_json::to_value(Message::from_text(Role::Assistant, "new shape")).unwrap(),
            ]
        });
        let conversation = recreate_conversation(&payload, &HashSet::new()).unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].text(), "old shape");
        assert_eq!(conversation.messages[1].text(), "new shape");
    }

    #[test]
    fn unmappable_fragment_becomes_error_fragment() {
        let payload = json!({
            "id": ConversationId::new().to_string(),
            "persona_id": "default",
            "created": 1i64,
            "updated": 1i64,
            "messages": [{
                "id": MessageId::new().to_string(),
                "role": "assistant",
                // `created` is a string, so the typed Message parse fails
                // and salvage kicks in.
                "created": "not-a-number",
                "fragments": [
                    {"kind": "content", "fragment_id": "aaaaaaaa", "part": {"type": "text", "text": "kept"}},
                    // fragment_id has the wrong type, so the fragment
                    // itself cannot be mapped.
                    {"kind": "content", "fragment_id": 99, "part": {"type": "text", "text": "lost"}},
                ]
            }]
        });
        let conversation = recreate_conversation(&payload, &HashSet::new()).unwrap();
        assert_eq!(conversation.messages.len(), 1);
        let fragments = &conversation.messages[0].fragments;
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].part, Part::text("kept"));
        assert!(matches!(&fragments[1].part, Part::Error { .. }));
    }

    #[test]
    fn recreate_rejects_non_objects() {
        assert!(recreate_conversation(&json!("nope"), &HashSet::new()).is_none());
    }
}
