//! The portable "data at rest" record.
//!
//! This is the boundary shape consumed by link sharing and file
//! import/export. Its `messages` are raw JSON values because one exported
//! payload may legitimately mix the legacy flat-text message shape with
//! the current fragment-list shape; importers normalize each message
//! individually (see `colloquy_core::migration`).

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::conversation::Conversation;
use crate::ids::ConversationId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub messages: Vec<Value>,
    pub persona_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_title: Option<String>,
    pub created: i64,
    pub updated: i64,
}

impl ConversationRecord {
    /// Export a conversation in the portable shape. Vendor state rides
    /// along verbatim; the transient abort handle never appears here.
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let messages = conversation
            .messages
            .iter()
            .filter_map(|m| match serde_json::to_value(&**m) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("skipping unserializable message {}: {e}", m.id);
                    None
                }
            })
            .collect();
        Self {
            id: conversation.id,
            messages,
            persona_id: conversation.persona_id.clone(),
            user_title: conversation.user_title.clone(),
            auto_title: conversation.auto_title.clone(),
            created: conversation.created,
            updated: conversation.updated,
        }
    }
}
