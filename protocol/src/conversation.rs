//! Conversations: ordered message lists plus titles and transient state.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::ids::ConversationId;
use crate::ids::MessageId;
use crate::message::Message;
use crate::now_ms;

/// Persona used when the caller does not name one.
pub const DEFAULT_PERSONA_ID: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Strictly ordered by conversation turn, not by timestamp. Held as
    /// `Arc`s so store mutations can share unchanged messages between the
    /// old and new conversation values.
    pub messages: Vec<Arc<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_title: Option<String>,
    pub persona_id: String,
    /// Incognito conversations live in memory only; the persistence
    /// subscriber filters them out of every snapshot.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_incognito: bool,
    pub created: i64,
    pub updated: i64,
    /// Aggregate of the non-pending messages' token caches.
    #[serde(default)]
    pub token_count: u64,
    /// Cancels the in-flight generation, if any. Never persisted: always
    /// `None` immediately after load.
    #[serde(skip)]
    pub abort_handle: Option<CancellationToken>,
}

impl Conversation {
    pub fn new(persona_id: impl Into<String>, is_incognito: bool) -> Self {
        let now = now_ms();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            user_title: None,
            auto_title: None,
            persona_id: persona_id.into(),
            is_incognito,
            created: now,
            updated: now,
            token_count: 0,
            abort_handle: None,
        }
    }

    /// `user_title` if set, else `auto_title`.
    pub fn title(&self) -> Option<&str> {
        self.user_title.as_deref().or(self.auto_title.as_deref())
    }

    pub fn effective_title<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.title().unwrap_or(fallback)
    }

    /// An explicit rename invalidates any auto-generated title, so
    /// clearing the user title clears the auto title with it.
    pub fn set_user_title(&mut self, title: Option<String>) {
        match title {
            Some(t) => self.user_title = Some(t),
            None => {
                self.user_title = None;
                self.auto_title = None;
            }
        }
    }

    pub fn message_index(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Nothing worth persisting: no messages and no explicit title.
    pub fn is_blank(&self) -> bool {
        self.messages.is_empty() && self.user_title.is_none()
    }

    /// Cancel and drop the in-flight generation handle, if any.
    pub fn abort_pending(&mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.cancel();
        }
    }

    /// Deep copy of this conversation's messages up to and including
    /// `cutoff` (all messages when `cutoff` is `None`), under a fresh
    /// conversation id. Titles are carried verbatim; the caller decides how
    /// to disambiguate them.
    pub fn branched(&self, cutoff: Option<&MessageId>) -> Conversation {
        let keep = match cutoff.and_then(|id| self.message_index(id)) {
            Some(idx) => idx + 1,
            None => self.messages.len(),
        };
        let now = now_ms();
        Conversation {
            id: ConversationId::new(),
            messages: self.messages[..keep]
                .iter()
                .map(|m| Arc::new(m.duplicate()))
                .collect(),
            user_title: self.user_title.clone(),
            auto_title: self.auto_title.clone(),
            persona_id: self.persona_id.clone(),
            is_incognito: self.is_incognito,
            created: now,
            updated: now,
            token_count: self.token_count,
            abort_handle: None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::Role;

    #[test]
    fn clearing_user_title_clears_auto_title() {
        let mut c = Conversation::new(DEFAULT_PERSONA_ID, false);
        c.auto_title = Some("auto".to_string());
        c.set_user_title(Some("mine".to_string()));
        assert_eq!(c.effective_title("-"), "mine");
        c.set_user_title(None);
        assert_eq!(c.title(), None);
        assert_eq!(c.effective_title("-"), "-");
    }

    #[test]
    fn branched_keeps_messages_up_to_cutoff() {
        let mut c = Conversation::new(DEFAULT_PERSONA_ID, false);
        for text in ["one", "two", "three"] {
            c.messages.push(Arc::new(Message::from_text(Role::User, text)));
        }
        let cutoff = c.messages[1].id;
        let branch = c.branched(Some(&cutoff));
        assert_ne!(branch.id, c.id);
        assert_eq!(branch.messages.len(), 2);
        assert_eq!(branch.messages[1].text(), "two");
        // Unknown cutoff keeps everything.
        let all = c.branched(Some(&MessageId::new()));
        assert_eq!(all.messages.len(), 3);
    }

    #[test]
    fn abort_pending_cancels_the_handle() {
        let mut c = Conversation::new(DEFAULT_PERSONA_ID, false);
        let token = CancellationToken::new();
        c.abort_handle = Some(token.clone());
        c.abort_pending();
        assert!(token.is_cancelled());
        assert!(c.abort_handle.is_none());
    }
}
