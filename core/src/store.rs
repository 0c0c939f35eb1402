//! The conversation store.
//!
//! Owns every conversation in memory and is the only mutation surface.
//! In-memory state is the source of truth; persistence is purely
//! derivative, driven by the committed-snapshot watch channel
//! (see `persistence`).
//!
//! Mutations are copy-on-write: a changed conversation is rebuilt around
//! `Arc`s and swapped in, while untouched messages keep pointer identity
//! so consumers can detect change cheaply. Any structural mutation that
//! could invalidate a message a generation is writing into cancels that
//! generation's handle first.

use std::collections::HashSet;
use std::sync::Arc;

use colloquy_protocol::Conversation;
use colloquy_protocol::ConversationId;
use colloquy_protocol::ConversationRecord;
use colloquy_protocol::Fragment;
use colloquy_protocol::FragmentId;
use colloquy_protocol::LiveFileId;
use colloquy_protocol::Message;
use colloquy_protocol::MessageId;
use colloquy_protocol::conversation::DEFAULT_PERSONA_ID;
use colloquy_protocol::now_ms;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::warn;

use crate::blob_gc::BlobGarbageCollector;
use crate::migration;
use crate::token_estimator::TokenEstimator;

/// A committed view of the store, shared with subscribers.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub conversations: Vec<Arc<Conversation>>,
}

pub struct ChatStore {
    conversations: Vec<Arc<Conversation>>,
    estimator: TokenEstimator,
    /// Live-file bindings resolvable by this process, used to sanitize
    /// imports.
    live_files: HashSet<LiveFileId>,
    gc: Option<BlobGarbageCollector>,
    committed_tx: watch::Sender<StoreSnapshot>,
}

impl ChatStore {
    /// A store holding one default empty conversation.
    pub fn new(estimator: TokenEstimator) -> Self {
        Self::from_conversations(Vec::new(), estimator)
    }

    /// A store rehydrated from already-normalized conversations. Token
    /// caches are recomputed here because they were priced by whatever
    /// model was active when the document was written.
    pub fn from_conversations(conversations: Vec<Conversation>, estimator: TokenEstimator) -> Self {
        let mut conversations: Vec<Arc<Conversation>> = conversations
            .into_iter()
            .map(|mut conversation| {
                retokenize_all(&mut conversation, &estimator);
                Arc::new(conversation)
            })
            .collect();
        if conversations.is_empty() {
            conversations.push(Arc::new(Conversation::new(DEFAULT_PERSONA_ID, false)));
        }
        let (committed_tx, _) = watch::channel(StoreSnapshot {
            conversations: conversations.clone(),
        });
        Self {
            conversations,
            estimator,
            live_files: HashSet::new(),
            gc: None,
            committed_tx,
        }
    }

    /// Attach the collector invoked after destructive operations. A first
    /// pass runs right away, covering the rehydration path.
    pub fn attach_blob_gc(&mut self, gc: BlobGarbageCollector) {
        self.gc = Some(gc);
        self.trigger_gc();
    }

    pub fn set_live_files(&mut self, live_files: HashSet<LiveFileId>) {
        self.live_files = live_files;
    }

    /// Subscribe to committed snapshots. The current state is observable
    /// immediately; every mutation publishes a new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.committed_tx.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            conversations: self.conversations.clone(),
        }
    }

    pub fn conversations(&self) -> &[Arc<Conversation>] {
        &self.conversations
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Arc<Conversation>> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    // ------------------------------------------------------------------
    // Conversation CRUD
    // ------------------------------------------------------------------

    /// Prepends a fresh empty conversation.
    pub fn create_conversation(
        &mut self,
        persona_id: Option<&str>,
        incognito: bool,
    ) -> ConversationId {
        let conversation =
            Conversation::new(persona_id.unwrap_or(DEFAULT_PERSONA_ID), incognito);
        let id = conversation.id;
        self.conversations.insert(0, Arc::new(conversation));
        self.publish();
        id
    }

    /// Accept an externally-supplied conversation payload.
    ///
    /// The payload is run through migration and normalization even when it
    /// already looks current. On an id collision: with `prevent_id_clash`
    /// the import is reassigned a fresh id; otherwise the existing
    /// conversation is aborted and replaced in place.
    pub fn import_conversation(
        &mut self,
        payload: &Value,
        prevent_id_clash: bool,
    ) -> Option<ConversationId> {
        let mut conversation = migration::recreate_conversation(payload, &self.live_files)?;
        retokenize_all(&mut conversation, &self.estimator);

        let clash = self.conversation(&conversation.id).is_some();
        if clash && prevent_id_clash {
            conversation.id = ConversationId::new();
        }
        let id = conversation.id;
        if let Some(index) = self.index_of(&id) {
            // Overwrite: the predecessor's generation must not keep
            // streaming into a conversation that no longer exists.
            self.abort_at(index);
            self.conversations[index] = Arc::new(conversation);
            self.publish();
            self.trigger_gc();
        } else {
            self.conversations.insert(0, Arc::new(conversation));
            self.publish();
        }
        Some(id)
    }

    /// Duplicate `id` up to and including `cutoff` (all messages when
    /// `None`) under a branch-numbered title. Returns `None` when the
    /// source does not exist.
    pub fn branch_conversation(
        &mut self,
        id: &ConversationId,
        cutoff: Option<&MessageId>,
    ) -> Option<ConversationId> {
        let index = self.index_of(id)?;
        let source = &self.conversations[index];
        let mut branch = source.branched(cutoff);
        if let Some(title) = self.next_branch_title(source) {
            branch.user_title = Some(title);
        }
        branch.token_count = aggregate_tokens(&branch);
        let branch_id = branch.id;
        self.conversations.insert(index + 1, Arc::new(branch));
        self.publish();
        Some(branch_id)
    }

    /// Delete conversations, aborting their in-flight generations. The
    /// store never ends up empty: deleting the last conversation creates
    /// a fresh one. Returns a sensible next-active conversation id (the
    /// same list position, clamped).
    pub fn delete_conversations(
        &mut self,
        ids: &[ConversationId],
        fallback_persona_id: Option<&str>,
    ) -> ConversationId {
        let doomed: HashSet<ConversationId> = ids.iter().copied().collect();
        let first_removed = self
            .conversations
            .iter()
            .position(|c| doomed.contains(&c.id))
            .unwrap_or(0);

        for index in 0..self.conversations.len() {
            if doomed.contains(&self.conversations[index].id) {
                self.abort_at(index);
            }
        }
        self.conversations.retain(|c| !doomed.contains(&c.id));

        if self.conversations.is_empty() {
            let fresh = Conversation::new(
                fallback_persona_id.unwrap_or(DEFAULT_PERSONA_ID),
                false,
            );
            self.conversations.push(Arc::new(fresh));
        }
        let next_active = first_removed.min(self.conversations.len() - 1);
        let next_id = self.conversations[next_active].id;
        self.publish();
        self.trigger_gc();
        next_id
    }

    // ------------------------------------------------------------------
    // Titles
    // ------------------------------------------------------------------

    pub fn set_user_title(&mut self, id: &ConversationId, title: Option<String>) {
        self.mutate(id, false, |conversation| {
            conversation.set_user_title(title);
            true
        });
    }

    pub fn set_auto_title(&mut self, id: &ConversationId, title: String) {
        self.mutate(id, false, |conversation| {
            conversation.auto_title = Some(title);
            true
        });
    }

    // ------------------------------------------------------------------
    // Generation state machine
    // ------------------------------------------------------------------

    /// Enter the `generating` state: any previous generation is aborted
    /// and a fresh cancellation handle is installed and returned.
    pub fn set_abort_handle(&mut self, id: &ConversationId) -> Option<CancellationToken> {
        let Some(index) = self.index_of(id) else {
            warn!("set_abort_handle: unknown conversation {id}");
            return None;
        };
        self.abort_at(index);
        let token = CancellationToken::new();
        let mut conversation = (*self.conversations[index]).clone();
        conversation.abort_handle = Some(token.clone());
        self.conversations[index] = Arc::new(conversation);
        // No publish: the handle is transient and never persisted.
        Some(token)
    }

    /// Back to `idle`, on natural completion, abort, or error. Dropping
    /// the handle does not cancel it; a completed task has nothing left
    /// to cancel, and an explicit abort goes through the token itself.
    pub fn clear_abort_handle(&mut self, id: &ConversationId) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        if self.conversations[index].abort_handle.is_none() {
            return;
        }
        let mut conversation = (*self.conversations[index]).clone();
        conversation.abort_handle = None;
        self.conversations[index] = Arc::new(conversation);
    }

    // ------------------------------------------------------------------
    // History operations
    // ------------------------------------------------------------------

    /// Replace the whole message list.
    pub fn history_replace(&mut self, id: &ConversationId, messages: Vec<Message>) {
        let messages: Vec<Arc<Message>> = messages
            .into_iter()
            .map(|mut message| {
                retokenize_message(&mut message, &self.estimator);
                Arc::new(message)
            })
            .collect();
        let changed = self.mutate(id, true, move |conversation| {
            conversation.messages = messages;
            true
        });
        if changed {
            self.trigger_gc();
        }
    }

    /// Drop every message after `last_kept`.
    pub fn history_truncate_to_included(&mut self, id: &ConversationId, last_kept: &MessageId) {
        let changed = self.mutate(id, true, |conversation| {
            let Some(index) = conversation.message_index(last_kept) else {
                warn!("history_truncate_to_included: message {last_kept} not in {id}");
                return false;
            };
            conversation.messages.truncate(index + 1);
            true
        });
        if changed {
            self.trigger_gc();
        }
    }

    pub fn append_message(&mut self, id: &ConversationId, mut message: Message) {
        retokenize_message(&mut message, &self.estimator);
        self.mutate(id, true, move |conversation| {
            conversation.messages.push(Arc::new(message));
            true
        });
    }

    pub fn delete_message(&mut self, id: &ConversationId, message_id: &MessageId) {
        let changed = self.mutate(id, true, |conversation| {
            let Some(index) = conversation.message_index(message_id) else {
                warn!("delete_message: message {message_id} not in {id}");
                return false;
            };
            conversation.messages.remove(index);
            true
        });
        if changed {
            self.trigger_gc();
        }
    }

    /// Apply `update` to one message, copy-on-write. The message's token
    /// cache and `updated` stamp are refreshed afterwards.
    pub fn edit_message(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        update: impl FnOnce(&mut Message),
    ) {
        let Some(index) = self.index_of(id) else {
            warn!("edit_message: unknown conversation {id}");
            return;
        };
        self.abort_at(index);
        let mut conversation = (*self.conversations[index]).clone();
        let Some(message_index) = conversation.message_index(message_id) else {
            warn!("edit_message: message {message_id} not in {id}");
            return;
        };
        let mut message = (*conversation.messages[message_index]).clone();
        update(&mut message);
        message.updated = now_ms();
        retokenize_message(&mut message, &self.estimator);
        conversation.messages[message_index] = Arc::new(message);
        self.commit_at(index, conversation);
    }

    // ------------------------------------------------------------------
    // Fragment operations
    // ------------------------------------------------------------------
    //
    // These are the operations a streaming generation uses, so unlike the
    // history operations above they do not cancel the in-flight handle.

    pub fn append_message_fragment(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        fragment: Fragment,
    ) {
        self.mutate_message(id, message_id, move |message| {
            message.fragments.push(fragment);
            true
        });
    }

    pub fn delete_message_fragment(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        fragment_id: &FragmentId,
    ) {
        self.mutate_message(id, message_id, |message| {
            let before = message.fragments.len();
            message.fragments.retain(|f| &f.fragment_id != fragment_id);
            if message.fragments.len() == before {
                error!("delete_message_fragment: fragment {fragment_id} not in {message_id}");
                return false;
            }
            true
        });
    }

    /// Swap the fragment with `fragment_id` for `fragment`, in place.
    /// A missing fragment id is developer-visible but caller-invisible:
    /// the operation is a no-op that logs an error.
    pub fn replace_message_fragment(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        fragment_id: &FragmentId,
        fragment: Fragment,
    ) {
        self.mutate_message(id, message_id, move |message| {
            let Some(index) = message
                .fragments
                .iter()
                .position(|f| &f.fragment_id == fragment_id)
            else {
                error!("replace_message_fragment: fragment {fragment_id} not in {message_id}");
                return false;
            };
            message.fragments[index] = fragment;
            true
        });
    }

    // ------------------------------------------------------------------
    // Data at rest
    // ------------------------------------------------------------------

    /// Export one conversation in the portable record shape.
    pub fn format_conversation_to_record(
        &self,
        id: &ConversationId,
    ) -> Option<ConversationRecord> {
        self.conversation(id)
            .map(|c| ConversationRecord::from_conversation(c))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn index_of(&self, id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| &c.id == id)
    }

    /// Cancel the in-flight generation of the conversation at `index`,
    /// dropping the handle.
    fn abort_at(&mut self, index: usize) {
        if self.conversations[index].abort_handle.is_none() {
            return;
        }
        let mut conversation = (*self.conversations[index]).clone();
        conversation.abort_pending();
        self.conversations[index] = Arc::new(conversation);
    }

    /// Copy-on-write mutation of one conversation. With
    /// `cancel_generation`, the in-flight handle is canceled before `f`
    /// runs — strictly before, so a cooperative generation task stops
    /// emitting writes into state that is about to change. When `f`
    /// returns false the conversation is left untouched (and not
    /// re-published).
    fn mutate(
        &mut self,
        id: &ConversationId,
        cancel_generation: bool,
        f: impl FnOnce(&mut Conversation) -> bool,
    ) -> bool {
        let Some(index) = self.index_of(id) else {
            warn!("mutation targets unknown conversation {id}");
            return false;
        };
        if cancel_generation {
            self.abort_at(index);
        }
        let mut conversation = (*self.conversations[index]).clone();
        if !f(&mut conversation) {
            return false;
        }
        self.commit_at(index, conversation);
        true
    }

    /// Copy-on-write mutation of one message inside one conversation,
    /// without touching the generation handle.
    fn mutate_message(
        &mut self,
        id: &ConversationId,
        message_id: &MessageId,
        f: impl FnOnce(&mut Message) -> bool,
    ) -> bool {
        let Some(index) = self.index_of(id) else {
            warn!("mutation targets unknown conversation {id}");
            return false;
        };
        let mut conversation = (*self.conversations[index]).clone();
        let Some(message_index) = conversation.message_index(message_id) else {
            error!("mutation targets unknown message {message_id} in {id}");
            return false;
        };
        let mut message = (*conversation.messages[message_index]).clone();
        if !f(&mut message) {
            return false;
        }
        message.updated = now_ms();
        retokenize_message(&mut message, &self.estimator);
        conversation.messages[message_index] = Arc::new(message);
        self.commit_at(index, conversation);
        true
    }

    /// Stamp, re-aggregate, swap in, and publish a mutated conversation.
    fn commit_at(&mut self, index: usize, mut conversation: Conversation) {
        conversation.token_count = aggregate_tokens(&conversation);
        conversation.updated = now_ms();
        self.conversations[index] = Arc::new(conversation);
        self.publish();
    }

    fn next_branch_title(&self, source: &Conversation) -> Option<String> {
        let title = source.title()?;
        let base = strip_branch_prefix(title);
        let mut max_n = 0u32;
        for conversation in &self.conversations {
            let Some(t) = conversation.title() else {
                continue;
            };
            if let Some((n, rest)) = parse_branch_prefix(t) {
                if rest == base {
                    max_n = max_n.max(n);
                }
            }
        }
        Some(format!("({}) {base}", max_n + 1))
    }

    fn publish(&self) {
        self.committed_tx.send_replace(self.snapshot());
    }

    /// Fire-and-forget blob collection over the current snapshot. Requires
    /// a tokio runtime; without one the pass is skipped silently, which is
    /// fine because the next destructive operation will retry.
    fn trigger_gc(&self) {
        if let Some(gc) = &self.gc {
            gc.spawn_collect(self.conversations.clone());
        }
    }
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStore")
            .field("conversations", &self.conversations.len())
            .field("estimator", &self.estimator)
            .finish_non_exhaustive()
    }
}

/// Recompute a message's token cache unless it is mid-generation, in
/// which case the cache stays stale and unused.
fn retokenize_message(message: &mut Message, estimator: &TokenEstimator) {
    if message.pending_incomplete {
        return;
    }
    message.token_count = estimator.estimate_message(message.role, &message.fragments);
}

fn retokenize_all(conversation: &mut Conversation, estimator: &TokenEstimator) {
    conversation.messages = conversation
        .messages
        .iter()
        .map(|message| {
            if message.pending_incomplete {
                return Arc::clone(message);
            }
            let mut m = (**message).clone();
            retokenize_message(&mut m, estimator);
            Arc::new(m)
        })
        .collect();
    conversation.token_count = aggregate_tokens(conversation);
}

/// Pending messages are excluded from the aggregate until completion.
fn aggregate_tokens(conversation: &Conversation) -> u64 {
    conversation
        .messages
        .iter()
        .filter(|m| !m.pending_incomplete)
        .map(|m| m.token_count)
        .sum()
}

/// `"(2) Foo"` → `"Foo"`; anything else is returned unchanged.
fn strip_branch_prefix(title: &str) -> &str {
    match parse_branch_prefix(title) {
        Some((_, rest)) => rest,
        None => title,
    }
}

fn parse_branch_prefix(title: &str) -> Option<(u32, &str)> {
    let inner = title.strip_prefix('(')?;
    let (digits, rest) = inner.split_once(") ")?;
    let n = digits.parse::<u32>().ok()?;
    Some((n, rest))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use colloquy_protocol::Part;
    use colloquy_protocol::Role;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model_registry::fallback_model_profile;

    fn test_store() -> ChatStore {
        ChatStore::new(TokenEstimator::new(fallback_model_profile("test-model")))
    }

    #[test]
    fn new_store_holds_one_default_conversation() {
        let store = test_store();
        assert_eq!(store.len(), 1);
        assert!(store.conversations()[0].messages.is_empty());
    }

    #[test]
    fn create_prepends() {
        let mut store = test_store();
        let id = store.create_conversation(Some("persona-x"), false);
        assert_eq!(store.len(), 2);
        assert_eq!(store.conversations()[0].id, id);
        assert_eq!(store.conversations()[0].persona_id, "persona-x");
    }

    #[test]
    fn append_message_updates_token_counts() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.append_message(&id, Message::from_text(Role::User, "Hi"));
        let conversation = store.conversation(&id).unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert!(conversation.token_count > 0);
        assert!(conversation.messages[0].token_count > 0);
    }

    #[test]
    fn pending_messages_are_excluded_from_the_aggregate() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.append_message(&id, Message::from_text(Role::User, "question"));
        let settled = store.conversation(&id).unwrap().token_count;

        let mut pending = Message::from_text(Role::Assistant, "partial answer");
        pending.pending_incomplete = true;
        store.append_message(&id, pending);
        assert_eq!(store.conversation(&id).unwrap().token_count, settled);
    }

    #[test]
    fn delete_last_conversation_leaves_a_fresh_empty_one() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.append_message(&id, Message::from_text(Role::User, "Hi"));
        assert!(store.conversation(&id).unwrap().token_count > 0);

        let next = store.delete_conversations(&[id], None);
        assert_eq!(store.len(), 1);
        let survivor = store.conversation(&next).unwrap();
        assert_ne!(survivor.id, id);
        assert!(survivor.messages.is_empty());
    }

    #[test]
    fn delete_returns_the_same_position_clamped() {
        let mut store = test_store();
        let c_oldest = store.conversations()[0].id;
        let c_mid = store.create_conversation(None, false);
        let c_top = store.create_conversation(None, false);
        // Order is [c_top, c_mid, c_oldest]; deleting the middle one makes
        // the conversation now at that position the next active.
        let next = store.delete_conversations(&[c_mid], None);
        assert_eq!(next, c_oldest);
        // Deleting the last element clamps backwards.
        let next = store.delete_conversations(&[c_oldest], None);
        assert_eq!(next, c_top);
    }

    #[test]
    fn branch_numbering_increments() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.set_user_title(&id, Some("Foo".to_string()));
        store.append_message(&id, Message::from_text(Role::User, "hello"));

        let b1 = store.branch_conversation(&id, None).unwrap();
        assert_eq!(store.conversation(&b1).unwrap().title(), Some("(1) Foo"));
        let b2 = store.branch_conversation(&b1, None).unwrap();
        assert_eq!(store.conversation(&b2).unwrap().title(), Some("(2) Foo"));
        // Branch messages are deep copies with fresh ids.
        let source_msg = &store.conversation(&id).unwrap().messages[0];
        let branch_msg = &store.conversation(&b1).unwrap().messages[0];
        assert_ne!(source_msg.id, branch_msg.id);
        assert_eq!(source_msg.text(), branch_msg.text());
    }

    #[test]
    fn branch_of_unknown_conversation_is_none() {
        let mut store = test_store();
        assert!(store
            .branch_conversation(&ConversationId::new(), None)
            .is_none());
    }

    #[test]
    fn truncate_cancels_the_generation_first() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.append_message(&id, Message::from_text(Role::User, "one"));
        store.append_message(&id, Message::from_text(Role::User, "two"));
        let keep = store.conversation(&id).unwrap().messages[0].id;

        let token = store.set_abort_handle(&id).unwrap();
        assert!(!token.is_cancelled());
        store.history_truncate_to_included(&id, &keep);
        assert!(token.is_cancelled());
        let conversation = store.conversation(&id).unwrap();
        assert!(conversation.abort_handle.is_none());
        assert_eq!(conversation.messages.len(), 1);
    }

    #[test]
    fn fragment_streaming_does_not_cancel_the_generation() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        let mut pending = Message::from_text(Role::Assistant, "");
        pending.pending_incomplete = true;
        let message_id = pending.id;
        store.append_message(&id, pending);

        let token = store.set_abort_handle(&id).unwrap();
        store.append_message_fragment(&id, &message_id, Fragment::content(Part::text("delta")));
        assert!(!token.is_cancelled());
        assert_eq!(
            store.conversation(&id).unwrap().messages[0].fragments.len(),
            2
        );
    }

    #[test]
    fn replace_missing_fragment_is_a_noop() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        let message = Message::from_text(Role::User, "hello");
        let message_id = message.id;
        store.append_message(&id, message);
        let before = Arc::clone(&store.conversation(&id).unwrap().messages[0]);

        store.replace_message_fragment(
            &id,
            &message_id,
            &FragmentId::from("missing1"),
            Fragment::content(Part::text("replacement")),
        );
        let after = &store.conversation(&id).unwrap().messages[0];
        assert!(Arc::ptr_eq(&before, after));
    }

    #[test]
    fn edit_message_preserves_unchanged_message_identity() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.append_message(&id, Message::from_text(Role::User, "first"));
        store.append_message(&id, Message::from_text(Role::User, "second"));
        let first = Arc::clone(&store.conversation(&id).unwrap().messages[0]);
        let second_id = store.conversation(&id).unwrap().messages[1].id;

        store.edit_message(&id, &second_id, |message| {
            message.fragments = vec![Fragment::content(Part::text("edited"))];
        });
        let conversation = store.conversation(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &conversation.messages[0]));
        assert_eq!(conversation.messages[1].text(), "edited");
    }

    #[test]
    fn import_with_id_clash_reassigns_when_asked() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.append_message(&id, Message::from_text(Role::User, "mine"));
        let record = store.format_conversation_to_record(&id).unwrap();
        let payload = serde_json::to_value(&record).unwrap();

        let imported = store.import_conversation(&payload, true).unwrap();
        assert_ne!(imported, id);
        assert_eq!(store.len(), 2);
        assert_eq!(store.conversation(&imported).unwrap().messages[0].text(), "mine");
    }

    #[test]
    fn import_with_id_clash_replaces_and_aborts_otherwise() {
        let mut store = test_store();
        let id = store.conversations()[0].id;
        store.append_message(&id, Message::from_text(Role::User, "old"));
        let record = store.format_conversation_to_record(&id).unwrap();
        let payload = serde_json::to_value(&record).unwrap();

        store.append_message(&id, Message::from_text(Role::User, "newer"));
        let token = store.set_abort_handle(&id).unwrap();
        let imported = store.import_conversation(&payload, false).unwrap();
        assert_eq!(imported, id);
        assert!(token.is_cancelled());
        assert_eq!(store.len(), 1);
        assert_eq!(store.conversation(&id).unwrap().messages.len(), 1);
    }

    #[test]
    fn subscriber_sees_committed_mutations() {
        let mut store = test_store();
        let mut rx = store.subscribe();
        let id = store.conversations()[0].id;
        assert!(!rx.has_changed().unwrap());
        store.append_message(&id, Message::from_text(Role::User, "hello"));
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.conversations[0].messages.len(), 1);
    }

    #[test]
    fn branch_prefix_parsing() {
        assert_eq!(strip_branch_prefix("(3) Foo"), "Foo");
        assert_eq!(strip_branch_prefix("Foo"), "Foo");
        assert_eq!(strip_branch_prefix("(x) Foo"), "(x) Foo");
        assert_eq!(parse_branch_prefix("(12) Bar"), Some((12, "Bar")));
        assert_eq!(parse_branch_prefix("Bar"), None);
    }
}
