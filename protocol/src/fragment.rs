//! Fragments: the unit of message content.
//!
//! A fragment wraps exactly one [`Part`] and adds the fragment-kind
//! discriminator, a per-message id, the id of the fragment it was edited
//! or duplicated from, and an opaque vendor-state bag.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::FragmentId;
use crate::ids::LiveFileId;
use crate::parts::Part;

/// The three fragment roles.
///
/// `Content` is what the conversation is about; `Attachment` is supporting
/// material contributed by the user; `Void` is local bookkeeping that is
/// never transmitted to a model and never priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentKind {
    Content,
    Attachment {
        title: String,
        caption: String,
        created: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        live_file_id: Option<LiveFileId>,
    },
    Void,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(flatten)]
    pub kind: FragmentKind,
    pub fragment_id: FragmentId,
    pub part: Part,
    /// Id of the fragment this one was derived from, carried across edits
    /// and duplication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<FragmentId>,
    /// Opaque per-vendor state. Lossy-safe: it must round-trip unchanged
    /// through duplication and export, and everything must keep working if
    /// it is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_state: Option<serde_json::Map<String, Value>>,
}

impl Fragment {
    pub fn content(part: Part) -> Self {
        debug_assert!(
            part.is_content_part(),
            "{} is not a content part",
            part.kind_label()
        );
        Self::with_kind(FragmentKind::Content, part)
    }

    pub fn attachment(
        part: Part,
        title: impl Into<String>,
        caption: impl Into<String>,
        created: i64,
    ) -> Self {
        debug_assert!(
            part.is_attachment_part(),
            "{} is not an attachment part",
            part.kind_label()
        );
        Self::with_kind(
            FragmentKind::Attachment {
                title: title.into(),
                caption: caption.into(),
                created,
                live_file_id: None,
            },
            part,
        )
    }

    pub fn void(part: Part) -> Self {
        debug_assert!(
            part.is_void_part(),
            "{} is not a void part",
            part.kind_label()
        );
        Self::with_kind(FragmentKind::Void, part)
    }

    fn with_kind(kind: FragmentKind, part: Part) -> Self {
        Self {
            kind,
            fragment_id: FragmentId::random(),
            part,
            origin_id: None,
            vendor_state: None,
        }
    }

    /// Whether `part` is drawn from the subset `kind` admits.
    pub fn part_allowed_for_kind(kind: &FragmentKind, part: &Part) -> bool {
        match kind {
            FragmentKind::Content => part.is_content_part(),
            FragmentKind::Attachment { .. } => part.is_attachment_part(),
            FragmentKind::Void => part.is_void_part(),
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self.kind, FragmentKind::Content)
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self.kind, FragmentKind::Attachment { .. })
    }

    /// Void fragments never reach a model and never count toward cost.
    pub fn is_void(&self) -> bool {
        matches!(self.kind, FragmentKind::Void)
    }

    /// Structurally independent copy with a fresh fragment id. `origin_id`
    /// is carried over and `vendor_state` is deep-copied. `Part::Other`
    /// payloads clone structurally, so unfamiliar shapes survive
    /// duplication instead of being dropped.
    pub fn duplicate(&self) -> Fragment {
        Fragment {
            kind: self.kind.clone(),
            fragment_id: FragmentId::random(),
            part: self.part.clone(),
            origin_id: self.origin_id.clone(),
            vendor_state: self.vendor_state.clone(),
        }
    }

    /// Replace the textual payload in place of the old one, keeping the
    /// fragment id and origin. Returns `None` when the wrapped part has no
    /// editable text (the caller should treat that as a no-op).
    pub fn with_edited_text(&self, new_text: &str) -> Option<Fragment> {
        let part = self.part.with_edited_text(new_text)?;
        Some(Fragment {
            kind: self.kind.clone(),
            fragment_id: self.fragment_id.clone(),
            part,
            origin_id: self.origin_id.clone(),
            vendor_state: self.vendor_state.clone(),
        })
    }
}
