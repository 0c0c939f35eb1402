//! Messages: ordered fragment lists plus role and per-message metadata.

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::fragment::Fragment;
use crate::ids::FragmentId;
use crate::ids::MessageId;
use crate::now_ms;
use crate::parts::Part;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Who or what produced a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageGenerator {
    /// A named origin, e.g. a persona or "web".
    Named { name: String },
    /// A concrete model run.
    Model {
        model_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        vendor_id: Option<String>,
    },
}

/// Per-message token split reported by the vendor, when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// User-toggled marks on a message.
///
/// `NotifyComplete` is internal plumbing for the "ping me when this
/// generation finishes" affordance and is stripped during normalization:
/// it must never survive a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFlag {
    Starred,
    NotifyComplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub fragments: Vec<Fragment>,
    /// Set while a generation is still streaming into this message. While
    /// true, `token_count` is stale and the message is excluded from cost
    /// accounting.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_incomplete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<MessageGenerator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_flags: Vec<UserFlag>,
    /// Cached estimate, recomputed by the store whenever `fragments`
    /// change and the message is not pending.
    #[serde(default)]
    pub token_count: u64,
    pub created: i64,
    pub updated: i64,
}

impl Message {
    pub fn new(role: Role, fragments: Vec<Fragment>) -> Self {
        let now = now_ms();
        Self {
            id: MessageId::new(),
            role,
            fragments,
            pending_incomplete: false,
            avatar: None,
            generator: None,
            purpose_id: None,
            metadata: None,
            user_flags: Vec::new(),
            token_count: 0,
            created: now,
            updated: now,
        }
    }

    /// A message holding a single text content fragment.
    pub fn from_text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Fragment::content(Part::text(text))])
    }

    pub fn fragment(&self, id: &FragmentId) -> Option<&Fragment> {
        self.fragments.iter().find(|f| &f.fragment_id == id)
    }

    /// Concatenated text of all content text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            if !fragment.is_content() {
                continue;
            }
            if let Part::Text { text } = &fragment.part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Text of the first content text fragment, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.fragments.iter().find_map(|f| match (&f.kind, &f.part) {
            (crate::fragment::FragmentKind::Content, Part::Text { text }) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn has_flag(&self, flag: UserFlag) -> bool {
        self.user_flags.contains(&flag)
    }

    pub fn set_flag(&mut self, flag: UserFlag, on: bool) {
        let has = self.has_flag(flag);
        if on && !has {
            self.user_flags.push(flag);
        } else if !on && has {
            self.user_flags.retain(|f| *f != flag);
        }
    }

    /// Deep copy with fresh message and fragment ids. Fragment origin ids
    /// and vendor state are carried over, as for single-fragment
    /// duplication.
    pub fn duplicate(&self) -> Message {
        Message {
            id: MessageId::new(),
            fragments: self.fragments.iter().map(Fragment::duplicate).collect(),
            ..self.clone()
        }
    }
}
