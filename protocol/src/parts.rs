//! Leaf content payloads.
//!
//! A [`Part`] is a small immutable value with a `type` discriminator on the
//! wire. Parts carry no identity of their own; identity and fragment-level
//! metadata live one level up on [`crate::Fragment`].
//!
//! Unrecognized shapes deserialize into [`Part::Other`], which keeps the
//! raw JSON verbatim. That variant round-trips and clones structurally, so
//! content written by a newer schema is preserved rather than dropped.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::ids::BlobId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text { text: String },

    /// A visible error, e.g. a failed generation or a failed tool call.
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },

    /// Legacy inline image reference. New content uses `Reference`.
    ImageRef {
        data_ref: DataRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        alt_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },

    /// Reference to an asset held outside the conversation record.
    Reference { reference: AssetReference },

    /// An attached document (code, markdown, OCR output, ...).
    Doc {
        mime_kind: DocMimeKind,
        data: DocData,
        /// User-visible reference name, e.g. the original filename.
        doc_ref: String,
        title: String,
        /// Monotonically increasing edit counter, starting at 1.
        version: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<serde_json::Map<String, Value>>,
    },

    /// A tool call issued by the model.
    ToolInvocation {
        id: String,
        invocation: ToolInvocation,
    },

    /// The outcome of a tool call.
    ToolResponse {
        id: String,
        error: bool,
        response: ToolResponse,
        environment: ToolEnvironment,
    },

    /// Citations attached to the surrounding message. Void-only.
    Annotations { citations: Vec<Citation> },

    /// Model-auxiliary content such as a reasoning trace. Void-only.
    ModelAux {
        aux_kind: ModelAuxKind,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        redacted_data: Option<Vec<String>>,
    },

    /// Stand-in for content still being produced. Void-only, and never
    /// expected to survive a reload: normalization converts leftovers into
    /// visible `Error` parts.
    Placeholder {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        placeholder_kind: Option<PlaceholderKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model_op: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_control: Option<bool>,
    },

    /// Forward-compatibility: any shape this schema does not know yet.
    #[serde(untagged)]
    Other(Value),
}

/// Where the bytes of an image-like part live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataRef {
    Blob {
        blob_id: BlobId,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        byte_count: Option<u64>,
    },
    Url { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReference {
    pub asset_id: Uuid,
    pub media_kind: AssetMediaKind,
    /// Inline fallback for readers that cannot resolve the asset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_image: Option<DataRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetMediaKind {
    Image,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocMimeKind {
    Code,
    Markdown,
    Html,
    PlainText,
    OcrText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocData {
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolInvocation {
    FunctionCall {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<String>,
    },
    CodeExecution { language: String, code: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResponse {
    FunctionCall { name: String, result: String },
    CodeExecution { result: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEnvironment {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    /// Half-open char ranges into the message text this citation covers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelAuxKind {
    Reasoning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    Stream,
    FollowUp,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Part::Error {
            error: error.into(),
            hint: None,
        }
    }

    pub fn image_ref(
        data_ref: DataRef,
        alt_text: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Self {
        Part::ImageRef {
            data_ref,
            alt_text,
            width,
            height,
        }
    }

    pub fn asset_reference(
        asset_id: Uuid,
        media_kind: AssetMediaKind,
        legacy_image: Option<DataRef>,
    ) -> Self {
        Part::Reference {
            reference: AssetReference {
                asset_id,
                media_kind,
                legacy_image,
            },
        }
    }

    pub fn doc(
        mime_kind: DocMimeKind,
        data: DocData,
        doc_ref: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Part::Doc {
            mime_kind,
            data,
            doc_ref: doc_ref.into(),
            title: title.into(),
            version: 1,
            meta: None,
        }
    }

    pub fn tool_invocation(id: impl Into<String>, invocation: ToolInvocation) -> Self {
        Part::ToolInvocation {
            id: id.into(),
            invocation,
        }
    }

    pub fn tool_response(
        id: impl Into<String>,
        error: bool,
        response: ToolResponse,
        environment: ToolEnvironment,
    ) -> Self {
        Part::ToolResponse {
            id: id.into(),
            error,
            response,
            environment,
        }
    }

    pub fn annotations(citations: Vec<Citation>) -> Self {
        Part::Annotations { citations }
    }

    pub fn model_aux(aux_kind: ModelAuxKind, text: impl Into<String>) -> Self {
        Part::ModelAux {
            aux_kind,
            text: text.into(),
            signature: None,
            redacted_data: None,
        }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Part::Placeholder {
            text: text.into(),
            placeholder_kind: None,
            model_op: None,
            retry_control: None,
        }
    }

    /// Short label used in diagnostics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Part::Text { .. } => "text",
            Part::Error { .. } => "error",
            Part::ImageRef { .. } => "image_ref",
            Part::Reference { .. } => "reference",
            Part::Doc { .. } => "doc",
            Part::ToolInvocation { .. } => "tool_invocation",
            Part::ToolResponse { .. } => "tool_response",
            Part::Annotations { .. } => "annotations",
            Part::ModelAux { .. } => "model_aux",
            Part::Placeholder { .. } => "placeholder",
            Part::Other(_) => "other",
        }
    }

    /// Parts a `content` fragment may carry.
    pub fn is_content_part(&self) -> bool {
        match self {
            Part::Text { .. }
            | Part::Reference { .. }
            | Part::ImageRef { .. }
            | Part::ToolInvocation { .. }
            | Part::ToolResponse { .. }
            | Part::Error { .. } => true,
            Part::Doc { .. }
            | Part::Annotations { .. }
            | Part::ModelAux { .. }
            | Part::Placeholder { .. }
            | Part::Other(_) => false,
        }
    }

    /// Parts an `attachment` fragment may carry.
    pub fn is_attachment_part(&self) -> bool {
        match self {
            Part::Doc { .. } | Part::Reference { .. } | Part::ImageRef { .. } => true,
            Part::Text { .. }
            | Part::Error { .. }
            | Part::ToolInvocation { .. }
            | Part::ToolResponse { .. }
            | Part::Annotations { .. }
            | Part::ModelAux { .. }
            | Part::Placeholder { .. }
            | Part::Other(_) => false,
        }
    }

    /// Parts a `void` fragment may carry.
    pub fn is_void_part(&self) -> bool {
        match self {
            Part::Annotations { .. } | Part::ModelAux { .. } | Part::Placeholder { .. } => true,
            Part::Text { .. }
            | Part::Error { .. }
            | Part::ImageRef { .. }
            | Part::Reference { .. }
            | Part::Doc { .. }
            | Part::ToolInvocation { .. }
            | Part::ToolResponse { .. }
            | Part::Other(_) => false,
        }
    }

    /// The textual payload a user-initiated edit would target, if any.
    pub fn editable_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::Doc { data, .. } => Some(&data.text),
            Part::Error { error, .. } => Some(error),
            Part::ImageRef { .. }
            | Part::Reference { .. }
            | Part::ToolInvocation { .. }
            | Part::ToolResponse { .. }
            | Part::Annotations { .. }
            | Part::ModelAux { .. }
            | Part::Placeholder { .. }
            | Part::Other(_) => None,
        }
    }

    /// Returns a copy with the editable text replaced, or `None` when this
    /// part has no editable text. Editing a doc bumps its version.
    pub fn with_edited_text(&self, new_text: &str) -> Option<Part> {
        match self {
            Part::Text { .. } => Some(Part::text(new_text)),
            Part::Error { hint, .. } => Some(Part::Error {
                error: new_text.to_string(),
                hint: hint.clone(),
            }),
            Part::Doc {
                mime_kind,
                data,
                doc_ref,
                title,
                version,
                meta,
            } => Some(Part::Doc {
                mime_kind: *mime_kind,
                data: DocData {
                    mime_type: data.mime_type.clone(),
                    text: new_text.to_string(),
                },
                doc_ref: doc_ref.clone(),
                title: title.clone(),
                version: version.saturating_add(1),
                meta: meta.clone(),
            }),
            Part::ImageRef { .. }
            | Part::Reference { .. }
            | Part::ToolInvocation { .. }
            | Part::ToolResponse { .. }
            | Part::Annotations { .. }
            | Part::ModelAux { .. }
            | Part::Placeholder { .. }
            | Part::Other(_) => None,
        }
    }

    /// The blob referenced by this part, if its bytes live in the blob
    /// store. Used by the garbage collector to build the live set.
    pub fn referenced_blob_id(&self) -> Option<&BlobId> {
        let data_ref = match self {
            Part::ImageRef { data_ref, .. } => Some(data_ref),
            Part::Reference { reference } => reference.legacy_image.as_ref(),
            Part::Text { .. }
            | Part::Error { .. }
            | Part::Doc { .. }
            | Part::ToolInvocation { .. }
            | Part::ToolResponse { .. }
            | Part::Annotations { .. }
            | Part::ModelAux { .. }
            | Part::Placeholder { .. }
            | Part::Other(_) => None,
        };
        match data_ref {
            Some(DataRef::Blob { blob_id, .. }) => Some(blob_id),
            Some(DataRef::Url { .. }) | None => None,
        }
    }
}
