//! Entity model for the colloquy conversation data layer.
//!
//! A [`Conversation`] is an ordered list of [`Message`]s; a message is an
//! ordered list of [`Fragment`]s; a fragment wraps exactly one [`Part`],
//! the smallest typed content payload. Types in this crate are plain
//! values: all mutation policy (copy-on-write, cancellation ordering,
//! token recomputation) lives in `colloquy-core`.

pub mod conversation;
pub mod fragment;
pub mod ids;
pub mod message;
pub mod parts;
pub mod rest;

pub use conversation::Conversation;
pub use fragment::Fragment;
pub use fragment::FragmentKind;
pub use ids::BlobId;
pub use ids::ConversationId;
pub use ids::FragmentId;
pub use ids::LiveFileId;
pub use ids::MessageId;
pub use message::Message;
pub use message::Role;
pub use parts::DataRef;
pub use parts::Part;
pub use rest::ConversationRecord;

/// Current unix time in milliseconds. All persisted timestamps in this
/// model are unix-epoch milliseconds.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
