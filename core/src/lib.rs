//! Root of the `colloquy-core` library: the conversation data layer.
//!
//! The store owns every conversation in memory and is the only mutation
//! surface; persistence, migration, blob collection, and token pricing
//! hang off it as collaborators.

// Prevent accidental direct writes to stdout/stderr in library code. All
// diagnostics go through the tracing stack.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod blob_gc;
pub mod config;
pub mod error;
pub mod migration;
pub mod model_registry;
pub mod persistence;
pub mod store;
pub mod token_estimator;

pub use blob_gc::BlobGarbageCollector;
pub use blob_gc::BlobStore;
pub use config::Config;
pub use error::BlobStoreError;
pub use error::PersistenceError;
pub use model_registry::ModelProfile;
pub use store::ChatStore;
pub use token_estimator::TokenEstimator;
