//! Shared identifiers and small utilities used across all lembar crates.

pub mod types;

pub use types::{ConversationId, MediaRef, MessageId, RasterFormat, now_ms};
