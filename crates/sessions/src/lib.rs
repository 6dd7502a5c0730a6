//! Conversation sessions.
//!
//! A session tracks the images a conversation has sent since its current
//! batch started and whether the conversation is being asked for a file name.
//! Sessions live in memory for the lifetime of the process.

pub mod session;
pub mod store;

pub use {
    session::{Batch, Phase, Session},
    store::{SessionHandle, SessionStore},
};
