//! Conversation flow: turns a stream of inbound images and text commands into
//! a PDF per batch.
//!
//! [`machine`] holds the synchronous transition rules, [`engine`] performs
//! their effects (fetching, assembling, replying) and [`dispatcher`] feeds
//! the engine from a channel, one worker per conversation.

pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod machine;
pub mod replies;

pub use {
    command::{Command, Keywords, document_file_name, sanitize_file_name},
    dispatcher::Dispatcher,
    engine::Engine,
    error::{Error, Result},
    machine::{AssemblyRequest, StateMachine, Step},
    replies::Replies,
};
