//! Synchronous session transitions.
//!
//! `Idle → CollectingImages → AwaitingFileName → Idle`. The functions here
//! only mutate the session and describe what should happen next; replies and
//! document assembly are carried out by the engine.

use {
    bytes::Bytes,
    lembar_common::{ConversationId, MessageId},
    lembar_config::BotConfig,
    lembar_sessions::{Phase, Session},
};

use crate::command::{Command, Keywords, document_file_name};

/// Everything needed to build and deliver one document.
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub conversation: ConversationId,
    pub images: Vec<Bytes>,
    /// Final name including extension.
    pub file_name: String,
    /// Message the document reply quotes.
    pub anchor: MessageId,
}

/// Outcome of feeding one event to a session.
#[derive(Debug)]
pub enum Step {
    /// Image appended; `count` is the new batch size.
    Collected { count: usize },
    /// Image rejected because the batch is full.
    BatchFull { limit: usize },
    /// Waiting for the user to name the document.
    AskFileName,
    /// The batch was named and taken out of the session.
    Assemble(AssemblyRequest),
    Greet,
    Ignore,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    keywords: Keywords,
    fallback_prefix: String,
    max_images: Option<usize>,
}

impl StateMachine {
    pub fn new(keywords: Keywords, fallback_prefix: impl Into<String>) -> Self {
        Self {
            keywords,
            fallback_prefix: fallback_prefix.into(),
            max_images: None,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(Keywords::from_config(config), &config.fallback_name_prefix)
            .with_max_images(config.max_images)
    }

    pub fn with_max_images(mut self, max_images: Option<usize>) -> Self {
        self.max_images = max_images.filter(|&n| n > 0);
        self
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    /// An image arrived (its bytes are already fetched).
    pub fn on_image(&self, session: &mut Session, image: Bytes, message_id: MessageId) -> Step {
        if let Some(limit) = self.max_images
            && session.image_count() >= limit
        {
            return Step::BatchFull { limit };
        }
        Step::Collected {
            count: session.push_image(image, message_id),
        }
    }

    /// A text message arrived.
    pub fn on_text(
        &self,
        session: &mut Session,
        conversation: &ConversationId,
        text: &str,
        now_ms: u64,
    ) -> Step {
        match (self.keywords.classify(text), session.phase()) {
            (Command::Complete, Phase::Idle) => Step::Ignore,
            // Repeating the keyword while a name is pending just asks again.
            (Command::Complete, Phase::CollectingImages | Phase::AwaitingFileName) => {
                if session.await_file_name() {
                    Step::AskFileName
                } else {
                    Step::Ignore
                }
            },
            (_, Phase::AwaitingFileName) => match session.take_named_batch() {
                Some(batch) => {
                    let (images, anchor) = batch.into_parts();
                    Step::Assemble(AssemblyRequest {
                        conversation: conversation.clone(),
                        images,
                        file_name: document_file_name(text, &self.fallback_prefix, now_ms),
                        anchor,
                    })
                },
                None => Step::Ignore,
            },
            (Command::Greet, _) => Step::Greet,
            (Command::Text(_), _) => Step::Ignore,
        }
    }
}
