//! Effects of the conversation state machine.

use std::sync::Arc;

use {
    tokio::sync::OwnedMutexGuard,
    tracing::{debug, info, warn},
};

use {
    lembar_channels::{
        AttachmentFetcher, ChannelOutbound, InboundContent, InboundMessage, OutboundDocument,
    },
    lembar_common::{ConversationId, MediaRef, MessageId, now_ms},
    lembar_config::LembarConfig,
    lembar_media::{DocumentAssembler, PDF_MIME_TYPE, TempStore},
    lembar_sessions::{Session, SessionStore},
};

use crate::{
    Error, Result,
    machine::{AssemblyRequest, StateMachine, Step},
    replies::Replies,
};

/// Applies inbound messages to their sessions and carries out the results.
///
/// Never fails: per-conversation errors are reported to the peer and logged.
pub struct Engine {
    store: Arc<SessionStore>,
    machine: StateMachine,
    replies: Replies,
    assembler: DocumentAssembler,
    temp: TempStore,
    fetcher: Arc<dyn AttachmentFetcher>,
    outbound: Arc<dyn ChannelOutbound>,
}

impl Engine {
    pub fn new(
        config: &LembarConfig,
        store: Arc<SessionStore>,
        fetcher: Arc<dyn AttachmentFetcher>,
        outbound: Arc<dyn ChannelOutbound>,
    ) -> Self {
        let machine = StateMachine::from_config(&config.bot);
        let replies = Replies::new(config.messages.clone(), machine.keywords().completion());
        Self {
            store,
            machine,
            replies,
            assembler: DocumentAssembler::new(config.document.decoders.iter().copied()),
            temp: TempStore::new(config.document.resolved_temp_dir()),
            fetcher,
            outbound,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn handle(&self, message: InboundMessage) {
        let InboundMessage {
            conversation,
            message_id,
            content,
            ..
        } = message;

        // Locked before anything awaits and held across the fetch, so messages
        // of one conversation apply in the order `handle` was called.
        let session = self.store.lock(&conversation).await;

        if let Err(e) = self.outbound.mark_read(&conversation, &message_id).await {
            debug!(%conversation, %message_id, error = %e, "failed to mark message read");
        }

        match content {
            InboundContent::Image(media) => {
                self.handle_image(session, &conversation, message_id, &media)
                    .await;
            },
            InboundContent::Text(text) => self.handle_text(session, &conversation, &text).await,
        }
    }

    async fn handle_image(
        &self,
        mut session: OwnedMutexGuard<Session>,
        conversation: &ConversationId,
        message_id: MessageId,
        media: &MediaRef,
    ) {
        // A failed fetch leaves the session untouched so the user can resend.
        let image = match self.fetcher.fetch_all(media).await {
            Ok(image) => image,
            Err(e) => {
                warn!(%conversation, %message_id, error = %e, "failed to fetch image");
                self.reply(conversation, &self.replies.image_failed(&e), None)
                    .await;
                return;
            },
        };

        let step = self
            .machine
            .on_image(&mut session, image, message_id.clone());

        match step {
            Step::Collected { count } => {
                debug!(%conversation, %message_id, count, "image buffered");
                self.reply(
                    conversation,
                    &self.replies.image_received(count),
                    Some(&message_id),
                )
                .await;
            },
            Step::BatchFull { limit } => {
                info!(%conversation, limit, "batch full, image dropped");
                self.reply(conversation, &self.replies.batch_full(limit), Some(&message_id))
                    .await;
            },
            other => debug!(%conversation, ?other, "unexpected step for image"),
        }
    }

    async fn handle_text(
        &self,
        mut session: OwnedMutexGuard<Session>,
        conversation: &ConversationId,
        text: &str,
    ) {
        let step = self
            .machine
            .on_text(&mut session, conversation, text, now_ms());

        match step {
            Step::AskFileName => {
                drop(session);
                self.reply(conversation, &self.replies.ask_file_name(), None)
                    .await;
            },
            Step::Greet => {
                drop(session);
                self.reply(conversation, &self.replies.greeting(), None)
                    .await;
            },
            Step::Assemble(request) => {
                // The session stays locked for the whole cycle and is idle afterwards,
                // whatever the outcome.
                self.run_cycle(request).await;
                *session = Session::Idle;
            },
            Step::Ignore | Step::Collected { .. } | Step::BatchFull { .. } => {
                debug!(%conversation, phase = ?session.phase(), "text ignored");
            },
        }
    }

    /// Assemble, stage, deliver and confirm one document, reporting any failure.
    pub async fn run_cycle(&self, request: AssemblyRequest) {
        let conversation = request.conversation.clone();
        let count = request.images.len();
        self.reply(&conversation, &self.replies.working(count), None)
            .await;

        match self.assemble_and_deliver(request).await {
            Ok(file_name) => {
                info!(%conversation, count, %file_name, "document delivered");
                self.reply(&conversation, &self.replies.success(&file_name), None)
                    .await;
            },
            Err(e) => {
                warn!(%conversation, count, error = %e, "document cycle failed");
                self.reply(&conversation, &self.replies.failure(&e), None)
                    .await;
            },
        }
    }

    async fn assemble_and_deliver(&self, request: AssemblyRequest) -> Result<String> {
        let AssemblyRequest {
            conversation,
            images,
            file_name,
            anchor,
        } = request;

        let assembler = self.assembler.clone();
        let pdf = tokio::task::spawn_blocking(move || assembler.assemble(&images)).await??;

        let artifact = self.temp.create(&file_name, &pdf).await?;
        let document = OutboundDocument {
            path: artifact.path().to_path_buf(),
            mime_type: PDF_MIME_TYPE.to_string(),
            file_name: artifact.name().to_string(),
            quoted: Some(anchor),
        };
        let delivered = self.outbound.send_document(&conversation, &document).await;

        if let Err(e) = artifact.release() {
            warn!(%conversation, error = %e, "failed to remove temporary artifact");
        }
        delivered.map_err(Error::Delivery)?;
        Ok(file_name)
    }

    async fn reply(&self, to: &ConversationId, text: &str, quoted: Option<&MessageId>) {
        if let Err(e) = self.outbound.send_text(to, text, quoted).await {
            warn!(conversation = %to, error = %e, "failed to send reply");
        }
    }
}
