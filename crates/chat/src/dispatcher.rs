//! Routes channel events to one worker per conversation.
//!
//! Messages of a conversation are handled strictly in arrival order by its
//! worker; distinct conversations run concurrently.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use {
    futures::FutureExt,
    tokio::{sync::mpsc, task::JoinSet},
    tracing::{debug, error, info, warn},
};

use {
    lembar_channels::{ChannelEvent, ChannelEventReceiver, InboundMessage},
    lembar_common::ConversationId,
};

use crate::{Error, Result, engine::Engine};

type WorkerSender = mpsc::UnboundedSender<InboundMessage>;

pub struct Dispatcher {
    engine: Arc<Engine>,
    workers: HashMap<ConversationId, WorkerSender>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Consume events until the channel closes.
    ///
    /// Returns [`Error::LoggedOut`] when the transport reports lost
    /// credentials. In-flight work is drained before returning either way.
    pub async fn run(mut self, mut events: ChannelEventReceiver) -> Result<()> {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Message(message) => self.dispatch(message),
                ChannelEvent::QrCode { account_id, qr } => {
                    info!(%account_id, %qr, "scan this QR code with WhatsApp to log in");
                },
                ChannelEvent::Connected {
                    account_id,
                    phone_number,
                } => {
                    info!(%account_id, phone_number = ?phone_number, "channel connected");
                },
                ChannelEvent::Disconnected { account_id, reason } => {
                    warn!(%account_id, %reason, "channel disconnected, waiting for reconnect");
                },
                ChannelEvent::LoggedOut { account_id, reason } => {
                    error!(%account_id, %reason, "channel logged out");
                    self.shutdown().await;
                    return Err(Error::LoggedOut { account_id, reason });
                },
            }
        }
        debug!("event channel closed");
        self.shutdown().await;
        Ok(())
    }

    fn dispatch(&mut self, message: InboundMessage) {
        let conversation = message.conversation.clone();
        let message = match self.worker(&conversation).send(message) {
            Ok(()) => return,
            Err(mpsc::error::SendError(message)) => message,
        };

        // The worker is gone; start a fresh one and retry once.
        warn!(%conversation, "conversation worker stopped, restarting");
        self.workers.remove(&conversation);
        if self.worker(&conversation).send(message).is_err() {
            error!(%conversation, "dropping message, worker unavailable");
        }
    }

    fn worker(&mut self, conversation: &ConversationId) -> &WorkerSender {
        if let Some(tx) = self.workers.get(conversation)
            && tx.is_closed()
        {
            self.workers.remove(conversation);
        }
        self.workers.entry(conversation.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            self.tasks.spawn(run_worker(
                Arc::clone(&self.engine),
                conversation.clone(),
                rx,
            ));
            tx
        })
    }

    async fn shutdown(&mut self) {
        self.workers.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "conversation worker failed");
            }
        }
    }
}

async fn run_worker(
    engine: Arc<Engine>,
    conversation: ConversationId,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
) {
    debug!(%conversation, "conversation worker started");
    while let Some(message) = rx.recv().await {
        let message_id = message.message_id.clone();
        if AssertUnwindSafe(engine.handle(message))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(%conversation, %message_id, "message handling panicked, session reset");
            engine.store().reset(&conversation).await;
        }
    }
    debug!(%conversation, "conversation worker stopped");
}
