use std::{path::PathBuf, sync::Arc};

use {
    async_trait::async_trait,
    bytes::{Bytes, BytesMut},
    futures::{TryStreamExt, stream::BoxStream},
    tokio::sync::mpsc,
};

use lembar_common::{ConversationId, MediaRef, MessageId};

use crate::Result;

// ── Inbound events ──────────────────────────────────────────────────────────

/// What an inbound message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    /// An image attachment, resolvable through an [`AttachmentFetcher`].
    Image(MediaRef),
    /// Plain text.
    Text(String),
}

/// A message from a peer, already filtered by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation: ConversationId,
    pub message_id: MessageId,
    pub sender_name: Option<String>,
    pub content: InboundContent,
}

/// Events emitted by channel plugins.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(InboundMessage),
    /// A login QR code is waiting to be scanned.
    QrCode { account_id: String, qr: String },
    Connected {
        account_id: String,
        phone_number: Option<String>,
    },
    /// Transient disconnect; the transport reconnects on its own.
    Disconnected { account_id: String, reason: String },
    /// Credentials are no longer valid. Not recoverable without a new login.
    LoggedOut { account_id: String, reason: String },
}

pub type ChannelEventSender = mpsc::Sender<ChannelEvent>;
pub type ChannelEventReceiver = mpsc::Receiver<ChannelEvent>;

/// Bounded event channel between a transport and the dispatcher.
pub fn event_channel(capacity: usize) -> (ChannelEventSender, ChannelEventReceiver) {
    mpsc::channel(capacity)
}

// ── Attachments ─────────────────────────────────────────────────────────────

/// Finite, non-restartable sequence of attachment chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Resolve attachment references into bytes.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, media: &MediaRef) -> Result<ByteStream>;

    /// Fetch and concatenate all chunks in delivery order.
    async fn fetch_all(&self, media: &MediaRef) -> Result<Bytes> {
        let mut stream = self.fetch(media).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// A document reply staged on local disk.
#[derive(Debug, Clone)]
pub struct OutboundDocument {
    pub path: PathBuf,
    pub mime_type: String,
    pub file_name: String,
    pub quoted: Option<MessageId>,
}

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(
        &self,
        to: &ConversationId,
        text: &str,
        quoted: Option<&MessageId>,
    ) -> Result<()>;

    async fn send_document(&self, to: &ConversationId, document: &OutboundDocument) -> Result<()>;

    /// Send a read receipt. No-op by default.
    async fn mark_read(&self, _to: &ConversationId, _message_id: &MessageId) -> Result<()> {
        Ok(())
    }
}

// ── Plugin ──────────────────────────────────────────────────────────────────

/// Core channel plugin trait. Each messaging platform implements this.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Channel identifier (e.g. "whatsapp-web").
    fn id(&self) -> &str;

    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start an account connection.
    async fn start_account(
        &mut self,
        account_id: &str,
        config: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Stop an account connection.
    async fn stop_account(&mut self, account_id: &str) -> anyhow::Result<()>;

    /// Shared outbound adapter for sending replies.
    fn shared_outbound(&self) -> Arc<dyn ChannelOutbound>;

    /// Shared adapter for downloading attachments.
    fn shared_fetcher(&self) -> Arc<dyn AttachmentFetcher>;
}
