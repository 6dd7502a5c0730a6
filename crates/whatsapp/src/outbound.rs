//! Outbound messages and attachment downloads over the sidecar link.
//!
//! Both are request/response exchanges keyed by a fresh `request_id`: sends
//! wait for one `send_result` frame, downloads consume `media_chunk` frames
//! until the final one.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::Engine,
    bytes::Bytes,
    futures::StreamExt,
    tokio::sync::{RwLock, mpsc, oneshot},
    tracing::{debug, warn},
};

use {
    lembar_channels::{AttachmentFetcher, ByteStream, ChannelOutbound, Error, OutboundDocument, Result},
    lembar_common::{ConversationId, MediaRef, MessageId},
};

use crate::{
    sidecar::SidecarHandle,
    state::{AccountStateMap, RouteMap, resolve_account},
    types::GatewayMessage,
};

/// Slot for the current sidecar connection, replaced on reconnect.
pub type SharedSidecar = Arc<RwLock<Option<SidecarHandle>>>;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of a send as reported by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

type ChunkSender = mpsc::UnboundedSender<Result<Bytes>>;

/// Requests waiting for sidecar frames.
#[derive(Default)]
pub struct PendingRequests {
    sends: Mutex<HashMap<String, oneshot::Sender<SendOutcome>>>,
    downloads: Mutex<HashMap<String, ChunkSender>>,
}

impl PendingRequests {
    pub fn register_send(&self, request_id: &str) -> oneshot::Receiver<SendOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.to_string(), tx);
        rx
    }

    /// Returns `false` for unknown (e.g. timed out) requests.
    pub fn complete_send(&self, request_id: &str, outcome: SendOutcome) -> bool {
        let waiter = self
            .sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        match waiter {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn register_download(&self, request_id: &str) -> mpsc::UnboundedReceiver<Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.downloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.to_string(), tx);
        rx
    }

    /// Forward one base64 chunk. The stream ends after `done`.
    pub fn push_chunk(&self, request_id: &str, data: &str, done: bool) {
        let mut downloads = self.downloads.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = downloads.get(request_id) else {
            debug!(request_id, "chunk for unknown download");
            return;
        };

        let decoded = base64::engine::general_purpose::STANDARD.decode(data);
        let failed = decoded.is_err();
        let item = decoded
            .map(Bytes::from)
            .map_err(|e| Error::fetch(format!("corrupt media chunk: {e}")));
        let delivered = match item {
            Ok(chunk) if chunk.is_empty() => true,
            item => tx.send(item).is_ok(),
        };

        if done || failed || !delivered {
            downloads.remove(request_id);
        }
    }

    pub fn fail_download(&self, request_id: &str, error: &str) {
        let tx = self
            .downloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        if let Some(tx) = tx {
            let _ = tx.send(Err(Error::fetch(error)));
        }
    }

    pub fn cancel(&self, request_id: &str) {
        self.sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        self.downloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
    }

    /// Fail everything in flight, e.g. when the sidecar link drops.
    pub fn fail_all(&self, reason: &str) {
        let sends: Vec<_> = self
            .sends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, tx) in sends {
            let _ = tx.send(SendOutcome {
                success: false,
                error: Some(reason.to_string()),
            });
        }
        let downloads: Vec<_> = self
            .downloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, tx) in downloads {
            let _ = tx.send(Err(Error::fetch(reason)));
        }
    }
}

/// Attachment handle of `media_id` as received on `account_id`.
pub fn media_ref(account_id: &str, media_id: &str) -> MediaRef {
    MediaRef::new(format!("{account_id}:{media_id}"))
}

/// Inverse of [`media_ref`].
pub fn parse_media_ref(media: &MediaRef) -> Option<(&str, &str)> {
    media
        .as_str()
        .split_once(':')
        .filter(|(account, id)| !account.is_empty() && !id.is_empty())
}

async fn connected_handle(sidecar: &SharedSidecar) -> Result<SidecarHandle> {
    sidecar
        .read()
        .await
        .clone()
        .filter(SidecarHandle::is_connected)
        .ok_or_else(|| Error::unavailable("WhatsApp sidecar is not connected"))
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Outbound message sender for WhatsApp Web.
pub struct WhatsAppOutbound {
    sidecar: SharedSidecar,
    pending: Arc<PendingRequests>,
    accounts: AccountStateMap,
    routes: RouteMap,
}

impl WhatsAppOutbound {
    pub fn new(
        sidecar: SharedSidecar,
        pending: Arc<PendingRequests>,
        accounts: AccountStateMap,
        routes: RouteMap,
    ) -> Self {
        Self {
            sidecar,
            pending,
            accounts,
            routes,
        }
    }

    fn account_for(&self, to: &ConversationId) -> Result<String> {
        resolve_account(&self.accounts, &self.routes, to)
            .ok_or_else(|| Error::unavailable(format!("no WhatsApp account can reach {to}")))
    }

    /// Send a frame built around a fresh request id and wait for its result.
    async fn request(
        &self,
        timeout: Duration,
        build: impl FnOnce(String) -> GatewayMessage,
    ) -> Result<()> {
        let handle = connected_handle(&self.sidecar).await?;
        let request_id = new_request_id();
        let rx = self.pending.register_send(&request_id);
        if let Err(e) = handle.send(build(request_id.clone())) {
            self.pending.cancel(&request_id);
            return Err(Error::unavailable(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(SendOutcome { success: true, .. })) => Ok(()),
            Ok(Ok(SendOutcome { error, .. })) => Err(Error::delivery(
                error.unwrap_or_else(|| "rejected by WhatsApp".into()),
            )),
            Ok(Err(_)) => Err(Error::delivery("WhatsApp sidecar connection lost")),
            Err(_) => {
                self.pending.cancel(&request_id);
                Err(Error::delivery(format!(
                    "no confirmation from WhatsApp after {}s",
                    timeout.as_secs()
                )))
            },
        }
    }
}

#[async_trait]
impl ChannelOutbound for WhatsAppOutbound {
    async fn send_text(
        &self,
        to: &ConversationId,
        text: &str,
        quoted: Option<&MessageId>,
    ) -> Result<()> {
        let account_id = self.account_for(to)?;
        self.request(SEND_TIMEOUT, |request_id| GatewayMessage::SendText {
            request_id,
            account_id,
            to: to.to_string(),
            text: text.to_string(),
            quoted_message_id: quoted.map(ToString::to_string),
        })
        .await
    }

    async fn send_document(&self, to: &ConversationId, document: &OutboundDocument) -> Result<()> {
        let account_id = self.account_for(to)?;
        self.request(UPLOAD_TIMEOUT, |request_id| GatewayMessage::SendDocument {
            request_id,
            account_id,
            to: to.to_string(),
            path: document.path.to_string_lossy().into_owned(),
            mime_type: document.mime_type.clone(),
            file_name: document.file_name.clone(),
            quoted_message_id: document.quoted.as_ref().map(ToString::to_string),
        })
        .await
    }

    async fn mark_read(&self, to: &ConversationId, message_id: &MessageId) -> Result<()> {
        let account_id = self.account_for(to)?;
        let handle = connected_handle(&self.sidecar).await?;
        handle
            .send(GatewayMessage::MarkRead {
                account_id,
                chat_jid: to.to_string(),
                message_id: message_id.to_string(),
            })
            .map_err(Error::unavailable)
    }
}

/// Downloads attachments through the sidecar.
pub struct WhatsAppFetcher {
    sidecar: SharedSidecar,
    pending: Arc<PendingRequests>,
    idle_timeout: Duration,
}

impl WhatsAppFetcher {
    pub fn new(sidecar: SharedSidecar, pending: Arc<PendingRequests>) -> Self {
        Self {
            sidecar,
            pending,
            idle_timeout: DOWNLOAD_IDLE_TIMEOUT,
        }
    }

    /// Give up on a download when no chunk arrives for this long.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

#[async_trait]
impl AttachmentFetcher for WhatsAppFetcher {
    async fn fetch(&self, media: &MediaRef) -> Result<ByteStream> {
        let (account_id, media_id) = parse_media_ref(media)
            .ok_or_else(|| Error::fetch(format!("malformed media reference {media}")))?;
        let handle = connected_handle(&self.sidecar).await?;

        let request_id = new_request_id();
        let rx = self.pending.register_download(&request_id);
        if let Err(e) = handle.send(GatewayMessage::DownloadMedia {
            request_id: request_id.clone(),
            account_id: account_id.to_string(),
            media_id: media_id.to_string(),
        }) {
            self.pending.cancel(&request_id);
            return Err(Error::unavailable(e));
        }

        let pending = Arc::clone(&self.pending);
        let idle_timeout = self.idle_timeout;
        let stream = futures::stream::unfold(Some(rx), move |state| {
            let pending = Arc::clone(&pending);
            let request_id = request_id.clone();
            async move {
                let mut rx = state?;
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(rx))),
                    Ok(Some(Err(e))) => Some((Err(e), None)),
                    Ok(None) => None,
                    Err(_) => {
                        warn!(%request_id, "media download stalled");
                        pending.cancel(&request_id);
                        Some((Err(Error::fetch("media download timed out")), None))
                    },
                }
            }
        });
        Ok(stream.boxed())
    }
}
