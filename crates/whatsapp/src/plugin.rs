//! WhatsApp Web channel plugin implementation.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    tokio::sync::{Mutex, RwLock, mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    lembar_channels::{
        AttachmentFetcher, ChannelEvent, ChannelEventSender, ChannelOutbound, ChannelPlugin,
        InboundContent, InboundMessage, gating,
    },
    lembar_common::{ConversationId, MessageId},
};

use crate::{
    config::WhatsAppConfig,
    outbound::{PendingRequests, SendOutcome, SharedSidecar, WhatsAppFetcher, WhatsAppOutbound, media_ref},
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{DEFAULT_SIDECAR_PORT, MessageCallback, SidecarHandle, connect_with_retry},
    state::{AccountState, AccountStateMap, RouteMap},
    types::{ConnectionState, GatewayMessage, InboundFrame, SidecarMessage},
};

const CONNECT_ATTEMPTS: u32 = 10;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// WhatsApp Web channel plugin (via Baileys sidecar).
///
/// Emits [`ChannelEvent`]s on the sender given to [`WhatsAppPlugin::new`],
/// in the order the sidecar reports them.
pub struct WhatsAppPlugin {
    link: Link,
    events: ChannelEventSender,
    forward_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    cancel: CancellationToken,
    supervised: bool,
}

impl WhatsAppPlugin {
    pub fn new(events: ChannelEventSender) -> Self {
        let (forward, forward_rx) = mpsc::unbounded_channel();
        Self {
            link: Link {
                port: DEFAULT_SIDECAR_PORT,
                sidecar_dir: None,
                auth_base_dir: None,
                auto_start: true,
                sidecar: Arc::new(RwLock::new(None)),
                process: Arc::new(Mutex::new(None)),
                accounts: Arc::default(),
                routes: Arc::default(),
                pending: Arc::new(PendingRequests::default()),
                forward,
            },
            events,
            forward_rx: Some(forward_rx),
            cancel: CancellationToken::new(),
            supervised: false,
        }
    }

    pub fn with_sidecar_port(mut self, port: u16) -> Self {
        self.link.port = port;
        self
    }

    /// Set the directory containing the sidecar code.
    pub fn with_sidecar_dir(mut self, dir: PathBuf) -> Self {
        self.link.sidecar_dir = Some(dir);
        self
    }

    /// Set the default directory for WhatsApp auth files.
    pub fn with_auth_base_dir(mut self, dir: PathBuf) -> Self {
        self.link.auth_base_dir = Some(dir);
        self
    }

    /// Connect to an already running sidecar instead of spawning one.
    pub fn without_auto_start(mut self) -> Self {
        self.link.auto_start = false;
        self
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.link.account_ids()
    }

    pub fn connection_state(&self, account_id: &str) -> Option<ConnectionState> {
        self.link
            .accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(account_id)
            .map(|s| s.connection_state.clone())
    }

    /// Stop reconnecting and terminate a managed sidecar process.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.link.pending.fail_all("WhatsApp channel shutting down");
        *self.link.sidecar.write().await = None;
        let mut process = self.link.process.lock().await;
        if let Some(proc) = process.as_mut() {
            proc.stop().await?;
        }
        *process = None;
        Ok(())
    }

    /// Relay events produced by sidecar callbacks to the bounded event channel.
    fn spawn_forwarder(&mut self) {
        let Some(mut rx) = self.forward_rx.take() else {
            return;
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events.send(event).await.is_err() {
                    debug!("channel event receiver dropped");
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl ChannelPlugin for WhatsAppPlugin {
    fn id(&self) -> &str {
        "whatsapp-web"
    }

    fn name(&self) -> &str {
        "WhatsApp Web"
    }

    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()> {
        let wa_config: WhatsAppConfig = serde_json::from_value(config)?;
        info!(account_id, "starting WhatsApp Web account");

        self.link
            .accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.to_string(), AccountState::new(account_id, wa_config));
        self.spawn_forwarder();

        if !self.supervised {
            let closed = match self.link.connect().await {
                Ok(closed) => closed,
                Err(e) => {
                    warn!(account_id, error = %e, "failed to connect to WhatsApp sidecar");
                    return Err(e);
                },
            };
            tokio::spawn(supervise(self.link.clone(), closed, self.cancel.clone()));
            self.supervised = true;
        }

        // While reconnecting, the supervisor logs every account in afterwards.
        if self.link.is_connected().await {
            self.link.login(account_id).await?;
        }
        Ok(())
    }

    async fn stop_account(&mut self, account_id: &str) -> Result<()> {
        let removed = self
            .link
            .accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(account_id)
            .is_some();
        if !removed {
            warn!(account_id, "WhatsApp Web account not found");
            return Ok(());
        }

        if let Some(handle) = self.link.handle().await
            && let Err(e) = handle.send(GatewayMessage::Close {
                account_id: account_id.to_string(),
            })
        {
            debug!(account_id, error = %e, "could not close account session");
        }
        info!(account_id, "stopped WhatsApp Web account");
        Ok(())
    }

    fn shared_outbound(&self) -> Arc<dyn ChannelOutbound> {
        Arc::new(WhatsAppOutbound::new(
            Arc::clone(&self.link.sidecar),
            Arc::clone(&self.link.pending),
            Arc::clone(&self.link.accounts),
            Arc::clone(&self.link.routes),
        ))
    }

    fn shared_fetcher(&self) -> Arc<dyn AttachmentFetcher> {
        Arc::new(WhatsAppFetcher::new(
            Arc::clone(&self.link.sidecar),
            Arc::clone(&self.link.pending),
        ))
    }
}

/// Everything needed to (re)connect to the sidecar and route its frames.
#[derive(Clone)]
struct Link {
    port: u16,
    sidecar_dir: Option<PathBuf>,
    auth_base_dir: Option<PathBuf>,
    auto_start: bool,
    sidecar: SharedSidecar,
    process: Arc<Mutex<Option<SidecarProcess>>>,
    accounts: AccountStateMap,
    routes: RouteMap,
    pending: Arc<PendingRequests>,
    forward: mpsc::UnboundedSender<ChannelEvent>,
}

impl Link {
    async fn handle(&self) -> Option<SidecarHandle> {
        self.sidecar.read().await.clone()
    }

    async fn is_connected(&self) -> bool {
        self.handle()
            .await
            .is_some_and(|handle| handle.is_connected())
    }

    /// Start the sidecar process when managed, then open a fresh connection.
    async fn connect(&self) -> Result<oneshot::Receiver<()>> {
        if self.auto_start {
            self.ensure_process_running().await?;
        }
        let link = self.clone();
        let callback: MessageCallback = Arc::new(move |msg| link.route(msg));
        let (handle, closed) = connect_with_retry(self.port, callback, CONNECT_ATTEMPTS).await?;
        *self.sidecar.write().await = Some(handle);
        Ok(closed)
    }

    async fn ensure_process_running(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if let Some(proc) = process.as_mut() {
            if proc.is_running() {
                return Ok(());
            }
            warn!("WhatsApp sidecar process died, restarting");
        }

        let config = SidecarConfig {
            sidecar_dir: find_sidecar_dir(self.sidecar_dir.as_deref())?,
            port: self.port,
            auth_dir: self.auth_base_dir.clone(),
        };
        *process = Some(start_sidecar(config).await?);
        Ok(())
    }

    async fn login(&self, account_id: &str) -> Result<()> {
        let auth_dir = self
            .accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(account_id)
            .and_then(|s| s.config.auth_dir.clone());
        let handle = self
            .handle()
            .await
            .ok_or_else(|| anyhow!("WhatsApp sidecar is not connected"))?;
        handle.send(GatewayMessage::Login {
            account_id: account_id.to_string(),
            auth_dir,
        })?;
        self.set_state(account_id, ConnectionState::WaitingForQr);
        Ok(())
    }

    fn account_ids(&self) -> Vec<String> {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn set_state(&self, account_id: &str, state: ConnectionState) {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        if let Some(account) = accounts.get_mut(account_id) {
            account.connection_state = state;
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if self.forward.send(event).is_err() {
            debug!("channel event forwarder stopped");
        }
    }

    /// Handle one frame from the sidecar.
    fn route(&self, msg: SidecarMessage) {
        match msg {
            SidecarMessage::Qr { account_id, qr } => {
                debug!(%account_id, "received QR code from sidecar");
                self.set_state(&account_id, ConnectionState::QrReceived(qr.clone()));
                self.emit(ChannelEvent::QrCode { account_id, qr });
            },
            SidecarMessage::Connected {
                account_id,
                phone_number,
            } => {
                self.set_state(&account_id, ConnectionState::Connected {
                    phone_number: phone_number.clone(),
                });
                self.emit(ChannelEvent::Connected {
                    account_id,
                    phone_number,
                });
            },
            SidecarMessage::Disconnected { account_id, reason } => {
                self.set_state(&account_id, ConnectionState::Disconnected);
                self.emit(ChannelEvent::Disconnected { account_id, reason });
            },
            SidecarMessage::LoggedOut { account_id, reason } => {
                self.set_state(&account_id, ConnectionState::LoggedOut);
                self.emit(ChannelEvent::LoggedOut {
                    account_id,
                    reason: reason.unwrap_or_else(|| "session logged out".into()),
                });
            },
            SidecarMessage::InboundMessage(frame) => {
                let allowlist = {
                    let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
                    match accounts.get(&frame.account_id) {
                        Some(account) => account.config.allowlist.clone(),
                        None => {
                            debug!(account_id = %frame.account_id, "message for unknown account");
                            return;
                        },
                    }
                };
                let account_id = frame.account_id.clone();
                if let Some(message) = accept_inbound(frame, &allowlist) {
                    self.routes
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(message.conversation.clone(), account_id);
                    self.emit(ChannelEvent::Message(message));
                }
            },
            SidecarMessage::SendResult {
                request_id,
                success,
                error,
                ..
            } => {
                if !success {
                    warn!(%request_id, ?error, "sidecar failed to send message");
                }
                if !self
                    .pending
                    .complete_send(&request_id, SendOutcome { success, error })
                {
                    debug!(%request_id, "send result for unknown request");
                }
            },
            SidecarMessage::MediaChunk {
                request_id,
                data,
                done,
            } => self.pending.push_chunk(&request_id, &data, done),
            SidecarMessage::MediaError { request_id, error } => {
                warn!(%request_id, %error, "sidecar failed to download media");
                self.pending.fail_download(&request_id, &error);
            },
            SidecarMessage::Error { account_id, error } => {
                warn!(?account_id, %error, "sidecar error");
            },
        }
    }
}

/// Turn a sidecar frame into a bot message, or drop it.
///
/// Dropped: the bot's own messages, group chats, senders outside a non-empty
/// allowlist, media other than images, and messages without text.
fn accept_inbound(frame: InboundFrame, allowlist: &[String]) -> Option<InboundMessage> {
    if frame.from_me {
        return None;
    }
    if frame.is_group || frame.chat_jid.ends_with("@g.us") {
        debug!(chat = %frame.chat_jid, "ignoring group message");
        return None;
    }
    if !gating::is_allowed(&frame.sender_jid, allowlist) {
        info!(sender = %frame.sender_jid, "ignoring sender outside allowlist");
        return None;
    }

    let content = match (frame.media_type.as_deref(), frame.media_id) {
        (Some("image"), Some(media_id)) => {
            InboundContent::Image(media_ref(&frame.account_id, &media_id))
        },
        (Some(other), _) => {
            debug!(media_type = other, "ignoring unsupported media");
            return None;
        },
        (None, _) => match frame.body {
            Some(body) if !body.trim().is_empty() => InboundContent::Text(body),
            _ => return None,
        },
    };

    Some(InboundMessage {
        conversation: ConversationId::new(frame.chat_jid),
        message_id: MessageId::new(frame.message_id),
        sender_name: frame.sender_name,
        content,
    })
}

/// Reconnect after the sidecar link drops, then log every account back in.
async fn supervise(link: Link, mut closed: oneshot::Receiver<()>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = &mut closed => {},
        }

        warn!("lost connection to WhatsApp sidecar");
        link.pending.fail_all("WhatsApp sidecar connection lost");
        for account_id in link.account_ids() {
            link.set_state(&account_id, ConnectionState::Disconnected);
            link.emit(ChannelEvent::Disconnected {
                account_id,
                reason: "sidecar connection lost".into(),
            });
        }

        let mut delay = Duration::from_secs(1);
        closed = loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {},
            }
            match link.connect().await {
                Ok(closed) => break closed,
                Err(e) => {
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "sidecar reconnect failed");
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                },
            }
        };

        for account_id in link.account_ids() {
            if let Err(e) = link.login(&account_id).await {
                warn!(%account_id, error = %e, "failed to log account back in");
            }
        }
    }
}
