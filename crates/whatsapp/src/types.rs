//! JSON frames exchanged with the Baileys sidecar over its local WebSocket.
//!
//! Every frame is an object tagged by `type`. Field names are snake_case on
//! both sides.

use serde::{Deserialize, Serialize};

/// Frames sent from the bot to the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Open (or resume) the WhatsApp Web session of an account.
    Login {
        account_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_dir: Option<String>,
    },
    /// Close the session of an account, keeping its stored credentials.
    Close {
        account_id: String,
    },
    SendText {
        request_id: String,
        account_id: String,
        to: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quoted_message_id: Option<String>,
    },
    /// Upload the file at `path` as a document. The file must stay in place
    /// until the matching `send_result` arrives.
    SendDocument {
        request_id: String,
        account_id: String,
        to: String,
        path: String,
        mime_type: String,
        file_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quoted_message_id: Option<String>,
    },
    /// Stream the attachment behind `media_id` back as `media_chunk` frames.
    DownloadMedia {
        request_id: String,
        account_id: String,
        media_id: String,
    },
    MarkRead {
        account_id: String,
        chat_jid: String,
        message_id: String,
    },
}

/// Frames sent from the sidecar to the bot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        account_id: String,
        qr: String,
    },
    Connected {
        account_id: String,
        #[serde(default)]
        phone_number: Option<String>,
    },
    /// Transient; the sidecar reconnects by itself.
    Disconnected {
        account_id: String,
        #[serde(default)]
        reason: String,
    },
    /// Credentials were revoked or the stored session is corrupt.
    LoggedOut {
        account_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    InboundMessage(InboundFrame),
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    /// One base64 chunk of a download. `done` marks the last frame, which may
    /// carry an empty chunk.
    MediaChunk {
        request_id: String,
        #[serde(default)]
        data: String,
        #[serde(default)]
        done: bool,
    },
    MediaError {
        request_id: String,
        error: String,
    },
    Error {
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}

/// A message received by one of the sidecar's accounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundFrame {
    pub account_id: String,
    pub message_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    /// Plain or extended text. Media captions are not forwarded here.
    #[serde(default)]
    pub body: Option<String>,
    /// `"image"`, `"video"`, `"sticker"`, ... when the message has media.
    #[serde(default)]
    pub media_type: Option<String>,
    /// Handle for `download_media`.
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Connection state of an account as last reported by the sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    WaitingForQr,
    QrReceived(String),
    Connected {
        phone_number: Option<String>,
    },
    LoggedOut,
}
