//! Channel plugin system.
//!
//! A channel (WhatsApp Web today) turns transport traffic into
//! [`ChannelEvent`]s and exposes two adapters back to the conversation
//! engine: an [`AttachmentFetcher`] that resolves media references into bytes
//! and a [`ChannelOutbound`] that sends replies and documents.

pub mod error;
pub mod gating;
pub mod plugin;

pub use {
    error::{Error, Result},
    plugin::{
        AttachmentFetcher, ByteStream, ChannelEvent, ChannelEventReceiver, ChannelEventSender,
        ChannelOutbound, ChannelPlugin, InboundContent, InboundMessage, OutboundDocument,
        event_channel,
    },
};
