//! WhatsApp Web channel for the lembar bot.
//!
//! Implements `ChannelPlugin` on top of Baileys, which runs in a Node.js
//! sidecar process reached over a local WebSocket. The sidecar owns the
//! WhatsApp session; this crate supervises it, filters what it reports and
//! relays replies, documents and media downloads.

pub mod config;
pub mod outbound;
pub mod plugin;
pub mod process;
pub mod sidecar;
pub mod state;
pub mod types;

pub use {
    config::WhatsAppConfig,
    plugin::WhatsAppPlugin,
    process::{SIDECAR_DIR_ENV, SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::DEFAULT_SIDECAR_PORT,
    types::ConnectionState,
};
