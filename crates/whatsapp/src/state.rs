use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use lembar_common::ConversationId;

use crate::{config::WhatsAppConfig, types::ConnectionState};

/// Shared account state map.
pub type AccountStateMap = Arc<RwLock<HashMap<String, AccountState>>>;

/// Account each conversation was last seen on, so replies leave through it.
pub type RouteMap = Arc<RwLock<HashMap<ConversationId, String>>>;

/// Per-account runtime state.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub account_id: String,
    pub config: WhatsAppConfig,
    pub connection_state: ConnectionState,
}

impl AccountState {
    pub fn new(account_id: impl Into<String>, config: WhatsAppConfig) -> Self {
        Self {
            account_id: account_id.into(),
            config,
            connection_state: ConnectionState::Disconnected,
        }
    }
}

/// Account that should carry a message to `to`: the one the conversation
/// arrived on, else the only configured account.
pub fn resolve_account(
    accounts: &AccountStateMap,
    routes: &RouteMap,
    to: &ConversationId,
) -> Option<String> {
    if let Some(account_id) = routes.read().unwrap_or_else(|e| e.into_inner()).get(to) {
        return Some(account_id.clone());
    }
    let accounts = accounts.read().unwrap_or_else(|e| e.into_inner());
    match accounts.len() {
        1 => accounts.keys().next().cloned(),
        _ => None,
    }
}
