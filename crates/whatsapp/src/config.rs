use serde::{Deserialize, Serialize};

/// Configuration for a single WhatsApp Web account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Directory where the sidecar persists the login credentials of this
    /// account. The sidecar picks its own default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_dir: Option<String>,

    /// Peers allowed to talk to the bot. Empty allows everyone.
    pub allowlist: Vec<String>,
}
