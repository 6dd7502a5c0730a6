use std::sync::Arc;

use {
    anyhow::{Context, bail},
    tracing::{info, warn},
};

use {
    lembar_channels::{ChannelPlugin, event_channel},
    lembar_chat::{Dispatcher, Engine, Error as ChatError},
    lembar_config::LembarConfig,
    lembar_sessions::SessionStore,
    lembar_whatsapp::{WhatsAppConfig, WhatsAppPlugin},
};

const EVENT_BUFFER: usize = 256;

/// Connect to WhatsApp and serve conversations until Ctrl-C or logout.
pub async fn run_bot(config: LembarConfig) -> anyhow::Result<()> {
    let wa = &config.whatsapp;

    // The sidecar runs in its own directory, so hand it an absolute path.
    let auth_dir = std::path::absolute(&wa.auth_dir)
        .with_context(|| format!("invalid auth dir {}", wa.auth_dir.display()))?;
    tokio::fs::create_dir_all(&auth_dir)
        .await
        .with_context(|| format!("failed to create auth dir {}", auth_dir.display()))?;
    let temp_dir = config.document.resolved_temp_dir();
    tokio::fs::create_dir_all(&temp_dir)
        .await
        .with_context(|| format!("failed to create temp dir {}", temp_dir.display()))?;
    info!(auth_dir = %auth_dir.display(), temp_dir = %temp_dir.display(), "working directories ready");

    let (events_tx, events_rx) = event_channel(EVENT_BUFFER);
    let mut plugin = WhatsAppPlugin::new(events_tx)
        .with_sidecar_port(wa.sidecar_port)
        .with_auth_base_dir(auth_dir.clone());
    if let Some(dir) = &wa.sidecar_dir {
        plugin = plugin.with_sidecar_dir(dir.clone());
    }
    if !wa.auto_start_sidecar {
        plugin = plugin.without_auto_start();
    }

    let engine = Arc::new(Engine::new(
        &config,
        Arc::new(SessionStore::new()),
        plugin.shared_fetcher(),
        plugin.shared_outbound(),
    ));

    let account = serde_json::to_value(WhatsAppConfig {
        auth_dir: Some(auth_dir.display().to_string()),
        allowlist: wa.allowlist.clone(),
    })?;
    plugin.start_account(&wa.account_id, account).await?;

    let outcome = tokio::select! {
        result = Dispatcher::new(engine).run(events_rx) => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutting down");
            Ok(())
        },
    };

    if let Err(e) = plugin.stop_account(&wa.account_id).await {
        warn!(error = %e, "failed to stop WhatsApp account");
    }
    plugin.shutdown().await?;

    match outcome {
        Ok(()) => Ok(()),
        Err(ChatError::LoggedOut { account_id, reason }) => bail!(
            "WhatsApp account {account_id} logged out ({reason}); delete {} and restart to scan a \
             new QR code",
            auth_dir.display()
        ),
        Err(e) => Err(e.into()),
    }
}
