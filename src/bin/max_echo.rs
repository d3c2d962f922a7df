//! Echo bot for Max
//!
//! Logs in (asking for the SMS code on stdin when there is no stored token),
//! logs every incoming message and echoes text messages sent in private
//! dialogs. Ctrl+C stops it.
//!
//! Usage:
//!   MAX_CONFIG_PATH=config/client.yaml ./max_echo
//!   ./max_echo path/to/client.yaml

use anyhow::{Context, Result};
use max_client::bin_common::{init_logging, load_config_from_env, ShutdownManager};
use max_client::maxwire::{
    self, handler_fn, opcode, ClientConfig, ClientEvent, Event, MaxClient, MaxWireError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = load_config_from_env();
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_logging(&config.log_level);
    config.log();

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    let client = Arc::new(
        maxwire::builder()
            .config(config)
            .shutdown_flag(shutdown.flag())
            .build()?,
    );

    let weak = Arc::downgrade(&client);
    client.on_message(handler_fn(move |event: Event| {
        let client = weak.clone();
        async move {
            echo(client, event);
            Ok::<(), MaxWireError>(())
        }
    }));

    client.on_start(|| async {
        info!("Session is running, waiting for messages");
        Ok::<(), MaxWireError>(())
    });

    let events = {
        let client = client.clone();
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = client.recv_event() {
                match event {
                    ClientEvent::Error(e) => warn!("Session error: {}", e),
                    ClientEvent::Stopped => break,
                    other => info!("Session event: {:?}", other),
                }
            }
        })
    };

    let result = client.start().await;
    client.close().await;
    let _ = events.await;

    let stats = client.metrics();
    info!(
        "Stopped: {} frames sent, {} received, {} reconnects",
        stats.frames_sent, stats.frames_received, stats.reconnects
    );

    if let Err(e) = &result {
        error!("Session ended with error: {}", e);
    }
    result.map_err(Into::into)
}

fn echo(client: Weak<MaxClient>, event: Event) {
    let Some(client) = client.upgrade() else {
        return;
    };
    let chat_id = event.chat_id();
    info!(
        "[chat {:?}] {:?}: {}",
        chat_id,
        event.sender(),
        event.text().unwrap_or("<no text>")
    );

    let (Some(chat_id), Some(text)) = (chat_id, event.text()) else {
        return;
    };
    if text.is_empty() || is_own(&client, event.sender()) || !is_dialog(&client, chat_id) {
        return;
    }

    let payload = json!({
        "chatId": chat_id,
        "message": {
            "text": text,
            "cid": -chrono::Utc::now().timestamp_millis(),
            "elements": [],
            "attaches": []
        },
        "notify": true
    });
    if let Err(e) = client.enqueue(opcode::SEND_MESSAGE, payload) {
        warn!("Failed to queue echo for chat {}: {}", chat_id, e);
    }
}

fn is_own(client: &MaxClient, sender: Option<i64>) -> bool {
    let me = client.me().and_then(|me| me.get("id").and_then(Value::as_i64));
    sender.is_some() && sender == me
}

fn is_dialog(client: &MaxClient, chat_id: i64) -> bool {
    client
        .dialogs()
        .iter()
        .any(|dialog| dialog.get("id").and_then(Value::as_i64) == Some(chat_id))
}
