//! In-process smoke run: wire the engine to the in-memory store, send a few
//! messages through the composer, and print the grouped view the engine
//! publishes back over the snapshot path.

mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use chat_core::{ChatEvent, ConversationView};
use chat_engine::{ChatSyncEngine, MessageComposer};
use chat_store::InMemoryMessageStore;
use tokio::time::timeout;
use tracing::info;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match config::SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let store = Arc::new(InMemoryMessageStore::new());
    let engine = ChatSyncEngine::new(store.clone(), config.engine);
    let mut events = engine.events();

    if let Err(err) = engine.subscribe(&config.group_id, &config.viewer_id).await {
        if err.is_recoverable() {
            eprintln!("Failed to subscribe (worth retrying): {err}");
        } else {
            eprintln!("Failed to subscribe: {err}");
        }
        std::process::exit(1);
    }
    info!(group = %config.group_id, "subscribed");

    let mut composer = MessageComposer::with_config(store.clone(), config.engine);
    for body in ["Hello from the smoke run", "Second message, same day"] {
        composer.set_draft(body);
        let disposition = composer
            .send(&config.group_id, &config.viewer_id, &config.viewer_name)
            .await;
        info!(?disposition, "composer send finished");
    }

    // Drain events until the round-trip view carries both messages.
    let view = loop {
        let event = match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) | Err(_) => {
                eprintln!("Engine stopped publishing before the view settled");
                std::process::exit(1);
            }
        };

        if let ChatEvent::ConversationUpdated { view, .. } = event {
            let settled = matches!(
                &view,
                ConversationView::Ready { groups }
                    if groups.iter().map(|g| g.messages.len()).sum::<usize>() == 2
            );
            if settled {
                break view;
            }
        }
    };

    if let ConversationView::Ready { groups } = view {
        for group in groups {
            println!("== {}", group.label);
            for message in group.messages {
                let marker = if message.is_own_message { "*" } else { " " };
                println!(
                    "{marker} [{}] {}: {}",
                    message.sent_at_local, message.author_display_name, message.body
                );
            }
        }
    }

    engine.teardown().await;
    info!("smoke run complete");
}
