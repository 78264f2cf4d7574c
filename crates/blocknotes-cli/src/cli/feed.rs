use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use blocknotes_core::models::ValidatedEvent;
use blocknotes_core::store::ProfileStore;
use blocknotes_core::{CoreConfig, FeedSession, FilterSettings, Nip05Directory, RelayConnection, Stores};
use serde_json::{json, Value};
use tokio::sync::watch;

/// Flags for a single `feed` run
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedOptions {
    /// How long to listen before printing; Ctrl-C stops early
    pub seconds: u64,
    pub hide_spam: bool,
    pub hide_invoice: bool,
}

impl FeedOptions {
    fn settings(&self, base: FilterSettings) -> FilterSettings {
        FilterSettings {
            hide_spam: base.hide_spam || self.hide_spam,
            hide_invoice: base.hide_invoice || self.hide_invoice,
            paused: false,
        }
    }
}

fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn note_json(note: &ValidatedEvent, profiles: &ProfileStore) -> Value {
    let profile = profiles.get(&note.pubkey).ok().flatten();
    json!({
        "id": note.id,
        "author": profile.as_ref().map(|p| p.label()),
        "pubkey": note.pubkey,
        "verified": profile.as_ref().map(|p| p.verified),
        "createdAt": format_time(note.created_at),
        "content": note.content,
    })
}

/// Listen to the relay for `options.seconds`, then report the timeline
pub async fn run_feed(config: &CoreConfig, stores: &Stores, options: FeedOptions) -> Result<Value> {
    let relay = Arc::new(RelayConnection::new(config.relay_url.clone()));
    relay
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", config.relay_url))?;

    let directory = Arc::new(
        Nip05Directory::new(config.directory_url.clone())
            .context("Failed to build directory client")?,
    );
    let (settings_tx, settings_rx) = watch::channel(options.settings(config.filter));
    tracing::info!(filter = %settings_tx.borrow().describe(), "starting feed");

    let feed = FeedSession::new(
        relay.clone(),
        directory,
        stores.profiles.clone(),
        config.timeline_window_secs,
    );
    feed.start(settings_rx)
        .await
        .context("Failed to subscribe to the timeline")?;

    let mut notices = relay.notices();
    let deadline = tokio::time::sleep(Duration::from_secs(options.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            notice = notices.recv() => {
                if let Ok(notice) = notice {
                    eprintln!("relay notice: {}", notice);
                }
            }
        }
    }

    feed.stop().await;
    relay.disconnect().await;

    let notes: Vec<Value> = feed
        .timeline()
        .iter()
        .map(|note| note_json(note, &stores.profiles))
        .collect();
    Ok(json!({
        "relay": config.relay_url,
        "timeline": notes,
        "stats": feed.stats(),
    }))
}
