//! The home timeline: one kind:1 subscription feeding the timeline buffer,
//! with author profiles resolved on the side.

use std::sync::Arc;

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::directory::DirectoryLookup;
use super::enricher::ProfileEnricher;
use super::relay::{RelayError, RelaySubscriber, Subscription, SubscriptionItem};
use crate::models::ValidatedEvent;
use crate::stats::{FeedCounter, FeedStats, SharedFeedStats};
use crate::store::{ChangeListener, ChangeNotifier, ProfileStore, TimelineBuffer};
use crate::validation::{filter_event, sanitize_event, validate_event, FilterSettings};

struct FeedState {
    timeline: Mutex<TimelineBuffer>,
    notifier: ChangeNotifier,
    stats: SharedFeedStats,
}

/// Lifecycle of the timeline subscription.
///
/// Until the first EOSE, authors are collected and fetched in one batch;
/// afterwards each new note triggers a fetch for its author if needed.
pub struct FeedSession<R, D> {
    relay: Arc<R>,
    enricher: ProfileEnricher<R, D>,
    state: Arc<FeedState>,
    window_secs: u64,
    cancel_tx: watch::Sender<bool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RelaySubscriber, D: DirectoryLookup> FeedSession<R, D> {
    pub fn new(relay: Arc<R>, directory: Arc<D>, profiles: ProfileStore, window_secs: u64) -> Self {
        let stats = SharedFeedStats::new();
        let enricher = ProfileEnricher::new(relay.clone(), directory, profiles, stats.clone());
        let (cancel_tx, _) = watch::channel(false);
        Self {
            relay,
            enricher,
            state: Arc::new(FeedState {
                timeline: Mutex::new(TimelineBuffer::new()),
                notifier: ChangeNotifier::new(),
                stats,
            }),
            window_secs,
            cancel_tx,
            pump: Mutex::new(None),
        }
    }

    /// Subscribe to text notes from the last `window_secs` onwards.
    ///
    /// `settings` is read on every envelope and a change re-filters the buffer.
    pub async fn start(&self, settings: watch::Receiver<FilterSettings>) -> Result<(), RelayError> {
        if self.is_running() {
            return Ok(());
        }

        let since = Timestamp::now().as_u64().saturating_sub(self.window_secs);
        let filter = Filter::new()
            .kind(Kind::TextNote)
            .since(Timestamp::from(since));
        let subscription = self.relay.subscribe(filter).await?;
        tracing::info!(subscription = subscription.id(), since, "timeline subscribed");

        self.cancel_tx.send_replace(false);
        let pump = Pump {
            state: self.state.clone(),
            enricher: self.enricher.clone(),
            settings,
            initial_load_done: false,
        };
        let task = tokio::spawn(pump.run(subscription, self.cancel_tx.subscribe()));
        *self.pump.lock() = Some(task);
        Ok(())
    }

    /// Unsubscribe the timeline, then abort every profile fetch and verification
    pub async fn stop(&self) {
        self.cancel_tx.send_replace(true);
        let task = self.pump.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "timeline task ended abnormally");
            }
        }
        self.enricher.shutdown();
        tracing::info!("feed stopped");
    }

    pub fn is_running(&self) -> bool {
        self.pump
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Buffered notes, newest first
    pub fn timeline(&self) -> Vec<ValidatedEvent> {
        self.state.timeline.lock().snapshot()
    }

    /// Signalled whenever the timeline buffer changes
    pub fn changes(&self) -> ChangeListener {
        self.state.notifier.subscribe()
    }

    pub fn stats(&self) -> FeedStats {
        self.state.stats.snapshot()
    }

    pub fn enricher(&self) -> &ProfileEnricher<R, D> {
        &self.enricher
    }
}

struct Pump<R, D> {
    state: Arc<FeedState>,
    enricher: ProfileEnricher<R, D>,
    settings: watch::Receiver<FilterSettings>,
    initial_load_done: bool,
}

impl<R: RelaySubscriber, D: DirectoryLookup> Pump<R, D> {
    async fn run(mut self, mut subscription: Subscription, mut cancel_rx: watch::Receiver<bool>) {
        let mut settings_open = true;

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        break;
                    }
                }
                changed = self.settings.changed(), if settings_open => {
                    if changed.is_err() {
                        // Settings owner went away; keep the last values
                        settings_open = false;
                        continue;
                    }
                    let settings = *self.settings.borrow_and_update();
                    self.refilter(&settings);
                }
                item = subscription.next() => match item {
                    Some(SubscriptionItem::Event(event)) => self.on_event(&event).await,
                    Some(SubscriptionItem::Eose) => self.on_eose().await,
                    None => {
                        tracing::warn!("timeline subscription ended");
                        break;
                    }
                },
            }
        }

        subscription.unsubscribe();
        tracing::debug!(subscription = subscription.id(), "timeline unsubscribed");
    }

    async fn on_event(&mut self, event: &Event) {
        let stats = &self.state.stats;
        stats.record(FeedCounter::Received);

        let settings = *self.settings.borrow();
        if settings.paused {
            stats.record(FeedCounter::Paused);
            return;
        }
        if !validate_event(event, Timestamp::now().as_u64()) {
            stats.record(FeedCounter::Invalid);
            return;
        }

        let mut record = sanitize_event(event);
        record.allowed = filter_event(&record, &settings);
        if !record.allowed {
            stats.record(FeedCounter::Filtered);
            return;
        }

        if self.initial_load_done {
            self.fetch(vec![record.pubkey.clone()]).await;
        }

        let inserted = self.state.timeline.lock().insert(record);
        if inserted {
            stats.record(FeedCounter::Inserted);
            self.state.notifier.notify();
        } else {
            stats.record(FeedCounter::Duplicate);
        }
    }

    async fn on_eose(&mut self) {
        self.initial_load_done = true;
        let authors = self.state.timeline.lock().authors();
        tracing::info!(authors = authors.len(), "initial timeline loaded");
        self.fetch(authors).await;
    }

    async fn fetch(&self, authors: Vec<String>) {
        if let Err(e) = self.enricher.fetch_profiles(authors).await {
            tracing::warn!(error = %e, "profile fetch failed");
        }
    }

    fn refilter(&self, settings: &FilterSettings) {
        let dropped = self.state.timeline.lock().reapply(settings);
        tracing::debug!(dropped, settings = %settings.describe(), "timeline refiltered");
        if dropped > 0 {
            self.state.notifier.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::models::{Profile, ProfileDocument};
    use crate::nostr::enricher::testing::*;
    use crate::store::Database;

    struct Harness {
        relay: Arc<FakeRelay>,
        profiles: ProfileStore,
        settings: watch::Sender<FilterSettings>,
        feed: FeedSession<FakeRelay, FakeDirectory>,
    }

    async fn started() -> Harness {
        let relay = Arc::new(FakeRelay::new());
        let profiles = ProfileStore::new(&Database::open_in_memory().unwrap());
        let feed = FeedSession::new(
            relay.clone(),
            Arc::new(FakeDirectory::default()),
            profiles.clone(),
            300,
        );
        let (settings, settings_rx) = watch::channel(FilterSettings::default());
        feed.start(settings_rx).await.unwrap();
        Harness {
            relay,
            profiles,
            settings,
            feed,
        }
    }

    fn note(keys: &Keys, content: &str) -> Event {
        EventBuilder::new(Kind::TextNote, content)
            .sign_with_keys(keys)
            .unwrap()
    }

    fn requested_authors(relay: &FakeRelay, index: usize) -> HashSet<String> {
        relay.filters.lock()[index]
            .authors
            .as_ref()
            .map(|set| set.iter().map(|pk| pk.to_hex()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_timeline_filter_reaches_back_window() {
        let h = started().await;
        let filters = h.relay.filters.lock();
        assert_eq!(filters.len(), 1);
        let since = filters[0].since.unwrap().as_u64();
        let now = Timestamp::now().as_u64();
        assert!(since <= now - 299 && since >= now - 310);
    }

    #[tokio::test]
    async fn test_valid_notes_are_buffered_newest_first() {
        let h = started().await;
        let keys = Keys::generate();
        let first = note(&keys, "first");
        let second = note(&keys, "second");

        h.relay.push_event(0, first.clone());
        h.relay.push_event(0, second.clone());
        h.relay.push_event(0, first);

        assert!(wait_until(|| h.feed.stats().received == 3).await);
        let timeline = h.feed.timeline();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].id, second.id.to_hex());
        assert_eq!(h.feed.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_invalid_and_paused_envelopes_do_not_mutate() {
        let h = started().await;
        let keys = Keys::generate();
        let mut forged = note(&keys, "real");
        forged.content = "forged".to_string();

        h.relay.push_event(0, forged.clone());
        assert!(wait_until(|| h.feed.stats().invalid == 1).await);

        h.settings.send_modify(|s| s.paused = true);
        h.relay.push_event(0, note(&keys, "while paused"));
        h.relay.push_event(0, forged);
        assert!(wait_until(|| h.feed.stats().paused == 2).await);

        assert!(h.feed.timeline().is_empty());
        assert_eq!(h.feed.stats().invalid, 1);
        assert!(h.profiles.all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filtered_notes_are_not_buffered() {
        let h = started().await;
        h.settings.send_modify(|s| s.hide_invoice = true);
        let keys = Keys::generate();

        h.relay.push_event(0, note(&keys, "pay lnbc20u1xyz"));
        h.relay.push_event(0, note(&keys, "hello"));

        assert!(wait_until(|| h.feed.stats().received == 2).await);
        assert_eq!(h.feed.stats().filtered, 1);
        assert_eq!(h.feed.timeline().len(), 1);
    }

    #[tokio::test]
    async fn test_eose_fetches_uncached_buffer_authors() {
        let h = started().await;
        let authors: Vec<Keys> = (0..5).map(|_| Keys::generate()).collect();
        for keys in &authors[..3] {
            h.profiles
                .upsert_fetched(Profile::from_document(
                    keys.public_key().to_hex(),
                    "cached",
                    ProfileDocument::default(),
                ))
                .unwrap();
        }
        for keys in &authors {
            h.relay.push_event(0, note(keys, "hi"));
        }
        h.relay.push(0, SubscriptionItem::Eose);

        assert!(wait_until(|| h.relay.subscriptions() == 2).await);
        let expected: HashSet<String> = authors[3..]
            .iter()
            .map(|k| k.public_key().to_hex())
            .collect();
        assert_eq!(requested_authors(&h.relay, 1), expected);
    }

    #[tokio::test]
    async fn test_no_fetch_before_initial_load() {
        let h = started().await;
        h.relay.push_event(0, note(&Keys::generate(), "hi"));
        assert!(wait_until(|| h.feed.stats().inserted == 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.relay.subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_live_note_fetches_its_author_alone() {
        let h = started().await;
        h.relay.push(0, SubscriptionItem::Eose);

        let cached = Keys::generate();
        h.profiles
            .upsert_fetched(Profile::from_document(
                cached.public_key().to_hex(),
                "cached",
                ProfileDocument::default(),
            ))
            .unwrap();
        let fresh = Keys::generate();

        h.relay.push_event(0, note(&cached, "known"));
        h.relay.push_event(0, note(&fresh, "new"));

        assert!(wait_until(|| h.feed.stats().inserted == 2).await);
        assert_eq!(h.relay.subscriptions(), 2);
        let expected: HashSet<String> = [fresh.public_key().to_hex()].into_iter().collect();
        assert_eq!(requested_authors(&h.relay, 1), expected);
    }

    #[tokio::test]
    async fn test_settings_change_refilters_buffer() {
        let h = started().await;
        let keys = Keys::generate();
        h.relay.push_event(0, note(&keys, "!".repeat(60).as_str()));
        h.relay.push_event(0, note(&keys, "fine"));
        assert!(wait_until(|| h.feed.timeline().len() == 2).await);

        let mut changes = h.feed.changes();
        h.settings.send_modify(|s| s.hide_spam = true);

        assert!(tokio::time::timeout(Duration::from_secs(2), changes.changed())
            .await
            .unwrap());
        assert!(wait_until(|| h.feed.timeline().len() == 1).await);
        assert_eq!(h.feed.timeline()[0].content, "fine");
    }

    #[tokio::test]
    async fn test_stop_unsubscribes_timeline_and_profiles() {
        let h = started().await;
        h.relay.push(0, SubscriptionItem::Eose);
        h.relay.push_event(0, note(&Keys::generate(), "hi"));
        assert!(wait_until(|| h.relay.subscriptions() == 2).await);

        h.feed.stop().await;
        assert!(!h.feed.is_running());

        let mut closed = Vec::new();
        assert!(
            wait_until(|| {
                closed.extend(h.relay.closed());
                closed.len() == 2
            })
            .await
        );
        closed.sort();
        assert_eq!(closed, vec!["sub0".to_string(), "sub1".to_string()]);
        assert_eq!(h.feed.enricher().pending_tasks(), 0);
    }
}
