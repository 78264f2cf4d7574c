//! Fetches kind:0 metadata for timeline authors, caches it and verifies the
//! claimed name against the directory in the background.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::directory::{verify_name, DirectoryLookup};
use super::relay::{RelayError, RelaySubscriber, Subscription, SubscriptionItem};
use crate::models::{Profile, ProfileDocument, Verification};
use crate::stats::{FeedCounter, SharedFeedStats};
use crate::store::{ProfileStore, StoreError};
use crate::validation::{sanitize_profile, unescape_text, validate_profile};

#[derive(Debug, Error)]
pub enum EnricherError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Inner<R, D> {
    relay: Arc<R>,
    directory: Arc<D>,
    profiles: ProfileStore,
    stats: SharedFeedStats,
    /// Authors with an open profile subscription
    in_flight: Mutex<HashSet<String>>,
    /// Profile subscription and verification tasks
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Resolves author profiles into the profile cache.
///
/// Authors with any cached record are never fetched again, and an
/// author whose fetch is still open is not fetched twice.
pub struct ProfileEnricher<R, D> {
    inner: Arc<Inner<R, D>>,
}

impl<R, D> Clone for ProfileEnricher<R, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: RelaySubscriber, D: DirectoryLookup> ProfileEnricher<R, D> {
    pub fn new(
        relay: Arc<R>,
        directory: Arc<D>,
        profiles: ProfileStore,
        stats: SharedFeedStats,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                relay,
                directory,
                profiles,
                stats,
                in_flight: Mutex::new(HashSet::new()),
                tasks: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Open one kind:0 subscription for authors with no cached record.
    ///
    /// Returns the authors actually requested; empty means no subscription
    /// was opened. The subscription closes itself on its EOSE.
    pub async fn fetch_profiles<I>(&self, authors: I) -> Result<Vec<String>, EnricherError>
    where
        I: IntoIterator<Item = String>,
    {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut wanted = Vec::new();
        for author in authors {
            if !seen.insert(author.clone()) || self.inner.profiles.contains(&author)? {
                continue;
            }
            wanted.push(author);
        }

        let (requested, keys) = {
            let mut in_flight = self.inner.in_flight.lock();
            let mut requested = Vec::new();
            let mut keys = Vec::new();
            for author in wanted {
                if in_flight.contains(&author) {
                    continue;
                }
                match PublicKey::from_hex(&author) {
                    Ok(key) => {
                        in_flight.insert(author.clone());
                        requested.push(author);
                        keys.push(key);
                    }
                    Err(e) => tracing::warn!(author, error = %e, "skipping malformed author"),
                }
            }
            (requested, keys)
        };

        if requested.is_empty() {
            return Ok(requested);
        }

        let filter = Filter::new().kind(Kind::Metadata).authors(keys);
        let subscription = match self.inner.relay.subscribe(filter).await {
            Ok(sub) => sub,
            Err(e) => {
                self.inner.release(&requested);
                return Err(e.into());
            }
        };

        tracing::debug!(
            subscription = subscription.id(),
            authors = requested.len(),
            "fetching profiles"
        );
        self.inner.stats.record(FeedCounter::ProfileFetch);

        let inner = self.inner.clone();
        let authors = requested.clone();
        Inner::spawn(&self.inner, async move {
            inner.consume(subscription, &authors).await;
        });

        Ok(requested)
    }

    /// Abort every open profile subscription and pending verification
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        let aborted = tasks.iter().filter(|t| !t.is_finished()).count();
        for task in tasks {
            task.abort();
        }
        self.inner.in_flight.lock().clear();
        tracing::debug!(aborted, "profile enricher shut down");
    }

    /// Tasks not yet finished
    pub fn pending_tasks(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.inner.profiles
    }
}

impl<R: RelaySubscriber, D: DirectoryLookup> Inner<R, D> {
    fn spawn<F>(this: &Arc<Self>, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = this.tasks.lock();
        if this.shut_down.load(Ordering::SeqCst) {
            return;
        }
        tasks.retain(|t| !t.is_finished());
        tasks.push(tokio::spawn(task));
    }

    fn release(&self, authors: &[String]) {
        let mut in_flight = self.in_flight.lock();
        for author in authors {
            in_flight.remove(author);
        }
    }

    async fn consume(self: &Arc<Self>, mut subscription: Subscription, authors: &[String]) {
        while let Some(item) = subscription.next().await {
            match item {
                SubscriptionItem::Event(event) => self.handle_profile(&event),
                SubscriptionItem::Eose => {
                    subscription.unsubscribe();
                    break;
                }
            }
        }
        self.release(authors);
    }

    fn handle_profile(self: &Arc<Self>, event: &Event) {
        if !validate_profile(event, Timestamp::now().as_u64()) {
            self.stats.record(FeedCounter::ProfileRejected);
            return;
        }

        let record = sanitize_profile(event);
        let document = match ProfileDocument::parse(&record.content) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(pubkey = %record.pubkey, error = %e, "unparseable profile");
                self.stats.record(FeedCounter::ProfileRejected);
                return;
            }
        };

        let profile = Profile::from_document(record.pubkey, record.id, document);
        let stored = match self.profiles.upsert_fetched(profile) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "failed to cache profile");
                return;
            }
        };
        self.stats.record(FeedCounter::ProfileParsed);

        let Some(event_id) = stored.event_id.clone() else {
            return;
        };
        let inner = self.clone();
        Inner::spawn(self, async move {
            inner.verify(stored, event_id).await;
        });
    }

    async fn verify(&self, profile: Profile, event_id: String) {
        // The cached name is escaped for display; the directory knows the raw one
        let name = profile.name.as_deref().map(unescape_text);
        let verdict = verify_name(self.directory.as_ref(), name.as_deref(), &profile.pubkey).await;

        match self
            .profiles
            .apply_verification(&profile.pubkey, &event_id, verdict)
        {
            Ok(true) => {
                self.stats.record(match verdict {
                    Verification::Verified => FeedCounter::Verified,
                    _ => FeedCounter::Unverified,
                });
                tracing::debug!(pubkey = %profile.pubkey, ?verdict, "profile verified");
            }
            Ok(false) => {
                self.stats.record(FeedCounter::StaleVerification);
                tracing::debug!(pubkey = %profile.pubkey, "discarding stale verification");
            }
            Err(e) => tracing::warn!(pubkey = %profile.pubkey, error = %e, "failed to store verification"),
        }
    }
}
