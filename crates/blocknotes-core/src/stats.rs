use std::sync::{Arc, RwLock};

use serde::Serialize;

/// Counters for what happened to envelopes and profiles during a feed session
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    /// Timeline envelopes delivered by the relay
    pub received: u64,
    /// Dropped because the feed was paused
    pub paused: u64,
    /// Failed structural or signature validation
    pub invalid: u64,
    /// Rejected by the spam/invoice filter
    pub filtered: u64,
    /// Redelivered ids already present in the timeline
    pub duplicates: u64,
    pub inserted: u64,
    /// Profile subscriptions opened (batch and incremental)
    pub profile_fetches: u64,
    pub profiles_parsed: u64,
    pub profiles_rejected: u64,
    pub verified: u64,
    pub unverified: u64,
    /// Verification results discarded because the profile changed meanwhile
    pub stale_verifications: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum FeedCounter {
    Received,
    Paused,
    Invalid,
    Filtered,
    Duplicate,
    Inserted,
    ProfileFetch,
    ProfileParsed,
    ProfileRejected,
    Verified,
    Unverified,
    StaleVerification,
}

impl FeedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, counter: FeedCounter) {
        let slot = match counter {
            FeedCounter::Received => &mut self.received,
            FeedCounter::Paused => &mut self.paused,
            FeedCounter::Invalid => &mut self.invalid,
            FeedCounter::Filtered => &mut self.filtered,
            FeedCounter::Duplicate => &mut self.duplicates,
            FeedCounter::Inserted => &mut self.inserted,
            FeedCounter::ProfileFetch => &mut self.profile_fetches,
            FeedCounter::ProfileParsed => &mut self.profiles_parsed,
            FeedCounter::ProfileRejected => &mut self.profiles_rejected,
            FeedCounter::Verified => &mut self.verified,
            FeedCounter::Unverified => &mut self.unverified,
            FeedCounter::StaleVerification => &mut self.stale_verifications,
        };
        *slot += 1;
    }
}

/// Thread-safe wrapper for feed stats
#[derive(Debug, Clone)]
pub struct SharedFeedStats {
    inner: Arc<RwLock<FeedStats>>,
}

impl Default for SharedFeedStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedFeedStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(FeedStats::new())),
        }
    }

    pub fn record(&self, counter: FeedCounter) {
        if let Ok(mut stats) = self.inner.write() {
            stats.record(counter);
        }
    }

    pub fn snapshot(&self) -> FeedStats {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}
