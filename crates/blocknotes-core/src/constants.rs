//! Application-wide constants
//!
//! Centralized location for magic strings and configuration values
//! that are used across multiple modules.

/// Default Nostr relay URL
pub const RELAY_URL: &str = "wss://relay.damus.io";

/// Default NIP-05 directory used for profile verification
pub const DIRECTORY_URL: &str = "https://www.nostr.directory";

/// How far back the timeline subscription reaches on start
pub const TIMELINE_WINDOW_SECS: u64 = 5 * 60; // 5 minutes

// Timeline buffer bounds
/// An insertion that grows the timeline past this length triggers a collapse.
pub const TIMELINE_CAPACITY: usize = 100;
/// Number of most recent events kept after a collapse.
pub const TIMELINE_RETAIN: usize = 80;

// Circle defaults
/// Storage key reserved for the built-in circle. Never written to disk.
pub const FOLLOWING_CIRCLE_KEY: &str = "";
pub const FOLLOWING_CIRCLE_NAME: &str = "Following";
pub const FOLLOWING_CIRCLE_COLOR: &str = "#e91e63";

// Logical table names inside the document database
pub const CIRCLES_TABLE: &str = "circles";
pub const PROFILES_TABLE: &str = "profiles";

/// Timeout applied to relay connect and directory lookups
pub const NETWORK_TIMEOUT_SECS: u64 = 10;

// Nostr event kinds used by blocknotes
pub mod kinds {
    /// Metadata (profiles)
    pub const METADATA: u16 = 0;
    /// Text note (timeline)
    pub const TEXT_NOTE: u16 = 1;
}
