pub mod config;
pub mod constants;
pub mod models;
pub mod nostr;
pub mod stats;
pub mod store;
pub mod validation;

pub use config::{ConfigError, CoreConfig};
pub use models::{Circle, CircleEntry, CircleId, Profile, ProfileStatus, ValidatedEvent, Verification};
pub use nostr::{FeedSession, Nip05Directory, RelayConnection};
pub use stats::FeedStats;
pub use store::{Database, Stores};
pub use validation::FilterSettings;
