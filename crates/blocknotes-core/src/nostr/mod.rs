pub mod directory;
pub mod enricher;
pub mod feed;
pub mod relay;

pub use directory::{decide_verification, verify_name, DirectoryError, DirectoryLookup, Nip05Directory};
pub use enricher::{EnricherError, ProfileEnricher};
pub use feed::FeedSession;
pub use relay::{
    ConnectionState, RelayConnection, RelayError, RelaySubscriber, Subscription, SubscriptionItem,
};
