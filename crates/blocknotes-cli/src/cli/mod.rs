pub mod commands;
pub mod config;
pub mod feed;

pub use commands::{circles, config_init, config_show, profiles, CircleAction, ProfileAction, StatusArg};
pub use config::{default_data_dir, resolve_config, ConfigOverrides};
pub use feed::{run_feed, FeedOptions};
