use std::path::Path;

use anyhow::{bail, Context, Result};
use blocknotes_core::models::{CircleEntry, CircleId, Profile, ProfileStatus};
use blocknotes_core::{CoreConfig, Stores};
use clap::{Subcommand, ValueEnum};
use serde_json::{json, Value};

const DEFAULT_CIRCLE_COLOR: &str = "#607d8b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Follow,
    Public,
    Block,
}

impl From<StatusArg> for ProfileStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Follow => ProfileStatus::Follow,
            StatusArg::Public => ProfileStatus::Public,
            StatusArg::Block => ProfileStatus::Block,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum CircleAction {
    /// List circles, Following first
    List,
    /// Create a circle
    Add {
        name: String,
        /// CSS color, e.g. "#00ff00"
        #[arg(long, default_value = DEFAULT_CIRCLE_COLOR)]
        color: String,
    },
    /// Delete a circle; its members move back to Following
    Remove {
        /// Circle id as shown by `circles list`
        id: String,
    },
    /// Delete every circle
    Wipe,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ProfileAction {
    /// List cached profiles, optionally by status
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Search name, pubkey, about and nip05
    Search {
        text: String,
        #[arg(long, value_enum, default_value = "public")]
        status: StatusArg,
    },
    /// Follow a pubkey (hex or npub), optionally into a circle
    Follow {
        pubkey: String,
        #[arg(long)]
        circle: Option<String>,
    },
    /// Block a cached profile
    Block { pubkey: String },
    /// Move a cached profile into a circle ("" for Following)
    Assign { pubkey: String, circle: String },
    /// Delete every cached profile
    Wipe,
}

fn circle_json(entry: &CircleEntry) -> Value {
    json!({
        "id": entry.id.key(),
        "name": entry.circle.name,
        "color": entry.circle.color,
        "created": entry.circle.created,
    })
}

fn profile_json(profile: &Profile) -> Result<Value> {
    serde_json::to_value(profile).context("Failed to serialize profile")
}

fn profiles_json(profiles: &[Profile]) -> Result<Value> {
    Ok(Value::Array(
        profiles.iter().map(profile_json).collect::<Result<_>>()?,
    ))
}

/// Accept hex or bech32 pubkeys, always returning hex
fn normalize_pubkey(input: &str) -> Result<String> {
    let key = nostr_sdk::PublicKey::parse(input)
        .with_context(|| format!("Invalid pubkey: {}", input))?;
    Ok(key.to_hex())
}

/// Circle ids from the command line must name a stored circle (or "")
fn existing_circle(stores: &Stores, key: &str) -> Result<CircleId> {
    let id = CircleId::from_key(key);
    if stores.circles.get(&id)?.is_none() {
        bail!("No circle with id {:?}", key);
    }
    Ok(id)
}

pub fn circles(stores: &Stores, action: CircleAction) -> Result<Value> {
    match action {
        CircleAction::List => {
            let entries = stores.circles.list()?;
            Ok(Value::Array(entries.iter().map(circle_json).collect()))
        }
        CircleAction::Add { name, color } => {
            let id = stores.circles.create(&name, &color)?;
            Ok(json!({ "id": id.key(), "name": name, "color": color }))
        }
        CircleAction::Remove { id } => {
            let id = CircleId::from_key(&id);
            if id.is_following() {
                bail!("The Following circle cannot be removed");
            }
            let removed = stores.remove_circle(&id)?;
            Ok(json!({ "id": id.key(), "removed": removed }))
        }
        CircleAction::Wipe => {
            let removed = stores.circles.wipe()?;
            Ok(json!({ "removed": removed }))
        }
    }
}

pub fn profiles(stores: &Stores, action: ProfileAction) -> Result<Value> {
    let store = &stores.profiles;
    match action {
        ProfileAction::List { status: None } => profiles_json(&store.all()?),
        ProfileAction::List {
            status: Some(status),
        } => profiles_json(&store.search(status.into(), "")?),
        ProfileAction::Search { text, status } => {
            profiles_json(&store.search(status.into(), &text)?)
        }
        ProfileAction::Follow { pubkey, circle } => {
            let pubkey = normalize_pubkey(&pubkey)?;
            let circle = match circle {
                Some(key) => existing_circle(stores, &key)?,
                None => CircleId::Following,
            };
            profile_json(&store.follow(&pubkey, circle)?)
        }
        ProfileAction::Block { pubkey } => {
            let pubkey = normalize_pubkey(&pubkey)?;
            profile_json(&store.set_status(&pubkey, ProfileStatus::Block)?)
        }
        ProfileAction::Assign { pubkey, circle } => {
            let pubkey = normalize_pubkey(&pubkey)?;
            let circle = existing_circle(stores, &circle)?;
            profile_json(&store.assign_circle(&pubkey, circle)?)
        }
        ProfileAction::Wipe => {
            let removed = store.wipe()?;
            Ok(json!({ "removed": removed }))
        }
    }
}

/// Write the effective config to `path`, refusing to overwrite
pub fn config_init(config: &CoreConfig, path: &Path) -> Result<Value> {
    if path.exists() {
        bail!("Config already exists at {}", path.display());
    }
    config.save(path)?;
    Ok(json!({ "written": path.display().to_string() }))
}

pub fn config_show(config: &CoreConfig) -> Result<Value> {
    serde_json::to_value(config).context("Failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocknotes_core::store::Database;
    use nostr_sdk::nips::nip19::ToBech32;
    use nostr_sdk::Keys;
    use tempfile::tempdir;

    fn stores() -> Stores {
        Stores::new(&Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_circle_lifecycle() {
        let stores = stores();
        let added = circles(
            &stores,
            CircleAction::Add {
                name: "Friends".to_string(),
                color: "#00ff00".to_string(),
            },
        )
        .unwrap();
        let id = added["id"].as_str().unwrap().to_string();

        let listed = circles(&stores, CircleAction::List).unwrap();
        assert_eq!(listed[0]["name"], "Following");
        assert_eq!(listed[1]["id"], id.as_str());

        let removed = circles(&stores, CircleAction::Remove { id }).unwrap();
        assert_eq!(removed["removed"], true);
        assert_eq!(circles(&stores, CircleAction::List).unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_following_cannot_be_removed() {
        let stores = stores();
        assert!(circles(&stores, CircleAction::Remove { id: String::new() }).is_err());
    }

    #[test]
    fn test_follow_accepts_npub_and_block() {
        let stores = stores();
        let keys = Keys::generate();
        let npub = keys.public_key().to_bech32().unwrap();

        let followed = profiles(
            &stores,
            ProfileAction::Follow {
                pubkey: npub,
                circle: None,
            },
        )
        .unwrap();
        assert_eq!(followed["pubkey"], keys.public_key().to_hex());
        assert_eq!(followed["status"], "follow");

        let hex = keys.public_key().to_hex();
        profiles(&stores, ProfileAction::Block { pubkey: hex }).unwrap();
        let blocked = profiles(
            &stores,
            ProfileAction::List {
                status: Some(StatusArg::Block),
            },
        )
        .unwrap();
        assert_eq!(blocked.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_follow_into_unknown_circle_fails() {
        let stores = stores();
        let pubkey = Keys::generate().public_key().to_hex();
        let result = profiles(
            &stores,
            ProfileAction::Follow {
                pubkey,
                circle: Some("missing".to_string()),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_init_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = CoreConfig::new(dir.path());

        config_init(&config, &path).unwrap();
        assert!(config_init(&config, &path).is_err());
        assert_eq!(config_show(&config).unwrap()["relayUrl"], config.relay_url);
    }
}
