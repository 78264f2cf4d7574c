use serde::{Deserialize, Serialize};

use super::CircleId;
use crate::store::Document;

/// Outcome of checking a profile's name against the NIP-05 directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    /// Not checked yet, or a check is still in flight
    #[default]
    Unknown,
    Verified,
    /// Name maps to another key, or the directory could not answer
    Unverified,
}

/// Local relationship to a profile. Never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    #[default]
    Public,
    Follow,
    Block,
}

/// Content of a kind:0 metadata event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub nip05: Option<String>,
}

impl ProfileDocument {
    /// Parse event content. Non-objects and wrongly typed fields are errors.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

/// Cached profile, keyed by hex pubkey in the profiles table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub pubkey: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub nip05: Option<String>,
    #[serde(default)]
    pub verified: Verification,
    /// Id of the kind:0 event this record was parsed from.
    /// `None` for stubs created by following an unresolved pubkey.
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub status: ProfileStatus,
    /// Circle key, `None` meaning the Following circle
    #[serde(default)]
    pub circle: Option<String>,
    #[serde(default)]
    pub created: u64,
}

impl Profile {
    pub fn from_document(
        pubkey: impl Into<String>,
        event_id: impl Into<String>,
        doc: ProfileDocument,
    ) -> Self {
        Self {
            pubkey: pubkey.into(),
            name: doc.name,
            display_name: doc.display_name,
            about: doc.about,
            picture: doc.picture,
            nip05: doc.nip05,
            verified: Verification::Unknown,
            event_id: Some(event_id.into()),
            status: ProfileStatus::Public,
            circle: None,
            created: 0,
        }
    }

    /// Placeholder for a pubkey whose metadata has not been fetched
    pub fn stub(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            name: None,
            display_name: None,
            about: None,
            picture: None,
            nip05: None,
            verified: Verification::Unknown,
            event_id: None,
            status: ProfileStatus::Public,
            circle: None,
            created: 0,
        }
    }

    /// Whether metadata from the network has been parsed into this record
    pub fn is_resolved(&self) -> bool {
        self.event_id.is_some()
    }

    pub fn circle_id(&self) -> CircleId {
        CircleId::from_assignment(self.circle.as_deref())
    }

    /// Best label for display: display name, then name, then a short pubkey
    pub fn label(&self) -> String {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.pubkey.chars().take(12).collect())
    }

    /// Substring match over name, pubkey, about and nip05
    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        [
            self.name.as_deref(),
            Some(self.pubkey.as_str()),
            self.about.as_deref(),
            self.nip05.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.contains(text))
    }
}

impl Document for Profile {
    fn stamp_created(&mut self, created: u64) {
        self.created = created;
    }
}
