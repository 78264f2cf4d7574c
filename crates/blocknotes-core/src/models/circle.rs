use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{FOLLOWING_CIRCLE_COLOR, FOLLOWING_CIRCLE_KEY, FOLLOWING_CIRCLE_NAME};
use crate::store::Document;

/// A user-defined named grouping of followed identities.
///
/// The id is not part of the persisted document; it is the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub name: String,
    pub color: String,
    /// Unix seconds of the last write, stamped by the store
    #[serde(default)]
    pub created: u64,
}

impl Circle {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            created: 0,
        }
    }

    /// The built-in circle people land in when none is picked or theirs was deleted
    pub fn following() -> Self {
        Self::new(FOLLOWING_CIRCLE_NAME, FOLLOWING_CIRCLE_COLOR)
    }
}

impl Document for Circle {
    fn stamp_created(&mut self, created: u64) {
        self.created = created;
    }
}

/// Identifies a circle. `Following` is synthesized at read time and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CircleId {
    Following,
    Named(String),
}

impl CircleId {
    /// Map a storage/UI key to an id. The empty key is the Following circle.
    pub fn from_key(key: &str) -> Self {
        if key == FOLLOWING_CIRCLE_KEY {
            CircleId::Following
        } else {
            CircleId::Named(key.to_string())
        }
    }

    /// Map a profile's optional circle assignment to an id
    pub fn from_assignment(circle: Option<&str>) -> Self {
        circle.map(Self::from_key).unwrap_or(CircleId::Following)
    }

    /// The optional assignment stored on a profile (`None` for Following)
    pub fn into_assignment(self) -> Option<String> {
        match self {
            CircleId::Following => None,
            CircleId::Named(key) => Some(key),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CircleId::Following => FOLLOWING_CIRCLE_KEY,
            CircleId::Named(key) => key,
        }
    }

    pub fn is_following(&self) -> bool {
        matches!(self, CircleId::Following)
    }
}

impl fmt::Display for CircleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircleId::Following => write!(f, "{}", FOLLOWING_CIRCLE_NAME.to_lowercase()),
            CircleId::Named(key) => write!(f, "{}", key),
        }
    }
}

/// A circle together with its id, as yielded by circle listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleEntry {
    pub id: CircleId,
    pub circle: Circle,
}

impl CircleEntry {
    pub fn following() -> Self {
        Self {
            id: CircleId::Following,
            circle: Circle::following(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_is_following() {
        assert_eq!(CircleId::from_key(""), CircleId::Following);
        assert_eq!(CircleId::from_key("c1"), CircleId::Named("c1".to_string()));
        assert_eq!(CircleId::Following.key(), "");
    }

    #[test]
    fn test_assignment_mapping() {
        assert_eq!(CircleId::from_assignment(None), CircleId::Following);
        assert_eq!(CircleId::from_assignment(Some("")), CircleId::Following);
        assert_eq!(
            CircleId::from_assignment(Some("friends")).into_assignment(),
            Some("friends".to_string())
        );
        assert_eq!(CircleId::Following.into_assignment(), None);
    }

    #[test]
    fn test_created_defaults_when_missing() {
        let circle: Circle = serde_json::from_str(r##"{"name":"A","color":"#fff"}"##).unwrap();
        assert_eq!(circle.created, 0);
    }
}
