pub mod circles;
pub mod db;
pub mod error;
pub mod keyed_store;
pub mod notifier;
pub mod profiles;
pub mod timeline;

pub use circles::CircleStore;
pub use db::Database;
pub use error::{Result, StoreError};
pub use keyed_store::{Document, KeyedStore, StoreIter};
pub use notifier::{ChangeListener, ChangeNotifier};
pub use profiles::ProfileStore;
pub use timeline::TimelineBuffer;

use crate::models::CircleId;

/// Both persisted tables over one database
#[derive(Clone)]
pub struct Stores {
    pub circles: CircleStore,
    pub profiles: ProfileStore,
}

impl Stores {
    pub fn new(db: &Database) -> Self {
        Self {
            circles: CircleStore::new(db),
            profiles: ProfileStore::new(db),
        }
    }

    /// Delete a circle after moving its members back to Following
    pub fn remove_circle(&self, id: &CircleId) -> Result<bool> {
        if id.is_following() {
            return Ok(false);
        }
        let moved = self.profiles.release_circle(id.key())?;
        let removed = self.circles.delete(id)?;
        tracing::info!(circle = %id, moved, removed, "removed circle");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Circle;

    #[test]
    fn test_remove_circle_releases_members() {
        let stores = Stores::new(&Database::open_in_memory().unwrap());
        let id = stores.circles.create("Work", "#123456").unwrap();
        stores.profiles.follow("aa", id.clone()).unwrap();

        assert!(stores.remove_circle(&id).unwrap());
        assert!(stores.circles.get(&id).unwrap().is_none());
        assert!(stores
            .profiles
            .get("aa")
            .unwrap()
            .unwrap()
            .circle_id()
            .is_following());
    }

    #[test]
    fn test_remove_following_is_noop() {
        let stores = Stores::new(&Database::open_in_memory().unwrap());
        assert!(!stores.remove_circle(&CircleId::Following).unwrap());
        assert_eq!(
            stores.circles.get(&CircleId::Following).unwrap(),
            Some(Circle::following())
        );
    }
}
