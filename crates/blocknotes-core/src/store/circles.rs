use uuid::Uuid;

use super::error::{Result, StoreError};
use super::keyed_store::KeyedStore;
use super::notifier::ChangeListener;
use super::Database;
use crate::constants::CIRCLES_TABLE;
use crate::models::{Circle, CircleEntry, CircleId};

/// The "circles" table. Listings always begin with the Following circle,
/// which is synthesized here and never persisted.
#[derive(Clone)]
pub struct CircleStore {
    table: KeyedStore<Circle>,
}

impl CircleStore {
    pub fn new(db: &Database) -> Self {
        Self {
            table: db.table(CIRCLES_TABLE),
        }
    }

    /// Every circle, Following first, then stored circles in key order
    pub fn list(&self) -> Result<Vec<CircleEntry>> {
        self.filter(|_| true)
    }

    /// Following, then the stored circles accepted by `predicate`.
    /// The predicate never sees Following and cannot exclude it.
    pub fn filter<F>(&self, mut predicate: F) -> Result<Vec<CircleEntry>>
    where
        F: FnMut(&CircleEntry) -> bool,
    {
        let mut entries = vec![CircleEntry::following()];

        for item in self.table.iter() {
            let (key, circle) = item?;
            let entry = CircleEntry {
                id: CircleId::from_key(&key),
                circle,
            };
            if predicate(&entry) {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    pub fn get(&self, id: &CircleId) -> Result<Option<Circle>> {
        match id {
            CircleId::Following => Ok(Some(Circle::following())),
            CircleId::Named(key) => self.table.get(key),
        }
    }

    /// Insert or replace a named circle. Following cannot be written.
    pub fn put(&self, id: &CircleId, circle: Circle) -> Result<Circle> {
        match id {
            CircleId::Following => Err(StoreError::ReservedKey(id.key().to_string())),
            CircleId::Named(key) => self.table.put(key, circle),
        }
    }

    /// Store a new circle under a freshly generated key
    pub fn create(&self, name: &str, color: &str) -> Result<CircleId> {
        let id = CircleId::Named(Uuid::new_v4().to_string());
        self.put(&id, Circle::new(name, color))?;
        tracing::info!(circle = %id, name, "created circle");
        Ok(id)
    }

    /// Remove a named circle. Deleting Following does nothing and signals nobody.
    pub fn delete(&self, id: &CircleId) -> Result<bool> {
        match id {
            CircleId::Following => Ok(false),
            CircleId::Named(key) => self.table.delete(key),
        }
    }

    /// Delete every stored circle; Following remains
    pub fn wipe(&self) -> Result<usize> {
        self.table.wipe_all()
    }

    pub fn changes(&self) -> ChangeListener {
        self.table.changes()
    }
}
