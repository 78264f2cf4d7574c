use std::collections::VecDeque;
use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::db::Database;
use super::error::{Result, StoreError};
use super::notifier::{ChangeListener, ChangeNotifier};

/// Rows fetched per round trip while iterating
const PAGE_SIZE: usize = 64;

/// Get current Unix timestamp in seconds
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A JSON document that can live in a [`KeyedStore`].
pub trait Document: Serialize + DeserializeOwned + Send + 'static {
    /// Overwrite the write timestamp. Called by the store on every put.
    fn stamp_created(&mut self, created: u64);
}

/// Persisted, key-ordered table of JSON documents.
///
/// Every mutating call signals the table's [`ChangeNotifier`]. All views of
/// the same table name share the connection and the notifier.
pub struct KeyedStore<T> {
    db: Database,
    table: String,
    notifier: ChangeNotifier,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for KeyedStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            table: self.table.clone(),
            notifier: self.notifier.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> KeyedStore<T> {
    pub fn new(db: Database, table: impl Into<String>) -> Self {
        let table = table.into();
        let notifier = db.notifier(&table);
        Self {
            db,
            table,
            notifier,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    /// Register for change signals on this table
    pub fn changes(&self) -> ChangeListener {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Upsert `value` under `key`. The `created` field is always replaced by
    /// the current time. Returns the document as stored.
    pub fn put(&self, key: &str, mut value: T) -> Result<T> {
        value.stamp_created(now_secs());
        let json = serde_json::to_string(&value)?;

        self.db.conn().execute(
            "INSERT INTO documents (tbl, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(tbl, key) DO UPDATE SET value = excluded.value",
            params![self.table, key, json],
        )?;

        tracing::debug!(table = %self.table, key, "put document");
        self.notifier.notify();
        Ok(value)
    }

    /// Read, modify and write `key` while holding the connection.
    ///
    /// `f` sees the current document (if any) and returns the replacement, or
    /// `None` to leave the row untouched. Returns the stored document when a
    /// write happened. No other writer can land between the read and the write.
    pub fn update<F>(&self, key: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let stored = {
            let conn = self.db.conn();
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM documents WHERE tbl = ?1 AND key = ?2",
                    params![self.table, key],
                    |row| row.get(0),
                )
                .optional()?;
            let current = raw.map(|json| self.decode(key, &json)).transpose()?;

            let Some(mut value) = f(current) else {
                return Ok(None);
            };
            value.stamp_created(now_secs());
            let json = serde_json::to_string(&value)?;
            conn.execute(
                "INSERT INTO documents (tbl, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tbl, key) DO UPDATE SET value = excluded.value",
                params![self.table, key, json],
            )?;
            value
        };

        tracing::debug!(table = %self.table, key, "updated document");
        self.notifier.notify();
        Ok(Some(stored))
    }

    pub fn get(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .db
            .conn()
            .query_row(
                "SELECT value FROM documents WHERE tbl = ?1 AND key = ?2",
                params![self.table, key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| self.decode(key, &json)).transpose()
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM documents WHERE tbl = ?1 AND key = ?2",
                params![self.table, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Remove `key`. Returns whether a document was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.delete_row(key)?;
        tracing::debug!(table = %self.table, key, removed, "delete document");
        self.notifier.notify();
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM documents WHERE tbl = ?1",
            params![self.table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Lazy key-ordered sequence of every document.
    ///
    /// Rows are fetched a page at a time; writes made while iterating are seen
    /// if their key sorts after the current position.
    pub fn iter(&self) -> StoreIter<T> {
        StoreIter {
            store: self.clone(),
            after: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Lazy sequence of the documents accepted by `predicate(value, key)`.
    /// Errors are always passed through.
    pub fn iterate<F>(&self, mut predicate: F) -> impl Iterator<Item = Result<(String, T)>>
    where
        F: FnMut(&T, &str) -> bool,
    {
        self.iter().filter(move |item| match item {
            Ok((key, value)) => predicate(value, key),
            Err(_) => true,
        })
    }

    /// Collect the documents accepted by `predicate`
    pub fn filter<F>(&self, predicate: F) -> Result<Vec<(String, T)>>
    where
        F: FnMut(&T, &str) -> bool,
    {
        self.iterate(predicate).collect()
    }

    /// Delete every document one key at a time, then notify once.
    ///
    /// Not transactional: on failure the keys deleted so far stay deleted and
    /// the error is returned. Returns the number of removed documents.
    pub fn wipe_all(&self) -> Result<usize> {
        let keys = self.keys()?;
        let mut removed = 0;

        for key in &keys {
            match self.delete_row(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(table = %self.table, removed, error = %e, "wipe aborted");
                    if removed > 0 {
                        self.notifier.notify();
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(table = %self.table, removed, "wiped table");
        self.notifier.notify();
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT key FROM documents WHERE tbl = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![self.table], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    fn delete_row(&self, key: &str) -> Result<bool> {
        let changed = self.db.conn().execute(
            "DELETE FROM documents WHERE tbl = ?1 AND key = ?2",
            params![self.table, key],
        )?;
        Ok(changed > 0)
    }

    fn fetch_page(&self, after: Option<&str>) -> Result<Vec<(String, String)>> {
        let conn = self.db.conn();
        let rows = match after {
            None => {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM documents WHERE tbl = ?1 ORDER BY key LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![self.table, PAGE_SIZE as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            Some(after) => {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM documents WHERE tbl = ?1 AND key > ?2 ORDER BY key LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![self.table, after, PAGE_SIZE as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    fn decode(&self, key: &str, json: &str) -> Result<T> {
        serde_json::from_str(json).map_err(|source| StoreError::Corrupt {
            table: self.table.clone(),
            key: key.to_string(),
            source,
        })
    }
}

/// Paged cursor over a [`KeyedStore`], see [`KeyedStore::iter`]
pub struct StoreIter<T> {
    store: KeyedStore<T>,
    after: Option<String>,
    page: VecDeque<(String, String)>,
    exhausted: bool,
}

impl<T: Document> Iterator for StoreIter<T> {
    type Item = Result<(String, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            match self.store.fetch_page(self.after.as_deref()) {
                Ok(rows) => {
                    self.exhausted = rows.len() < PAGE_SIZE;
                    if let Some((last, _)) = rows.last() {
                        self.after = Some(last.clone());
                    }
                    self.page.extend(rows);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let (key, json) = self.page.pop_front()?;
        Some(self.store.decode(&key, &json).map(|value| (key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
        #[serde(default)]
        created: u64,
    }

    impl Note {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                created: 0,
            }
        }
    }

    impl Document for Note {
        fn stamp_created(&mut self, created: u64) {
            self.created = created;
        }
    }

    fn store() -> KeyedStore<Note> {
        Database::open_in_memory().unwrap().table("notes")
    }

    #[test]
    fn test_put_stamps_created_at_call_time() {
        let store = store();
        let mut note = Note::new("hello");
        note.created = 42;

        let before = now_secs();
        let stored = store.put("n1", note).unwrap();
        let after = now_secs();

        assert!(stored.created >= before && stored.created <= after);
        let fetched = store.get("n1").unwrap().unwrap();
        assert_eq!(fetched.created, stored.created);
        assert_ne!(fetched.created, 42);
    }

    #[test]
    fn test_put_is_upsert() {
        let store = store();
        store.put("c1", Note::new("A")).unwrap();
        store.put("c1", Note::new("B")).unwrap();

        let all: Vec<_> = store.iter().collect::<Result<_>>().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "c1");
        assert_eq!(all[0].1.text, "B");
    }

    #[test]
    fn test_update_skips_write_when_closure_declines() {
        let store = store();
        store.put("k", Note::new("v1")).unwrap();
        let generation = store.notifier().generation();

        let unchanged = store.update("k", |_| None).unwrap();
        assert!(unchanged.is_none());
        assert_eq!(store.notifier().generation(), generation);

        let written = store
            .update("k", |current| {
                let mut note = current?;
                note.text.push_str("+v2");
                Some(note)
            })
            .unwrap()
            .unwrap();
        assert_eq!(written.text, "v1+v2");
        assert_eq!(store.get("k").unwrap().unwrap().text, "v1+v2");
        assert_eq!(store.notifier().generation(), generation + 1);

        let created = store.update("new", |current| {
            assert!(current.is_none());
            Some(Note::new("fresh"))
        });
        assert_eq!(created.unwrap().unwrap().text, "fresh");
    }

    #[test]
    fn test_get_missing_and_delete() {
        let store = store();
        assert!(store.get("nope").unwrap().is_none());

        store.put("k", Note::new("v")).unwrap();
        assert!(store.contains("k").unwrap());
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(!store.contains("k").unwrap());
    }

    #[test]
    fn test_iter_is_key_ordered_across_pages() {
        let store = store();
        let total = PAGE_SIZE * 2 + 5;
        for i in (0..total).rev() {
            store.put(&format!("k{:04}", i), Note::new(&i.to_string())).unwrap();
        }

        let keys: Vec<String> = store.iter().map(|r| r.unwrap().0).collect();
        assert_eq!(keys.len(), total);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys[0], "k0000");
    }

    #[test]
    fn test_iterate_with_predicate() {
        let store = store();
        store.put("a", Note::new("keep")).unwrap();
        store.put("b", Note::new("drop")).unwrap();
        store.put("c", Note::new("keep")).unwrap();

        let kept = store.filter(|note, _key| note.text == "keep").unwrap();
        let keys: Vec<_> = kept.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);

        let by_key = store.filter(|_, key| key == "b").unwrap();
        assert_eq!(by_key.len(), 1);
    }

    #[test]
    fn test_tables_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        let left: KeyedStore<Note> = db.table("left");
        let right: KeyedStore<Note> = db.table("right");

        left.put("k", Note::new("l")).unwrap();
        assert!(right.get("k").unwrap().is_none());
        assert_eq!(right.wipe_all().unwrap(), 0);
        assert_eq!(left.len().unwrap(), 1);
    }

    #[test]
    fn test_wipe_all_notifies_exactly_once() {
        let store = store();
        for key in ["a", "b", "c"] {
            store.put(key, Note::new(key)).unwrap();
        }
        let generation = store.notifier().generation();

        assert_eq!(store.wipe_all().unwrap(), 3);
        assert_eq!(store.notifier().generation(), generation + 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_every_mutation_notifies() {
        let store = store();
        let listener = store.changes();

        store.put("a", Note::new("a")).unwrap();
        assert!(listener.has_changed());

        let mut listener = store.changes();
        store.delete("a").unwrap();
        assert!(listener.has_changed());
        listener.mark_seen();
        assert!(!listener.has_changed());
    }

    #[test]
    fn test_corrupt_document_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO documents (tbl, key, value) VALUES ('notes', 'bad', '{\"text\": 5}')",
                [],
            )
            .unwrap();
        let store: KeyedStore<Note> = db.table("notes");

        assert!(matches!(store.get("bad"), Err(StoreError::Corrupt { .. })));
        let items: Vec<_> = store.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
        // wipe works on keys only
        assert_eq!(store.wipe_all().unwrap(), 1);
    }
}
