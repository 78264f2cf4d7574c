use super::error::{Result, StoreError};
use super::keyed_store::KeyedStore;
use super::notifier::ChangeListener;
use super::Database;
use crate::constants::PROFILES_TABLE;
use crate::models::{CircleId, Profile, ProfileStatus, Verification};

/// The "profiles" cache, keyed by hex pubkey.
#[derive(Clone)]
pub struct ProfileStore {
    table: KeyedStore<Profile>,
}

impl ProfileStore {
    pub fn new(db: &Database) -> Self {
        Self {
            table: db.table(PROFILES_TABLE),
        }
    }

    pub fn get(&self, pubkey: &str) -> Result<Option<Profile>> {
        self.table.get(pubkey)
    }

    /// Any record exists for `pubkey`, including stubs
    pub fn contains(&self, pubkey: &str) -> Result<bool> {
        self.table.contains(pubkey)
    }

    /// Cache freshly parsed metadata. Local fields (status, circle) of an
    /// existing record are kept; verification restarts at `Unknown`.
    pub fn upsert_fetched(&self, mut profile: Profile) -> Result<Profile> {
        let key = profile.pubkey.clone();
        self.table
            .update(&key, |existing| {
                if let Some(existing) = existing {
                    profile.status = existing.status;
                    profile.circle = existing.circle;
                }
                profile.verified = Verification::Unknown;
                Some(profile)
            })?
            .ok_or(StoreError::NotFound(key))
    }

    /// Record a verification outcome if the cached record still comes from
    /// `event_id`. Returns `false` when the result is stale.
    ///
    /// The check and the write happen under one lock, so a newer
    /// `upsert_fetched` can never be overwritten by an older result.
    pub fn apply_verification(
        &self,
        pubkey: &str,
        event_id: &str,
        verified: Verification,
    ) -> Result<bool> {
        let written = self.table.update(pubkey, |current| {
            let mut profile = current?;
            if profile.event_id.as_deref() != Some(event_id) {
                return None;
            }
            profile.verified = verified;
            Some(profile)
        })?;
        Ok(written.is_some())
    }

    pub fn set_status(&self, pubkey: &str, status: ProfileStatus) -> Result<Profile> {
        self.modify(pubkey, |profile| profile.status = status)
    }

    /// Follow `pubkey` into `circle`, creating a stub if it is unknown
    pub fn follow(&self, pubkey: &str, circle: CircleId) -> Result<Profile> {
        self.table
            .update(pubkey, |current| {
                let mut profile = current.unwrap_or_else(|| Profile::stub(pubkey));
                profile.status = ProfileStatus::Follow;
                profile.circle = circle.into_assignment();
                Some(profile)
            })?
            .ok_or_else(|| StoreError::NotFound(pubkey.to_string()))
    }

    pub fn assign_circle(&self, pubkey: &str, circle: CircleId) -> Result<Profile> {
        self.modify(pubkey, |profile| profile.circle = circle.into_assignment())
    }

    /// Move every member of circle `key` back to Following. Returns how many moved.
    pub fn release_circle(&self, key: &str) -> Result<usize> {
        let members = self
            .table
            .filter(|profile, _| profile.circle.as_deref() == Some(key))?;
        let mut moved = 0;
        for (pubkey, _) in members {
            let released = self.table.update(&pubkey, |current| {
                let mut profile = current?;
                if profile.circle.as_deref() != Some(key) {
                    return None;
                }
                profile.circle = None;
                Some(profile)
            })?;
            if released.is_some() {
                moved += 1;
            }
        }
        Ok(moved)
    }

    pub fn follow_list(&self) -> Result<Vec<Profile>> {
        self.search(ProfileStatus::Follow, "")
    }

    pub fn public_list(&self) -> Result<Vec<Profile>> {
        self.search(ProfileStatus::Public, "")
    }

    pub fn block_list(&self) -> Result<Vec<Profile>> {
        self.search(ProfileStatus::Block, "")
    }

    /// Profiles with `status` whose name, pubkey, about or nip05 contains `text`
    pub fn search(&self, status: ProfileStatus, text: &str) -> Result<Vec<Profile>> {
        self.table
            .iterate(|profile, _| profile.status == status && profile.matches(text))
            .map(|item| item.map(|(_, profile)| profile))
            .collect()
    }

    pub fn all(&self) -> Result<Vec<Profile>> {
        self.table
            .iter()
            .map(|item| item.map(|(_, profile)| profile))
            .collect()
    }

    pub fn wipe(&self) -> Result<usize> {
        self.table.wipe_all()
    }

    pub fn changes(&self) -> ChangeListener {
        self.table.changes()
    }

    /// Apply `change` to an existing record
    fn modify<F>(&self, pubkey: &str, change: F) -> Result<Profile>
    where
        F: FnOnce(&mut Profile),
    {
        self.table
            .update(pubkey, |current| {
                let mut profile = current?;
                change(&mut profile);
                Some(profile)
            })?
            .ok_or_else(|| StoreError::NotFound(pubkey.to_string()))
    }
}
