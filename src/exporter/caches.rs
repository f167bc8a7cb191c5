//! Run-scoped memoized lookups shared by all kinds
//!
//! Each slot holds its own lock across the remote fetch, so concurrent
//! callers wait for the first one instead of fetching again. Failed fetches
//! are not memoized; the next caller tries again.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::api::{AclItem, InstanceProfile, MountInfo, ScimGroup, ScimUser, SecretMetadata, SecretScope};

use super::error::ExportResult;

/// A value computed at most once
#[derive(Debug)]
pub struct SingleFlight<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized value, running `fetch` if nobody has succeeded yet
    pub fn get_or_try_init<F>(&self, fetch: F) -> ExportResult<Arc<T>>
    where
        F: FnOnce() -> ExportResult<T>,
    {
        let mut slot = self.slot.lock()?;
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new(fetch()?);
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    pub fn is_populated(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

/// One [`SingleFlight`] per key
///
/// The key map is only locked to find the slot, so fetches for different
/// keys run concurrently.
#[derive(Debug)]
pub struct KeyedSingleFlight<T> {
    slots: Mutex<HashMap<String, Arc<SingleFlight<T>>>>,
}

impl<T> Default for KeyedSingleFlight<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> KeyedSingleFlight<T> {
    pub fn get_or_try_init<F>(&self, key: &str, fetch: F) -> ExportResult<Arc<T>>
    where
        F: FnOnce() -> ExportResult<T>,
    {
        let slot = {
            let mut slots = self.slots.lock()?;
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        slot.get_or_try_init(fetch)
    }
}

/// Principal directory, mount table, identity and collection caches for one run
#[derive(Debug, Default)]
pub struct SharedCaches {
    pub groups: SingleFlight<Vec<ScimGroup>>,
    pub mounts: SingleFlight<BTreeMap<String, MountInfo>>,
    pub me: SingleFlight<ScimUser>,
    pub admin: SingleFlight<bool>,
    pub secret_scopes: SingleFlight<Vec<SecretScope>>,
    pub instance_profiles: SingleFlight<Vec<InstanceProfile>>,
    /// Secret keys by scope name
    pub secrets: KeyedSingleFlight<Vec<SecretMetadata>>,
    /// Secret ACLs by scope name
    pub secret_acls: KeyedSingleFlight<Vec<AclItem>>,
    /// User lookups by user name, including misses
    users: Mutex<HashMap<String, Option<Arc<ScimUser>>>>,
}

impl SharedCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized user lookup by name; a `None` result is remembered too
    pub fn user_by_name<F>(&self, user_name: &str, fetch: F) -> ExportResult<Option<Arc<ScimUser>>>
    where
        F: FnOnce() -> ExportResult<Option<ScimUser>>,
    {
        let key = user_name.to_lowercase();
        let mut users = self.users.lock()?;
        if let Some(found) = users.get(&key) {
            return Ok(found.clone());
        }
        let found = fetch()?.map(Arc::new);
        users.insert(key, found.clone());
        Ok(found)
    }
}
