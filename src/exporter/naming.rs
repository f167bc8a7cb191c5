//! Name allocation and deduplication
//!
//! Every entity gets one identifier-safe name per kind. Candidates come
//! from the kind's name hook (or the remote ID) and are sanitized on the
//! way in. Two different identities can produce the same candidate; those
//! collisions are settled when the allocator is sealed, by identity rather
//! than by arrival order: the smallest remote ID keeps the bare candidate
//! and every other one gets a short digest of its ID appended.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use sha1::{Digest, Sha1};

use super::entity::EntityKey;

const SHORT_DIGEST_LEN: usize = 8;

/// Hex SHA-1 of a string
pub fn digest(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First characters of [`digest`], enough to tell identities apart in names
pub fn short_digest(input: &str) -> String {
    digest(input)[..SHORT_DIGEST_LEN].to_string()
}

/// Sanitize a string to be a valid Terraform resource name
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_matches('_').to_string();

    match sanitized.chars().next() {
        None => "resource".to_string(),
        Some(first) if first.is_ascii_digit() => format!("r_{}", sanitized),
        Some(_) => sanitized,
    }
}

/// Identity to name mapping for one run
#[derive(Debug, Default)]
pub struct NameAllocator {
    /// Name handed out per identity
    assigned: HashMap<EntityKey, String>,
    /// (kind, candidate) to the IDs that asked for it
    claims: BTreeMap<(String, String), BTreeSet<String>>,
    /// Names in use per kind once sealed
    taken: HashMap<String, HashSet<String>>,
    sealed: bool,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name for `key`, registering `candidate` on first use
    ///
    /// Repeated calls for the same identity return the same name without
    /// looking at `candidate` again. Before sealing the result is
    /// provisional for identities whose candidate is contested.
    pub fn allocate(&mut self, key: &EntityKey, candidate: &str) -> String {
        if let Some(name) = self.assigned.get(key) {
            return name.clone();
        }

        let candidate = sanitize_name(candidate);
        let claimants = self
            .claims
            .entry((key.kind.clone(), candidate.clone()))
            .or_default();
        claimants.insert(key.id.clone());

        let name = if self.sealed {
            let taken = self.taken.entry(key.kind.clone()).or_default();
            let name = unique_variant(&candidate, &key.id, taken);
            taken.insert(name.clone());
            name
        } else if claimants.len() == 1 {
            candidate
        } else {
            suffixed(&candidate, &key.id)
        };

        self.assigned.insert(key.clone(), name.clone());
        name
    }

    /// Current name of an identity, if one was allocated
    pub fn name_of(&self, key: &EntityKey) -> Option<&str> {
        self.assigned.get(key).map(String::as_str)
    }

    /// Settle all collisions; names are final afterwards
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }

        let mut taken: HashMap<String, HashSet<String>> = HashMap::new();
        let mut contested: Vec<(String, String, String)> = Vec::new();

        for ((kind, candidate), ids) in &self.claims {
            let mut ids = ids.iter();
            if let Some(winner) = ids.next() {
                taken
                    .entry(kind.clone())
                    .or_default()
                    .insert(candidate.clone());
                self.assigned
                    .insert(EntityKey::new(kind.clone(), winner.clone()), candidate.clone());
            }
            for id in ids {
                contested.push((kind.clone(), candidate.clone(), id.clone()));
            }
        }

        for (kind, candidate, id) in contested {
            let names = taken.entry(kind.clone()).or_default();
            let name = unique_variant(&candidate, &id, names);
            names.insert(name.clone());
            self.assigned.insert(EntityKey::new(kind, id), name);
        }

        self.taken = taken;
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }
}

fn suffixed(candidate: &str, id: &str) -> String {
    format!("{}_{}", candidate, short_digest(id))
}

/// First free name among candidate, candidate_<short>, candidate_<full>, candidate_<full>_<n>
fn unique_variant(candidate: &str, id: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(candidate) {
        return candidate.to_string();
    }

    let short = suffixed(candidate, id);
    if !taken.contains(&short) {
        return short;
    }

    let full = format!("{}_{}", candidate, digest(id));
    let mut name = full.clone();
    let mut counter = 1;
    while taken.contains(&name) {
        name = format!("{}_{}", full, counter);
        counter += 1;
    }
    name
}
