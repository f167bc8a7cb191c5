use serde::{Deserialize, Serialize};

use crate::api::Attributes;

/// Identity of a remote object: two discoveries of the same key are one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.kind, self.id)
    }
}

/// Whether an entity is managed (`resource`) or only looked up (`data`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Resource,
    Data,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Resource => "resource",
            Mode::Data => "data",
        }
    }
}

/// Where an entity is in the traversal
///
/// Unseen entities have no stage at all; every other key moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Known and waiting for its read/import
    Queued,
    /// Import hook has run
    Enriched,
    /// Eligible for emission
    Finalized,
    /// Dropped by the kind's ignore predicate
    Ignored,
    /// The remote object does not exist (deleted or dangling reference)
    Missing,
    /// Read, import or body failed
    Failed,
}

/// One discovered remote object
#[derive(Debug, Clone)]
pub struct Entity {
    pub key: EntityKey,
    /// Candidate name supplied by whoever emitted the entity
    pub name_hint: Option<String>,
    pub mode: Mode,
    pub state: Attributes,
}

impl Entity {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            name_hint: None,
            mode: Mode::Resource,
            state: Attributes::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.key.kind
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    /// String attribute, empty when absent or not a string
    pub fn get_str(&self, attribute: &str) -> &str {
        self.state
            .get(attribute)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }
}

/// Request to emit an entity into the traversal
#[derive(Debug, Clone)]
pub struct Emit {
    pub key: EntityKey,
    pub name: Option<String>,
    /// Pre-built state; when set the kind's read hook is skipped
    pub state: Option<Attributes>,
}

impl Emit {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: EntityKey::new(kind, id),
            name: None,
            state: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_state(mut self, state: Attributes) -> Self {
        self.state = Some(state);
        self
    }
}

/// Lookup of an entity by attribute value instead of ID
///
/// A kind's search hook sets `id` when it finds a match and leaves it
/// `None` otherwise.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub kind: String,
    pub attribute: String,
    pub value: String,
    pub id: Option<String>,
}

impl SearchRequest {
    pub fn new(kind: &str, attribute: &str, value: &str) -> Self {
        Self {
            kind: kind.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
            id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_key_ordering_is_by_kind_then_id() {
        let mut keys = vec![
            EntityKey::new("databricks_job", "2"),
            EntityKey::new("databricks_cluster", "b"),
            EntityKey::new("databricks_cluster", "a"),
        ];
        keys.sort();
        assert_eq!(keys[0], EntityKey::new("databricks_cluster", "a"));
        assert_eq!(keys[2].to_string(), "databricks_job[2]");
    }

    #[test]
    fn test_get_str_tolerates_non_strings() {
        let mut entity = Entity::new(EntityKey::new("databricks_job", "1"));
        entity.state.insert("name".into(), json!("nightly"));
        entity.state.insert("max_retries".into(), json!(3));

        assert_eq!(entity.get_str("name"), "nightly");
        assert_eq!(entity.get_str("max_retries"), "");
        assert_eq!(entity.get_str("absent"), "");
    }

    #[test]
    fn test_emit_builder() {
        let emit = Emit::new("databricks_permissions", "/jobs/1").with_name("job_nightly");
        assert_eq!(emit.key.id, "/jobs/1");
        assert_eq!(emit.name.as_deref(), Some("job_nightly"));
        assert!(emit.state.is_none());
    }
}
