//! Explicit traversal context
//!
//! One [`ExportContext`] exists per run. It owns the work queue, the dedup
//! state, the name allocator and the shared caches, and it is passed by
//! reference to every kind hook. Nothing about a run lives in process-wide
//! statics.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::api::{
    AclItem, InstanceProfile, MountInfo, ScimGroup, ScimUser, SecretMetadata, SecretScope,
    WorkspaceApi,
};

use super::caches::SharedCaches;
use super::config::{ExportConfig, NameFilter};
use super::entity::{Emit, Entity, EntityKey, Stage};
use super::error::{ExportError, ExportResult};
use super::naming::NameAllocator;
use super::registry::KindRegistry;
use super::report::Report;

pub const ADMINS_GROUP: &str = "admins";

/// Mutable traversal state, guarded by a single lock
#[derive(Debug, Default)]
pub(crate) struct TraversalState {
    pub stages: HashMap<EntityKey, Stage>,
    pub entities: HashMap<EntityKey, Entity>,
    /// Entities whose state came with the emit and must not be read again
    pub preloaded: HashSet<EntityKey>,
    pub queue: VecDeque<EntityKey>,
    pub names: NameAllocator,
    pub report: Report,
}

impl TraversalState {
    pub fn set_stage(&mut self, key: &EntityKey, stage: Stage) {
        self.stages.insert(key.clone(), stage);
    }
}

pub struct ExportContext {
    api: Arc<dyn WorkspaceApi>,
    registry: Arc<KindRegistry>,
    config: ExportConfig,
    filter: NameFilter,
    now_ms: i64,
    caches: SharedCaches,
    pub(crate) state: Mutex<TraversalState>,
}

impl ExportContext {
    pub fn new(
        api: Arc<dyn WorkspaceApi>,
        registry: Arc<KindRegistry>,
        config: ExportConfig,
    ) -> ExportResult<Self> {
        config.validate()?;
        let filter = config.name_filter()?;
        Ok(Self {
            api,
            registry,
            config,
            filter,
            now_ms: chrono::Utc::now().timestamp_millis(),
            caches: SharedCaches::new(),
            state: Mutex::new(TraversalState::default()),
        })
    }

    /// Pin the clock used by the staleness window
    pub fn with_now(mut self, now_ms: i64) -> Self {
        self.now_ms = now_ms;
        self
    }

    pub fn api(&self) -> &dyn WorkspaceApi {
        self.api.as_ref()
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Label filter; list hooks call this, dependency discovery never does
    pub fn matches_name(&self, label: &str) -> bool {
        self.filter.matches(label)
    }

    pub fn is_stale(&self, last_activity_ms: i64) -> bool {
        self.config.is_stale(last_activity_ms, self.now_ms)
    }

    /// Queue an entity unless its identity is already known
    ///
    /// Returns whether the entity was new. Empty IDs are not references and
    /// are dropped; unregistered kinds are fatal.
    pub fn emit(&self, emit: Emit) -> ExportResult<bool> {
        let descriptor = self.registry.get(&emit.key.kind)?;
        if emit.key.id.is_empty() {
            return Ok(false);
        }

        let mut state = self.state.lock()?;
        if state.stages.contains_key(&emit.key) {
            trace!("{} already known", emit.key);
            return Ok(false);
        }

        let key = emit.key;
        let mut entity = Entity::new(key.clone());
        entity.name_hint = emit.name;

        if let Some(attributes) = emit.state {
            entity.state = attributes;
            let candidate = entity
                .name_hint
                .clone()
                .unwrap_or_else(|| descriptor.candidate_name(&key.id, &entity.state));
            state.names.allocate(&key, &candidate);
            state.preloaded.insert(key.clone());
        } else if let Some(hint) = &entity.name_hint {
            state.names.allocate(&key, hint);
        }

        debug!("Queued {}", key);
        state.set_stage(&key, Stage::Queued);
        state.entities.insert(key.clone(), entity);
        state.queue.push_back(key);
        Ok(true)
    }

    pub fn stage_of(&self, key: &EntityKey) -> ExportResult<Option<Stage>> {
        Ok(self.state.lock()?.stages.get(key).copied())
    }

    /// Every group in the workspace
    pub fn groups(&self) -> ExportResult<Arc<Vec<ScimGroup>>> {
        self.caches.groups.get_or_try_init(|| {
            let groups = self
                .api
                .list_groups()
                .map_err(|e| ExportError::remote("databricks_group", e))?;
            debug!("Cached {} groups", groups.len());
            Ok(groups)
        })
    }

    /// Mount point to mounted source
    pub fn mounts(&self) -> ExportResult<Arc<BTreeMap<String, MountInfo>>> {
        self.caches.mounts.get_or_try_init(|| {
            let mounts = self
                .api
                .list_mounts()
                .map_err(|e| ExportError::remote("mounts", e))?;
            debug!("Cached {} mounts", mounts.len());
            Ok(mounts)
        })
    }

    pub fn secret_scopes(&self) -> ExportResult<Arc<Vec<SecretScope>>> {
        self.caches.secret_scopes.get_or_try_init(|| {
            self.api
                .list_secret_scopes()
                .map_err(|e| ExportError::remote("databricks_secret_scope", e))
        })
    }

    /// Secret keys of one scope
    pub fn secrets_of(&self, scope: &str) -> ExportResult<Arc<Vec<SecretMetadata>>> {
        self.caches.secrets.get_or_try_init(scope, || {
            self.api
                .list_secrets(scope)
                .map_err(|e| ExportError::remote("databricks_secret", e))
        })
    }

    pub fn secret_acls_of(&self, scope: &str) -> ExportResult<Arc<Vec<AclItem>>> {
        self.caches.secret_acls.get_or_try_init(scope, || {
            self.api
                .list_secret_acls(scope)
                .map_err(|e| ExportError::remote("databricks_secret_acl", e))
        })
    }

    pub fn instance_profiles(&self) -> ExportResult<Arc<Vec<InstanceProfile>>> {
        self.caches.instance_profiles.get_or_try_init(|| {
            self.api
                .list_instance_profiles()
                .map_err(|e| ExportError::remote("databricks_instance_profile", e))
        })
    }

    /// Identity the export runs as
    pub fn me(&self) -> ExportResult<Arc<ScimUser>> {
        self.caches
            .me
            .get_or_try_init(|| self.api.me().map_err(|e| ExportError::remote("databricks_user", e)))
    }

    /// Elevated access: forced by configuration or membership of `admins`
    ///
    /// An identity that cannot be looked up counts as not elevated.
    pub fn is_admin(&self) -> ExportResult<bool> {
        if let Some(admin) = self.config.admin {
            return Ok(admin);
        }
        let admin = self.caches.admin.get_or_try_init(|| {
            let me = match self.me() {
                Ok(me) => me,
                Err(e) => {
                    warn!("Cannot tell whether the current identity is an admin, skipping permissions: {}", e);
                    return Ok(false);
                }
            };
            if me.groups.iter().any(|g| g.display == ADMINS_GROUP) {
                return Ok(true);
            }
            let groups = self.groups()?;
            Ok(groups
                .iter()
                .filter(|g| g.display_name == ADMINS_GROUP)
                .any(|g| g.members.iter().any(|m| m.value == me.id)))
        })?;
        Ok(*admin)
    }

    /// User by user name, memoized including misses
    pub fn find_user(&self, user_name: &str) -> ExportResult<Option<Arc<ScimUser>>> {
        self.caches.user_by_name(user_name, || {
            self.api
                .find_user_by_name(user_name)
                .map_err(|e| ExportError::remote("databricks_user", e))
        })
    }
}
