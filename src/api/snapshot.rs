use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::WorkspaceApi;
use super::models::*;
use crate::traits::FileSystem;

/// A secret scope captured together with its secrets and ACLs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeSnapshot {
    #[serde(flatten)]
    pub scope: SecretScope,
    #[serde(default)]
    pub secrets: Vec<SecretMetadata>,
    #[serde(default)]
    pub acls: Vec<AclItem>,
}

/// Offline capture of a workspace
///
/// Every section is optional. `errors` maps an accessor name (e.g.
/// `list_jobs`) to the message of a failure observed at capture time; the
/// failure is replayed whenever that accessor is called.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSnapshot {
    /// User name of the identity that captured the snapshot
    pub me: Option<String>,
    pub clusters: Vec<ClusterInfo>,
    pub jobs: Vec<JobInfo>,
    pub instance_pools: Vec<InstancePool>,
    pub instance_profiles: Vec<InstanceProfile>,
    pub cluster_policies: Vec<ClusterPolicy>,
    pub groups: Vec<ScimGroup>,
    pub users: Vec<ScimUser>,
    /// Object path (`/clusters/<id>`) to its access control list
    pub permissions: BTreeMap<String, ObjectPermissions>,
    pub secret_scopes: Vec<ScopeSnapshot>,
    /// DBFS path to file content
    pub dbfs: BTreeMap<String, String>,
    pub mounts: BTreeMap<String, MountInfo>,
    pub global_init_scripts: Vec<GlobalInitScript>,
    pub repos: Vec<Repo>,
    pub errors: BTreeMap<String, String>,
}

impl WorkspaceSnapshot {
    /// Parse a snapshot, JSON when the extension says so, YAML otherwise
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(content)
                .with_context(|| format!("Failed to parse JSON snapshot: {:?}", path))
        } else {
            serde_yaml::from_str(content)
                .with_context(|| format!("Failed to parse YAML snapshot: {:?}", path))
        }
    }
}

/// [`WorkspaceApi`] served from a [`WorkspaceSnapshot`]
///
/// Calls are counted per accessor, standing in for remote round trips.
pub struct SnapshotApi {
    snapshot: WorkspaceSnapshot,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl SnapshotApi {
    pub fn new(snapshot: WorkspaceSnapshot) -> Self {
        Self {
            snapshot,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load a snapshot file through the given filesystem
    pub fn from_file(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let content = fs.read_to_string(path)?;
        Ok(Self::new(WorkspaceSnapshot::parse(&content, path)?))
    }

    pub fn snapshot(&self) -> &WorkspaceSnapshot {
        &self.snapshot
    }

    /// Number of calls made to one accessor
    #[cfg(test)]
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
        if let Some(message) = self.snapshot.errors.get(operation) {
            bail!("{}: {}", operation, message);
        }
        Ok(())
    }

    fn scope(&self, name: &str) -> Option<&ScopeSnapshot> {
        self.snapshot
            .secret_scopes
            .iter()
            .find(|s| s.scope.name == name)
    }

    fn dbfs_content(&self, path: &str) -> Option<&String> {
        let path = path.strip_prefix("dbfs:").unwrap_or(path);
        self.snapshot.dbfs.get(path).or_else(|| {
            self.snapshot
                .dbfs
                .iter()
                .find(|(k, _)| k.strip_prefix("dbfs:") == Some(path))
                .map(|(_, v)| v)
        })
    }
}

impl WorkspaceApi for SnapshotApi {
    fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        self.check("list_clusters")?;
        Ok(self.snapshot.clusters.clone())
    }

    fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterInfo>> {
        self.check("get_cluster")?;
        Ok(self
            .snapshot
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
            .cloned())
    }

    fn cluster_libraries(&self, cluster_id: &str) -> Result<Vec<serde_json::Value>> {
        self.check("cluster_libraries")?;
        Ok(self
            .snapshot
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
            .map(|c| c.libraries.clone())
            .unwrap_or_default())
    }

    fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        self.check("list_jobs")?;
        Ok(self.snapshot.jobs.clone())
    }

    fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        self.check("get_job")?;
        Ok(self
            .snapshot
            .jobs
            .iter()
            .find(|j| j.job_id.to_string() == job_id)
            .cloned())
    }

    fn get_instance_pool(&self, pool_id: &str) -> Result<Option<InstancePool>> {
        self.check("get_instance_pool")?;
        Ok(self
            .snapshot
            .instance_pools
            .iter()
            .find(|p| p.instance_pool_id == pool_id)
            .cloned())
    }

    fn list_instance_profiles(&self) -> Result<Vec<InstanceProfile>> {
        self.check("list_instance_profiles")?;
        Ok(self.snapshot.instance_profiles.clone())
    }

    fn get_cluster_policy(&self, policy_id: &str) -> Result<Option<ClusterPolicy>> {
        self.check("get_cluster_policy")?;
        Ok(self
            .snapshot
            .cluster_policies
            .iter()
            .find(|p| p.policy_id == policy_id)
            .cloned())
    }

    fn list_groups(&self) -> Result<Vec<ScimGroup>> {
        self.check("list_groups")?;
        Ok(self.snapshot.groups.clone())
    }

    fn get_user(&self, user_id: &str) -> Result<Option<ScimUser>> {
        self.check("get_user")?;
        Ok(self.snapshot.users.iter().find(|u| u.id == user_id).cloned())
    }

    fn find_user_by_name(&self, user_name: &str) -> Result<Option<ScimUser>> {
        self.check("find_user_by_name")?;
        Ok(self
            .snapshot
            .users
            .iter()
            .find(|u| u.user_name.eq_ignore_ascii_case(user_name))
            .cloned())
    }

    fn me(&self) -> Result<ScimUser> {
        self.check("me")?;
        let user_name = self
            .snapshot
            .me
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Snapshot does not record the current user"))?;

        self.find_user_by_name(user_name)?
            .ok_or_else(|| anyhow::anyhow!("Current user '{}' is not in the snapshot", user_name))
    }

    fn get_permissions(&self, object_path: &str) -> Result<Option<ObjectPermissions>> {
        self.check("get_permissions")?;
        Ok(self.snapshot.permissions.get(object_path).cloned())
    }

    fn list_secret_scopes(&self) -> Result<Vec<SecretScope>> {
        self.check("list_secret_scopes")?;
        Ok(self
            .snapshot
            .secret_scopes
            .iter()
            .map(|s| s.scope.clone())
            .collect())
    }

    fn list_secrets(&self, scope: &str) -> Result<Vec<SecretMetadata>> {
        self.check("list_secrets")?;
        match self.scope(scope) {
            Some(s) => Ok(s.secrets.clone()),
            None => bail!("Scope {} does not exist", scope),
        }
    }

    fn list_secret_acls(&self, scope: &str) -> Result<Vec<AclItem>> {
        self.check("list_secret_acls")?;
        match self.scope(scope) {
            Some(s) => Ok(s.acls.clone()),
            None => bail!("Scope {} does not exist", scope),
        }
    }

    fn dbfs_status(&self, path: &str) -> Result<Option<FileInfo>> {
        self.check("dbfs_status")?;
        Ok(self.dbfs_content(path).map(|content| FileInfo {
            path: path.to_string(),
            is_dir: false,
            file_size: content.len() as i64,
        }))
    }

    fn read_dbfs(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.check("read_dbfs")?;
        Ok(self.dbfs_content(path).map(|c| c.as_bytes().to_vec()))
    }

    fn list_mounts(&self) -> Result<BTreeMap<String, MountInfo>> {
        self.check("list_mounts")?;
        Ok(self.snapshot.mounts.clone())
    }

    fn list_global_init_scripts(&self) -> Result<Vec<GlobalInitScript>> {
        self.check("list_global_init_scripts")?;
        Ok(self
            .snapshot
            .global_init_scripts
            .iter()
            .map(|s| GlobalInitScript {
                content_base64: None,
                ..s.clone()
            })
            .collect())
    }

    fn get_global_init_script(&self, script_id: &str) -> Result<Option<GlobalInitScript>> {
        self.check("get_global_init_script")?;
        Ok(self
            .snapshot
            .global_init_scripts
            .iter()
            .find(|s| s.script_id == script_id)
            .cloned())
    }

    fn list_repos(&self) -> Result<Vec<Repo>> {
        self.check("list_repos")?;
        Ok(self.snapshot.repos.clone())
    }

    fn get_repo(&self, repo_id: &str) -> Result<Option<Repo>> {
        self.check("get_repo")?;
        Ok(self
            .snapshot
            .repos
            .iter()
            .find(|r| r.id.to_string() == repo_id)
            .cloned())
    }
}
