//! Remote workspace access
//!
//! The exporter never talks HTTP directly. Everything it knows about the
//! workspace comes through [`WorkspaceApi`], which has two implementations:
//!
//! - [`RestClient`]: the workspace REST 2.0 API over blocking `reqwest`
//! - [`SnapshotApi`]: an offline YAML/JSON capture of a workspace
//!
//! All accessors are read-only. `get_*` accessors return `Ok(None)` when the
//! object does not exist, so callers can tell "deleted" apart from "failed".

pub mod models;
pub mod rest;
pub mod snapshot;

use std::collections::BTreeMap;

use anyhow::Result;

pub use models::*;
pub use rest::RestClient;
pub use snapshot::{SnapshotApi, WorkspaceSnapshot};

/// Read accessors over one workspace
pub trait WorkspaceApi: Send + Sync {
    fn list_clusters(&self) -> Result<Vec<ClusterInfo>>;

    fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterInfo>>;

    /// Library specifications installed on a cluster
    fn cluster_libraries(&self, cluster_id: &str) -> Result<Vec<serde_json::Value>>;

    fn list_jobs(&self) -> Result<Vec<JobInfo>>;

    fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>>;

    fn get_instance_pool(&self, pool_id: &str) -> Result<Option<InstancePool>>;

    fn list_instance_profiles(&self) -> Result<Vec<InstanceProfile>>;

    fn get_cluster_policy(&self, policy_id: &str) -> Result<Option<ClusterPolicy>>;

    fn list_groups(&self) -> Result<Vec<ScimGroup>>;

    fn get_user(&self, user_id: &str) -> Result<Option<ScimUser>>;

    fn find_user_by_name(&self, user_name: &str) -> Result<Option<ScimUser>>;

    /// The identity the exporter runs as
    fn me(&self) -> Result<ScimUser>;

    /// Access control list of an object addressed as `/clusters/<id>`, `/jobs/<id>`, ...
    fn get_permissions(&self, object_path: &str) -> Result<Option<ObjectPermissions>>;

    fn list_secret_scopes(&self) -> Result<Vec<SecretScope>>;

    fn list_secrets(&self, scope: &str) -> Result<Vec<SecretMetadata>>;

    fn list_secret_acls(&self, scope: &str) -> Result<Vec<AclItem>>;

    /// Status of a DBFS path given without the `dbfs:` scheme
    fn dbfs_status(&self, path: &str) -> Result<Option<FileInfo>>;

    /// Full content of a DBFS file given without the `dbfs:` scheme
    fn read_dbfs(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Mount point name to mounted source
    fn list_mounts(&self) -> Result<BTreeMap<String, MountInfo>>;

    fn list_global_init_scripts(&self) -> Result<Vec<GlobalInitScript>>;

    fn get_global_init_script(&self, script_id: &str) -> Result<Option<GlobalInitScript>>;

    fn list_repos(&self) -> Result<Vec<Repo>>;

    fn get_repo(&self, repo_id: &str) -> Result<Option<Repo>>;
}
