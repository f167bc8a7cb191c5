//! Test helpers for building in-memory workspaces
//!
//! [`WorkspaceBuilder`] assembles a [`WorkspaceSnapshot`] object by object
//! and hands out export contexts backed by it, so engine and kind tests
//! never need a live workspace.

#![cfg(test)]

use std::sync::Arc;

use serde_json::{Value, json};

use crate::api::{
    AccessControl, AclItem, ClusterInfo, ClusterPolicy, ComplexValue, GlobalInitScript,
    InstancePool, InstanceProfile, JobInfo, MountInfo, ObjectPermissions, Permission, Repo, ScimGroup, ScimUser,
    SecretMetadata, SecretScope, SnapshotApi, WorkspaceSnapshot,
};
use crate::api::WorkspaceApi;
use crate::api::snapshot::ScopeSnapshot;
use crate::exporter::config::ExportConfig;
use crate::exporter::context::ExportContext;
use crate::exporter::registry::KindRegistry;

/// Builder for creating a workspace snapshot for testing
#[derive(Default)]
pub struct WorkspaceBuilder {
    snapshot: WorkspaceSnapshot,
}

impl WorkspaceBuilder {
    /// Create an empty workspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identity the export runs as
    pub fn me(mut self, user_name: impl Into<String>) -> Self {
        self.snapshot.me = Some(user_name.into());
        self
    }

    /// Add a user, or rename an existing one
    pub fn user(mut self, id: &str, user_name: &str) -> Self {
        let user = self.user_entry(id);
        user.user_name = user_name.to_string();
        if user.display_name.is_empty() {
            user.display_name = user_name.split('@').next().unwrap_or(user_name).to_string();
        }
        self
    }

    /// Make a user a direct member of a group
    pub fn user_in_group(mut self, user_id: &str, group_id: &str, display: &str) -> Self {
        self.user_entry(user_id).groups.push(ComplexValue {
            value: group_id.to_string(),
            display: display.to_string(),
            reference: format!("Groups/{}", group_id),
            kind: "direct".to_string(),
        });
        self
    }

    /// Make a user an inherited member of a group
    pub fn user_in_group_indirect(mut self, user_id: &str, group_id: &str, display: &str) -> Self {
        self.user_entry(user_id).groups.push(ComplexValue {
            value: group_id.to_string(),
            display: display.to_string(),
            reference: format!("Groups/{}", group_id),
            kind: "indirect".to_string(),
        });
        self
    }

    /// Add a group with user and group members
    pub fn group(mut self, id: &str, display_name: &str, users: &[&str], groups: &[&str]) -> Self {
        let members = users
            .iter()
            .map(|u| ComplexValue {
                value: u.to_string(),
                display: u.to_string(),
                reference: format!("Users/{}", u),
                kind: String::new(),
            })
            .chain(groups.iter().map(|g| ComplexValue {
                value: g.to_string(),
                display: g.to_string(),
                reference: format!("Groups/{}", g),
                kind: String::new(),
            }))
            .collect();
        self.snapshot.groups.push(ScimGroup {
            id: id.to_string(),
            display_name: display_name.to_string(),
            members,
            ..Default::default()
        });
        self
    }

    /// Add a group holding an instance profile role
    pub fn group_with_role(mut self, id: &str, display_name: &str, instance_profile: &str) -> Self {
        self.snapshot.groups.push(ScimGroup {
            id: id.to_string(),
            display_name: display_name.to_string(),
            roles: vec![ComplexValue {
                value: instance_profile.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        self
    }

    /// Add an interactive cluster that never ran, optionally with a DBFS init script
    pub fn cluster(mut self, id: &str, name: &str, init_script: Option<&str>) -> Self {
        let mut spec = serde_json::Map::new();
        spec.insert("spark_version".into(), json!("13.3.x-scala2.12"));
        spec.insert("node_type_id".into(), json!("i3.xlarge"));
        spec.insert("num_workers".into(), json!(2));
        if let Some(destination) = init_script {
            spec.insert(
                "init_scripts".into(),
                json!([{ "dbfs": { "destination": destination } }]),
            );
        }
        self.snapshot.clusters.push(ClusterInfo {
            cluster_id: id.to_string(),
            cluster_name: name.to_string(),
            cluster_source: "UI".to_string(),
            spec,
            ..Default::default()
        });
        self
    }

    /// Add a cluster with an explicit source and last activity time
    pub fn cluster_with(mut self, id: &str, name: &str, source: &str, last_activity_ms: i64) -> Self {
        self.snapshot.clusters.push(ClusterInfo {
            cluster_id: id.to_string(),
            cluster_name: name.to_string(),
            cluster_source: source.to_string(),
            last_activity_time: last_activity_ms,
            ..Default::default()
        });
        self
    }

    /// Add a notebook job, optionally on an existing cluster
    pub fn job(self, id: i64, name: &str, existing_cluster_id: Option<&str>) -> Self {
        let mut settings = json!({
            "name": name,
            "notebook_task": { "notebook_path": format!("/Jobs/{}", name) },
        });
        if let Some(cluster) = existing_cluster_id {
            settings["existing_cluster_id"] = json!(cluster);
        }
        self.job_with(id, settings)
    }

    /// Add a job with raw settings
    pub fn job_with(mut self, id: i64, settings: Value) -> Self {
        self.snapshot.jobs.push(JobInfo {
            job_id: id,
            settings: settings.as_object().cloned().unwrap_or_default(),
        });
        self
    }

    pub fn instance_pool(mut self, id: &str, name: &str) -> Self {
        self.snapshot.instance_pools.push(InstancePool {
            instance_pool_id: id.to_string(),
            instance_pool_name: name.to_string(),
            ..Default::default()
        });
        self
    }

    pub fn instance_profile(mut self, arn: &str) -> Self {
        self.snapshot.instance_profiles.push(InstanceProfile {
            instance_profile_arn: arn.to_string(),
            is_meta_instance_profile: false,
        });
        self
    }

    pub fn cluster_policy(mut self, id: &str, name: &str, definition: &str) -> Self {
        self.snapshot.cluster_policies.push(ClusterPolicy {
            policy_id: id.to_string(),
            name: name.to_string(),
            definition: definition.to_string(),
        });
        self
    }

    /// Add a DBFS file; `path` is given without the `dbfs:` scheme
    pub fn dbfs_file(mut self, path: &str, content: &str) -> Self {
        self.snapshot.dbfs.insert(path.to_string(), content.to_string());
        self
    }

    /// Set the ACL of an object from (principal type, name, level) triples
    pub fn permissions(mut self, object_path: &str, entries: &[(&str, &str, &str)]) -> Self {
        let acl = self.acl_entry(object_path);
        for (principal_type, name, level) in entries {
            acl.access_control_list
                .push(access_control(principal_type, name, level, false));
        }
        self
    }

    /// Add an ACL entry inherited from a parent object
    pub fn inherited_permission(
        mut self,
        object_path: &str,
        principal_type: &str,
        name: &str,
        level: &str,
    ) -> Self {
        self.acl_entry(object_path)
            .access_control_list
            .push(access_control(principal_type, name, level, true));
        self
    }

    /// Add a secret scope with secret keys and (principal, permission) ACLs
    pub fn secret_scope(
        mut self,
        name: &str,
        backend_type: Option<&str>,
        keys: &[&str],
        acls: &[(&str, &str)],
    ) -> Self {
        self.snapshot.secret_scopes.push(ScopeSnapshot {
            scope: SecretScope {
                name: name.to_string(),
                backend_type: backend_type.map(str::to_string),
            },
            secrets: keys
                .iter()
                .map(|k| SecretMetadata {
                    key: k.to_string(),
                    last_updated_timestamp: 0,
                })
                .collect(),
            acls: acls
                .iter()
                .map(|(principal, permission)| AclItem {
                    principal: principal.to_string(),
                    permission: permission.to_string(),
                })
                .collect(),
        });
        self
    }

    /// Add an entry to the mount table
    pub fn mount(
        mut self,
        mount_point: &str,
        url: &str,
        instance_profile: Option<&str>,
        cluster_id: Option<&str>,
    ) -> Self {
        self.snapshot.mounts.insert(
            mount_point.to_string(),
            MountInfo {
                url: url.to_string(),
                instance_profile: instance_profile.map(str::to_string),
                cluster_id: cluster_id.map(str::to_string),
            },
        );
        self
    }

    /// Add an enabled global init script with base64 content
    pub fn global_init_script(mut self, id: &str, name: &str, content_base64: &str) -> Self {
        self.snapshot.global_init_scripts.push(GlobalInitScript {
            script_id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            position: 0,
            content_base64: Some(content_base64.to_string()),
        });
        self
    }

    pub fn repo(mut self, id: i64, url: &str, provider: &str, branch: &str, path: &str) -> Self {
        self.snapshot.repos.push(Repo {
            id,
            url: url.to_string(),
            git_provider: provider.to_string(),
            branch: branch.to_string(),
            path: path.to_string(),
        });
        self
    }

    /// Make an API operation fail with `message`
    pub fn fail(mut self, operation: &str, message: &str) -> Self {
        self.snapshot
            .errors
            .insert(operation.to_string(), message.to_string());
        self
    }

    pub fn snapshot(&self) -> &WorkspaceSnapshot {
        &self.snapshot
    }

    pub fn api(self) -> Arc<SnapshotApi> {
        Arc::new(SnapshotApi::new(self.snapshot))
    }

    /// Export context with the default configuration
    pub fn context(self) -> ExportContext {
        self.context_with(ExportConfig::default())
    }

    pub fn context_with(self, config: ExportConfig) -> ExportContext {
        self.context_and_api(config).0
    }

    /// Context plus the snapshot behind it, for counting remote calls
    pub fn context_and_api(self, config: ExportConfig) -> (ExportContext, Arc<SnapshotApi>) {
        let api = self.api();
        let ctx = ExportContext::new(
            Arc::clone(&api) as Arc<dyn WorkspaceApi>,
            Arc::new(KindRegistry::with_defaults()),
            config,
        )
        .unwrap();
        (ctx, api)
    }

    fn user_entry(&mut self, id: &str) -> &mut ScimUser {
        let users = &mut self.snapshot.users;
        let index = match users.iter().position(|u| u.id == id) {
            Some(index) => index,
            None => {
                users.push(ScimUser {
                    id: id.to_string(),
                    active: true,
                    ..Default::default()
                });
                users.len() - 1
            }
        };
        &mut users[index]
    }

    fn acl_entry(&mut self, object_path: &str) -> &mut ObjectPermissions {
        self.snapshot
            .permissions
            .entry(object_path.to_string())
            .or_insert_with(|| ObjectPermissions {
                object_id: object_path.to_string(),
                ..Default::default()
            })
    }
}

fn access_control(principal_type: &str, name: &str, level: &str, inherited: bool) -> AccessControl {
    let mut entry = AccessControl {
        all_permissions: vec![Permission {
            permission_level: level.to_string(),
            inherited,
        }],
        ..Default::default()
    };
    match principal_type {
        "user" => entry.user_name = Some(name.to_string()),
        "group" => entry.group_name = Some(name.to_string()),
        _ => entry.service_principal_name = Some(name.to_string()),
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_queryable_workspace() {
        let api = WorkspaceBuilder::new()
            .me("ann@example.com")
            .user("u1", "ann@example.com")
            .user_in_group("u1", "g1", "platform")
            .group("g1", "platform", &["u1"], &[])
            .cluster("0101-abc-def", "etl", None)
            .permissions("/clusters/0101-abc-def", &[("user", "ann@example.com", "CAN_RESTART")])
            .api();

        assert_eq!(api.me().unwrap().id, "u1");
        assert_eq!(api.me().unwrap().groups.len(), 1);
        assert_eq!(api.list_groups().unwrap()[0].members[0].reference, "Users/u1");
        let acl = api.get_permissions("/clusters/0101-abc-def").unwrap().unwrap();
        assert_eq!(
            acl.access_control_list[0].user_name.as_deref(),
            Some("ann@example.com")
        );
    }
}
