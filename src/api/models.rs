use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw attribute map of a remote object
pub type Attributes = Map<String, Value>;

/// An interactive or job cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_source: String,
    /// Milliseconds since the epoch, 0 when the cluster never ran
    #[serde(default)]
    pub last_activity_time: i64,
    /// Libraries installed on the cluster (snapshot only, REST reads them separately)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<Value>,
    /// Remaining cluster specification
    #[serde(flatten)]
    pub spec: Attributes,
}

/// A job and its settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: i64,
    #[serde(default)]
    pub settings: Attributes,
}

impl JobInfo {
    pub fn name(&self) -> &str {
        self.settings
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancePool {
    pub instance_pool_id: String,
    #[serde(default)]
    pub instance_pool_name: String,
    #[serde(flatten)]
    pub spec: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceProfile {
    pub instance_profile_arn: String,
    #[serde(default)]
    pub is_meta_instance_profile: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterPolicy {
    pub policy_id: String,
    #[serde(default)]
    pub name: String,
    /// JSON document, kept as the string the API returns
    #[serde(default)]
    pub definition: String,
}

/// SCIM multi-valued attribute entry (member, parent group, role, entitlement)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplexValue {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display: String,
    #[serde(rename = "$ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroup {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub members: Vec<ComplexValue>,
    #[serde(default)]
    pub groups: Vec<ComplexValue>,
    #[serde(default)]
    pub roles: Vec<ComplexValue>,
    #[serde(default)]
    pub entitlements: Vec<ComplexValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUser {
    pub id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub groups: Vec<ComplexValue>,
    #[serde(default)]
    pub entitlements: Vec<ComplexValue>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub permission_level: String,
    #[serde(default)]
    pub inherited: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal_name: Option<String>,
    #[serde(default)]
    pub all_permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPermissions {
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub access_control_list: Vec<AccessControl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretScope {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<String>,
}

impl SecretScope {
    pub fn is_key_vault(&self) -> bool {
        self.backend_type.as_deref() == Some("AZURE_KEYVAULT")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub key: String,
    #[serde(default)]
    pub last_updated_timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclItem {
    pub principal: String,
    pub permission: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub file_size: i64,
}

/// One entry of the workspace mount table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountInfo {
    /// Mounted source, e.g. `s3a://bucket` or `abfss://container@account.dfs.core.windows.net/dir`
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

impl std::fmt::Display for MountInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalInitScript {
    pub script_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub position: i64,
    /// Only populated by the single-script accessor
    #[serde(rename = "script", default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "provider", default)]
    pub git_provider: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_info_keeps_unknown_fields_in_spec() {
        let cluster: ClusterInfo = serde_json::from_str(
            r#"{"cluster_id":"0101-abc-def","cluster_name":"etl","spark_version":"13.3.x-scala2.12","num_workers":2}"#,
        )
        .unwrap();

        assert_eq!(cluster.cluster_id, "0101-abc-def");
        assert_eq!(cluster.cluster_name, "etl");
        assert_eq!(cluster.spec.get("num_workers"), Some(&Value::from(2)));
        assert!(!cluster.spec.contains_key("cluster_name"));
    }

    #[test]
    fn test_scim_group_camel_case() {
        let group: ScimGroup = serde_json::from_str(
            r#"{"id":"g1","displayName":"Data Scientists","members":[{"value":"u1","$ref":"Users/u1","display":"Ann"}]}"#,
        )
        .unwrap();

        assert_eq!(group.display_name, "Data Scientists");
        assert_eq!(group.members[0].reference, "Users/u1");
    }

    #[test]
    fn test_secret_scope_key_vault() {
        let scope = SecretScope {
            name: "kv".to_string(),
            backend_type: Some("AZURE_KEYVAULT".to_string()),
        };
        assert!(scope.is_key_vault());
        assert!(!SecretScope::default().is_key_vault());
    }
}
