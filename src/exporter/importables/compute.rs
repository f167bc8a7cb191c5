//! Clusters, instance pools and cluster policies

use log::{debug, info};
use serde_json::Value;

use crate::api::Attributes;

use super::super::context::ExportContext;
use super::super::entity::{Emit, Entity};
use super::super::error::{ExportError, ExportResult};
use super::super::kind::{Dependency, KindDescriptor};
use super::{emit_permissions, str_attr, strip, to_attributes};

const CLUSTER: &str = "databricks_cluster";
const INSTANCE_POOL: &str = "databricks_instance_pool";
const CLUSTER_POLICY: &str = "databricks_cluster_policy";

/// Runtime fields reported for a cluster but not part of its configuration
const CLUSTER_RUNTIME_FIELDS: &[&str] = &[
    "cluster_id",
    "cluster_source",
    "last_activity_time",
    "state",
    "state_message",
    "start_time",
    "terminated_time",
    "last_state_loss_time",
    "last_restarted_time",
    "driver",
    "executors",
    "spark_context_id",
    "jdbc_port",
    "cluster_memory_mb",
    "cluster_cores",
    "default_tags",
    "creator_user_name",
    "termination_reason",
    "cluster_log_status",
];

const POOL_RUNTIME_FIELDS: &[&str] = &["instance_pool_id", "state", "stats", "status", "default_tags"];

static CLUSTER_DEPENDS: &[Dependency] = &[
    Dependency::id("aws_attributes.instance_profile_arn", "databricks_instance_profile"),
    Dependency::id("instance_pool_id", INSTANCE_POOL),
    Dependency::id("driver_instance_pool_id", INSTANCE_POOL),
    Dependency::id("policy_id", CLUSTER_POLICY),
    Dependency::id("init_scripts.dbfs.destination", "databricks_dbfs_file"),
    Dependency::attribute("library.jar", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("library.whl", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("library.egg", "databricks_dbfs_file", "dbfs_path"),
];

/// Free-form maps of a cluster specification, also used for job clusters
pub(crate) static CLUSTER_MAP_ATTRIBUTES: &[&str] = &["spark_conf", "spark_env_vars", "custom_tags"];

pub fn kinds() -> Vec<KindDescriptor> {
    vec![
        KindDescriptor::new(CLUSTER, "compute")
            .with_name(cluster_name)
            .with_list(list_clusters)
            .with_read(read_cluster)
            .with_import(import_cluster)
            .with_depends(CLUSTER_DEPENDS)
            .with_map_attributes(CLUSTER_MAP_ATTRIBUTES),
        KindDescriptor::new(INSTANCE_POOL, "compute")
            .with_name(instance_pool_name)
            .with_read(read_instance_pool)
            .with_import(import_instance_pool)
            .with_map_attributes(&["custom_tags"]),
        KindDescriptor::new(CLUSTER_POLICY, "compute")
            .with_name(cluster_policy_name)
            .with_read(read_cluster_policy)
            .with_import(import_cluster_policy),
    ]
}

/// Third dash-separated segment of a generated ID, else the ID
fn id_segment(id: &str) -> String {
    id.split('-').nth(2).unwrap_or(id).to_string()
}

fn cluster_name(id: &str, state: &Attributes) -> String {
    match str_attr(state, "cluster_name") {
        "" => id_segment(id),
        name => format!("{}_{}", name, id),
    }
}

fn list_clusters(ctx: &ExportContext) -> ExportResult<()> {
    let clusters = ctx
        .api()
        .list_clusters()
        .map_err(|e| ExportError::remote(CLUSTER, e))?;

    let total = clusters.len();
    for (offset, cluster) in clusters.iter().enumerate() {
        if cluster.cluster_source == "JOB" {
            info!("Skipping job cluster {}", cluster.cluster_id);
            continue;
        }
        if cluster.cluster_name.starts_with("terraform-") {
            info!("Skipping terraform-specific cluster {}", cluster.cluster_name);
            continue;
        }
        if !ctx.matches_name(&cluster.cluster_name) {
            debug!("Skipping {} because it doesn't match the name filter", cluster.cluster_name);
            continue;
        }
        if ctx.is_stale(cluster.last_activity_time) {
            info!("Skipping inactive cluster {}", cluster.cluster_name);
            continue;
        }
        ctx.emit(Emit::new(CLUSTER, &cluster.cluster_id))?;
        info!("Scanned {} of {} clusters", offset + 1, total);
    }
    Ok(())
}

fn read_cluster(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let Some(cluster) = ctx
        .api()
        .get_cluster(id)
        .map_err(|e| ExportError::remote(CLUSTER, e))?
    else {
        return Ok(None);
    };

    let mut libraries = cluster.libraries.clone();
    if libraries.is_empty() {
        libraries = ctx
            .api()
            .cluster_libraries(id)
            .map_err(|e| ExportError::remote(CLUSTER, e))?;
    }

    let mut state = to_attributes(&cluster)?;
    strip(&mut state, CLUSTER_RUNTIME_FIELDS);
    state.remove("libraries");
    if !libraries.is_empty() {
        state.insert("library".to_string(), Value::Array(libraries));
    }
    Ok(Some(state))
}

fn import_cluster(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let name = cluster_name(entity.id(), &entity.state);
    emit_permissions(
        ctx,
        &format!("/clusters/{}", entity.id()),
        &format!("cluster_{}", name),
    )
}

fn instance_pool_name(id: &str, state: &Attributes) -> String {
    match str_attr(state, "instance_pool_name") {
        "" => id_segment(id),
        name => name.to_string(),
    }
}

fn read_instance_pool(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let pool = ctx
        .api()
        .get_instance_pool(id)
        .map_err(|e| ExportError::remote(INSTANCE_POOL, e))?;
    match pool {
        Some(pool) => {
            let mut state = to_attributes(&pool)?;
            strip(&mut state, POOL_RUNTIME_FIELDS);
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

fn import_instance_pool(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let name = instance_pool_name(entity.id(), &entity.state);
    emit_permissions(
        ctx,
        &format!("/instance-pools/{}", entity.id()),
        &format!("inst_pool_{}", name),
    )
}

fn cluster_policy_name(_id: &str, state: &Attributes) -> String {
    str_attr(state, "name").to_string()
}

fn read_cluster_policy(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let policy = ctx
        .api()
        .get_cluster_policy(id)
        .map_err(|e| ExportError::remote(CLUSTER_POLICY, e))?;
    Ok(policy.map(|p| {
        let mut state = Attributes::new();
        state.insert("name".to_string(), Value::String(p.name));
        state.insert("definition".to_string(), Value::String(p.definition));
        state
    }))
}

/// Fixed or default value of one policy rule
fn policy_value(rule: &Value) -> Option<&str> {
    rule.get("value")
        .or_else(|| rule.get("defaultValue"))
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

fn import_cluster_policy(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let name = cluster_policy_name(entity.id(), &entity.state);
    emit_permissions(
        ctx,
        &format!("/cluster-policies/{}", entity.id()),
        &format!("clust_policy_{}", name),
    )?;

    let definition = str_attr(&entity.state, "definition");
    if definition.is_empty() {
        return Ok(());
    }
    let rules: serde_json::Map<String, Value> = serde_json::from_str(definition)
        .map_err(|e| ExportError::parse(CLUSTER_POLICY, entity.id(), format!("policy definition: {}", e)))?;

    for (path, rule) in &rules {
        let Some(value) = policy_value(rule) else {
            continue;
        };
        match path.as_str() {
            "aws_attributes.instance_profile_arn" => {
                ctx.emit(Emit::new("databricks_instance_profile", value))?;
            }
            "instance_pool_id" => {
                ctx.emit(Emit::new(INSTANCE_POOL, value))?;
            }
            _ => {}
        }
    }
    Ok(())
}
