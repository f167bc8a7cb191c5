//! Jobs

use log::{debug, info};
use serde_json::{Value, json};

use crate::api::Attributes;

use super::super::context::ExportContext;
use super::super::entity::{Emit, Entity};
use super::super::error::{ExportError, ExportResult};
use super::super::kind::{Dependency, KindDescriptor};
use super::{emit_permissions, str_attr};

const JOB: &str = "databricks_job";

/// Where bare legacy jar names were uploaded
const JOB_JARS_PREFIX: &str = "dbfs:/FileStore/job-jars/";

static JOB_DEPENDS: &[Dependency] = &[
    Dependency::attribute("email_notifications.on_failure", "databricks_user", "user_name"),
    Dependency::attribute("email_notifications.on_success", "databricks_user", "user_name"),
    Dependency::attribute("email_notifications.on_start", "databricks_user", "user_name"),
    Dependency::id("new_cluster.aws_attributes.instance_profile_arn", "databricks_instance_profile"),
    Dependency::id("new_cluster.init_scripts.dbfs.destination", "databricks_dbfs_file"),
    Dependency::id("new_cluster.instance_pool_id", "databricks_instance_pool"),
    Dependency::id("new_cluster.driver_instance_pool_id", "databricks_instance_pool"),
    Dependency::id("new_cluster.policy_id", "databricks_cluster_policy"),
    Dependency::id("existing_cluster_id", "databricks_cluster"),
    Dependency::attribute("library.jar", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("library.whl", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("library.egg", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("spark_python_task.python_file", "databricks_dbfs_file", "dbfs_path"),
    Dependency::embedded("spark_python_task.parameters", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("spark_jar_task.jar_uri", "databricks_dbfs_file", "dbfs_path"),
    // Multi-task settings
    Dependency::attribute("tasks.email_notifications.on_failure", "databricks_user", "user_name"),
    Dependency::attribute("tasks.email_notifications.on_success", "databricks_user", "user_name"),
    Dependency::attribute("tasks.email_notifications.on_start", "databricks_user", "user_name"),
    Dependency::id("tasks.existing_cluster_id", "databricks_cluster"),
    Dependency::id("tasks.new_cluster.aws_attributes.instance_profile_arn", "databricks_instance_profile"),
    Dependency::id("tasks.new_cluster.init_scripts.dbfs.destination", "databricks_dbfs_file"),
    Dependency::id("tasks.new_cluster.instance_pool_id", "databricks_instance_pool"),
    Dependency::id("tasks.new_cluster.driver_instance_pool_id", "databricks_instance_pool"),
    Dependency::id("tasks.new_cluster.policy_id", "databricks_cluster_policy"),
    Dependency::attribute("tasks.library.jar", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("tasks.library.whl", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("tasks.library.egg", "databricks_dbfs_file", "dbfs_path"),
    Dependency::attribute("tasks.spark_python_task.python_file", "databricks_dbfs_file", "dbfs_path"),
    Dependency::embedded("tasks.spark_python_task.parameters", "databricks_dbfs_file", "dbfs_path"),
    Dependency::id(
        "job_clusters.new_cluster.aws_attributes.instance_profile_arn",
        "databricks_instance_profile",
    ),
    Dependency::id("job_clusters.new_cluster.init_scripts.dbfs.destination", "databricks_dbfs_file"),
    Dependency::id("job_clusters.new_cluster.instance_pool_id", "databricks_instance_pool"),
    Dependency::id("job_clusters.new_cluster.driver_instance_pool_id", "databricks_instance_pool"),
    Dependency::id("job_clusters.new_cluster.policy_id", "databricks_cluster_policy"),
];

static JOB_MAP_ATTRIBUTES: &[&str] = &[
    "tags",
    "new_cluster.spark_conf",
    "new_cluster.spark_env_vars",
    "new_cluster.custom_tags",
    "notebook_task.base_parameters",
    "tasks.new_cluster.spark_conf",
    "tasks.new_cluster.spark_env_vars",
    "tasks.new_cluster.custom_tags",
    "tasks.notebook_task.base_parameters",
    "job_clusters.new_cluster.spark_conf",
    "job_clusters.new_cluster.spark_env_vars",
    "job_clusters.new_cluster.custom_tags",
];

pub fn kinds() -> Vec<KindDescriptor> {
    vec![
        KindDescriptor::new(JOB, "jobs")
            .with_name(job_name)
            .with_list(list_jobs)
            .with_read(read_job)
            .with_import(import_job)
            .with_depends(JOB_DEPENDS)
            .with_map_attributes(JOB_MAP_ATTRIBUTES),
    ]
}

fn job_name(id: &str, state: &Attributes) -> String {
    format!("{}_{}", str_attr(state, "name"), id)
}

fn list_jobs(ctx: &ExportContext) -> ExportResult<()> {
    let jobs = ctx.api().list_jobs().map_err(|e| ExportError::remote(JOB, e))?;
    let total = jobs.len();
    for (offset, job) in jobs.iter().enumerate() {
        if !ctx.matches_name(job.name()) {
            debug!("Job {} doesn't match the name filter", job.name());
            continue;
        }
        ctx.emit(Emit::new(JOB, job.job_id.to_string()))?;
        info!("Scanned {} of {} jobs", offset + 1, total);
    }
    Ok(())
}

fn read_job(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let job = ctx.api().get_job(id).map_err(|e| ExportError::remote(JOB, e))?;
    Ok(job.map(|job| {
        let mut state = job.settings;
        rename_libraries(&mut state);
        for task in tasks_mut(&mut state) {
            rename_libraries(task);
        }
        state
    }))
}

/// `libraries` is written as repeated `library` blocks
fn rename_libraries(state: &mut Attributes) {
    if let Some(libraries) = state.remove("libraries") {
        state.insert("library".to_string(), libraries);
    }
}

fn tasks_mut(state: &mut Attributes) -> impl Iterator<Item = &mut Attributes> {
    state
        .get_mut("tasks")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object_mut)
}

fn import_job(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let name = job_name(entity.id(), &entity.state);
    emit_permissions(ctx, &format!("/jobs/{}", entity.id()), &format!("job_{}", name))?;
    rewrite_legacy_jar(&mut entity.state);
    for task in tasks_mut(&mut entity.state) {
        rewrite_legacy_jar(task);
    }
    Ok(())
}

/// Move `spark_jar_task.jar_uri` into a `library { jar }` entry
fn rewrite_legacy_jar(state: &mut Attributes) {
    let jar_uri = state
        .get_mut("spark_jar_task")
        .and_then(Value::as_object_mut)
        .and_then(|task| task.remove("jar_uri"));
    let Some(jar_uri) = jar_uri.as_ref().and_then(Value::as_str).filter(|s| !s.is_empty()) else {
        return;
    };

    let jar = if jar_uri.contains(":/") {
        jar_uri.to_string()
    } else {
        format!("{}{}", JOB_JARS_PREFIX, jar_uri)
    };
    debug!("Rewriting legacy jar_uri {} into a library", jar);

    let libraries = state
        .entry("library")
        .or_insert_with(|| Value::Array(Vec::new()));
    match libraries {
        Value::Array(items) => items.push(json!({ "jar": jar })),
        other => *other = json!([{ "jar": jar }]),
    }
}
