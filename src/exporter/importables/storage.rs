//! DBFS files and storage mounts
//!
//! DBFS file identities are the `dbfs:/` URI of the file. Mounts are keyed
//! by mount point and only discovered when mount export is switched on.

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use serde_json::json;

use crate::api::Attributes;

use super::super::context::ExportContext;
use super::super::emission::{Block, Emitter, Expr};
use super::super::entity::{Emit, Entity, SearchRequest};
use super::super::error::{ExportError, ExportResult};
use super::super::kind::{Dependency, KindDescriptor};
use super::super::naming::short_digest;
use super::last_segment;

const DBFS_FILE: &str = "databricks_dbfs_file";
const S3_MOUNT: &str = "databricks_aws_s3_mount";
const ADLS_GEN2_MOUNT: &str = "databricks_azure_adls_gen2_mount";
const ADLS_GEN1_MOUNT: &str = "databricks_azure_adls_gen1_mount";

const DBFS_SCHEME: &str = "dbfs:";

lazy_static! {
    static ref ADLS_GEN2: Regex =
        Regex::new(r"^(abfss?)://([^@]+)@([^.]+)\.(?:[^/]+)(/.*)?$").expect("valid ADLS gen2 pattern");
    static ref ADLS_GEN1: Regex =
        Regex::new(r"^(adls?)://([^.]+)\.(?:[^/]+)(/.*)?$").expect("valid ADLS gen1 pattern");
    static ref DBFS_URI: Regex = Regex::new(r#"dbfs:/[^\s"',;]+"#).expect("valid DBFS pattern");
}

static S3_MOUNT_DEPENDS: &[Dependency] = &[
    Dependency::id("instance_profile", "databricks_instance_profile"),
    Dependency::id("cluster_id", "databricks_cluster"),
];

pub fn kinds() -> Vec<KindDescriptor> {
    vec![
        KindDescriptor::new(DBFS_FILE, "storage")
            .with_name(dbfs_file_name)
            .with_search(search_dbfs_file)
            .with_read(read_dbfs_file)
            .with_body(dbfs_file_body),
        KindDescriptor::new(S3_MOUNT, "mounts")
            .with_list(list_s3_mounts)
            .with_depends(S3_MOUNT_DEPENDS),
        KindDescriptor::new(ADLS_GEN2_MOUNT, "mounts")
            .with_list(list_adls_gen2_mounts)
            .with_body(adls_gen2_body),
        KindDescriptor::new(ADLS_GEN1_MOUNT, "mounts")
            .with_list(list_adls_gen1_mounts)
            .with_body(adls_gen1_body),
    ]
}

/// Path without the `dbfs:` scheme
fn dbfs_path(id: &str) -> &str {
    id.strip_prefix(DBFS_SCHEME).unwrap_or(id)
}

fn dbfs_file_name(id: &str, _state: &Attributes) -> String {
    format!("_{}_{}", last_segment(id, '/'), short_digest(id))
}

/// Find the `dbfs:/` URI inside a value and check the file exists
fn search_dbfs_file(ctx: &ExportContext, request: &mut SearchRequest) -> ExportResult<()> {
    if request.attribute != "dbfs_path" {
        return Ok(());
    }
    let Some(uri) = DBFS_URI.find(&request.value) else {
        return Ok(());
    };
    let status = ctx
        .api()
        .dbfs_status(dbfs_path(uri.as_str()))
        .map_err(|e| ExportError::remote(DBFS_FILE, e))?;
    match status {
        Some(info) if !info.is_dir => request.id = Some(uri.as_str().to_string()),
        _ => debug!("{} is not a DBFS file", uri.as_str()),
    }
    Ok(())
}

fn read_dbfs_file(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let path = dbfs_path(id);
    let status = ctx
        .api()
        .dbfs_status(path)
        .map_err(|e| ExportError::remote(DBFS_FILE, e))?;
    Ok(status.filter(|info| !info.is_dir).map(|_| {
        let mut state = Attributes::new();
        state.insert("path".to_string(), json!(path));
        state.insert("dbfs_path".to_string(), json!(format!("{}{}", DBFS_SCHEME, path)));
        state
    }))
}

fn dbfs_file_body(emitter: &mut Emitter<'_>, entity: &Entity) -> ExportResult<Block> {
    let path = dbfs_path(entity.id());
    let content = emitter
        .ctx()
        .api()
        .read_dbfs(path)
        .map_err(|e| ExportError::remote(DBFS_FILE, e))?
        .ok_or_else(|| ExportError::remote(DBFS_FILE, format!("{} disappeared", entity.id())))?;
    info!("Creating side file for {}", entity.key);

    let mut block = emitter.new_block(entity);
    let source = emitter.side_file(entity.id(), last_segment(path, '/'), content);
    block.set("path", Expr::string(path));
    block.set("source", source);
    Ok(block)
}

fn mount_name(mount_point: &str) -> &str {
    mount_point.strip_prefix("/mnt/").unwrap_or(mount_point)
}

fn list_s3_mounts(ctx: &ExportContext) -> ExportResult<()> {
    if !ctx.config().mounts {
        return Ok(());
    }
    for (mount_point, source) in ctx.mounts()?.iter() {
        let Some(bucket) = source.url.strip_prefix("s3a://") else {
            continue;
        };
        if !ctx.matches_name(mount_point) {
            continue;
        }
        info!("Emitting {}: {}", S3_MOUNT, source.url);

        let mut state = Attributes::new();
        state.insert("mount_name".to_string(), json!(mount_name(mount_point)));
        state.insert("s3_bucket_name".to_string(), json!(bucket));
        if let Some(profile) = source.instance_profile.as_deref().filter(|p| !p.is_empty()) {
            state.insert("instance_profile".to_string(), json!(profile));
        } else if let Some(cluster) = source.cluster_id.as_deref().filter(|c| !c.is_empty()) {
            state.insert("cluster_id".to_string(), json!(cluster));
        }
        ctx.emit(Emit::new(S3_MOUNT, mount_point.as_str()).with_state(state))?;
    }
    Ok(())
}

fn list_matching_mounts(ctx: &ExportContext, kind: &str, pattern: &Regex) -> ExportResult<()> {
    if !ctx.config().mounts {
        return Ok(());
    }
    for (mount_point, source) in ctx.mounts()?.iter() {
        if !pattern.is_match(&source.url) {
            debug!("Skipping {} mounted at {}", source, mount_point);
            continue;
        }
        if !ctx.matches_name(mount_point) {
            continue;
        }
        ctx.emit(Emit::new(kind, mount_point.as_str()).with_state(Attributes::new()))?;
    }
    Ok(())
}

fn list_adls_gen2_mounts(ctx: &ExportContext) -> ExportResult<()> {
    list_matching_mounts(ctx, ADLS_GEN2_MOUNT, &ADLS_GEN2)
}

fn list_adls_gen1_mounts(ctx: &ExportContext) -> ExportResult<()> {
    list_matching_mounts(ctx, ADLS_GEN1_MOUNT, &ADLS_GEN1)
}

/// Source URL of a mount, parsed with `pattern`
fn mount_captures(
    emitter: &Emitter<'_>,
    kind: &str,
    entity: &Entity,
    pattern: &Regex,
) -> ExportResult<Vec<String>> {
    let mounts = emitter.ctx().mounts()?;
    let source = mounts
        .get(entity.id())
        .ok_or_else(|| ExportError::parse(kind, entity.id(), "mount point is no longer mounted"))?;
    let captures = pattern.captures(&source.url).ok_or_else(|| {
        ExportError::parse(
            kind,
            entity.id(),
            format!("can't extract storage information from '{}'", source.url),
        )
    })?;
    Ok(captures
        .iter()
        .map(|c| c.map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect())
}

/// Service principal credentials shared by both ADLS generations
fn set_credentials(emitter: &mut Emitter<'_>, block: &mut Block, suffix: &str, text: &str) {
    let credentials = [
        ("client_id", format!("Client ID{}", text)),
        ("tenant_id", format!("Tenant ID{}", text)),
        (
            "client_secret_scope",
            format!("Secret scope name that stores app client secret{}", text),
        ),
        (
            "client_secret_key",
            format!("Key in secret scope that stores app client secret{}", text),
        ),
    ];
    for (attribute, description) in credentials {
        let variable = emitter.variable(&format!("{}_{}", attribute, suffix), description);
        block.set(attribute, variable);
    }
}

fn adls_gen2_body(emitter: &mut Emitter<'_>, entity: &Entity) -> ExportResult<Block> {
    let parts = mount_captures(emitter, ADLS_GEN2_MOUNT, entity, &ADLS_GEN2)?;
    let (scheme, container, account, directory) = (&parts[1], &parts[2], &parts[3], &parts[4]);

    let mut block = emitter.new_block(entity);
    block.set("container_name", Expr::string(container.as_str()));
    block.set("storage_account_name", Expr::string(account.as_str()));
    if !directory.is_empty() && directory != "/" {
        block.set("directory", Expr::string(directory.as_str()));
    }
    block.set("mount_name", Expr::string(mount_name(entity.id())));

    let text = format!(
        " for mounting ADLSv2 resource {}://{}@{}",
        scheme, container, account
    );
    set_credentials(emitter, &mut block, &format!("{}_{}", account, container), &text);
    Ok(block)
}

fn adls_gen1_body(emitter: &mut Emitter<'_>, entity: &Entity) -> ExportResult<Block> {
    let parts = mount_captures(emitter, ADLS_GEN1_MOUNT, entity, &ADLS_GEN1)?;
    let (scheme, resource, directory) = (&parts[1], &parts[2], &parts[3]);

    let mut block = emitter.new_block(entity);
    block.set("storage_resource_name", Expr::string(resource.as_str()));
    if !directory.is_empty() && directory != "/" {
        block.set("directory", Expr::string(directory.as_str()));
    }
    block.set("mount_name", Expr::string(mount_name(entity.id())));

    let text = format!(" for mounting ADLSv1 resource {}://{}", scheme, resource);
    set_credentials(emitter, &mut block, resource, &text);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::config::ExportConfig;
    use crate::exporter::emission::ArtifactSet;
    use crate::exporter::engine::Engine;
    use crate::exporter::entity::EntityKey;
    use crate::exporter::report::{Phase, Report};
    use crate::test_helpers::WorkspaceBuilder;
    use std::sync::Arc;

    fn mounts_config() -> ExportConfig {
        ExportConfig {
            services: vec!["mounts".to_string()],
            mounts: true,
            ..Default::default()
        }
    }

    fn export(builder: WorkspaceBuilder, config: ExportConfig) -> (ArtifactSet, Report) {
        let ctx = Arc::new(builder.context_with(config));
        let mut discovery = Engine::new(Arc::clone(&ctx)).discover().unwrap();
        let mut report = std::mem::take(&mut discovery.report);
        let artifacts = Emitter::new(&ctx, &discovery).emit_all(&mut report).unwrap();
        (artifacts, report)
    }

    #[test]
    fn test_dbfs_file_name() {
        let name = dbfs_file_name("dbfs:/scripts/setup.sh", &Attributes::new());
        assert!(name.starts_with("_setup.sh_"));
        assert_eq!(name.len(), "_setup.sh_".len() + 8);
    }

    #[test]
    fn test_search_extracts_embedded_uri() {
        let ctx = WorkspaceBuilder::new()
            .dbfs_file("/libs/a.jar", "PK")
            .context();

        let mut request = SearchRequest::new(DBFS_FILE, "dbfs_path", "--jar=dbfs:/libs/a.jar,fast");
        search_dbfs_file(&ctx, &mut request).unwrap();
        assert_eq!(request.id.as_deref(), Some("dbfs:/libs/a.jar"));

        let mut missing = SearchRequest::new(DBFS_FILE, "dbfs_path", "dbfs:/libs/b.jar");
        search_dbfs_file(&ctx, &mut missing).unwrap();
        assert!(missing.id.is_none());

        let mut plain = SearchRequest::new(DBFS_FILE, "dbfs_path", "--verbose");
        search_dbfs_file(&ctx, &mut plain).unwrap();
        assert!(plain.id.is_none());
    }

    #[test]
    fn test_mounts_are_opt_in() {
        let builder = WorkspaceBuilder::new().mount("/mnt/raw", "s3a://raw-bucket", Some("arn:aws:iam::1:instance-profile/s3"), None);
        let (artifacts, _) = export(
            builder,
            ExportConfig {
                services: vec!["mounts".to_string()],
                ..Default::default()
            },
        );
        assert!(artifacts.blocks.is_empty());
    }

    #[test]
    fn test_s3_mount_references_instance_profile() {
        let builder = WorkspaceBuilder::new()
            .instance_profile("arn:aws:iam::1:instance-profile/s3")
            .mount("/mnt/raw", "s3a://raw-bucket", Some("arn:aws:iam::1:instance-profile/s3"), None);

        let (artifacts, report) = export(builder, mounts_config());

        assert!(!report.is_partial());
        let mount = artifacts.blocks_of(S3_MOUNT).next().unwrap();
        assert_eq!(mount.name, "mnt_raw");
        assert_eq!(mount.get("mount_name"), Some(&Expr::string("raw")));
        assert_eq!(mount.get("s3_bucket_name"), Some(&Expr::string("raw-bucket")));
        assert!(matches!(mount.get("instance_profile"), Some(Expr::Reference { .. })));

        let profile_pos = artifacts
            .blocks
            .iter()
            .position(|b| b.kind() == "databricks_instance_profile")
            .unwrap();
        let mount_pos = artifacts.blocks.iter().position(|b| b.kind() == S3_MOUNT).unwrap();
        assert!(profile_pos < mount_pos);
    }

    #[test]
    fn test_adls_gen2_mount_body() {
        let builder = WorkspaceBuilder::new().mount(
            "/mnt/lake",
            "abfss://bronze@datalake.dfs.core.windows.net/events",
            None,
            None,
        );

        let (artifacts, report) = export(builder, mounts_config());

        assert!(!report.is_partial());
        let mount = artifacts.blocks_of(ADLS_GEN2_MOUNT).next().unwrap();
        assert_eq!(mount.get("container_name"), Some(&Expr::string("bronze")));
        assert_eq!(mount.get("storage_account_name"), Some(&Expr::string("datalake")));
        assert_eq!(mount.get("directory"), Some(&Expr::string("/events")));
        assert_eq!(mount.get("mount_name"), Some(&Expr::string("lake")));
        assert_eq!(
            mount.get("client_id"),
            Some(&Expr::Variable("client_id_datalake_bronze".to_string()))
        );
        assert_eq!(artifacts.variables.len(), 4);
        assert!(
            artifacts
                .variables
                .iter()
                .any(|v| v.description == "Tenant ID for mounting ADLSv2 resource abfss://bronze@datalake")
        );
    }

    #[test]
    fn test_adls_gen1_mount_body() {
        let builder = WorkspaceBuilder::new().mount(
            "/mnt/legacy",
            "adl://store.azuredatalakestore.net/",
            None,
            None,
        );

        let (artifacts, _) = export(builder, mounts_config());

        let mount = artifacts.blocks_of(ADLS_GEN1_MOUNT).next().unwrap();
        assert_eq!(mount.get("storage_resource_name"), Some(&Expr::string("store")));
        assert!(mount.get("directory").is_none());
        assert_eq!(
            mount.get("client_secret_key"),
            Some(&Expr::Variable("client_secret_key_store".to_string()))
        );
    }

    #[test]
    fn test_unparseable_mount_is_a_body_failure() {
        let ctx = WorkspaceBuilder::new()
            .mount("/mnt/odd", "wasbs://c@acct.blob.core.windows.net", None, None)
            .context_with(mounts_config());
        let discovery = crate::exporter::engine::Discovery::from_parts(vec![(
            Entity::new(EntityKey::new(ADLS_GEN2_MOUNT, "/mnt/odd")),
            "mnt_odd".to_string(),
        )]);

        let mut report = Report::new();
        let artifacts = Emitter::new(&ctx, &discovery).emit_all(&mut report).unwrap();

        assert!(artifacts.blocks.is_empty());
        assert!(artifacts.variables.is_empty());
        let failures: Vec<_> = report.failures_in(Phase::Body).collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("can't extract"));
        assert_eq!(report.exit_code(), 2);
    }
}
