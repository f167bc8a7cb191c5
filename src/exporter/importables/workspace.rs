//! Global init scripts and Git repos

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::info;
use serde_json::json;

use crate::api::Attributes;

use super::super::context::ExportContext;
use super::super::emission::{Block, Emitter, Expr};
use super::super::entity::{Emit, Entity};
use super::super::error::{ExportError, ExportResult};
use super::super::kind::KindDescriptor;
use super::super::naming::sanitize_name;
use super::{emit_permissions, str_attr};

const GLOBAL_INIT_SCRIPT: &str = "databricks_global_init_script";
const REPO: &str = "databricks_repo";

pub fn kinds() -> Vec<KindDescriptor> {
    vec![
        KindDescriptor::new(GLOBAL_INIT_SCRIPT, "workspace")
            .with_name(global_init_script_name)
            .with_list(list_global_init_scripts)
            .with_read(read_global_init_script)
            .with_body(global_init_script_body),
        KindDescriptor::new(REPO, "repos")
            .with_name(repo_name)
            .with_list(list_repos)
            .with_read(read_repo)
            .with_import(import_repo)
            .with_body(repo_body),
    ]
}

fn global_init_script_name(id: &str, state: &Attributes) -> String {
    match str_attr(state, "name") {
        "" => id.to_string(),
        name => sanitize_name(name),
    }
}

fn list_global_init_scripts(ctx: &ExportContext) -> ExportResult<()> {
    let scripts = ctx
        .api()
        .list_global_init_scripts()
        .map_err(|e| ExportError::remote(GLOBAL_INIT_SCRIPT, e))?;
    let total = scripts.len();
    for (offset, script) in scripts.iter().enumerate() {
        ctx.emit(Emit::new(GLOBAL_INIT_SCRIPT, &script.script_id))?;
        info!("Scanned {} of {} global init scripts", offset + 1, total);
    }
    Ok(())
}

fn read_global_init_script(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let script = ctx
        .api()
        .get_global_init_script(id)
        .map_err(|e| ExportError::remote(GLOBAL_INIT_SCRIPT, e))?;
    Ok(script.map(|s| {
        let mut state = Attributes::new();
        state.insert("name".to_string(), json!(s.name));
        state.insert("enabled".to_string(), json!(s.enabled));
        state.insert("position".to_string(), json!(s.position));
        state
    }))
}

/// Script content goes to a side file; the block points at it
fn global_init_script_body(emitter: &mut Emitter<'_>, entity: &Entity) -> ExportResult<Block> {
    let script = emitter
        .ctx()
        .api()
        .get_global_init_script(entity.id())
        .map_err(|e| ExportError::remote(GLOBAL_INIT_SCRIPT, e))?
        .ok_or_else(|| ExportError::remote(GLOBAL_INIT_SCRIPT, format!("{} disappeared", entity.id())))?;
    let encoded = script.content_base64.unwrap_or_default();
    let content = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ExportError::parse(GLOBAL_INIT_SCRIPT, entity.id(), format!("script content: {}", e)))?;

    let mut block = emitter.new_block(entity);
    let hint = format!("{}.sh", block.name);
    let source = emitter.side_file(entity.id(), &hint, content);
    block.set("name", Expr::string(script.name));
    block.set_literal("enabled", script.enabled);
    block.set("source", source);
    Ok(block)
}

fn repo_name(id: &str, state: &Attributes) -> String {
    match str_attr(state, "path").trim_matches('/') {
        "" => id.to_string(),
        path => sanitize_name(path),
    }
}

fn list_repos(ctx: &ExportContext) -> ExportResult<()> {
    let repos = ctx.api().list_repos().map_err(|e| ExportError::remote(REPO, e))?;
    let total = repos.len();
    for (offset, repo) in repos.iter().enumerate() {
        if !repo.url.is_empty() {
            ctx.emit(Emit::new(REPO, repo.id.to_string()))?;
        }
        info!("Scanned {} of {} repos", offset + 1, total);
    }
    Ok(())
}

fn read_repo(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let repo = ctx.api().get_repo(id).map_err(|e| ExportError::remote(REPO, e))?;
    Ok(repo.map(|r| {
        let mut state = Attributes::new();
        state.insert("url".to_string(), json!(r.url));
        state.insert("git_provider".to_string(), json!(r.git_provider));
        state.insert("branch".to_string(), json!(r.branch));
        state.insert("path".to_string(), json!(r.path));
        state
    }))
}

fn import_repo(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let name = repo_name(entity.id(), &entity.state);
    emit_permissions(ctx, &format!("/repos/{}", entity.id()), &format!("repo_{}", name))
}

fn repo_body(emitter: &mut Emitter<'_>, entity: &Entity) -> ExportResult<Block> {
    let mut block = emitter.new_block(entity);
    block.set("url", Expr::string(entity.get_str("url")));
    block.set("git_provider", Expr::string(entity.get_str("git_provider")));
    for optional in ["branch", "path"] {
        let value = entity.get_str(optional);
        if !value.is_empty() {
            block.set(optional, Expr::string(value));
        }
    }
    Ok(block)
}
