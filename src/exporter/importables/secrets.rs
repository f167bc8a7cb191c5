//! Secret scopes, secrets and secret ACLs
//!
//! Secret values are never readable through the API, so every exported
//! secret becomes an input variable.

use log::{debug, info, warn};
use serde_json::json;

use crate::api::Attributes;

use super::super::context::ExportContext;
use super::super::emission::{Block, Emitter, Expr};
use super::super::entity::{Emit, Entity};
use super::super::error::ExportResult;
use super::super::kind::{Dependency, KindDescriptor};
use super::{split_id, str_attr};

const SCOPE: &str = "databricks_secret_scope";
const SECRET: &str = "databricks_secret";
const SECRET_ACL: &str = "databricks_secret_acl";

const SEPARATOR: &str = "|||";

static SECRET_DEPENDS: &[Dependency] = &[Dependency::id("scope", SCOPE)];

static SECRET_ACL_DEPENDS: &[Dependency] = &[
    Dependency::id("scope", SCOPE),
    Dependency::attribute("principal", "databricks_group", "display_name"),
    Dependency::attribute("principal", "databricks_user", "user_name"),
];

pub fn kinds() -> Vec<KindDescriptor> {
    vec![
        KindDescriptor::new(SCOPE, "secrets")
            .with_name(scope_name)
            .with_list(list_scopes)
            .with_read(read_scope)
            .with_import(import_scope),
        KindDescriptor::new(SECRET, "secrets")
            .with_read(read_secret)
            .with_body(secret_body)
            .with_depends(SECRET_DEPENDS),
        KindDescriptor::new(SECRET_ACL, "secrets")
            .with_read(read_secret_acl)
            .with_depends(SECRET_ACL_DEPENDS),
    ]
}

fn scope_name(_id: &str, state: &Attributes) -> String {
    str_attr(state, "name").to_string()
}

fn list_scopes(ctx: &ExportContext) -> ExportResult<()> {
    let scopes = ctx.secret_scopes()?;
    let total = scopes.len();
    for (offset, scope) in scopes.iter().enumerate() {
        if !ctx.matches_name(&scope.name) {
            debug!("Secret scope {} doesn't match the name filter", scope.name);
            continue;
        }
        ctx.emit(Emit::new(SCOPE, &scope.name).with_name(&scope.name))?;
        info!("Scanned {} of {} secret scopes", offset + 1, total);
    }
    Ok(())
}

fn read_scope(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let scopes = ctx.secret_scopes()?;
    Ok(scopes.iter().find(|s| s.name == id).map(|scope| {
        let mut state = Attributes::new();
        state.insert("name".to_string(), json!(scope.name));
        if let Some(backend) = &scope.backend_type {
            state.insert("backend_type".to_string(), json!(backend));
        }
        state
    }))
}

/// Secrets (unless Key Vault backed) and ACLs of a scope
///
/// Listing failures only lose the children of this scope.
fn import_scope(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let scope = entity.id().to_string();
    if str_attr(&entity.state, "backend_type") == "AZURE_KEYVAULT" {
        debug!("Secrets of Key Vault backed scope {} are not listed", scope);
    } else {
        match ctx.secrets_of(&scope) {
            Ok(secrets) => {
                for secret in secrets.iter() {
                    ctx.emit(Emit::new(SECRET, format!("{}{}{}", scope, SEPARATOR, secret.key)))?;
                }
            }
            Err(e) => warn!("Cannot list secrets of scope {}: {:#}", scope, e),
        }
    }

    match ctx.secret_acls_of(&scope) {
        Ok(acls) => {
            for acl in acls.iter() {
                ctx.emit(Emit::new(SECRET_ACL, format!("{}{}{}", scope, SEPARATOR, acl.principal)))?;
            }
        }
        Err(e) => warn!("Cannot list ACLs of scope {}: {:#}", scope, e),
    }
    Ok(())
}

fn read_secret(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let (scope, key) = split_id(SECRET, id, SEPARATOR)?;
    let secrets = ctx.secrets_of(scope)?;
    if !secrets.iter().any(|s| s.key == key) {
        return Ok(None);
    }
    let mut state = Attributes::new();
    state.insert("scope".to_string(), json!(scope));
    state.insert("key".to_string(), json!(key));
    Ok(Some(state))
}

fn secret_body(emitter: &mut Emitter<'_>, entity: &Entity) -> ExportResult<Block> {
    let scope = entity.get_str("scope");
    let key = entity.get_str("key");
    let mut block = emitter.new_block(entity);

    let scope_expr = emitter.reference(entity, "scope", scope);
    block.set("scope", scope_expr);
    let value = emitter.variable(
        &block.name,
        format!("Secret {} from {} scope", key, scope),
    );
    block.set("string_value", value);
    block.set("key", Expr::string(key));
    Ok(block)
}

fn read_secret_acl(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let (scope, principal) = split_id(SECRET_ACL, id, SEPARATOR)?;
    let acls = ctx.secret_acls_of(scope)?;
    Ok(acls.iter().find(|a| a.principal == principal).map(|acl| {
        let mut state = Attributes::new();
        state.insert("scope".to_string(), json!(scope));
        state.insert("principal".to_string(), json!(acl.principal));
        state.insert("permission".to_string(), json!(acl.permission));
        state
    }))
}
