//! The fixed set of exportable kinds
//!
//! Each submodule contributes the descriptors of one area of the
//! workspace. Descriptors are plain data plus function pointers, so the
//! whole set is built once by [`all`] and never changes during a run.

pub mod compute;
pub mod identity;
pub mod jobs;
pub mod secrets;
pub mod storage;
pub mod workspace;

use serde::Serialize;
use serde_json::Value;

use crate::api::Attributes;

use super::context::ExportContext;
use super::entity::Emit;
use super::error::{ExportError, ExportResult};
use super::kind::KindDescriptor;

pub(crate) const PERMISSIONS: &str = "databricks_permissions";

/// Every registered kind
pub fn all() -> Vec<KindDescriptor> {
    let mut kinds = Vec::new();
    kinds.extend(compute::kinds());
    kinds.extend(jobs::kinds());
    kinds.extend(identity::kinds());
    kinds.extend(secrets::kinds());
    kinds.extend(storage::kinds());
    kinds.extend(workspace::kinds());
    kinds
}

/// Queue the ACL of an object when running with elevated access
pub(crate) fn emit_permissions(ctx: &ExportContext, object_path: &str, name: &str) -> ExportResult<()> {
    if ctx.is_admin()? {
        ctx.emit(Emit::new(PERMISSIONS, object_path).with_name(name))?;
    }
    Ok(())
}

/// String attribute, empty when absent
pub(crate) fn str_attr<'a>(state: &'a Attributes, attribute: &str) -> &'a str {
    state
        .get(attribute)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Last non-empty segment after `separator`
pub(crate) fn last_segment(value: &str, separator: char) -> &str {
    value
        .rsplit(separator)
        .find(|s| !s.is_empty())
        .unwrap_or(value)
}

/// Split a composite ID such as `group|member` or `scope|||key`
pub(crate) fn split_id<'a>(kind: &str, id: &'a str, separator: &str) -> ExportResult<(&'a str, &'a str)> {
    match id.split_once(separator) {
        Some((left, right)) if !left.is_empty() && !right.is_empty() => Ok((left, right)),
        _ => Err(ExportError::parse(
            kind,
            id,
            format!("expected two parts separated by '{}'", separator),
        )),
    }
}

/// Serialize an API model into raw state
pub(crate) fn to_attributes<T: Serialize>(value: &T) -> ExportResult<Attributes> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ExportError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Drop server-maintained fields that cannot be written back
pub(crate) fn strip(state: &mut Attributes, fields: &[&str]) {
    for field in fields {
        state.remove(*field);
    }
}
