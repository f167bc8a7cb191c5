//! Reference resolution
//!
//! Dependency declarations are evaluated twice. During discovery
//! [`discover_dependencies`] turns the values found at declared paths into
//! new work: raw IDs are queued directly, attribute values go through the
//! target kind's search hook. During emission [`resolve`] looks a value up
//! in the finalized set and yields a [`Reference`], or nothing, in which
//! case the caller keeps the literal.

use log::{debug, warn};
use serde_json::Value;

use crate::api::Attributes;

use super::context::ExportContext;
use super::engine::Discovery;
use super::entity::{Emit, Entity, EntityKey, Mode, SearchRequest};
use super::error::ExportResult;
use super::kind::{Dependency, KindDescriptor, Matching};
use super::report::{Failure, Phase};

/// Symbolic pointer to an attribute of another emitted block
///
/// `prefix` and `suffix` hold the text around the target's value when the
/// reference was found embedded inside a larger string.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub target: EntityKey,
    pub mode: Mode,
    pub name: String,
    pub attribute: String,
    pub prefix: String,
    pub suffix: String,
}

impl Reference {
    /// `databricks_cluster.etl` or `data.databricks_group.admins`
    pub fn address(&self) -> String {
        match self.mode {
            Mode::Resource => format!("{}.{}", self.target.kind, self.name),
            Mode::Data => format!("data.{}.{}", self.target.kind, self.name),
        }
    }

    pub fn expression(&self) -> String {
        format!("{}.{}", self.address(), self.attribute)
    }

    pub fn is_embedded(&self) -> bool {
        !self.prefix.is_empty() || !self.suffix.is_empty()
    }
}

/// Scalar values found at a dotted path
///
/// Lists are traversed at any level, so `library.jar` visits the `jar` of
/// every library entry. Absent, null and empty values yield nothing.
pub fn values_at(state: &Attributes, path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = state.get(*first) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect(value: &Value, rest: &[&str], out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, rest, out);
            }
        }
        Value::Object(map) => {
            if let Some((first, tail)) = rest.split_first() {
                if let Some(next) = map.get(*first) {
                    collect(next, tail, out);
                }
            }
        }
        _ if !rest.is_empty() => {}
        Value::String(s) if !s.is_empty() => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        _ => {}
    }
}

/// String form of a scalar attribute, used for attribute matching
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Queue whatever the declared dependencies of `entity` point at
///
/// Search failures are recorded and leave the value literal; only fatal
/// errors are returned.
pub(crate) fn discover_dependencies(
    ctx: &ExportContext,
    descriptor: &KindDescriptor,
    entity: &Entity,
) -> ExportResult<()> {
    let mut paths: Vec<&str> = Vec::new();
    for dep in descriptor.depends {
        if !paths.contains(&dep.path) {
            paths.push(dep.path);
        }
    }

    for path in paths {
        let deps: Vec<&Dependency> = descriptor.dependencies_at(path).collect();
        for value in values_at(&entity.state, path) {
            enqueue_by_id(ctx, &deps, &value)?;
            enqueue_by_search(ctx, entity, &deps, &value)?;
        }
    }
    Ok(())
}

fn enqueue_by_id(ctx: &ExportContext, deps: &[&Dependency], value: &str) -> ExportResult<()> {
    let targets: Vec<EntityKey> = deps
        .iter()
        .filter(|d| d.matching == Matching::Id)
        .map(|d| EntityKey::new(d.kind, value))
        .collect();

    // One path may name several kinds; a known target settles it.
    for target in &targets {
        if ctx.stage_of(target)?.is_some() {
            return Ok(());
        }
    }
    for target in targets {
        ctx.emit(Emit::new(target.kind, target.id))?;
    }
    Ok(())
}

fn enqueue_by_search(
    ctx: &ExportContext,
    entity: &Entity,
    deps: &[&Dependency],
    value: &str,
) -> ExportResult<()> {
    for dep in deps.iter().filter(|d| d.matching != Matching::Id) {
        let target = ctx.registry().get(dep.kind)?;
        let Some(search) = target.search else {
            continue;
        };

        let mut request = SearchRequest::new(dep.kind, dep.target_attribute(), value);
        match search(ctx, &mut request) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Search for {} {} = {:?} failed: {}", dep.kind, request.attribute, value, e);
                ctx.state.lock()?.report.record(Failure::new(
                    dep.kind,
                    Some(value),
                    Phase::Search,
                    format!("referenced from {}: {}", entity.key, e),
                ));
                continue;
            }
        }

        match request.id {
            Some(id) => {
                ctx.emit(Emit::new(dep.kind, id))?;
                return Ok(());
            }
            None => debug!(
                "No {} with {} = {:?}, {} keeps the literal",
                dep.kind, request.attribute, value, entity.key
            ),
        }
    }
    Ok(())
}

/// Reference for `value` found at `path` of a `descriptor` entity
///
/// Declarations are tried in order; the first finalized target wins.
pub fn resolve(
    discovery: &Discovery,
    descriptor: &KindDescriptor,
    path: &str,
    value: &str,
) -> Option<Reference> {
    if value.is_empty() {
        return None;
    }
    descriptor
        .dependencies_at(path)
        .find_map(|dep| resolve_one(discovery, dep, value))
}

fn resolve_one(discovery: &Discovery, dep: &Dependency, value: &str) -> Option<Reference> {
    match dep.matching {
        Matching::Id => {
            let key = EntityKey::new(dep.kind, value);
            discovery
                .get(&key)
                .and_then(|target| reference_to(discovery, target, "id", "", ""))
        }
        Matching::Attribute(attribute) => discovery
            .of_kind(dep.kind)
            .find(|target| {
                target
                    .state
                    .get(attribute)
                    .and_then(scalar_text)
                    .is_some_and(|v| v == value)
            })
            .and_then(|target| reference_to(discovery, target, attribute, "", "")),
        Matching::Embedded(attribute) => {
            let (target, needle) = discovery
                .of_kind(dep.kind)
                .filter_map(|target| {
                    let needle = target.state.get(attribute).and_then(scalar_text)?;
                    value.contains(needle.as_str()).then_some((target, needle))
                })
                .max_by_key(|(_, needle)| needle.len())?;
            let at = value.find(needle.as_str())?;
            let prefix = &value[..at];
            let suffix = &value[at + needle.len()..];
            reference_to(discovery, target, attribute, prefix, suffix)
        }
    }
}

fn reference_to(
    discovery: &Discovery,
    target: &Entity,
    attribute: &str,
    prefix: &str,
    suffix: &str,
) -> Option<Reference> {
    let name = discovery.name_of(&target.key)?;
    Some(Reference {
        target: target.key.clone(),
        mode: target.mode,
        name: name.to_string(),
        attribute: attribute.to_string(),
        prefix: prefix.to_string(),
        suffix: suffix.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    static DEPENDS: &[Dependency] = &[
        Dependency::id("existing_cluster_id", "databricks_cluster"),
        Dependency::attribute("library.jar", "databricks_dbfs_file", "dbfs_path"),
        Dependency::embedded("spark_python_task.parameters", "databricks_dbfs_file", "dbfs_path"),
    ];

    fn descriptor() -> KindDescriptor {
        KindDescriptor::new("databricks_job", "jobs").with_depends(DEPENDS)
    }

    fn discovery() -> Discovery {
        let mut file = Entity::new(EntityKey::new("databricks_dbfs_file", "dbfs:/libs/a.jar"));
        file.state = state(json!({"path": "/libs/a.jar", "dbfs_path": "dbfs:/libs/a.jar"}));
        let cluster = Entity::new(EntityKey::new("databricks_cluster", "0101-abc-def"));

        Discovery::from_parts(vec![
            (file, "_a_jar_0c1d".to_string()),
            (cluster, "etl_0101_abc_def".to_string()),
        ])
    }

    #[test]
    fn test_values_at_scalar_and_lists() {
        let s = state(json!({
            "existing_cluster_id": "c1",
            "library": [{"jar": "dbfs:/a.jar"}, {"pypi": {"package": "x"}}, {"jar": "dbfs:/b.jar"}],
            "new_cluster": {"init_scripts": [{"dbfs": {"destination": "dbfs:/init.sh"}}]},
            "empty": "",
            "spark_python_task": {"parameters": ["--in", "dbfs:/data"]}
        }));

        assert_eq!(values_at(&s, "existing_cluster_id"), vec!["c1"]);
        assert_eq!(values_at(&s, "library.jar"), vec!["dbfs:/a.jar", "dbfs:/b.jar"]);
        assert_eq!(
            values_at(&s, "new_cluster.init_scripts.dbfs.destination"),
            vec!["dbfs:/init.sh"]
        );
        assert_eq!(
            values_at(&s, "spark_python_task.parameters"),
            vec!["--in", "dbfs:/data"]
        );
        assert!(values_at(&s, "empty").is_empty());
        assert!(values_at(&s, "absent.path").is_empty());
        assert!(values_at(&s, "existing_cluster_id.deeper").is_empty());
    }

    #[test]
    fn test_resolve_by_id() {
        let r = resolve(&discovery(), &descriptor(), "existing_cluster_id", "0101-abc-def").unwrap();
        assert_eq!(r.expression(), "databricks_cluster.etl_0101_abc_def.id");
        assert!(!r.is_embedded());
    }

    #[test]
    fn test_resolve_unknown_id_keeps_literal() {
        assert!(resolve(&discovery(), &descriptor(), "existing_cluster_id", "deleted").is_none());
    }

    #[test]
    fn test_resolve_by_attribute() {
        let r = resolve(&discovery(), &descriptor(), "library.jar", "dbfs:/libs/a.jar").unwrap();
        assert_eq!(r.expression(), "databricks_dbfs_file._a_jar_0c1d.dbfs_path");
        assert!(resolve(&discovery(), &descriptor(), "library.jar", "dbfs:/libs/b.jar").is_none());
    }

    #[test]
    fn test_resolve_embedded() {
        let r = resolve(
            &discovery(),
            &descriptor(),
            "spark_python_task.parameters",
            "--jar=dbfs:/libs/a.jar;cache",
        )
        .unwrap();
        assert_eq!(r.prefix, "--jar=");
        assert_eq!(r.suffix, ";cache");
        assert!(r.is_embedded());
    }

    #[test]
    fn test_data_mode_address() {
        let r = Reference {
            target: EntityKey::new("databricks_group", "g1"),
            mode: Mode::Data,
            name: "admins".to_string(),
            attribute: "id".to_string(),
            prefix: String::new(),
            suffix: String::new(),
        };
        assert_eq!(r.expression(), "data.databricks_group.admins.id");
    }
}
