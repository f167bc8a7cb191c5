//! Emission pipeline
//!
//! Turns the finalized set into an [`ArtifactSet`]. Every entity goes
//! through its kind's body hook or, without one, the default mapper that
//! walks the raw state and swaps resolvable values for references. Payloads
//! become side files under `files/`, unrecoverable secrets become input
//! variables. Blocks whose body fails are dropped and every reference to
//! them falls back to its literal. The result is ordered so that each
//! block comes after the blocks it refers to.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, error, info};
use serde_json::Value;

use crate::api::Attributes;

use super::context::ExportContext;
use super::engine::Discovery;
use super::entity::{Entity, EntityKey, Mode, Stage};
use super::error::ExportResult;
use super::hcl::is_identifier;
use super::kind::KindDescriptor;
use super::naming::{sanitize_name, short_digest};
use super::report::{Failure, Phase};
use super::resolver::{self, Reference};

/// Ordered attributes of a block or nested block
pub type BlockBody = Vec<(String, Expr)>;

/// Right-hand side of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Symbolic reference, with the literal it replaces
    Reference { reference: Reference, literal: Value },
    /// Input variable by name
    Variable(String),
    /// Side file under `files/`
    FilePath(String),
    List(Vec<Expr>),
    /// Free-form map attribute
    Object(Vec<(String, Expr)>),
    /// Nested blocks; one entry per repetition
    Blocks(Vec<BlockBody>),
}

impl Expr {
    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Value::String(value.into()))
    }

    fn visit_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expr::Reference { reference, .. } => out.push(reference),
            Expr::List(items) => items.iter().for_each(|e| e.visit_references(out)),
            Expr::Object(entries) => entries.iter().for_each(|(_, e)| e.visit_references(out)),
            Expr::Blocks(bodies) => bodies
                .iter()
                .flatten()
                .for_each(|(_, e)| e.visit_references(out)),
            Expr::Literal(_) | Expr::Variable(_) | Expr::FilePath(_) => {}
        }
    }

    /// Replace references to `failed` targets with their literals
    fn degrade(&mut self, failed: &HashSet<EntityKey>) {
        let replacement = match self {
            Expr::Reference { reference, literal } if failed.contains(&reference.target) => {
                Some(Expr::Literal(literal.clone()))
            }
            Expr::List(items) => {
                items.iter_mut().for_each(|e| e.degrade(failed));
                None
            }
            Expr::Object(entries) => {
                entries.iter_mut().for_each(|(_, e)| e.degrade(failed));
                None
            }
            Expr::Blocks(bodies) => {
                bodies
                    .iter_mut()
                    .flatten()
                    .for_each(|(_, e)| e.degrade(failed));
                None
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            *self = replacement;
        }
    }
}

/// One emitted resource or data block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: EntityKey,
    pub name: String,
    pub mode: Mode,
    pub service: &'static str,
    pub body: BlockBody,
    /// Blocks this one refers to
    pub dependencies: BTreeSet<EntityKey>,
}

impl Block {
    pub fn kind(&self) -> &str {
        &self.key.kind
    }

    /// Set an attribute, replacing an earlier value in place
    pub fn set(&mut self, attribute: &str, expr: Expr) {
        match self.body.iter_mut().find(|(name, _)| name == attribute) {
            Some((_, existing)) => *existing = expr,
            None => self.body.push((attribute.to_string(), expr)),
        }
    }

    pub fn set_literal(&mut self, attribute: &str, value: impl Into<Value>) {
        self.set(attribute, Expr::Literal(value.into()));
    }

    pub fn get(&self, attribute: &str) -> Option<&Expr> {
        self.body
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, expr)| expr)
    }

    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for (_, expr) in &self.body {
            expr.visit_references(&mut out);
        }
        out
    }
}

/// Extracted payload, written relative to the output directory
#[derive(Debug, Clone, PartialEq)]
pub struct SideFile {
    /// Relative path, always under `files/`
    pub path: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputVariable {
    pub name: String,
    pub description: String,
}

/// Everything one run produces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactSet {
    /// In dependency order
    pub blocks: Vec<Block>,
    pub files: Vec<SideFile>,
    pub variables: Vec<InputVariable>,
}

impl ArtifactSet {
    pub fn block(&self, kind: &str, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.kind() == kind && b.name == name)
    }

    pub fn blocks_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.kind() == kind)
    }
}

/// Serialization state handed to body hooks
pub struct Emitter<'a> {
    ctx: &'a ExportContext,
    discovery: &'a Discovery,
    files: BTreeMap<String, SideFile>,
    variables: BTreeMap<String, InputVariable>,
    pending_files: Vec<SideFile>,
    pending_variables: Vec<InputVariable>,
}

impl<'a> Emitter<'a> {
    pub fn new(ctx: &'a ExportContext, discovery: &'a Discovery) -> Self {
        Self {
            ctx,
            discovery,
            files: BTreeMap::new(),
            variables: BTreeMap::new(),
            pending_files: Vec::new(),
            pending_variables: Vec::new(),
        }
    }

    pub fn ctx(&self) -> &'a ExportContext {
        self.ctx
    }

    pub fn discovery(&self) -> &'a Discovery {
        self.discovery
    }

    /// Empty block labelled with the entity's kind and sealed name
    pub fn new_block(&self, entity: &Entity) -> Block {
        let name = self
            .discovery
            .name_of(&entity.key)
            .map(str::to_string)
            .unwrap_or_else(|| sanitize_name(entity.id()));
        let service = self
            .ctx
            .registry()
            .get(entity.kind())
            .map(|d| d.service)
            .unwrap_or_default();
        Block {
            key: entity.key.clone(),
            name,
            mode: entity.mode,
            service,
            body: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    /// Block built from raw state and the kind's dependency declarations
    pub fn default_block(&mut self, entity: &Entity) -> ExportResult<Block> {
        let descriptor = self.ctx.registry().get(entity.kind())?;
        let mut block = self.new_block(entity);
        block.body = self.map_object(descriptor, "", &entity.state);
        Ok(block)
    }

    /// Reference for `value` at `path`, or the literal when nothing resolves
    pub fn reference(&self, entity: &Entity, path: &str, value: &str) -> Expr {
        let literal = Value::String(value.to_string());
        match self.ctx.registry().get(entity.kind()) {
            Ok(descriptor) => self.resolve_scalar(descriptor, path, value, &literal),
            Err(_) => Expr::Literal(literal),
        }
    }

    /// Declare an input variable and refer to it
    pub fn variable(&mut self, name: &str, description: impl Into<String>) -> Expr {
        let name = sanitize_name(name);
        self.pending_variables.push(InputVariable {
            name: name.clone(),
            description: description.into(),
        });
        Expr::Variable(name)
    }

    /// Store a payload under a name derived from its identity and a hint
    pub fn side_file(&mut self, identity: &str, hint: &str, content: Vec<u8>) -> Expr {
        let file_name = format!("{}_{}", short_digest(identity), sanitize_file_name(hint));
        self.pending_files.push(SideFile {
            path: format!("files/{}", file_name),
            content,
        });
        Expr::FilePath(file_name)
    }

    /// Serialize the whole finalized set
    ///
    /// Body failures are recorded in the discovery report; only fatal
    /// errors abort.
    pub fn emit_all(mut self, report: &mut super::report::Report) -> ExportResult<ArtifactSet> {
        let discovery = self.discovery;
        let mut blocks = Vec::new();
        let mut failed = HashSet::new();

        for entity in discovery.entities() {
            let descriptor = self.ctx.registry().get(entity.kind())?;
            let result = match descriptor.body {
                Some(body) => body(&mut self, entity),
                None => self.default_block(entity),
            };

            match result {
                Ok(block) => {
                    self.commit();
                    blocks.push(block);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Cannot emit {}: {}", entity.key, e);
                    self.discard();
                    report.record(Failure::new(
                        entity.kind(),
                        Some(entity.id()),
                        Phase::Body,
                        e.to_string(),
                    ));
                    report.count(entity.kind(), Stage::Failed);
                    failed.insert(entity.key.clone());
                }
            }
        }

        for block in &mut blocks {
            for (_, expr) in &mut block.body {
                expr.degrade(&failed);
            }
            let own = block.key.clone();
            block.dependencies = block
                .references()
                .into_iter()
                .map(|r| r.target.clone())
                .filter(|target| *target != own)
                .collect();
            report.count(block.kind(), Stage::Finalized);
        }

        let blocks = order_blocks(blocks);
        info!(
            "Emitted {} blocks, {} side files, {} variables",
            blocks.len(),
            self.files.len(),
            self.variables.len()
        );

        Ok(ArtifactSet {
            blocks,
            files: self.files.into_values().collect(),
            variables: self.variables.into_values().collect(),
        })
    }

    fn commit(&mut self) {
        for file in self.pending_files.drain(..) {
            self.files.insert(file.path.clone(), file);
        }
        for variable in self.pending_variables.drain(..) {
            self.variables.insert(variable.name.clone(), variable);
        }
    }

    fn discard(&mut self) {
        self.pending_files.clear();
        self.pending_variables.clear();
    }

    fn map_object(&self, descriptor: &KindDescriptor, prefix: &str, object: &Attributes) -> BlockBody {
        object
            .iter()
            .filter(|(name, _)| !(prefix.is_empty() && name.as_str() == "id"))
            .filter_map(|(name, value)| {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", prefix, name)
                };
                self.map_value(descriptor, &path, value)
                    .map(|expr| (name.clone(), expr))
            })
            .collect()
    }

    fn map_value(&self, descriptor: &KindDescriptor, path: &str, value: &Value) -> Option<Expr> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(self.resolve_scalar(descriptor, path, s, value)),
            Value::Number(n) => Some(self.resolve_scalar(descriptor, path, &n.to_string(), value)),
            Value::Bool(_) => Some(Expr::Literal(value.clone())),
            Value::Array(items) if items.is_empty() => None,
            Value::Array(_) if descriptor.is_map_attribute(path) => Some(Expr::Literal(value.clone())),
            Value::Array(items) if items.iter().all(has_identifier_keys) => Some(Expr::Blocks(
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|item| self.map_object(descriptor, path, item))
                    .collect(),
            )),
            Value::Array(items) => Some(Expr::List(
                items
                    .iter()
                    .map(|item| {
                        self.map_value(descriptor, path, item)
                            .unwrap_or_else(|| Expr::Literal(item.clone()))
                    })
                    .collect(),
            )),
            Value::Object(map) if map.is_empty() => None,
            Value::Object(map)
                if descriptor.is_map_attribute(path) || !has_identifier_keys(value) =>
            {
                Some(Expr::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Expr::Literal(v.clone())))
                        .collect(),
                ))
            }
            Value::Object(map) => Some(Expr::Blocks(vec![self.map_object(descriptor, path, map)])),
        }
    }

    fn resolve_scalar(&self, descriptor: &KindDescriptor, path: &str, text: &str, literal: &Value) -> Expr {
        match resolver::resolve(self.discovery, descriptor, path, text) {
            Some(reference) => {
                debug!("{} {} -> {}", descriptor.kind, path, reference.expression());
                Expr::Reference {
                    reference,
                    literal: literal.clone(),
                }
            }
            None => Expr::Literal(literal.clone()),
        }
    }
}

/// Objects whose keys can all be written as nested block attributes
fn has_identifier_keys(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.keys().all(|k| is_identifier(k)))
}

/// File names keep letters, digits, dots and dashes
fn sanitize_file_name(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Topological order; ties and cycles fall back to (kind, name)
fn order_blocks(blocks: Vec<Block>) -> Vec<Block> {
    let index: HashMap<EntityKey, usize> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.key.clone(), i))
        .collect();

    let mut indegree = vec![0usize; blocks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); blocks.len()];
    for (i, block) in blocks.iter().enumerate() {
        for dep in &block.dependencies {
            if let Some(&j) = index.get(dep) {
                indegree[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let sort_key = |i: usize| (blocks[i].key.kind.clone(), blocks[i].name.clone(), i);
    let mut ready: BTreeSet<(String, String, usize)> = (0..blocks.len())
        .filter(|&i| indegree[i] == 0)
        .map(sort_key)
        .collect();

    let mut order = Vec::with_capacity(blocks.len());
    let mut placed = vec![false; blocks.len()];
    loop {
        let next = match ready.pop_first() {
            Some((_, _, i)) => i,
            None => {
                // Cycle: release the smallest remaining block.
                match (0..blocks.len())
                    .filter(|&i| !placed[i])
                    .map(sort_key)
                    .min()
                {
                    Some((_, _, i)) => i,
                    None => break,
                }
            }
        };
        if placed[next] {
            continue;
        }
        placed[next] = true;
        order.push(next);
        for &d in &dependents[next] {
            indegree[d] = indegree[d].saturating_sub(1);
            if indegree[d] == 0 && !placed[d] {
                ready.insert(sort_key(d));
            }
        }
    }

    let mut slots: Vec<Option<Block>> = blocks.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}
