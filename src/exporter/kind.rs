//! Kind descriptors
//!
//! A kind is a capability bundle: optional hooks for naming, bulk listing,
//! search by attribute, reading remote state, enrichment, custom body
//! writing and ignore filtering, plus the declarations of which attributes
//! point at other kinds. The engine checks for a hook's presence before
//! calling it; a kind without `list` is only ever reached through
//! references.

use crate::api::Attributes;

use super::context::ExportContext;
use super::emission::{Block, Emitter};
use super::entity::{Entity, SearchRequest};
use super::error::ExportResult;

/// Candidate name from remote ID and state
pub type NameFn = fn(&str, &Attributes) -> String;

/// Bulk discovery; emits entities into the context
pub type ListFn = fn(&ExportContext) -> ExportResult<()>;

/// Resolve `request.value` of `request.attribute` to a remote ID
pub type SearchFn = fn(&ExportContext, &mut SearchRequest) -> ExportResult<()>;

/// Remote state of one object, `None` when it does not exist
pub type ReadFn = fn(&ExportContext, &str) -> ExportResult<Option<Attributes>>;

/// Post-discovery enrichment; may emit further entities and rewrite state
pub type ImportFn = fn(&ExportContext, &mut Entity) -> ExportResult<()>;

/// Custom serialization of one entity
pub type BodyFn = fn(&mut Emitter<'_>, &Entity) -> ExportResult<Block>;

/// Suppress emission of an enriched entity
pub type IgnoreFn = fn(&ExportContext, &Entity) -> bool;

/// How the value at a dependency path identifies its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matching {
    /// The value is the target's remote ID
    Id,
    /// The value equals the named attribute of the target
    Attribute(&'static str),
    /// The named attribute of the target occurs somewhere inside the value
    Embedded(&'static str),
}

/// Declares that an attribute refers to another kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Dotted attribute path; list levels are traversed implicitly
    pub path: &'static str,
    pub kind: &'static str,
    pub matching: Matching,
}

impl Dependency {
    pub const fn id(path: &'static str, kind: &'static str) -> Self {
        Self {
            path,
            kind,
            matching: Matching::Id,
        }
    }

    pub const fn attribute(path: &'static str, kind: &'static str, attribute: &'static str) -> Self {
        Self {
            path,
            kind,
            matching: Matching::Attribute(attribute),
        }
    }

    pub const fn embedded(path: &'static str, kind: &'static str, attribute: &'static str) -> Self {
        Self {
            path,
            kind,
            matching: Matching::Embedded(attribute),
        }
    }

    /// Attribute of the target a symbolic reference points at
    pub fn target_attribute(&self) -> &'static str {
        match self.matching {
            Matching::Id => "id",
            Matching::Attribute(attr) | Matching::Embedded(attr) => attr,
        }
    }
}

/// Immutable description of one registered kind
#[derive(Debug, Clone, Copy)]
pub struct KindDescriptor {
    pub kind: &'static str,
    /// Service tag used for selection and output grouping
    pub service: &'static str,
    pub name: Option<NameFn>,
    pub list: Option<ListFn>,
    pub search: Option<SearchFn>,
    pub read: Option<ReadFn>,
    pub import: Option<ImportFn>,
    pub body: Option<BodyFn>,
    pub ignore: Option<IgnoreFn>,
    pub depends: &'static [Dependency],
    /// Attribute paths holding free-form maps rather than nested blocks
    pub map_attributes: &'static [&'static str],
}

impl KindDescriptor {
    pub const fn new(kind: &'static str, service: &'static str) -> Self {
        Self {
            kind,
            service,
            name: None,
            list: None,
            search: None,
            read: None,
            import: None,
            body: None,
            ignore: None,
            depends: &[],
            map_attributes: &[],
        }
    }

    pub const fn with_name(mut self, f: NameFn) -> Self {
        self.name = Some(f);
        self
    }

    pub const fn with_list(mut self, f: ListFn) -> Self {
        self.list = Some(f);
        self
    }

    pub const fn with_search(mut self, f: SearchFn) -> Self {
        self.search = Some(f);
        self
    }

    pub const fn with_read(mut self, f: ReadFn) -> Self {
        self.read = Some(f);
        self
    }

    pub const fn with_import(mut self, f: ImportFn) -> Self {
        self.import = Some(f);
        self
    }

    pub const fn with_body(mut self, f: BodyFn) -> Self {
        self.body = Some(f);
        self
    }

    pub const fn with_ignore(mut self, f: IgnoreFn) -> Self {
        self.ignore = Some(f);
        self
    }

    pub const fn with_depends(mut self, depends: &'static [Dependency]) -> Self {
        self.depends = depends;
        self
    }

    pub const fn with_map_attributes(mut self, paths: &'static [&'static str]) -> Self {
        self.map_attributes = paths;
        self
    }

    /// Candidate name before sanitizing: name hook, else the remote ID
    pub fn candidate_name(&self, id: &str, state: &Attributes) -> String {
        match self.name {
            Some(name) => {
                let candidate = name(id, state);
                if candidate.is_empty() {
                    id.to_string()
                } else {
                    candidate
                }
            }
            None => id.to_string(),
        }
    }

    /// Declarations whose path is exactly `path`
    pub fn dependencies_at(&self, path: &str) -> impl Iterator<Item = &Dependency> {
        self.depends.iter().filter(move |d| d.path == path)
    }

    pub fn is_map_attribute(&self, path: &str) -> bool {
        self.map_attributes.contains(&path)
    }
}
