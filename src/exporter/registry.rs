use std::collections::{BTreeMap, BTreeSet};

use super::error::{ExportError, ExportResult};
use super::importables;
use super::kind::KindDescriptor;

/// Fixed mapping from kind name to its descriptor
///
/// Built once before a run and only read afterwards. Asking for a kind
/// that was never registered is a programming error and surfaces as the
/// fatal [`ExportError::UnknownKind`].
#[derive(Debug, Default, Clone)]
pub struct KindRegistry {
    kinds: BTreeMap<&'static str, KindDescriptor>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind, replacing an earlier descriptor with the same name
    pub fn register(&mut self, descriptor: KindDescriptor) -> &mut Self {
        self.kinds.insert(descriptor.kind, descriptor);
        self
    }

    /// Look up a kind; unknown kinds are fatal
    pub fn get(&self, kind: &str) -> ExportResult<&KindDescriptor> {
        self.kinds
            .get(kind)
            .ok_or_else(|| ExportError::UnknownKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// All descriptors ordered by kind name
    pub fn iter(&self) -> impl Iterator<Item = &KindDescriptor> {
        self.kinds.values()
    }

    /// Distinct service tags
    pub fn services(&self) -> BTreeSet<&'static str> {
        self.kinds.values().map(|d| d.service).collect()
    }

    /// Kinds with a `list` hook whose service is selected
    ///
    /// An empty selection means every service. Naming a service that no
    /// registered kind carries is a configuration error.
    pub fn listable(&self, services: &[String]) -> ExportResult<Vec<&KindDescriptor>> {
        let known = self.services();
        for service in services {
            if !known.contains(service.as_str()) {
                return Err(ExportError::InvalidConfig(format!(
                    "Unknown service '{}', expected one of: {}",
                    service,
                    known.iter().copied().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        Ok(self
            .kinds
            .values()
            .filter(|d| d.list.is_some())
            .filter(|d| services.is_empty() || services.iter().any(|s| s == d.service))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Registry holding every kind the exporter knows about
    pub fn with_defaults() -> Self {
        let mut builder = KindRegistryBuilder::new();
        for descriptor in importables::all() {
            builder = builder.with_kind(descriptor);
        }
        builder.build()
    }
}

/// Builder for creating a configured kind registry
pub struct KindRegistryBuilder {
    registry: KindRegistry,
}

impl KindRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: KindRegistry::new(),
        }
    }

    pub fn with_kind(mut self, descriptor: KindDescriptor) -> Self {
        self.registry.register(descriptor);
        self
    }

    pub fn build(self) -> KindRegistry {
        self.registry
    }
}

impl Default for KindRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
