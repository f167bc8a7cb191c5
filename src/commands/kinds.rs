use anyhow::Result;

use crate::context::Context;
use crate::exporter::kind::KindDescriptor;
use crate::exporter::registry::KindRegistry;

pub struct KindsCommand;

impl KindsCommand {
    /// Execute the kinds command: list registered kinds, optionally for one service
    pub fn execute(ctx: &Context, service: Option<&str>) -> Result<()> {
        let registry = KindRegistry::with_defaults();
        Self::display(ctx, &registry, service)
    }

    fn display(ctx: &Context, registry: &KindRegistry, service: Option<&str>) -> Result<()> {
        if let Some(service) = service {
            if !registry.services().contains(service) {
                anyhow::bail!(
                    "Unknown service '{}', expected one of: {}",
                    service,
                    registry.services().into_iter().collect::<Vec<_>>().join(", ")
                );
            }
        }

        ctx.output.section("Registered resource kinds");
        ctx.output.table_header(&["Kind", "Service", "Capabilities"]);

        let mut count = 0;
        for descriptor in registry
            .iter()
            .filter(|d| service.is_none_or(|s| s == d.service))
        {
            let capabilities = Self::capabilities(descriptor);
            ctx.output
                .table_row(&[descriptor.kind, descriptor.service, capabilities.as_str()]);
            count += 1;
        }

        ctx.output.blank();
        ctx.output.info(&format!("{} kinds", count));
        Ok(())
    }

    fn capabilities(descriptor: &KindDescriptor) -> String {
        let hooks = [
            ("list", descriptor.list.is_some()),
            ("search", descriptor.search.is_some()),
            ("read", descriptor.read.is_some()),
            ("import", descriptor.import.is_some()),
            ("body", descriptor.body.is_some()),
            ("ignore", descriptor.ignore.is_some()),
            ("depends", !descriptor.depends.is_empty()),
        ];
        hooks
            .iter()
            .filter(|(_, present)| *present)
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockFileSystem, MockOutput};
    use std::sync::Arc;

    #[test]
    fn test_lists_every_kind() {
        let output = Arc::new(MockOutput::new());
        let ctx = Context::test_with(Arc::new(MockFileSystem::new()), output.clone());

        KindsCommand::execute(&ctx, None).unwrap();

        let rows = output.table_rows();
        assert_eq!(rows.len(), KindRegistry::with_defaults().len());
        let cluster = rows.iter().find(|r| r[0] == "databricks_cluster").unwrap();
        assert_eq!(cluster[1], "compute");
        assert!(cluster[2].starts_with("list, read, import"));
    }

    #[test]
    fn test_filters_by_service() {
        let output = Arc::new(MockOutput::new());
        let ctx = Context::test_with(Arc::new(MockFileSystem::new()), output.clone());

        KindsCommand::execute(&ctx, Some("secrets")).unwrap();

        let rows = output.table_rows();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r[1] == "secrets"));
    }

    #[test]
    fn test_unknown_service() {
        let ctx = Context::test();
        assert!(KindsCommand::execute(&ctx, Some("billing")).is_err());
    }
}
