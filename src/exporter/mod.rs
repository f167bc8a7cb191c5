//! Workspace export pipeline
//!
//! A run has three phases:
//!
//! 1. discovery: list seeds, then drain the queue until no new entity shows up
//! 2. emission: turn every finalized entity into a block, side files and variables
//! 3. writing: render the artifact set as HCL into the output directory
//!
//! Per-kind behavior lives in [`importables`]; everything else is generic.

pub mod caches;
pub mod config;
pub mod context;
pub mod emission;
pub mod engine;
pub mod entity;
pub mod error;
pub mod hcl;
pub mod importables;
pub mod kind;
pub mod naming;
pub mod registry;
pub mod report;
pub mod resolver;

use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use crate::api::WorkspaceApi;
use crate::traits::FileSystem;

use config::ExportConfig;
use context::ExportContext;
use emission::{ArtifactSet, Emitter};
use engine::Engine;
use error::ExportResult;
use hcl::HclWriter;
use registry::KindRegistry;
use report::Report;

/// Result of a completed run
pub struct ExportOutcome {
    pub report: Report,
    pub artifacts: ArtifactSet,
    pub written: Vec<PathBuf>,
}

/// Discover, emit and write one workspace export
///
/// Only fatal errors are returned; per-entity failures end up in the report.
pub fn run(
    api: Arc<dyn WorkspaceApi>,
    fs: &dyn FileSystem,
    config: ExportConfig,
) -> ExportResult<ExportOutcome> {
    let output_dir = config.output_dir.clone();
    let ctx = Arc::new(ExportContext::new(
        api,
        Arc::new(KindRegistry::with_defaults()),
        config,
    )?);

    let mut discovery = Engine::new(Arc::clone(&ctx)).discover()?;
    info!("Discovered {} entities", discovery.len());

    let mut report = std::mem::take(&mut discovery.report);
    let artifacts = Emitter::new(&ctx, &discovery).emit_all(&mut report)?;
    let written = HclWriter::new(fs, &output_dir).write(&artifacts)?;

    Ok(ExportOutcome {
        report,
        artifacts,
        written,
    })
}
