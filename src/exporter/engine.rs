//! Discovery traversal
//!
//! Seeding runs the list hook of every selected kind, several at a time.
//! The queue is then drained to a fixed point: each entity is read,
//! named, enriched by its import hook, checked against its ignore
//! predicate and finally swept for declared dependencies, any of which may
//! queue more work. Identities are checked when they are queued, so every
//! entity is processed at most once however often it is referenced.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Semaphore;

use super::context::ExportContext;
use super::entity::{Entity, EntityKey, Stage};
use super::error::{ExportError, ExportResult};
use super::kind::KindDescriptor;
use super::report::{Failure, Phase, Report};
use super::resolver;

/// Outcome of discovery: the finalized entities under their sealed names
#[derive(Debug, Default)]
pub struct Discovery {
    entities: BTreeMap<EntityKey, Entity>,
    names: HashMap<EntityKey, String>,
    stages: BTreeMap<EntityKey, Stage>,
    pub report: Report,
}

impl Discovery {
    /// Finalized entities ordered by identity
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Finalized entity by identity
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    /// Finalized entities of one kind
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities
            .range(EntityKey::new(kind, "")..)
            .take_while(move |(key, _)| key.kind == kind)
            .map(|(_, entity)| entity)
    }

    pub fn name_of(&self, key: &EntityKey) -> Option<&str> {
        self.names.get(key).map(String::as_str)
    }

    /// Terminal stage of any identity seen during the run
    pub fn stage(&self, key: &EntityKey) -> Option<Stage> {
        self.stages.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_parts(parts: Vec<(Entity, String)>) -> Self {
        let mut discovery = Discovery::default();
        for (entity, name) in parts {
            discovery.names.insert(entity.key.clone(), name);
            discovery.stages.insert(entity.key.clone(), Stage::Finalized);
            discovery.entities.insert(entity.key.clone(), entity);
        }
        discovery
    }
}

/// Drives one discovery run over an [`ExportContext`]
pub struct Engine {
    ctx: Arc<ExportContext>,
}

impl Engine {
    pub fn new(ctx: Arc<ExportContext>) -> Self {
        Self { ctx }
    }

    /// Seed, drain to a fixed point and seal names
    pub fn discover(&self) -> ExportResult<Discovery> {
        let kinds: Vec<KindDescriptor> = self
            .ctx
            .registry()
            .listable(&self.ctx.config().services)?
            .into_iter()
            .copied()
            .collect();

        self.seed(kinds)?;
        self.drain()?;
        self.finish()
    }

    /// Run list hooks concurrently; a failing kind only loses its own seeds
    fn seed(&self, kinds: Vec<KindDescriptor>) -> ExportResult<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let results = runtime.block_on(list_parallel(
            Arc::clone(&self.ctx),
            kinds,
            self.ctx.config().concurrency,
        ));

        for (kind, result) in results {
            match result {
                Ok(()) => debug!("Listed {}", kind),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Listing {} failed: {}", kind, e);
                    self.ctx
                        .state
                        .lock()?
                        .report
                        .record(Failure::new(kind, None, Phase::List, e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn drain(&self) -> ExportResult<()> {
        let mut processed = 0usize;
        loop {
            let next = self.ctx.state.lock()?.queue.pop_front();
            let Some(key) = next else {
                break;
            };
            self.process(&key)?;
            processed += 1;
            if processed % 100 == 0 {
                let queued = self.ctx.state.lock()?.queue.len();
                info!("Processed {} entities, {} queued", processed, queued);
            }
        }
        info!("Discovery reached a fixed point after {} entities", processed);
        Ok(())
    }

    fn process(&self, key: &EntityKey) -> ExportResult<()> {
        let ctx: &ExportContext = &self.ctx;
        let descriptor = *ctx.registry().get(&key.kind)?;

        let (mut entity, preloaded) = {
            let state = ctx.state.lock()?;
            match state.entities.get(key) {
                Some(entity) => (entity.clone(), state.preloaded.contains(key)),
                None => return Ok(()),
            }
        };

        if !preloaded {
            if let Some(read) = descriptor.read {
                match read(ctx, &key.id) {
                    Ok(Some(attributes)) => entity.state = attributes,
                    Ok(None) => {
                        debug!("{} does not exist, references stay literal", key);
                        return self.settle(entity, Stage::Missing);
                    }
                    Err(e) => return self.fail(entity, Phase::Read, e),
                }
            }
        }

        {
            let mut state = ctx.state.lock()?;
            let candidate = entity
                .name_hint
                .clone()
                .unwrap_or_else(|| descriptor.candidate_name(&key.id, &entity.state));
            state.names.allocate(key, &candidate);
        }

        if let Some(import) = descriptor.import {
            if let Err(e) = import(ctx, &mut entity) {
                return self.fail(entity, Phase::Import, e);
            }
        }
        self.store(&entity, Stage::Enriched)?;

        if let Some(ignore) = descriptor.ignore {
            if ignore(ctx, &entity) {
                info!("Ignoring {}", key);
                return self.settle(entity, Stage::Ignored);
            }
        }

        resolver::discover_dependencies(ctx, &descriptor, &entity)?;
        self.settle(entity, Stage::Finalized)
    }

    fn store(&self, entity: &Entity, stage: Stage) -> ExportResult<()> {
        let mut state = self.ctx.state.lock()?;
        state.set_stage(&entity.key, stage);
        state.entities.insert(entity.key.clone(), entity.clone());
        Ok(())
    }

    fn settle(&self, entity: Entity, stage: Stage) -> ExportResult<()> {
        let mut state = self.ctx.state.lock()?;
        state.set_stage(&entity.key, stage);
        state.entities.insert(entity.key.clone(), entity);
        Ok(())
    }

    fn fail(&self, entity: Entity, phase: Phase, err: ExportError) -> ExportResult<()> {
        if err.is_fatal() {
            return Err(err);
        }
        error!("{} {} failed: {}", entity.key, phase, err);
        let failure = Failure::new(&entity.key.kind, Some(entity.key.id.as_str()), phase, err.to_string());
        self.ctx.state.lock()?.report.record(failure);
        self.settle(entity, Stage::Failed)
    }

    /// Seal names and hand out the finalized set
    fn finish(&self) -> ExportResult<Discovery> {
        let mut state = self.ctx.state.lock()?;
        state.names.seal();

        let mut discovery = Discovery {
            report: std::mem::take(&mut state.report),
            ..Default::default()
        };

        let stages: Vec<(EntityKey, Stage)> =
            state.stages.iter().map(|(k, s)| (k.clone(), *s)).collect();
        for (key, stage) in stages {
            discovery.stages.insert(key.clone(), stage);
            if stage != Stage::Finalized {
                discovery.report.count(&key.kind, stage);
                continue;
            }
            let Some(name) = state.names.name_of(&key).map(str::to_string) else {
                continue;
            };
            if let Some(entity) = state.entities.remove(&key) {
                discovery.names.insert(key.clone(), name);
                discovery.entities.insert(key, entity);
            }
        }

        info!(
            "Discovered {} entities to emit out of {} seen",
            discovery.entities.len(),
            discovery.stages.len()
        );
        Ok(discovery)
    }
}

/// Run each kind's list hook on the blocking pool, bounded by `max_concurrent`
async fn list_parallel(
    ctx: Arc<ExportContext>,
    kinds: Vec<KindDescriptor>,
    max_concurrent: usize,
) -> Vec<(&'static str, ExportResult<()>)> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut handles = Vec::new();

    for descriptor in kinds {
        let Some(list) = descriptor.list else {
            continue;
        };
        let permit = semaphore.clone().acquire_owned().await.ok();
        let ctx = Arc::clone(&ctx);
        let kind = descriptor.kind;

        let handle = tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || list(ctx.as_ref()))
                .await
                .unwrap_or_else(|e| Err(ExportError::remote(kind, format!("list task panicked: {}", e))));
            drop(permit);
            result
        });
        handles.push((kind, handle));
    }

    let mut results = Vec::new();
    for (kind, handle) in handles {
        let result = handle
            .await
            .unwrap_or_else(|e| Err(ExportError::remote(kind, format!("list task failed: {}", e))));
        results.push((kind, result));
    }
    results
}
