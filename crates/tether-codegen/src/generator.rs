//! One generation run over a declaration set.
//!
//! Declarations are split into chunks bound on scoped worker threads, each
//! with its own [`HelperEngine`]. Every engine feeds the single helper
//! aggregator, which owns deduplication.

use tether_layout::RecordKey;
use tether_shape::{DeclKind, Declaration};

use crate::aggregate::HelperAggregator;
use crate::config::GeneratorConfig;
use crate::context::GenContext;
use crate::engine::HelperEngine;
use crate::error::{GenError, GenResult};
use crate::function::{emit_function, FunctionBinding};
use crate::prelude;
use crate::structs::{emit_struct, StructBinding};
use crate::types::{emit_callback, emit_enum};
use crate::unit::{GeneratedBlock, GeneratedUnit};

pub fn generate(config: GeneratorConfig, decls: &[Declaration]) -> GenResult<GeneratedUnit> {
    let mut ctx = GenContext::new(config, decls)?;
    mark_unbindable(&mut ctx);

    let aggregator = HelperAggregator::spawn(ctx.config.options.queue_capacity)?;
    let outcomes = bind_all(&ctx, &aggregator, decls);
    // Worker errors are often just the aggregator going away, so its own
    // error is reported first.
    let registry = aggregator.finish()?;
    let outcomes = outcomes?;

    let mut blocks = Vec::with_capacity(outcomes.len());
    let mut diagnostics = Vec::new();
    for (decl, outcome) in decls.iter().zip(outcomes) {
        let failure = record_key(decl)
            .and_then(|key| ctx.take_layout_failure(&key).map(|err| (key, err)));
        let outcome = match failure {
            Some((key, source)) => Err(GenError::RecordLayout {
                record: key.to_string(),
                source,
            }),
            None => outcome,
        };
        match outcome {
            Ok(block) => blocks.push(block),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                log::warn!("{}", err);
                diagnostics.push(err);
            }
        }
    }

    let helpers = registry.into_units();
    log::info!(
        "generated {} declarations and {} helpers, skipped {}",
        blocks.len(),
        helpers.len(),
        diagnostics.len()
    );
    Ok(GeneratedUnit {
        package: ctx.config.package.clone(),
        arch: ctx.config.arch,
        includes: ctx.config.includes.clone(),
        blocks,
        helpers,
        diagnostics,
    })
}

fn record_key(decl: &Declaration) -> Option<RecordKey> {
    match &decl.kind {
        DeclKind::Struct(spec) => Some(RecordKey::new(spec.tag.clone(), false)),
        DeclKind::Union(spec) => Some(RecordKey::new(spec.tag.clone(), true)),
        _ => None,
    }
}

/// Marks records that cannot be bound, including records whose members
/// refer to such records, until nothing changes.
fn mark_unbindable(ctx: &mut GenContext) {
    loop {
        let view: &GenContext = ctx;
        let failed: Vec<RecordKey> = view
            .decls
            .records()
            .filter(|(spec, union)| !view.is_skipped(&spec.tag, *union))
            .filter(|(spec, union)| StructBinding::new(view, spec, *union, &Default::default()).is_err())
            .map(|(spec, union)| RecordKey::new(spec.tag.clone(), union))
            .collect();
        if failed.is_empty() {
            return;
        }
        for key in failed {
            log::debug!("{} cannot be bound", key);
            ctx.skip_record(key);
        }
    }
}

fn bind_all(
    ctx: &GenContext,
    aggregator: &HelperAggregator,
    decls: &[Declaration],
) -> GenResult<Vec<GenResult<GeneratedBlock>>> {
    {
        let mut engine = HelperEngine::new(ctx, aggregator.sink());
        for helper in prelude::always() {
            engine.provide(helper)?;
        }
    }
    if decls.is_empty() {
        return Ok(Vec::new());
    }

    let workers = ctx.config.options.worker_count().min(decls.len());
    let chunk = (decls.len() + workers - 1) / workers;
    log::debug!("binding {} declarations on {} workers", decls.len(), workers);

    let joined = crossbeam::scope(|scope| -> GenResult<Vec<GenResult<GeneratedBlock>>> {
        let mut handles = Vec::with_capacity(workers);
        for (i, part) in decls.chunks(chunk).enumerate() {
            let name = format!("bind-{}", i);
            let sink = aggregator.sink();
            let handle = scope
                .builder()
                .name(name.clone())
                .spawn(move |_| {
                    let mut engine = HelperEngine::new(ctx, sink);
                    part.iter()
                        .map(|decl| bind_declaration(&mut engine, decl).map_err(|err| err.in_decl(decl.name())))
                        .collect::<Vec<_>>()
                })
                .map_err(|err| GenError::Spawn {
                    name: name.clone(),
                    reason: err.to_string(),
                })?;
            handles.push((name, handle));
        }

        let mut outcomes = Vec::with_capacity(decls.len());
        for (name, handle) in handles {
            outcomes.extend(handle.join().map_err(|_| GenError::WorkerPanicked(name))?);
        }
        Ok(outcomes)
    });
    joined.map_err(|_| GenError::WorkerPanicked("bind".to_string()))?
}

fn bind_declaration(engine: &mut HelperEngine<'_>, decl: &Declaration) -> GenResult<GeneratedBlock> {
    let ctx = engine.context();
    log::trace!("binding {} {}", decl.kind_name(), decl.name());
    if let Some(key) = record_key(decl) {
        if ctx.has_layout_failure(&key.tag, key.union) {
            // Reported from the layout failure once workers are done.
            return Err(GenError::unsupported("no layout"));
        }
    }
    match &decl.kind {
        DeclKind::Struct(spec) => {
            let binding = StructBinding::new(ctx, spec, false, &decl.position)?;
            emit_struct(engine, &binding)
        }
        DeclKind::Union(spec) => {
            let binding = StructBinding::new(ctx, spec, true, &decl.position)?;
            emit_struct(engine, &binding)
        }
        DeclKind::Enum(spec) => Ok(emit_enum(ctx, spec, &decl.position)),
        DeclKind::Callback(spec) => Ok(emit_callback(ctx, spec, &decl.position)),
        DeclKind::Function(spec) => {
            let binding = FunctionBinding::new(ctx, spec, &decl.position)?;
            emit_function(engine, &binding)
        }
    }
}
