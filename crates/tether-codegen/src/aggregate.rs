//! The single place where helpers from all worker tasks meet.
//!
//! Workers push helpers through a bounded channel; one draining thread owns
//! the registry. Before anything is queued, sinks claim the helper's name in
//! a table shared by every sink, so a helper is queued once per run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{GenError, GenResult};
use crate::helper::{Helper, HelperSide};

/// Every accepted helper, keyed by name.
#[derive(Debug, Default)]
pub struct HelperRegistry {
    helpers: IndexMap<String, Arc<Helper>>,
    submissions: FxHashMap<String, usize>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a submitted helper and whatever it requires. A second
    /// submission with the same body is dropped; a different body under a
    /// known name is a collision.
    pub fn submit(&mut self, helper: Arc<Helper>) -> GenResult<()> {
        *self.submissions.entry(helper.name.clone()).or_default() += 1;
        self.insert(helper)
    }

    fn insert(&mut self, helper: Arc<Helper>) -> GenResult<()> {
        if let Some(known) = self.helpers.get(&helper.name) {
            if known.same_body(&helper) {
                return Ok(());
            }
            log::error!("helper `{}` submitted with a different body", helper.name);
            return Err(GenError::HelperCollision {
                name: helper.name.clone(),
            });
        }
        for required in &helper.requires {
            self.insert(required.clone())?;
        }
        log::trace!("accepted helper `{}`", helper.name);
        self.helpers.insert(helper.name.clone(), helper);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Helper>> {
        self.helpers.get(name)
    }

    /// How often a helper was submitted directly, ignoring pulls through
    /// `requires`.
    pub fn submissions(&self, name: &str) -> usize {
        self.submissions.get(name).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    /// Orders helpers dependencies first, ties broken by name, and splits
    /// them by output unit.
    pub fn into_units(self) -> HelperUnits {
        let mut names: Vec<&String> = self.helpers.keys().collect();
        names.sort();
        let mut visited = FxHashSet::default();
        let mut ordered = Vec::with_capacity(self.helpers.len());
        for name in names {
            self.visit(name, &mut visited, &mut ordered);
        }

        let mut units = HelperUnits::default();
        for helper in ordered {
            match helper.side {
                HelperSide::Go => units.go.push(helper),
                HelperSide::CHeader => units.c_header.push(helper),
                HelperSide::CSource => units.c_source.push(helper),
            }
        }
        units
    }

    fn visit(&self, name: &str, visited: &mut FxHashSet<String>, ordered: &mut Vec<Arc<Helper>>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        let Some(helper) = self.helpers.get(name) else {
            return;
        };
        let mut requires: Vec<&str> = helper.requires.iter().map(|h| h.name.as_str()).collect();
        requires.sort_unstable();
        for required in requires {
            self.visit(required, visited, ordered);
        }
        ordered.push(helper.clone());
    }
}

/// Helpers partitioned by the file they are written to.
#[derive(Debug, Clone, Default)]
pub struct HelperUnits {
    pub go: Vec<Arc<Helper>>,
    pub c_header: Vec<Arc<Helper>>,
    pub c_source: Vec<Arc<Helper>>,
}

impl HelperUnits {
    pub fn names(&self, side: HelperSide) -> Vec<&str> {
        let helpers = match side {
            HelperSide::Go => &self.go,
            HelperSide::CHeader => &self.c_header,
            HelperSide::CSource => &self.c_source,
        };
        helpers.iter().map(|h| h.name.as_str()).collect()
    }

    /// Go packages imported by the Go helpers.
    pub fn go_imports(&self) -> BTreeSet<&'static str> {
        self.go.iter().flat_map(|h| h.imports.iter().copied()).collect()
    }

    pub fn len(&self) -> usize {
        self.go.len() + self.c_header.len() + self.c_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sending half handed to each worker task.
#[derive(Debug, Clone)]
pub struct HelperSink {
    tx: Sender<Arc<Helper>>,
    claimed: Arc<Mutex<FxHashMap<String, Arc<Helper>>>>,
}

impl HelperSink {
    /// Queues `helper` as is. Blocks while the queue is full.
    pub fn submit(&self, helper: Arc<Helper>) -> GenResult<()> {
        self.tx.send(helper).map_err(|_| GenError::AggregatorClosed)
    }

    /// A helper some sink of this run already offered.
    pub fn lookup(&self, name: &str) -> Option<Arc<Helper>> {
        self.claimed.lock().get(name).cloned()
    }

    /// Claims the helper's name and queues it, unless another sink claimed
    /// the name first; then the earlier helper is returned and nothing is
    /// queued. A different body under a claimed name is a collision.
    pub fn offer(&self, helper: Arc<Helper>) -> GenResult<Arc<Helper>> {
        {
            let mut claimed = self.claimed.lock();
            if let Some(known) = claimed.get(&helper.name) {
                if known.same_body(&helper) {
                    return Ok(known.clone());
                }
                log::error!("helper `{}` offered with a different body", helper.name);
                return Err(GenError::HelperCollision {
                    name: helper.name.clone(),
                });
            }
            claimed.insert(helper.name.clone(), helper.clone());
        }
        self.submit(helper.clone())?;
        Ok(helper)
    }
}

/// Owns the draining thread and its registry.
pub struct HelperAggregator {
    tx: Sender<Arc<Helper>>,
    claimed: Arc<Mutex<FxHashMap<String, Arc<Helper>>>>,
    worker: JoinHandle<GenResult<HelperRegistry>>,
}

impl HelperAggregator {
    pub fn spawn(capacity: usize) -> GenResult<Self> {
        let (tx, rx) = channel::bounded(capacity.max(1));
        let worker = thread::Builder::new()
            .name("helper-aggregator".to_string())
            .spawn(move || drain(rx))
            .map_err(|err| GenError::Spawn {
                name: "helper-aggregator".to_string(),
                reason: err.to_string(),
            })?;
        log::debug!("helper aggregator started, queue capacity {}", capacity);
        Ok(HelperAggregator {
            tx,
            claimed: Arc::default(),
            worker,
        })
    }

    pub fn sink(&self) -> HelperSink {
        HelperSink {
            tx: self.tx.clone(),
            claimed: self.claimed.clone(),
        }
    }

    /// Closes the queue once every sink is gone and returns the registry.
    pub fn finish(self) -> GenResult<HelperRegistry> {
        drop(self.tx);
        self.worker
            .join()
            .map_err(|_| GenError::WorkerPanicked("helper-aggregator".to_string()))?
    }
}

fn drain(rx: Receiver<Arc<Helper>>) -> GenResult<HelperRegistry> {
    let mut registry = HelperRegistry::new();
    for helper in rx {
        registry.submit(helper)?;
    }
    log::debug!("helper aggregator drained {} helpers", registry.len());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(name: &str, source: &str) -> Arc<Helper> {
        Arc::new(Helper::go(name, source))
    }

    #[test]
    fn test_same_body_is_deduplicated() {
        let mut registry = HelperRegistry::new();
        registry.submit(helper("a", "func a() {}")).unwrap();
        registry.submit(helper("a", "func a() {}")).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.submissions("a"), 2);
    }

    #[test]
    fn test_different_body_collides() {
        let mut registry = HelperRegistry::new();
        registry.submit(helper("a", "func a() {}")).unwrap();
        let err = registry.submit(helper("a", "func a() { panic(1) }")).unwrap_err();
        assert!(matches!(err, GenError::HelperCollision { name } if name == "a"));
    }

    #[test]
    fn test_units_are_ordered_dependencies_first() {
        let base = helper("zeta", "const zeta = 1");
        let user = Arc::new(Helper::go("alpha", "var alpha = zeta").require(base));
        let header = Arc::new(Helper::new("tag", HelperSide::CHeader, "#define TAG 1"));
        let mut registry = HelperRegistry::new();
        registry.submit(header).unwrap();
        registry.submit(helper("beta", "const beta = 2")).unwrap();
        registry.submit(user).unwrap();

        let units = registry.into_units();
        assert_eq!(units.names(HelperSide::Go), vec!["zeta", "alpha", "beta"]);
        assert_eq!(units.names(HelperSide::CHeader), vec!["tag"]);
        assert!(units.c_source.is_empty());
    }

    #[test]
    fn test_aggregator_collects_from_many_sinks() {
        let aggregator = HelperAggregator::spawn(2).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = aggregator.sink();
                thread::spawn(move || {
                    for i in 0..50 {
                        sink.submit(helper(&format!("h{}", i % 10), "body")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let registry = aggregator.finish().unwrap();
        assert_eq!(registry.len(), 10);
        assert_eq!(registry.submissions("h3"), 20);
    }

    #[test]
    fn test_offers_are_queued_once_across_sinks() {
        let aggregator = HelperAggregator::spawn(2).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = aggregator.sink();
                thread::spawn(move || {
                    for i in 0..50 {
                        let offered = helper(&format!("h{}", i % 10), "body");
                        let kept = sink.offer(offered).unwrap();
                        assert_eq!(kept.source, "body");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let sink = aggregator.sink();
        assert!(sink.lookup("h7").is_some());
        let err = sink.offer(helper("h7", "other body")).unwrap_err();
        assert!(matches!(err, GenError::HelperCollision { name } if name == "h7"));
        drop(sink);

        let registry = aggregator.finish().unwrap();
        assert_eq!(registry.len(), 10);
        assert!((0..10).all(|i| registry.submissions(&format!("h{}", i)) == 1));
    }
}
