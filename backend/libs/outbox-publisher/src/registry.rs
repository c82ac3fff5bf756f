//! Registry of named event processors.
//!
//! The registry is a value owned by the publisher, not process-wide state.
//! Registrations are expected during startup, before the loop runs; the loop
//! defends against late registrations by taking a snapshot at the top of
//! every iteration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::EventProcessor;

/// Named processors, keyed by registration name.
#[derive(Default)]
pub struct ProcessorRegistry {
    inner: RwLock<HashMap<String, Arc<dyn EventProcessor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under `name`, replacing any previous entry with
    /// the same name.
    pub fn register(&self, name: impl Into<String>, processor: Arc<dyn EventProcessor>) {
        let name = name.into();
        self.inner
            .write()
            .expect("processor registry lock poisoned")
            .insert(name, processor);
    }

    /// Remove all registrations (test support).
    pub fn clear(&self) {
        self.inner
            .write()
            .expect("processor registry lock poisoned")
            .clear();
    }

    /// A stable view for one loop iteration: registrations made after the
    /// snapshot do not affect it. Sorted by name for deterministic dispatch
    /// order.
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn EventProcessor>)> {
        let mut entries: Vec<_> = self
            .inner
            .read()
            .expect("processor registry lock poisoned")
            .iter()
            .map(|(name, p)| (name.clone(), Arc::clone(p)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .expect("processor registry lock poisoned")
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("processor registry lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;
    use async_trait::async_trait;
    use sqlx::PgPool;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProcessor {
        calls: AtomicU32,
    }

    impl CountingProcessor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl EventProcessor for CountingProcessor {
        async fn initialize(&self, _pool: &PgPool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn process(&self, _pool: &PgPool, _event: &Event) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn register_and_snapshot() {
        let registry = ProcessorRegistry::new();
        assert!(registry.is_empty());

        registry.register("foo", CountingProcessor::new());
        registry.register("bar", CountingProcessor::new());

        let snapshot = registry.snapshot();
        let names: Vec<_> = snapshot.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["bar", "foo"]);
    }

    #[test]
    fn register_replaces_same_name() {
        let registry = ProcessorRegistry::new();
        let first = CountingProcessor::new();
        let second = CountingProcessor::new();

        registry.register("feed data writer", first.clone());
        registry.register("feed data writer", second.clone());

        assert_eq!(registry.len(), 1);
        let (_, kept) = &registry.snapshot()[0];
        assert!(Arc::ptr_eq(
            kept,
            &(second as Arc<dyn EventProcessor>)
        ));
    }

    #[test]
    fn snapshot_is_isolated_from_later_registrations() {
        let registry = ProcessorRegistry::new();
        registry.register("foo", CountingProcessor::new());

        let snapshot = registry.snapshot();
        registry.register("bar", CountingProcessor::new());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn clear_empties_the_registry() {
        let registry = ProcessorRegistry::new();
        registry.register("foo", CountingProcessor::new());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
