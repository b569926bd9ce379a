//! Hook / Event Bus: typed lifecycle events consumed by reporters.

use crate::result::{AggregatedResult, StepResult, SuiteResult};
use async_trait::async_trait;
use tracing::error;

#[derive(Debug, Clone)]
pub enum Event<'a> {
    ExecutionStart,
    TestDiscovered { node_id: &'a str, suite_name: &'a str },
    SuiteStart { node_id: &'a str },
    StepStart { node_id: &'a str, step_name: &'a str },
    StepEnd { node_id: &'a str, step: &'a StepResult },
    SuiteEnd { suite: &'a SuiteResult },
    ExecutionEnd { result: &'a AggregatedResult },
    Error { message: &'a str },
}

/// A lifecycle observer. All methods have no-op defaults so
/// implementors only override the phases they care about.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn on_event(&self, event: &Event<'_>) -> anyhow::Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Holds registered hooks and invokes them sequentially, in
/// registration order, for every phase. Hook errors are caught,
/// logged, and never affect execution status.
#[derive(Default)]
pub struct EventBus {
    hooks: Vec<Box<dyn Hook>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub async fn emit(&self, event: Event<'_>) {
        for hook in &self.hooks {
            if let Err(err) = hook.on_event(&event).await {
                error!(error = %err, "hook raised an error, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl Hook for CountingHook {
        async fn on_event(&self, _event: &Event<'_>) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl Hook for FailingHook {
        async fn on_event(&self, _event: &Event<'_>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order_and_are_all_invoked() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bus = EventBus::new();
        bus.register(Box::new(CountingHook(counter.clone())));
        bus.register(Box::new(CountingHook(counter.clone())));

        bus.emit(Event::ExecutionStart).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hook_error_does_not_stop_other_hooks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut bus = EventBus::new();
        bus.register(Box::new(FailingHook));
        bus.register(Box::new(CountingHook(counter.clone())));

        bus.emit(Event::ExecutionStart).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
