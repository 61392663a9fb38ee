//! Pluggable per-event transformation.
//!
//! A hook sees each non-design change before it is turned into a sink
//! operation. It may rewrite the event (including the `_index`, `_type`,
//! `_routing` and `_parent` overrides), set `ignore`, or skip it outright.
//! A failing hook causes the event to be skipped for good; the checkpoint
//! still moves past it.

use std::sync::Arc;

use river_types::ParsedEvent;

use crate::error::TransformError;

/// Result of a successful transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    /// Continue with this (possibly modified) event
    Event(ParsedEvent),
    /// Drop the event without a sink mutation
    Skip,
}

pub type TransformResult = Result<Transformed, TransformError>;

/// Per-event transformation capability.
pub trait TransformHook: Send + Sync {
    fn transform(&self, event: ParsedEvent) -> TransformResult;
}

impl<F> TransformHook for F
where
    F: Fn(ParsedEvent) -> TransformResult + Send + Sync,
{
    fn transform(&self, event: ParsedEvent) -> TransformResult {
        self(event)
    }
}

/// Runs several hooks in order; the first skip or failure wins.
#[derive(Clone, Default)]
pub struct TransformChain {
    hooks: Vec<Arc<dyn TransformHook>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, hook: impl TransformHook + 'static) -> Self {
        self.then_shared(Arc::new(hook))
    }

    pub fn then_shared(mut self, hook: Arc<dyn TransformHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl TransformHook for TransformChain {
    fn transform(&self, mut event: ParsedEvent) -> TransformResult {
        for hook in &self.hooks {
            match hook.transform(event)? {
                Transformed::Event(next) => event = next,
                Transformed::Skip => return Ok(Transformed::Skip),
            }
        }
        Ok(Transformed::Event(event))
    }
}
