// One-to-one correlation (message send/receive, flow events)

use super::key::CorrelationKey;
use super::pending::{PendingOperation, PendingRegistry};
use super::{Half, MatchedPair};
use crate::context::ExecutionContext;

/// Pairs each begin half with the first matching end half under the same key
#[derive(Debug, Clone)]
pub struct PointToPointMatcher {
    pending: PendingRegistry<CorrelationKey, PendingOperation<CorrelationKey>>,
}

impl PointToPointMatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: PendingRegistry::new(capacity),
        }
    }

    /// Store a begin half; returns the entry evicted to make room, if any
    ///
    /// `destination` restricts which context may complete the operation.
    pub fn begin_half(
        &mut self,
        key: CorrelationKey,
        context: ExecutionContext,
        timestamp: u64,
        destination: Option<ExecutionContext>,
    ) -> Option<PendingOperation<CorrelationKey>> {
        let operation = PendingOperation {
            key: key.clone(),
            start: timestamp,
            source: context,
            awaited: destination.map(|ctx| [ctx].into_iter().collect()),
        };
        let (_, evicted) = self.pending.insert(key, operation);
        evicted.map(|(_, operation)| operation)
    }

    /// Consume the oldest pending begin half for `key` that accepts `context`
    pub fn end_half(&mut self, key: &CorrelationKey, context: ExecutionContext, timestamp: u64) -> Option<MatchedPair> {
        let id = self.pending.find(key, |op| op.accepts(context))?;
        let operation = self.pending.remove(id)?;
        Some(MatchedPair {
            source: Half {
                context: operation.source,
                timestamp: operation.start,
            },
            destination: Half { context, timestamp },
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Remove every unmatched begin half, oldest first
    pub fn drain(&mut self) -> Vec<PendingOperation<CorrelationKey>> {
        self.pending.drain().into_iter().map(|(_, op)| op).collect()
    }
}
