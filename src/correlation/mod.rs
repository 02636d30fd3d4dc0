// Correlation of asynchronous operation halves across contexts
//
// Three shapes share the pending-operation model:
// - one-to-one (messages, flows): `point_to_point`
// - one-to-many / many-to-one (rooted collectives): `collective`
// - launch → execution by dispatch id: `dispatch`
//
// `CorrelationMatcher` is the facade the engine drives. It never fails on
// malformed input: unmatched halves, unknown communicators and evictions all
// become diagnostics.

mod collective;
mod dispatch;
mod key;
mod pending;
mod point_to_point;

pub use collective::{
    CollectiveArrival, CollectiveError, CollectiveMatcher, CollectiveOperation, CommunicatorTable,
};
pub use dispatch::{DispatchMatcher, EvictedDispatch, LaunchOutcome};
pub use key::{CollectiveKey, CollectiveOp, CollectiveShape, CorrelationKey};
pub use pending::{PendingId, PendingOperation, PendingRegistry};
pub use point_to_point::PointToPointMatcher;

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use serde::Serialize;

/// One observed half of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Half {
    pub context: ExecutionContext,
    pub timestamp: u64,
}

/// Two halves known to belong to the same operation, source first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchedPair {
    pub source: Half,
    pub destination: Half,
}

impl MatchedPair {
    /// Earlier of the two timestamps
    pub fn start(&self) -> u64 {
        self.source.timestamp.min(self.destination.timestamp)
    }

    /// Later of the two timestamps
    pub fn end(&self) -> u64 {
        self.source.timestamp.max(self.destination.timestamp)
    }

    /// Both halves on one context (e.g. a root's part in its own broadcast)
    pub fn is_self(&self) -> bool {
        self.source.context == self.destination.context
    }
}

/// Matches begin/end halves of every asynchronous operation shape
#[derive(Debug, Clone)]
pub struct CorrelationMatcher {
    point_to_point: PointToPointMatcher,
    collectives: CollectiveMatcher,
    dispatches: DispatchMatcher,
    diagnostics: DiagnosticLog,
    unmatched: u64,
    evicted: u64,
}

impl CorrelationMatcher {
    /// Matcher with explicit bounds
    pub fn new(max_pending: usize, max_dispatches: usize) -> Self {
        Self {
            point_to_point: PointToPointMatcher::new(max_pending),
            collectives: CollectiveMatcher::new(max_pending),
            dispatches: DispatchMatcher::new(max_dispatches),
            diagnostics: DiagnosticLog::default(),
            unmatched: 0,
            evicted: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut matcher = Self::new(config.max_pending_operations, config.max_dispatches_in_flight);
        matcher.diagnostics = DiagnosticLog::with_capacity(config.max_diagnostics);
        matcher
    }

    /// Define the members of a communicator in rank order
    pub fn register_communicator(&mut self, communicator: u32, members: Vec<ExecutionContext>) {
        self.collectives.register_communicator(communicator, members);
    }

    pub fn communicators(&self) -> &CommunicatorTable {
        self.collectives.communicators()
    }

    /// First half of a keyed one-to-one operation
    pub fn begin_half(&mut self, key: CorrelationKey, context: ExecutionContext, timestamp: u64) {
        match key {
            CorrelationKey::Dispatch { id } => {
                let outcome = self.dispatches.launch_with_id(id, context, timestamp);
                self.note_launch(outcome, timestamp);
            }
            CorrelationKey::Message {
                communicator,
                destination_rank,
                ..
            } => {
                let destination = self.communicators().context_of(communicator, destination_rank);
                let evicted = self.point_to_point.begin_half(key, context, timestamp, destination);
                self.note_pending_eviction(evicted);
            }
            CorrelationKey::Flow { .. } => {
                let evicted = self.point_to_point.begin_half(key, context, timestamp, None);
                self.note_pending_eviction(evicted);
            }
        }
    }

    /// Second half of a keyed one-to-one operation
    ///
    /// `None` when nothing is pending for the key; expected at trace edges.
    pub fn end_half(&mut self, key: &CorrelationKey, context: ExecutionContext, timestamp: u64) -> Option<MatchedPair> {
        if let CorrelationKey::Dispatch { id } = key {
            return self.execute(*id, context, timestamp);
        }

        let pair = self.point_to_point.end_half(key, context, timestamp);
        if pair.is_none() {
            self.unmatched += 1;
            self.diagnostics.record(Diagnostic::UnmatchedEnd {
                key: key.to_string(),
                context,
                timestamp,
            });
        }
        pair
    }

    /// Kernel launch; returns the dispatch id assigned to it
    pub fn launch(&mut self, context: ExecutionContext, timestamp: u64) -> Option<u64> {
        let outcome = self.dispatches.launch(context, timestamp);
        self.note_launch(outcome, timestamp)
    }

    /// Kernel execution of a launched dispatch
    pub fn execute(&mut self, dispatch_id: u64, context: ExecutionContext, timestamp: u64) -> Option<MatchedPair> {
        match self.dispatches.execute(dispatch_id) {
            Some(launch) => Some(MatchedPair {
                source: launch,
                destination: Half { context, timestamp },
            }),
            None => {
                self.unmatched += 1;
                self.diagnostics.record(Diagnostic::UnknownDispatch {
                    dispatch_id,
                    context,
                    timestamp,
                });
                None
            }
        }
    }

    /// A member enters a rooted collective
    pub fn collective_begin(&mut self, key: CollectiveKey, context: ExecutionContext, timestamp: u64) -> Vec<MatchedPair> {
        let result = self.collectives.begin(key, context, timestamp);
        self.note_collective(result, key, context)
    }

    /// A member leaves a rooted collective
    pub fn collective_end(&mut self, key: CollectiveKey, context: ExecutionContext, timestamp: u64) -> Vec<MatchedPair> {
        let result = self.collectives.end(key, context, timestamp);
        self.note_collective(result, key, context)
    }

    /// Operations and dispatches still waiting for a counterpart
    pub fn pending_count(&self) -> usize {
        self.point_to_point.pending_count() + self.collectives.pending_count() + self.dispatches.in_flight()
    }

    /// Discard everything still pending; returns how many were discarded
    pub fn finish(&mut self) -> usize {
        let mut discarded = 0;
        for op in self.point_to_point.drain() {
            self.discard(op.key.to_string(), op.start);
            discarded += 1;
        }
        for op in self.collectives.drain() {
            self.discard(op.key.to_string(), op.created);
            discarded += 1;
        }
        for dispatch in self.dispatches.drain() {
            self.discard(
                CorrelationKey::Dispatch {
                    id: dispatch.dispatch_id,
                }
                .to_string(),
                dispatch.launch.timestamp,
            );
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!("Discarded {} unmatched pending operations", discarded);
        }
        discarded
    }

    /// End halves that found nothing to match
    pub fn unmatched_count(&self) -> u64 {
        self.unmatched
    }

    /// Entries evicted because a bound was hit
    pub fn eviction_count(&self) -> u64 {
        self.evicted
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Hand the diagnostics collected so far to the caller
    pub fn take_diagnostics(&mut self) -> DiagnosticLog {
        let capacity = self.diagnostics.capacity();
        std::mem::replace(&mut self.diagnostics, DiagnosticLog::with_capacity(capacity))
    }

    fn discard(&mut self, key: String, started: u64) {
        self.diagnostics.record(Diagnostic::PendingDiscarded { key, started });
    }

    fn note_pending_eviction(&mut self, evicted: Option<PendingOperation<CorrelationKey>>) {
        if let Some(op) = evicted {
            self.evicted += 1;
            self.diagnostics.record(Diagnostic::PendingEvicted {
                key: op.key.to_string(),
                started: op.start,
            });
        }
    }

    fn note_launch(&mut self, outcome: LaunchOutcome, timestamp: u64) -> Option<u64> {
        match outcome {
            LaunchOutcome::Accepted { dispatch_id, evicted } => {
                if let Some(evicted) = evicted {
                    self.evicted += 1;
                    self.diagnostics.record(Diagnostic::DispatchEvicted {
                        dispatch_id: evicted.dispatch_id,
                        launched: evicted.launch.timestamp,
                    });
                }
                Some(dispatch_id)
            }
            LaunchOutcome::Duplicate { dispatch_id } => {
                self.diagnostics.record(Diagnostic::DuplicateDispatch {
                    dispatch_id,
                    timestamp,
                });
                None
            }
        }
    }

    fn note_collective(
        &mut self,
        result: collective::Result<CollectiveArrival>,
        key: CollectiveKey,
        context: ExecutionContext,
    ) -> Vec<MatchedPair> {
        match result {
            Ok(arrival) => {
                if let Some(op) = arrival.evicted {
                    self.evicted += 1;
                    self.diagnostics.record(Diagnostic::PendingEvicted {
                        key: op.key.to_string(),
                        started: op.created,
                    });
                }
                arrival.pairs
            }
            Err(e) => {
                tracing::debug!("{}", e);
                self.diagnostics.record(Diagnostic::UnknownCommunicator {
                    communicator: key.communicator,
                    context,
                });
                Vec::new()
            }
        }
    }
}
