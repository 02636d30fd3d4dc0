//! Single-pass analysis driver
//!
//! [`AnalysisEngine`] owns every piece of mutable state of one analysis run:
//! the state store, the per-context stacks, the pending-operation registries
//! and the edge lanes. Events are applied one at a time; malformed input
//! never aborts the run, it only produces diagnostics.
//!
//! ```
//! use tracefold::context::ExecutionContext;
//! use tracefold::engine::AnalysisEngine;
//! use tracefold::event::TraceEvent;
//!
//! let a = ExecutionContext(1);
//! let mut engine = AnalysisEngine::default();
//! engine.process(TraceEvent::enter(0, a, "f"));
//! engine.process(TraceEvent::leave(10, a));
//! let output = engine.finish();
//!
//! let graph = output.aggregate(None).unwrap();
//! assert_eq!(graph.root(a).unwrap().total_time, 10);
//! ```

use crate::callgraph::{self, CallGraph, CallGraphAggregator, TimeWindow};
use crate::config::{self, EngineConfig};
use crate::context::{ContextKind, ContextRegistry, ExecutionContext};
use crate::correlation::{CorrelationMatcher, Half, MatchedPair};
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::edge_linker::{Edge, EdgeLinker};
use crate::event::{EventError, EventKind, EventSource, TraceEvent};
use crate::stack_tracker::StackTracker;
use crate::state_store::{self, AttributePath, MemoryStateStore, StateStore};
use crate::symbol::Symbol;
use serde::Serialize;
use std::collections::BTreeSet;

/// Counters for one analysis run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub events: u64,
    pub intervals_closed: u64,
    pub edges: u64,
    pub lanes: usize,
    pub unmatched_halves: u64,
    pub evictions: u64,
    pub discarded_pending: u64,
    pub diagnostics: u64,
    /// First and last timestamp seen
    pub first_timestamp: Option<u64>,
    pub last_timestamp: Option<u64>,
}

/// Drives events through stack tracking, correlation and edge linking
pub struct AnalysisEngine {
    config: EngineConfig,
    store: MemoryStateStore,
    tracker: StackTracker,
    matcher: CorrelationMatcher,
    linker: EdgeLinker,
    registry: ContextRegistry,
    diagnostics: DiagnosticLog,
    summary: AnalysisSummary,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl AnalysisEngine {
    /// Engine with a validated configuration
    pub fn new(config: EngineConfig) -> config::Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let tracker = StackTracker::new(config.max_stack_depth)
            .with_close_on_mismatch(config.close_on_leave_mismatch)
            .with_diagnostics(DiagnosticLog::with_capacity(config.max_diagnostics));
        Self {
            store: MemoryStateStore::new(),
            tracker,
            matcher: CorrelationMatcher::from_config(&config),
            linker: EdgeLinker::new(),
            registry: ContextRegistry::new(),
            diagnostics: DiagnosticLog::with_capacity(config.max_diagnostics),
            summary: AnalysisSummary::default(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Define a communicator's members in rank order
    pub fn register_communicator(&mut self, communicator: u32, members: Vec<ExecutionContext>) {
        self.matcher.register_communicator(communicator, members);
    }

    /// Attach a display name and kind to a context
    pub fn register_context(&mut self, context: ExecutionContext, name: impl Into<String>, kind: ContextKind) {
        self.registry.register(context, name, kind);
    }

    /// Apply one event
    pub fn process(&mut self, event: TraceEvent) {
        let TraceEvent {
            timestamp,
            context,
            kind,
        } = event;
        self.summary.events += 1;
        self.summary.first_timestamp = Some(self.summary.first_timestamp.map_or(timestamp, |t| t.min(timestamp)));
        self.summary.last_timestamp = Some(self.summary.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));

        match kind {
            EventKind::Enter { symbol, end } => {
                let result = match end {
                    Some(end) => self
                        .tracker
                        .enter_with_end(&mut self.store, context, timestamp, end, symbol),
                    None => self.tracker.on_enter(&mut self.store, context, timestamp, symbol),
                };
                if let Err(e) = result {
                    tracing::trace!("enter on {} at {} skipped: {}", context, timestamp, e);
                }
            }
            EventKind::Leave { symbol } => {
                if let Err(e) = self
                    .tracker
                    .on_leave_checked(&mut self.store, context, timestamp, symbol.as_ref())
                {
                    tracing::trace!("leave on {} at {} skipped: {}", context, timestamp, e);
                }
            }
            EventKind::Status { value } => {
                if let Err(e) = self.tracker.on_status(&mut self.store, context, timestamp, value) {
                    tracing::trace!("status on {} at {} skipped: {}", context, timestamp, e);
                }
            }
            EventKind::AsyncBegin { key } => self.matcher.begin_half(key, context, timestamp),
            EventKind::AsyncEnd { key } => {
                if let Some(pair) = self.matcher.end_half(&key, context, timestamp) {
                    self.link(pair);
                }
            }
            EventKind::CollectiveBegin { key } => {
                for pair in self.matcher.collective_begin(key, context, timestamp) {
                    self.link(pair);
                }
            }
            EventKind::CollectiveEnd { key } => {
                for pair in self.matcher.collective_end(key, context, timestamp) {
                    self.link(pair);
                }
            }
            EventKind::DispatchLaunch => {
                if let Some(id) = self.matcher.launch(context, timestamp) {
                    tracing::trace!("dispatch {} launched on {} at {}", id, context, timestamp);
                }
            }
            EventKind::DispatchExecute { dispatch_id, also } => {
                let Some(pair) = self.matcher.execute(dispatch_id, context, timestamp) else {
                    return;
                };
                self.link(pair);
                for extra in also {
                    self.link(MatchedPair {
                        source: pair.source,
                        destination: Half {
                            context: extra,
                            timestamp,
                        },
                    });
                }
            }
        }
    }

    /// Apply every event of a source; stops at the first read error
    pub fn process_all<E: EventSource + ?Sized>(&mut self, source: &E) -> Result<u64, EventError> {
        let mut count = 0;
        for event in source.events() {
            self.process(event?);
            count += 1;
        }
        tracing::debug!("Processed {} events", count);
        Ok(count)
    }

    /// Edges linked so far
    pub fn edges(&self) -> &[Edge] {
        self.linker.edges()
    }

    /// Current stack depth of a context
    pub fn depth(&self, context: ExecutionContext) -> usize {
        self.tracker.depth(context)
    }

    pub fn pending_count(&self) -> usize {
        self.matcher.pending_count()
    }

    pub fn store(&self) -> &MemoryStateStore {
        &self.store
    }

    /// Close every open interval, discard unmatched pending operations and
    /// hand over the results
    ///
    /// Open intervals are closed at the last timestamp seen.
    pub fn finish(mut self) -> AnalysisOutput {
        let end = self.summary.last_timestamp.unwrap_or(0);
        self.tracker.close_all(&mut self.store, end);
        self.store.close(end);
        let discarded = self.matcher.finish();

        let mut diagnostics = self.diagnostics;
        diagnostics.absorb(self.tracker.take_diagnostics());
        diagnostics.absorb(self.matcher.take_diagnostics());

        let mut summary = self.summary;
        summary.intervals_closed = self.tracker.closed_count();
        summary.edges = self.linker.len() as u64;
        summary.lanes = self.linker.lane_count();
        summary.unmatched_halves = self.matcher.unmatched_count();
        summary.evictions = self.matcher.eviction_count();
        summary.discarded_pending = discarded as u64;
        summary.diagnostics = diagnostics.total();

        tracing::debug!(
            "Analysis finished: {} events, {} intervals, {} edges, {} diagnostics",
            summary.events,
            summary.intervals_closed,
            summary.edges,
            summary.diagnostics
        );

        AnalysisOutput {
            store: self.store,
            edges: self.linker.into_edges(),
            registry: self.registry,
            diagnostics,
            summary,
        }
    }

    fn link(&mut self, pair: MatchedPair) {
        if pair.is_self() && !self.config.emit_self_edges {
            return;
        }
        if let Err(e) = self.linker.link_into(&mut self.store, pair) {
            self.diagnostics.record(Diagnostic::StoreRejected {
                context: pair.source.context,
                timestamp: pair.start(),
                message: e.to_string(),
            });
        }
    }
}

/// Everything one analysis run produced
#[derive(Debug)]
pub struct AnalysisOutput {
    /// Closed call stacks, status series and edge lanes
    pub store: MemoryStateStore,
    pub edges: Vec<Edge>,
    pub registry: ContextRegistry,
    pub diagnostics: DiagnosticLog,
    pub summary: AnalysisSummary,
}

impl AnalysisOutput {
    /// Time span covered by the events, `[0, 0]` for an empty trace
    pub fn trace_window(&self) -> TimeWindow {
        let start = self.summary.first_timestamp.unwrap_or(0);
        let end = self.summary.last_timestamp.unwrap_or(start);
        TimeWindow {
            start,
            end: end.max(start),
        }
    }

    /// Aggregator over the run's store, for custom resolvers or cancellation
    pub fn aggregator(&self) -> CallGraphAggregator<'_, MemoryStateStore> {
        CallGraphAggregator::new(&self.store)
    }

    /// Aggregate every context over `window` (the whole trace when `None`)
    pub fn aggregate(&self, window: Option<TimeWindow>) -> callgraph::Result<CallGraph> {
        let aggregator = self.aggregator();
        let contexts = aggregator.contexts()?;
        aggregator.aggregate(contexts, window.unwrap_or_else(|| self.trace_window()))
    }

    /// [`aggregate`](Self::aggregate) sharded over `workers` threads
    pub fn aggregate_parallel(&self, window: Option<TimeWindow>, workers: usize) -> callgraph::Result<CallGraph> {
        let aggregator = self.aggregator();
        let contexts = aggregator.contexts()?;
        aggregator.aggregate_parallel(contexts, window.unwrap_or_else(|| self.trace_window()), workers)
    }

    /// Every raw address that appears on a call stack
    pub fn addresses(&self) -> state_store::Result<BTreeSet<u64>> {
        let mut addresses = BTreeSet::new();
        for context in self.aggregator().contexts().unwrap_or_default() {
            let stack = AttributePath::call_stack(context);
            if !self.store.contains(&stack) {
                continue;
            }
            for slot in self.store.query_sub_attributes(&stack, false)? {
                for interval in self.store.query_range(&slot, 0, u64::MAX)? {
                    if let Some(Symbol::Address(addr)) = interval.value.as_symbol() {
                        addresses.insert(*addr);
                    }
                }
            }
        }
        Ok(addresses)
    }
}
