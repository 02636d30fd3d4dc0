// Aggregated call graphs
//
// Folds the closed call-stack intervals of one or more contexts over a time
// window into symbol-keyed trees carrying total time, self time, invocation
// counts and per-call statistics. Building blocks:
//
// - `call_site`: AggregatedCallSite nodes and merging
// - `statistics`: running duration / self-time statistics
// - `aggregator`: the depth-first walk over the state store
// - `diff`: differential comparison of two call graphs
// - `export`: collapsed stacks, JSON, text tree, fingerprint

mod aggregator;
mod call_site;
mod diff;
mod export;
mod statistics;

pub use aggregator::{CallGraphAggregator, CancellationToken};
pub use call_site::AggregatedCallSite;
pub use diff::{diff, DifferentialCallSite};
pub use export::{collapsed_stacks, render_tree};
pub use statistics::{CallStatistics, RunningStats};

use crate::context::ExecutionContext;
use crate::state_store::StoreError;
use crate::symbol::Symbol;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors from aggregation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Aggregation cancelled")]
    Cancelled,

    #[error("Invalid aggregation window [{start}, {end}]")]
    InvalidWindow { start: u64, end: u64 },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cannot merge call site '{left}' into '{right}'")]
    SymbolMismatch { left: Symbol, right: Symbol },

    #[error("Aggregation worker panicked")]
    WorkerPanicked,
}

/// Result type for aggregation
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Closed time range `[start, end]` to aggregate over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
}

impl TimeWindow {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(AggregationError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window covering all of time
    pub fn unbounded() -> Self {
        Self {
            start: 0,
            end: u64::MAX,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Clip `[start, end]` to the window
    pub fn clip(&self, start: u64, end: u64) -> (u64, u64) {
        let start = start.clamp(self.start, self.end);
        let end = end.clamp(start, self.end);
        (start, end)
    }
}

/// A subtree dropped because its children cover more time than it does
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtreeFailure {
    pub context: ExecutionContext,
    /// Symbols from the depth-1 call down to the failing node
    pub path: Vec<Symbol>,
    pub total_time: u64,
    pub children_time: u64,
}

impl fmt::Display for SubtreeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.path.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{}: subtree {} dropped, children cover {} of {} ns",
            self.context,
            path.join(";"),
            self.children_time,
            self.total_time
        )
    }
}

/// Result of one aggregation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallGraph {
    pub window: TimeWindow,
    /// Synthetic root per context
    pub roots: BTreeMap<ExecutionContext, AggregatedCallSite>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SubtreeFailure>,
}

impl CallGraph {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            roots: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn root(&self, context: ExecutionContext) -> Option<&AggregatedCallSite> {
        self.roots.get(&context)
    }

    /// All contexts folded into one tree under a synthetic `all` root
    pub fn merged(&self) -> AggregatedCallSite {
        let mut all = AggregatedCallSite::new(Symbol::name("all"));
        for root in self.roots.values() {
            all.total_time += root.total_time;
            all.self_time += root.self_time;
            all.count += root.count;
            all.statistics.merge(&root.statistics);
            for (status, time) in &root.aux_series {
                *all.aux_series.entry(status.clone()).or_insert(0) += time;
            }
            for child in root.children.values() {
                all.add_child(child.clone());
            }
        }
        all
    }

    /// Canonical JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// SHA-256 of the canonical JSON, hex encoded
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        export::fingerprint(self)
    }
}

#[cfg(test)]
mod tests;
