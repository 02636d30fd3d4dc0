//! Structured diagnostics
//!
//! Malformed input never aborts an analysis. Every recoverable condition the
//! engine meets becomes a [`Diagnostic`] value in a [`DiagnosticLog`]; the
//! host decides how to present them. Each record is also mirrored as a
//! `tracing` event so a subscriber, when installed, sees them as they happen.

use crate::context::ExecutionContext;
use crate::symbol::Symbol;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// How bad a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Expected at stream boundaries (truncated traces)
    Info,
    /// Data was dropped or could not be trusted
    Warning,
}

/// Discriminant of [`Diagnostic`], used for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnmatchedLeave,
    LeaveSymbolMismatch,
    DepthLimitExceeded,
    HaltedContextEvent,
    TimestampOutOfOrder,
    UnmatchedEnd,
    PendingEvicted,
    PendingDiscarded,
    DispatchEvicted,
    DuplicateDispatch,
    UnknownDispatch,
    UnknownCommunicator,
    StoreRejected,
}

/// One recoverable condition met during analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Leave with no open interval (trace started mid-call)
    UnmatchedLeave {
        context: ExecutionContext,
        timestamp: u64,
    },
    /// Leave named a different symbol than the one on top of the stack
    LeaveSymbolMismatch {
        context: ExecutionContext,
        timestamp: u64,
        expected: Symbol,
        found: Symbol,
    },
    /// Stack grew past the configured bound; the context is halted
    DepthLimitExceeded {
        context: ExecutionContext,
        timestamp: u64,
        limit: usize,
    },
    /// Event on a context already halted by a depth overflow
    HaltedContextEvent {
        context: ExecutionContext,
        timestamp: u64,
    },
    /// Event earlier than the last accepted one on the same context
    TimestampOutOfOrder {
        context: ExecutionContext,
        timestamp: u64,
        last: u64,
    },
    /// Second half of an operation whose first half was never seen
    UnmatchedEnd {
        key: String,
        context: ExecutionContext,
        timestamp: u64,
    },
    /// Pending operation evicted because the registry was full
    PendingEvicted { key: String, started: u64 },
    /// Pending operation still unmatched at end of trace
    PendingDiscarded { key: String, started: u64 },
    /// Launched dispatch evicted because too many were in flight
    DispatchEvicted { dispatch_id: u64, launched: u64 },
    /// Dispatch id launched twice while the first was still in flight
    DuplicateDispatch { dispatch_id: u64, timestamp: u64 },
    /// Execution for a dispatch id that is not in flight
    UnknownDispatch {
        dispatch_id: u64,
        context: ExecutionContext,
        timestamp: u64,
    },
    /// Collective on a communicator, root rank or member the matcher has no table entry for
    UnknownCommunicator {
        communicator: u32,
        context: ExecutionContext,
    },
    /// State store refused a write
    StoreRejected {
        context: ExecutionContext,
        timestamp: u64,
        message: String,
    },
}

impl Diagnostic {
    /// Counting discriminant
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::UnmatchedLeave { .. } => DiagnosticKind::UnmatchedLeave,
            Diagnostic::LeaveSymbolMismatch { .. } => DiagnosticKind::LeaveSymbolMismatch,
            Diagnostic::DepthLimitExceeded { .. } => DiagnosticKind::DepthLimitExceeded,
            Diagnostic::HaltedContextEvent { .. } => DiagnosticKind::HaltedContextEvent,
            Diagnostic::TimestampOutOfOrder { .. } => DiagnosticKind::TimestampOutOfOrder,
            Diagnostic::UnmatchedEnd { .. } => DiagnosticKind::UnmatchedEnd,
            Diagnostic::PendingEvicted { .. } => DiagnosticKind::PendingEvicted,
            Diagnostic::PendingDiscarded { .. } => DiagnosticKind::PendingDiscarded,
            Diagnostic::DispatchEvicted { .. } => DiagnosticKind::DispatchEvicted,
            Diagnostic::DuplicateDispatch { .. } => DiagnosticKind::DuplicateDispatch,
            Diagnostic::UnknownDispatch { .. } => DiagnosticKind::UnknownDispatch,
            Diagnostic::UnknownCommunicator { .. } => DiagnosticKind::UnknownCommunicator,
            Diagnostic::StoreRejected { .. } => DiagnosticKind::StoreRejected,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.kind() {
            DiagnosticKind::UnmatchedLeave
            | DiagnosticKind::UnmatchedEnd
            | DiagnosticKind::PendingDiscarded
            | DiagnosticKind::UnknownDispatch => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnmatchedLeave { context, timestamp } => {
                write!(f, "{} @{}: leave without open interval", context, timestamp)
            }
            Diagnostic::LeaveSymbolMismatch {
                context,
                timestamp,
                expected,
                found,
            } => write!(
                f,
                "{} @{}: leave of '{}' while '{}' is on top of the stack",
                context, timestamp, found, expected
            ),
            Diagnostic::DepthLimitExceeded {
                context,
                timestamp,
                limit,
            } => write!(
                f,
                "{} @{}: stack depth limit {} exceeded, context halted",
                context, timestamp, limit
            ),
            Diagnostic::HaltedContextEvent { context, timestamp } => {
                write!(f, "{} @{}: event ignored on halted context", context, timestamp)
            }
            Diagnostic::TimestampOutOfOrder {
                context,
                timestamp,
                last,
            } => write!(
                f,
                "{} @{}: timestamp earlier than previous event @{}",
                context, timestamp, last
            ),
            Diagnostic::UnmatchedEnd {
                key,
                context,
                timestamp,
            } => write!(f, "{} @{}: no pending operation for {}", context, timestamp, key),
            Diagnostic::PendingEvicted { key, started } => {
                write!(f, "pending {} (started @{}) evicted: registry full", key, started)
            }
            Diagnostic::PendingDiscarded { key, started } => {
                write!(f, "pending {} (started @{}) unmatched at end of trace", key, started)
            }
            Diagnostic::DispatchEvicted {
                dispatch_id,
                launched,
            } => write!(
                f,
                "dispatch {} (launched @{}) evicted: too many in flight",
                dispatch_id, launched
            ),
            Diagnostic::DuplicateDispatch {
                dispatch_id,
                timestamp,
            } => write!(f, "dispatch {} launched twice @{}", dispatch_id, timestamp),
            Diagnostic::UnknownDispatch {
                dispatch_id,
                context,
                timestamp,
            } => write!(
                f,
                "{} @{}: execution of dispatch {} that is not in flight",
                context, timestamp, dispatch_id
            ),
            Diagnostic::UnknownCommunicator {
                communicator,
                context,
            } => write!(
                f,
                "{}: collective on communicator {} without a matching member table",
                context, communicator
            ),
            Diagnostic::StoreRejected {
                context,
                timestamp,
                message,
            } => write!(f, "{} @{}: store rejected write: {}", context, timestamp, message),
        }
    }
}

/// Collected diagnostics with per-kind counters
///
/// At most `capacity` records are kept; the counters keep counting after
/// that, so memory stays bounded on pathological traces.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
    counts: BTreeMap<DiagnosticKind, u64>,
    capacity: usize,
    dropped: u64,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

impl DiagnosticLog {
    /// Log that stores at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            counts: BTreeMap::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Record a diagnostic
    pub fn record(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Info => tracing::debug!("{}", diagnostic),
            Severity::Warning => tracing::warn!("{}", diagnostic),
        }

        *self.counts.entry(diagnostic.kind()).or_insert(0) += 1;
        if self.entries.len() < self.capacity {
            self.entries.push(diagnostic);
        } else {
            self.dropped += 1;
        }
    }

    /// Move all records and counts of `other` into this log
    pub fn absorb(&mut self, other: DiagnosticLog) {
        for (kind, count) in other.counts {
            *self.counts.entry(kind).or_insert(0) += count;
        }
        for diagnostic in other.entries {
            if self.entries.len() < self.capacity {
                self.entries.push(diagnostic);
            } else {
                self.dropped += 1;
            }
        }
        self.dropped += other.dropped;
    }

    /// Stored records, in the order they were produced
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// How many diagnostics of `kind` were recorded (stored or not)
    pub fn count(&self, kind: DiagnosticKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Per-kind counts
    pub fn counts(&self) -> &BTreeMap<DiagnosticKind, u64> {
        &self.counts
    }

    /// Total recorded, stored or not
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Maximum number of stored records
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records not stored because the log was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
