//! Per-context call stacks
//!
//! Turns enter/leave events into push/pop operations on the state store and
//! keeps an arena of the [`Interval`]s they open and close. Depth is derived
//! from push/pop counts only; nothing in the event is trusted for it.
//!
//! # Interval arena
//!
//! ```text
//! intervals: [ f(d1) | g(d2, parent=0) | h(d2, parent=0) | f(d1) ... ]
//!               0       1                 2                 3
//! open stack (ctx A): [0, 2]      ← innermost last
//! ```
//!
//! Parents are indices into the arena, so there are no reference cycles and
//! the whole arena can be cloned as a snapshot.
//!
//! # Deferred leaves
//!
//! Records that carry their own end time (API spans, kernel records) are
//! entered with [`StackTracker::enter_with_end`]. The matching pop is queued
//! and applied, in end-time order, before any later event on the same context
//! and at [`StackTracker::close_all`].
//!
//! # Failure handling
//!
//! Nothing here aborts an analysis. Leaves with nothing open are recorded as
//! diagnostics and ignored. A context whose stack grows past the configured
//! bound is halted: its later events are rejected, while other contexts
//! continue normally.

use crate::context::ExecutionContext;
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::state_store::{AttributePath, StateStore, StateValue, StoreError};
use crate::symbol::Symbol;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use thiserror::Error;

/// Errors from stack tracking
///
/// Every error is also recorded as a diagnostic; callers may ignore them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("Stack depth limit {limit} exceeded on {context}")]
    DepthLimitExceeded { context: ExecutionContext, limit: usize },

    #[error("Context {0} was halted after a depth overflow")]
    ContextHalted(ExecutionContext),

    #[error("Event at {timestamp} on {context} is earlier than previous event at {last}")]
    TimestampOutOfOrder {
        context: ExecutionContext,
        timestamp: u64,
        last: u64,
    },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for stack tracking
pub type Result<T> = std::result::Result<T, StackError>;

/// Index of an interval in the tracker's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IntervalId(pub usize);

/// A span of time at one depth of one context's stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub start: u64,
    /// `None` while open
    pub end: Option<u64>,
    /// 1 for outermost calls
    pub depth: u32,
    pub symbol: Symbol,
    pub context: ExecutionContext,
    /// Enclosing interval, `None` at depth 1
    pub parent: Option<IntervalId>,
}

impl Interval {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Length once closed
    pub fn duration(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }
}

/// What a leave did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The innermost interval was closed
    Closed(IntervalId),
    /// Nothing was open; diagnostic recorded
    Unmatched,
    /// Symbol mismatch and the configuration says not to pop
    Ignored,
}

#[derive(Debug, Default)]
struct ContextStack {
    open: Vec<IntervalId>,
    last_timestamp: Option<u64>,
    halted: bool,
    mismatch_reported: bool,
    /// (end, sequence, interval) of queued pops
    deferred: BinaryHeap<Reverse<(u64, u64, IntervalId)>>,
}

/// Depth-indexed stacks of open intervals, one per context
#[derive(Debug)]
pub struct StackTracker {
    contexts: BTreeMap<ExecutionContext, ContextStack>,
    intervals: Vec<Interval>,
    max_depth: usize,
    close_on_mismatch: bool,
    deferred_seq: u64,
    closed: u64,
    diagnostics: DiagnosticLog,
}

impl StackTracker {
    /// Tracker with the given depth bound
    pub fn new(max_depth: usize) -> Self {
        Self {
            contexts: BTreeMap::new(),
            intervals: Vec::new(),
            max_depth,
            close_on_mismatch: true,
            deferred_seq: 0,
            closed: 0,
            diagnostics: DiagnosticLog::default(),
        }
    }

    /// Whether a leave naming another symbol still pops
    pub fn with_close_on_mismatch(mut self, close: bool) -> Self {
        self.close_on_mismatch = close;
        self
    }

    /// Replace the diagnostic log (e.g. to change its capacity)
    pub fn with_diagnostics(mut self, diagnostics: DiagnosticLog) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Open a new interval one level below the current top
    pub fn on_enter<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
        symbol: Symbol,
    ) -> Result<IntervalId> {
        self.admit(store, context, timestamp)?;

        let limit = self.max_depth;
        let stack = self.contexts.entry(context).or_default();
        if stack.open.len() >= limit {
            stack.halted = true;
            self.diagnostics.record(Diagnostic::DepthLimitExceeded {
                context,
                timestamp,
                limit,
            });
            return Err(StackError::DepthLimitExceeded { context, limit });
        }

        let path = AttributePath::call_stack(context);
        if let Err(e) = store.push_attribute(&path, timestamp, StateValue::Symbol(symbol.clone())) {
            return Err(self.store_failure(context, timestamp, e));
        }

        let stack = self.contexts.entry(context).or_default();
        let id = IntervalId(self.intervals.len());
        self.intervals.push(Interval {
            start: timestamp,
            end: None,
            depth: (stack.open.len() + 1) as u32,
            symbol,
            context,
            parent: stack.open.last().copied(),
        });
        stack.open.push(id);
        Ok(id)
    }

    /// Open an interval whose end time is already known
    ///
    /// The pop is queued for `end` (clamped to `timestamp`). It is dropped if
    /// the interval has already been closed by an ordinary leave by then.
    pub fn enter_with_end<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
        end: u64,
        symbol: Symbol,
    ) -> Result<IntervalId> {
        let id = self.on_enter(store, context, timestamp, symbol)?;
        let seq = self.deferred_seq;
        self.deferred_seq += 1;
        if let Some(stack) = self.contexts.get_mut(&context) {
            stack.deferred.push(Reverse((end.max(timestamp), seq, id)));
        }
        Ok(id)
    }

    /// Close the innermost open interval
    pub fn on_leave<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
    ) -> Result<LeaveOutcome> {
        self.on_leave_checked(store, context, timestamp, None)
    }

    /// Close the innermost open interval, checking it is `expected` when given
    ///
    /// A leave naming a frame below the top unwinds the stack down to and
    /// including the innermost frame with that symbol. A name that is not on
    /// the stack at all is a mismatch: the top is popped (or the leave
    /// ignored, when configured) and a diagnostic recorded.
    pub fn on_leave_checked<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
        expected: Option<&Symbol>,
    ) -> Result<LeaveOutcome> {
        self.admit(store, context, timestamp)?;

        let top = self
            .contexts
            .get(&context)
            .and_then(|stack| stack.open.last().copied());
        let Some(top) = top else {
            self.diagnostics
                .record(Diagnostic::UnmatchedLeave { context, timestamp });
            return Ok(LeaveOutcome::Unmatched);
        };

        if let Some(found) = expected {
            let named = self.contexts.get(&context).and_then(|stack| {
                stack
                    .open
                    .iter()
                    .rev()
                    .copied()
                    .find(|id| self.intervals[id.0].symbol == *found)
            });
            if let Some(id) = named {
                let closed = self.unwind_to(store, context, id, timestamp)?;
                if closed > 1 {
                    tracing::debug!("leave of {} on {} unwound {} frames", found, context, closed);
                }
                return Ok(LeaveOutcome::Closed(id));
            }

            if let Some(stack) = self.contexts.get_mut(&context) {
                if !stack.mismatch_reported {
                    stack.mismatch_reported = true;
                    self.diagnostics.record(Diagnostic::LeaveSymbolMismatch {
                        context,
                        timestamp,
                        expected: self.intervals[top.0].symbol.clone(),
                        found: found.clone(),
                    });
                }
            }
            if !self.close_on_mismatch {
                return Ok(LeaveOutcome::Ignored);
            }
        }

        self.pop(store, context, timestamp).map(LeaveOutcome::Closed)
    }

    /// Set (or clear) the status series of a context
    pub fn on_status<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
        value: Option<String>,
    ) -> Result<()> {
        self.admit(store, context, timestamp)?;
        let path = AttributePath::status(context);
        if let Err(e) = store.modify_attribute(&path, timestamp, value.map(StateValue::Str)) {
            return Err(self.store_failure(context, timestamp, e));
        }
        Ok(())
    }

    /// Close everything still open, at `end` or the context's last timestamp
    ///
    /// Queued deferred pops are applied first at their own end times.
    /// Returns the number of intervals closed here.
    pub fn close_all<S: StateStore + ?Sized>(&mut self, store: &mut S, end: u64) -> usize {
        let contexts: Vec<ExecutionContext> = self.contexts.keys().copied().collect();
        let mut closed = 0;

        for context in contexts {
            while let Some(Reverse((at, _, id))) = self
                .contexts
                .get_mut(&context)
                .and_then(|stack| stack.deferred.pop())
            {
                let at = self.clamp_to_last(context, at);
                match self.unwind_to(store, context, id, at) {
                    Ok(n) => closed += n,
                    Err(e) => tracing::warn!("deferred pop on {} failed: {}", context, e),
                }
            }

            let at = self.clamp_to_last(context, end);
            while self
                .contexts
                .get(&context)
                .is_some_and(|stack| !stack.open.is_empty())
            {
                match self.pop(store, context, at) {
                    Ok(_) => closed += 1,
                    Err(e) => {
                        // Store refused the pop: close the arena entries anyway
                        tracing::warn!("close_all on {} failed: {}", context, e);
                        self.abandon(context, at);
                    }
                }
            }
        }

        tracing::debug!("close_all at {} closed {} intervals", end, closed);
        closed
    }

    /// Current stack depth of a context
    pub fn depth(&self, context: ExecutionContext) -> usize {
        self.contexts
            .get(&context)
            .map_or(0, |stack| stack.open.len())
    }

    /// True once a context overflowed its depth bound
    pub fn is_halted(&self, context: ExecutionContext) -> bool {
        self.contexts.get(&context).is_some_and(|stack| stack.halted)
    }

    /// Contexts seen so far, in id order
    pub fn contexts(&self) -> impl Iterator<Item = ExecutionContext> + '_ {
        self.contexts.keys().copied()
    }

    /// All intervals, in creation order
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn interval(&self, id: IntervalId) -> Option<&Interval> {
        self.intervals.get(id.0)
    }

    /// Number of intervals closed so far
    pub fn closed_count(&self) -> u64 {
        self.closed
    }

    /// Number of intervals currently open across all contexts
    pub fn open_count(&self) -> usize {
        self.contexts.values().map(|stack| stack.open.len()).sum()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Hand the diagnostics collected so far to the caller
    pub fn take_diagnostics(&mut self) -> DiagnosticLog {
        let capacity = self.diagnostics.capacity();
        std::mem::replace(&mut self.diagnostics, DiagnosticLog::with_capacity(capacity))
    }

    /// Common gate for every event: halted contexts, ordering, deferred pops
    fn admit<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
    ) -> Result<()> {
        let stack = self.contexts.entry(context).or_default();
        if stack.halted {
            self.diagnostics
                .record(Diagnostic::HaltedContextEvent { context, timestamp });
            return Err(StackError::ContextHalted(context));
        }
        if let Some(last) = stack.last_timestamp {
            if timestamp < last {
                self.diagnostics.record(Diagnostic::TimestampOutOfOrder {
                    context,
                    timestamp,
                    last,
                });
                return Err(StackError::TimestampOutOfOrder {
                    context,
                    timestamp,
                    last,
                });
            }
        }

        self.flush_deferred(store, context, timestamp)?;

        if let Some(stack) = self.contexts.get_mut(&context) {
            stack.last_timestamp = Some(timestamp);
        }
        Ok(())
    }

    /// Apply queued pops due at or before `timestamp`
    fn flush_deferred<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
    ) -> Result<()> {
        loop {
            let (due, target) = match self.contexts.get_mut(&context) {
                Some(stack) => match stack.deferred.peek() {
                    Some(Reverse((at, _, id))) if *at <= timestamp => {
                        let entry = (*at, *id);
                        stack.deferred.pop();
                        entry
                    }
                    _ => return Ok(()),
                },
                None => return Ok(()),
            };
            let due = self.clamp_to_last(context, due);
            self.unwind_to(store, context, target, due)?;
        }
    }

    /// Pop every frame above `target`, then `target` itself, at `timestamp`
    ///
    /// Returns the number of frames closed; 0 when `target` is no longer open.
    fn unwind_to<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        target: IntervalId,
        timestamp: u64,
    ) -> Result<usize> {
        let still_open = self
            .contexts
            .get(&context)
            .is_some_and(|stack| stack.open.contains(&target));
        if !still_open {
            return Ok(0);
        }

        let mut closed = 0;
        loop {
            let id = self.pop(store, context, timestamp)?;
            closed += 1;
            if id == target {
                return Ok(closed);
            }
        }
    }

    fn pop<S: StateStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: ExecutionContext,
        timestamp: u64,
    ) -> Result<IntervalId> {
        let path = AttributePath::call_stack(context);
        let Some(id) = self
            .contexts
            .get(&context)
            .and_then(|stack| stack.open.last().copied())
        else {
            return Err(StackError::Store(StoreError::EmptyStack(path)));
        };

        if let Err(e) = store.pop_attribute(&path, timestamp) {
            return Err(self.store_failure(context, timestamp, e));
        }

        if let Some(stack) = self.contexts.get_mut(&context) {
            stack.open.pop();
            stack.last_timestamp = Some(stack.last_timestamp.map_or(timestamp, |last| last.max(timestamp)));
        }
        self.intervals[id.0].end = Some(timestamp);
        self.closed += 1;
        Ok(id)
    }

    /// Close arena entries of a context without touching the store
    fn abandon(&mut self, context: ExecutionContext, timestamp: u64) {
        if let Some(stack) = self.contexts.get_mut(&context) {
            while let Some(id) = stack.open.pop() {
                self.intervals[id.0].end = Some(timestamp.max(self.intervals[id.0].start));
                self.closed += 1;
            }
        }
    }

    fn clamp_to_last(&self, context: ExecutionContext, timestamp: u64) -> u64 {
        self.contexts
            .get(&context)
            .and_then(|stack| stack.last_timestamp)
            .map_or(timestamp, |last| timestamp.max(last))
    }

    fn store_failure(&mut self, context: ExecutionContext, timestamp: u64, error: StoreError) -> StackError {
        self.diagnostics.record(Diagnostic::StoreRejected {
            context,
            timestamp,
            message: error.to_string(),
        });
        StackError::Store(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use crate::state_store::MemoryStateStore;

    const A: ExecutionContext = ExecutionContext(1);
    const B: ExecutionContext = ExecutionContext(2);

    fn sym(name: &str) -> Symbol {
        Symbol::name(name)
    }

    #[test]
    fn test_nested_enter_leave() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let f = tracker.on_enter(&mut store, A, 0, sym("f")).unwrap();
        let g = tracker.on_enter(&mut store, A, 10, sym("g")).unwrap();
        assert_eq!(tracker.depth(A), 2);

        assert_eq!(tracker.on_leave(&mut store, A, 20).unwrap(), LeaveOutcome::Closed(g));
        assert_eq!(tracker.on_leave(&mut store, A, 30).unwrap(), LeaveOutcome::Closed(f));

        let g_iv = tracker.interval(g).unwrap();
        assert_eq!((g_iv.start, g_iv.end, g_iv.depth), (10, Some(20), 2));
        assert_eq!(g_iv.parent, Some(f));
        let f_iv = tracker.interval(f).unwrap();
        assert_eq!((f_iv.start, f_iv.end, f_iv.depth), (0, Some(30), 1));
        assert_eq!(f_iv.parent, None);
    }

    #[test]
    fn test_leave_without_enter_is_diagnostic() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let outcome = tracker.on_leave(&mut store, A, 5).unwrap();
        assert_eq!(outcome, LeaveOutcome::Unmatched);
        assert_eq!(tracker.diagnostics().count(DiagnosticKind::UnmatchedLeave), 1);
    }

    #[test]
    fn test_depth_limit_halts_only_that_context() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(2);

        tracker.on_enter(&mut store, A, 0, sym("a")).unwrap();
        tracker.on_enter(&mut store, A, 1, sym("b")).unwrap();
        let err = tracker.on_enter(&mut store, A, 2, sym("c")).unwrap_err();
        assert_eq!(err, StackError::DepthLimitExceeded { context: A, limit: 2 });
        assert!(tracker.is_halted(A));

        assert_eq!(tracker.on_leave(&mut store, A, 3), Err(StackError::ContextHalted(A)));

        // Other contexts keep working
        tracker.on_enter(&mut store, B, 4, sym("x")).unwrap();
        assert!(tracker.on_leave(&mut store, B, 5).is_ok());

        // Halted intervals still get an end
        tracker.close_all(&mut store, 10);
        assert!(tracker.intervals().iter().all(|iv| iv.end.is_some()));
    }

    #[test]
    fn test_out_of_order_timestamp_rejected() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        tracker.on_enter(&mut store, A, 50, sym("f")).unwrap();
        let err = tracker.on_leave(&mut store, A, 40).unwrap_err();
        assert!(matches!(err, StackError::TimestampOutOfOrder { last: 50, .. }));
        assert_eq!(tracker.depth(A), 1);
    }

    #[test]
    fn test_interleaved_contexts_are_independent() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        tracker.on_enter(&mut store, A, 100, sym("f")).unwrap();
        // B may be behind A in time
        tracker.on_enter(&mut store, B, 10, sym("g")).unwrap();
        tracker.on_leave(&mut store, B, 20).unwrap();
        tracker.on_leave(&mut store, A, 110).unwrap();

        assert_eq!(tracker.closed_count(), 2);
    }

    #[test]
    fn test_close_all_closes_open_intervals() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        tracker.on_enter(&mut store, A, 0, sym("f")).unwrap();
        tracker.on_enter(&mut store, A, 5, sym("g")).unwrap();
        tracker.on_enter(&mut store, B, 7, sym("h")).unwrap();

        assert_eq!(tracker.close_all(&mut store, 100), 3);
        assert_eq!(tracker.open_count(), 0);
        for iv in tracker.intervals() {
            assert_eq!(iv.end, Some(100));
        }

        let slot = AttributePath::call_stack(A).child("2");
        let stored = store.query_interval_at(&slot, 50).unwrap().unwrap();
        assert_eq!(stored.end, Some(100));
    }

    #[test]
    fn test_leave_symbol_mismatch_reported_once() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        tracker.on_enter(&mut store, A, 0, sym("f")).unwrap();
        tracker.on_enter(&mut store, A, 1, sym("g")).unwrap();
        let g = sym("x");
        let outcome = tracker.on_leave_checked(&mut store, A, 2, Some(&g)).unwrap();
        assert!(matches!(outcome, LeaveOutcome::Closed(_)));
        tracker.on_leave_checked(&mut store, A, 3, Some(&g)).unwrap();

        assert_eq!(tracker.diagnostics().count(DiagnosticKind::LeaveSymbolMismatch), 1);
        assert_eq!(tracker.depth(A), 0);
    }

    #[test]
    fn test_mismatch_can_be_ignored() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100).with_close_on_mismatch(false);

        tracker.on_enter(&mut store, A, 0, sym("f")).unwrap();
        let other = sym("g");
        let outcome = tracker.on_leave_checked(&mut store, A, 1, Some(&other)).unwrap();
        assert_eq!(outcome, LeaveOutcome::Ignored);
        assert_eq!(tracker.depth(A), 1);

        let same = sym("f");
        let outcome = tracker.on_leave_checked(&mut store, A, 2, Some(&same)).unwrap();
        assert!(matches!(outcome, LeaveOutcome::Closed(_)));
    }

    #[test]
    fn test_deferred_leave_flushed_before_later_event() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let api = tracker.enter_with_end(&mut store, A, 0, 10, sym("hipLaunch")).unwrap();
        // Next event on A is after the api call ended
        let next = tracker.on_enter(&mut store, A, 15, sym("hipMemcpy")).unwrap();

        assert_eq!(tracker.interval(api).unwrap().end, Some(10));
        let next_iv = tracker.interval(next).unwrap();
        assert_eq!(next_iv.depth, 1);
        assert_eq!(next_iv.parent, None);
    }

    #[test]
    fn test_deferred_leaves_nest() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let outer = tracker.enter_with_end(&mut store, A, 0, 100, sym("outer")).unwrap();
        let inner = tracker.enter_with_end(&mut store, A, 10, 20, sym("inner")).unwrap();
        tracker.close_all(&mut store, 500);

        assert_eq!(tracker.interval(inner).unwrap().end, Some(20));
        assert_eq!(tracker.interval(outer).unwrap().end, Some(100));
        assert_eq!(tracker.interval(inner).unwrap().parent, Some(outer));
    }

    #[test]
    fn test_deferred_pop_skipped_after_plain_leave() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let p = tracker.on_enter(&mut store, A, 0, sym("p")).unwrap();
        let x = tracker.enter_with_end(&mut store, A, 1, 10, sym("x")).unwrap();
        // x is left early; its queued pop must not touch p later
        assert_eq!(tracker.on_leave(&mut store, A, 5).unwrap(), LeaveOutcome::Closed(x));
        tracker.on_enter(&mut store, A, 20, sym("q")).unwrap();

        assert!(tracker.interval(p).unwrap().is_open());
        assert_eq!(tracker.interval(x).unwrap().end, Some(5));
        assert_eq!(tracker.depth(A), 2);

        tracker.close_all(&mut store, 30);
        assert_eq!(tracker.interval(p).unwrap().end, Some(30));
    }

    #[test]
    fn test_close_all_ignores_stale_deferred_pops() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let p = tracker.on_enter(&mut store, A, 0, sym("p")).unwrap();
        tracker.enter_with_end(&mut store, A, 1, 10, sym("x")).unwrap();
        tracker.on_leave(&mut store, A, 5).unwrap();

        assert_eq!(tracker.close_all(&mut store, 50), 1);
        assert_eq!(tracker.interval(p).unwrap().end, Some(50));
    }

    #[test]
    fn test_deferred_pop_unwinds_open_children() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let api = tracker.enter_with_end(&mut store, A, 0, 10, sym("api")).unwrap();
        let inner = tracker.on_enter(&mut store, A, 2, sym("inner")).unwrap();
        tracker.on_enter(&mut store, A, 20, sym("next")).unwrap();

        assert_eq!(tracker.interval(inner).unwrap().end, Some(10));
        assert_eq!(tracker.interval(api).unwrap().end, Some(10));
        assert_eq!(tracker.depth(A), 1);
    }

    #[test]
    fn test_named_leave_unwinds_to_frame_below_top() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        let f = tracker.on_enter(&mut store, A, 0, sym("f")).unwrap();
        let g = tracker.on_enter(&mut store, A, 1, sym("g")).unwrap();
        let h = tracker.on_enter(&mut store, A, 2, sym("h")).unwrap();

        let outcome = tracker.on_leave_checked(&mut store, A, 7, Some(&sym("g"))).unwrap();
        assert_eq!(outcome, LeaveOutcome::Closed(g));
        assert_eq!(tracker.interval(h).unwrap().end, Some(7));
        assert_eq!(tracker.interval(g).unwrap().end, Some(7));
        assert!(tracker.interval(f).unwrap().is_open());
        assert_eq!(tracker.diagnostics().count(DiagnosticKind::LeaveSymbolMismatch), 0);
    }

    #[test]
    fn test_named_leave_picks_innermost_recursive_frame() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100).with_close_on_mismatch(false);

        let outer = tracker.on_enter(&mut store, A, 0, sym("f")).unwrap();
        let inner = tracker.on_enter(&mut store, A, 1, sym("f")).unwrap();
        tracker.on_enter(&mut store, A, 2, sym("g")).unwrap();

        // Found on the stack, so strict mode still unwinds
        let outcome = tracker.on_leave_checked(&mut store, A, 3, Some(&sym("f"))).unwrap();
        assert_eq!(outcome, LeaveOutcome::Closed(inner));
        assert!(tracker.interval(outer).unwrap().is_open());
        assert_eq!(tracker.depth(A), 1);
    }

    #[test]
    fn test_status_written_to_store() {
        let mut store = MemoryStateStore::new();
        let mut tracker = StackTracker::new(100);

        tracker.on_status(&mut store, A, 0, Some("Busy".into())).unwrap();
        tracker.on_status(&mut store, A, 10, None).unwrap();

        let iv = store
            .query_interval_at(&AttributePath::status(A), 5)
            .unwrap()
            .unwrap();
        assert_eq!(iv.value, StateValue::Str("Busy".into()));
        assert_eq!(iv.end, Some(10));
    }
}
