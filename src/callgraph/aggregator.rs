// Call-graph aggregation over closed intervals in the state store
//
// For each context, the depth-1 intervals overlapping the window are walked
// depth first. Children of an interval are the next-depth intervals pushed
// while it was open (by store write order, so calls sharing a timestamp with
// their caller's end or a sibling's start land under the right parent) that
// overlap its span. Every invocation is built as its own small tree and then
// merged into its parent by symbol, so repeated calls along the same path
// accumulate while recursion stays nested by depth.
//
// The walk keeps an explicit frame stack instead of recursing, so deep
// stacks cannot overflow the thread stack.

use super::call_site::AggregatedCallSite;
use super::{AggregationError, CallGraph, Result, SubtreeFailure, TimeWindow};
use crate::context::ExecutionContext;
use crate::state_store::{AttributePath, StateInterval, StateStore, StateValue};
use crate::symbol::{Symbol, SymbolResolver};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared with a running aggregation
///
/// Checked once per context; a cancelled run returns
/// [`AggregationError::Cancelled`] and no partial tree.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only folding of a store's call stacks into a [`CallGraph`]
///
/// Holds no state between calls: aggregating twice over an unchanged store
/// gives identical graphs.
pub struct CallGraphAggregator<'a, S: StateStore + ?Sized> {
    store: &'a S,
    resolver: Option<&'a (dyn SymbolResolver + Sync)>,
    cancel: Option<CancellationToken>,
}

struct Frame {
    node: AggregatedCallSite,
    span: (u64, u64),
    depth: usize,
    pending: std::vec::IntoIter<StateInterval>,
}

impl<'a, S: StateStore + ?Sized> CallGraphAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            resolver: None,
            cancel: None,
        }
    }

    /// Merge siblings by resolved name instead of raw symbol
    pub fn with_resolver(mut self, resolver: &'a (dyn SymbolResolver + Sync)) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Contexts with a call stack in the store, in id order
    pub fn contexts(&self) -> Result<Vec<ExecutionContext>> {
        let root = AttributePath::new(["Contexts"]);
        if !self.store.contains(&root) {
            return Ok(Vec::new());
        }
        let mut contexts: Vec<ExecutionContext> = self
            .store
            .query_sub_attributes(&root, false)?
            .iter()
            .filter_map(|path| path.name()?.parse::<u64>().ok())
            .map(ExecutionContext)
            .collect();
        contexts.sort();
        Ok(contexts)
    }

    /// Aggregate `contexts` over `window`
    pub fn aggregate<I>(&self, contexts: I, window: TimeWindow) -> Result<CallGraph>
    where
        I: IntoIterator<Item = ExecutionContext>,
    {
        let contexts: BTreeSet<ExecutionContext> = contexts.into_iter().collect();
        let mut graph = CallGraph::new(window);
        for context in contexts {
            let (root, failures) = self.aggregate_context(context, window)?;
            graph.roots.insert(context, root);
            graph.failures.extend(failures);
        }
        tracing::debug!(
            "Aggregated {} contexts over [{}, {}], {} failed subtrees",
            graph.roots.len(),
            window.start,
            window.end,
            graph.failures.len()
        );
        Ok(graph)
    }

    /// Fold one context into its synthetic root node
    pub fn aggregate_context(
        &self,
        context: ExecutionContext,
        window: TimeWindow,
    ) -> Result<(AggregatedCallSite, Vec<SubtreeFailure>)> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(AggregationError::Cancelled);
        }

        let stack_path = AttributePath::call_stack(context);
        let status_path = AttributePath::status(context);
        let mut failures = Vec::new();

        let root = AggregatedCallSite::invocation(Symbol::name(context.to_string()), window.len());
        let mut frames = vec![Frame {
            node: root,
            span: (window.start, window.end),
            depth: 0,
            pending: self.children_of(&stack_path, 1, (window.start, window.end), None)?.into_iter(),
        }];

        while let Some(top) = frames.last_mut() {
            if let Some(interval) = top.pending.next() {
                let Some(symbol) = self.symbol_of(&interval, context) else {
                    continue;
                };
                let span = window.clip(interval.start, interval.end.unwrap_or(window.end));
                let depth = top.depth + 1;
                let pending = self.children_of(&stack_path, depth + 1, span, Some(&interval))?.into_iter();
                frames.push(Frame {
                    node: AggregatedCallSite::invocation(symbol, span.1 - span.0),
                    span,
                    depth,
                    pending,
                });
                continue;
            }

            let Some(mut frame) = frames.pop() else {
                break;
            };
            let children_time = frame.node.children_time();
            match frame.node.total_time.checked_sub(children_time) {
                Some(self_time) => {
                    frame.node.self_time = self_time;
                    frame.node.statistics.record(frame.node.total_time, self_time);
                    self.fold_status(&status_path, &mut frame.node, frame.span)?;
                }
                None => {
                    let mut path: Vec<Symbol> = frames.iter().skip(1).map(|f| f.node.symbol.clone()).collect();
                    path.push(frame.node.symbol.clone());
                    let failure = SubtreeFailure {
                        context,
                        path,
                        total_time: frame.node.total_time,
                        children_time,
                    };
                    tracing::warn!("{}", failure);
                    failures.push(failure);

                    if !frames.is_empty() {
                        continue;
                    }
                    // Inconsistent depth-1 intervals: keep an empty root
                    frame.node.children.clear();
                    frame.node.self_time = frame.node.total_time;
                }
            }

            match frames.last_mut() {
                Some(parent) => parent.node.add_child(frame.node),
                None => return Ok((frame.node, failures)),
            }
        }

        Ok((
            AggregatedCallSite::invocation(Symbol::name(context.to_string()), window.len()),
            failures,
        ))
    }

    /// Intervals at `depth` overlapping `span` and nested in `parent`, in time order
    fn children_of(
        &self,
        stack_path: &AttributePath,
        depth: usize,
        span: (u64, u64),
        parent: Option<&StateInterval>,
    ) -> Result<Vec<StateInterval>> {
        let path = stack_path.child(depth.to_string());
        if !self.store.contains(&path) {
            return Ok(Vec::new());
        }
        let (lo, hi) = span;
        Ok(self
            .store
            .query_range(&path, lo, hi)?
            .into_iter()
            .filter(|iv| selects(iv, lo, hi))
            .filter(|iv| parent.map_or(true, |parent| iv.began_within(parent)))
            .collect())
    }

    fn symbol_of(&self, interval: &StateInterval, context: ExecutionContext) -> Option<Symbol> {
        let StateValue::Symbol(symbol) = &interval.value else {
            return None;
        };
        let resolved = match (self.resolver, symbol) {
            (_, Symbol::Name(_)) | (None, _) => None,
            (Some(resolver), raw) => resolver.resolve(raw, context, interval.start),
        };
        Some(resolved.map(Symbol::Name).unwrap_or_else(|| symbol.clone()))
    }

    /// Add the time each status value overlaps `span` to the node's aux series
    fn fold_status(&self, status_path: &AttributePath, node: &mut AggregatedCallSite, span: (u64, u64)) -> Result<()> {
        if !self.store.contains(status_path) {
            return Ok(());
        }
        let (lo, hi) = span;
        for interval in self.store.query_range(status_path, lo, hi)? {
            let Some(status) = interval.value.as_str() else {
                continue;
            };
            let start = interval.start.max(lo);
            let end = interval.end.unwrap_or(hi).min(hi);
            if end > start {
                *node.aux_series.entry(status.to_string()).or_insert(0) += end - start;
            }
        }
        Ok(())
    }
}

impl<'a, S: StateStore + Sync + ?Sized> CallGraphAggregator<'a, S> {
    /// Same result as [`aggregate`](Self::aggregate), with contexts sharded over worker threads
    pub fn aggregate_parallel<I>(&self, contexts: I, window: TimeWindow, workers: usize) -> Result<CallGraph>
    where
        I: IntoIterator<Item = ExecutionContext>,
    {
        let contexts: Vec<ExecutionContext> = contexts.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let workers = workers.max(1);
        if workers == 1 || contexts.len() < 2 {
            return self.aggregate(contexts, window);
        }
        let chunk_size = contexts.len().div_ceil(workers);

        type Shard = Result<Vec<(ExecutionContext, AggregatedCallSite, Vec<SubtreeFailure>)>>;
        let shards: Vec<Shard> = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = contexts
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move |_| -> Shard {
                        chunk
                            .iter()
                            .map(|context| {
                                let (root, failures) = self.aggregate_context(*context, window)?;
                                Ok((*context, root, failures))
                            })
                            .collect()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(Err(AggregationError::WorkerPanicked)))
                .collect()
        })
        .map_err(|_| AggregationError::WorkerPanicked)?;

        let mut graph = CallGraph::new(window);
        for shard in shards {
            for (context, root, failures) in shard? {
                graph.roots.insert(context, root);
                graph.failures.extend(failures);
            }
        }
        Ok(graph)
    }
}

/// Whether an interval contributes to the span `[lo, hi]`
///
/// Zero-length intervals cover exactly their one timestamp, ends included.
/// Longer ones must overlap the span for a positive duration.
fn selects(interval: &StateInterval, lo: u64, hi: u64) -> bool {
    let end = interval.end.unwrap_or(hi);
    if interval.start == end {
        return lo <= interval.start && interval.start <= hi;
    }
    interval.start.max(lo) < end.min(hi)
}
