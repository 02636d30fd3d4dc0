use super::*;
use crate::state_store::{AttributePath, MemoryStateStore, StateStore, StateValue};
use crate::stack_tracker::StackTracker;
use crate::symbol::MapSymbolResolver;

const A: ExecutionContext = ExecutionContext(1);

/// Replay `(context, timestamp, symbol)` triples; an empty symbol is a leave
fn record(events: &[(u64, u64, &str)]) -> MemoryStateStore {
    let mut store = MemoryStateStore::new();
    let mut tracker = StackTracker::new(64);
    let mut last = 0;
    for &(context, timestamp, symbol) in events {
        let context = ExecutionContext(context);
        if symbol.is_empty() {
            tracker.on_leave(&mut store, context, timestamp).unwrap();
        } else {
            tracker
                .on_enter(&mut store, context, timestamp, Symbol::name(symbol))
                .unwrap();
        }
        last = last.max(timestamp);
    }
    tracker.close_all(&mut store, last);
    store
}

fn window(start: u64, end: u64) -> TimeWindow {
    TimeWindow::new(start, end).unwrap()
}

fn name(s: &str) -> Symbol {
    Symbol::name(s)
}

#[test]
fn test_nested_call_self_time() {
    let store = record(&[(1, 10, "f"), (1, 20, "g"), (1, 30, ""), (1, 100, "")]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(10, 100))
        .unwrap();

    let root = graph.root(A).unwrap();
    assert_eq!(root.total_time, 90);
    assert_eq!(root.self_time, 0);

    let f = root.child(&name("f")).unwrap();
    assert_eq!((f.total_time, f.self_time, f.count), (90, 80, 1));
    let g = f.child(&name("g")).unwrap();
    assert_eq!((g.total_time, g.self_time, g.count), (10, 10, 1));
    assert!(root.is_consistent());
    assert!(graph.failures.is_empty());
}

#[test]
fn test_repeated_calls_on_same_path_merge() {
    let store = record(&[
        (1, 0, "main"),
        (1, 10, "f"),
        (1, 20, ""),
        (1, 30, "f"),
        (1, 50, ""),
        (1, 60, "g"),
        (1, 65, ""),
        (1, 100, ""),
    ]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 100))
        .unwrap();
    let main = graph.root(A).unwrap().child(&name("main")).unwrap();

    assert_eq!(main.children.len(), 2);
    let f = main.child(&name("f")).unwrap();
    assert_eq!((f.total_time, f.count), (30, 2));
    assert_eq!(f.statistics.duration.min(), Some(10));
    assert_eq!(f.statistics.duration.max(), Some(20));
    assert_eq!(main.self_time, 100 - 30 - 5);
}

#[test]
fn test_same_symbol_on_different_paths_stays_separate() {
    let store = record(&[
        (1, 0, "a"),
        (1, 5, "log"),
        (1, 10, ""),
        (1, 20, ""),
        (1, 20, "b"),
        (1, 25, "log"),
        (1, 35, ""),
        (1, 40, ""),
    ]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 40))
        .unwrap();
    let root = graph.root(A).unwrap();

    assert_eq!(root.find(&[name("a"), name("log")]).unwrap().total_time, 5);
    assert_eq!(root.find(&[name("b"), name("log")]).unwrap().total_time, 10);
    assert!(root.child(&name("log")).is_none());
}

#[test]
fn test_recursion_nests_by_depth() {
    let store = record(&[
        (1, 0, "f"),
        (1, 10, "f"),
        (1, 20, "f"),
        (1, 30, ""),
        (1, 50, ""),
        (1, 100, ""),
    ]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 100))
        .unwrap();
    let root = graph.root(A).unwrap();

    assert_eq!(root.max_depth(), 4);
    let outer = root.child(&name("f")).unwrap();
    let middle = outer.child(&name("f")).unwrap();
    let inner = middle.child(&name("f")).unwrap();
    assert_eq!((outer.total_time, outer.self_time), (100, 60));
    assert_eq!((middle.total_time, middle.self_time), (40, 30));
    assert_eq!((inner.total_time, inner.self_time), (10, 10));
    assert!(root.is_consistent());
}

#[test]
fn test_window_clips_partial_intervals() {
    let store = record(&[(1, 0, "f"), (1, 40, "g"), (1, 70, ""), (1, 100, ""), (1, 200, "h"), (1, 210, "")]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(50, 150))
        .unwrap();
    let root = graph.root(A).unwrap();

    assert_eq!(root.total_time, 100);
    assert_eq!(root.self_time, 50);
    let f = root.child(&name("f")).unwrap();
    assert_eq!((f.total_time, f.count), (50, 1));
    let g = f.child(&name("g")).unwrap();
    assert_eq!((g.total_time, g.count), (20, 1));
    assert!(root.child(&name("h")).is_none());
}

#[test]
fn test_zero_length_calls_are_counted() {
    let store = record(&[(1, 0, "f"), (1, 10, "tick"), (1, 10, ""), (1, 20, "")]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 20))
        .unwrap();
    let tick = graph.root(A).unwrap().find(&[name("f"), name("tick")]).unwrap();
    assert_eq!((tick.total_time, tick.count), (0, 1));
}

#[test]
fn test_zero_length_call_at_parent_end_stays_with_parent() {
    let store = record(&[(1, 0, "f"), (1, 10, "g"), (1, 10, ""), (1, 10, "")]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 10))
        .unwrap();

    let f = graph.root(A).unwrap().child(&name("f")).unwrap();
    let g = f.child(&name("g")).unwrap();
    assert_eq!((g.total_time, g.count), (0, 1));
    assert_eq!(f.self_time, 10);
    assert!(graph.failures.is_empty());
}

#[test]
fn test_zero_length_call_not_adopted_by_next_sibling() {
    // g is pushed and popped inside f at 10; h starts at 10 right after
    let store = record(&[
        (1, 0, "f"),
        (1, 10, "g"),
        (1, 10, ""),
        (1, 10, ""),
        (1, 10, "h"),
        (1, 20, ""),
    ]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 20))
        .unwrap();

    let root = graph.root(A).unwrap();
    assert_eq!(root.find(&[name("f"), name("g")]).unwrap().count, 1);
    let h = root.child(&name("h")).unwrap();
    assert!(h.children.is_empty());
    assert_eq!(h.total_time, 10);
}

#[test]
fn test_zero_length_call_at_sibling_start_belongs_to_sibling() {
    let store = record(&[
        (1, 0, "f"),
        (1, 10, ""),
        (1, 10, "h"),
        (1, 10, "g"),
        (1, 10, ""),
        (1, 20, ""),
    ]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 20))
        .unwrap();

    let root = graph.root(A).unwrap();
    assert!(root.child(&name("f")).unwrap().children.is_empty());
    assert_eq!(root.find(&[name("h"), name("g")]).unwrap().count, 1);
}

#[test]
fn test_status_time_folds_into_aux_series() {
    let mut store = MemoryStateStore::new();
    let mut tracker = StackTracker::new(8);
    tracker.on_status(&mut store, A, 0, Some("Busy".into())).unwrap();
    tracker.on_enter(&mut store, A, 0, name("kernel")).unwrap();
    tracker.on_status(&mut store, A, 60, Some("Idle".into())).unwrap();
    tracker.on_leave(&mut store, A, 100).unwrap();
    tracker.on_status(&mut store, A, 100, None).unwrap();
    tracker.close_all(&mut store, 100);

    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 100))
        .unwrap();
    let kernel = graph.root(A).unwrap().child(&name("kernel")).unwrap();
    assert_eq!(kernel.aux_series.get("Busy"), Some(&60));
    assert_eq!(kernel.aux_series.get("Idle"), Some(&40));
    assert_eq!(kernel.children.len(), 0);
}

#[test]
fn test_aggregation_is_idempotent() {
    let store = record(&[(1, 0, "f"), (1, 5, "g"), (1, 9, ""), (1, 20, ""), (2, 3, "h"), (2, 8, "")]);
    let aggregator = CallGraphAggregator::new(&store);
    let contexts = aggregator.contexts().unwrap();
    let first = aggregator.aggregate(contexts.clone(), window(0, 20)).unwrap();
    let second = aggregator.aggregate(contexts, window(0, 20)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
}

#[test]
fn test_parallel_matches_sequential() {
    let mut events = Vec::new();
    for context in 1..=7 {
        let base = context * 3;
        events.extend([
            (context, base, "main"),
            (context, base + 1, "work"),
            (context, base + 10, ""),
            (context, base + 40, ""),
        ]);
    }
    events.sort_by_key(|(_, ts, _)| *ts);
    let store = record(&events);

    let aggregator = CallGraphAggregator::new(&store);
    let contexts = aggregator.contexts().unwrap();
    assert_eq!(contexts.len(), 7);
    let sequential = aggregator.aggregate(contexts.clone(), window(0, 100)).unwrap();
    let parallel = aggregator.aggregate_parallel(contexts, window(0, 100), 3).unwrap();
    assert_eq!(sequential.fingerprint().unwrap(), parallel.fingerprint().unwrap());
}

#[test]
fn test_cancelled_aggregation_returns_no_tree() {
    let store = record(&[(1, 0, "f"), (1, 10, "")]);
    let token = CancellationToken::new();
    token.cancel();
    let result = CallGraphAggregator::new(&store)
        .with_cancellation(token)
        .aggregate([A], window(0, 10));
    assert_eq!(result, Err(AggregationError::Cancelled));
}

#[test]
fn test_child_outside_parent_fails_only_that_subtree() {
    let mut store = MemoryStateStore::new();
    let stack = AttributePath::call_stack(A);
    let depth1 = stack.child("1");
    let depth2 = stack.child("2");
    store.modify_attribute(&stack, 0, Some(StateValue::Int(1))).unwrap();
    store.modify_attribute(&depth1, 0, Some(StateValue::Symbol(name("ok")))).unwrap();
    store.modify_attribute(&depth1, 10, None).unwrap();
    store.modify_attribute(&depth1, 20, Some(StateValue::Symbol(name("bad")))).unwrap();
    store.modify_attribute(&depth2, 25, Some(StateValue::Symbol(name("leak")))).unwrap();
    store.modify_attribute(&depth1, 30, None).unwrap();
    store.modify_attribute(&depth2, 60, None).unwrap();
    store.modify_attribute(&stack, 60, None).unwrap();

    let graph = CallGraphAggregator::new(&store)
        .aggregate([A], window(0, 60))
        .unwrap();

    let root = graph.root(A).unwrap();
    assert!(root.child(&name("ok")).is_some());
    assert!(root.child(&name("bad")).is_none());
    assert_eq!(graph.failures.len(), 1);
    let failure = &graph.failures[0];
    assert_eq!(failure.path, vec![name("bad")]);
    assert_eq!((failure.total_time, failure.children_time), (10, 35));
    assert!(root.is_consistent());
}

#[test]
fn test_resolver_merges_raw_and_named_symbols() {
    let mut store = MemoryStateStore::new();
    let mut tracker = StackTracker::new(8);
    tracker.on_enter(&mut store, A, 0, Symbol::Address(0x1000)).unwrap();
    tracker.on_leave(&mut store, A, 10).unwrap();
    tracker.on_enter(&mut store, A, 20, name("compute")).unwrap();
    tracker.on_leave(&mut store, A, 25).unwrap();
    tracker.on_enter(&mut store, A, 30, Symbol::Region(7)).unwrap();
    tracker.on_leave(&mut store, A, 31).unwrap();

    let mut resolver = MapSymbolResolver::new();
    resolver.add_address(0x1000, "compute");

    let graph = CallGraphAggregator::new(&store)
        .with_resolver(&resolver)
        .aggregate([A], window(0, 40))
        .unwrap();
    let root = graph.root(A).unwrap();
    let compute = root.child(&name("compute")).unwrap();
    assert_eq!((compute.total_time, compute.count), (15, 2));
    assert!(root.child(&Symbol::Region(7)).is_some());
}

#[test]
fn test_contexts_without_calls_get_empty_roots() {
    let store = record(&[(1, 0, "f"), (1, 10, "")]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A, ExecutionContext(9)], window(0, 10))
        .unwrap();
    let idle = graph.root(ExecutionContext(9)).unwrap();
    assert_eq!((idle.total_time, idle.self_time), (10, 10));
    assert!(idle.children.is_empty());
}

#[test]
fn test_merged_graph_sums_contexts() {
    let store = record(&[(1, 0, "f"), (1, 10, ""), (2, 0, "f"), (2, 30, ""), (2, 30, "g"), (2, 40, "")]);
    let graph = CallGraphAggregator::new(&store)
        .aggregate([A, ExecutionContext(2)], window(0, 40))
        .unwrap();
    let all = graph.merged();

    assert_eq!(all.total_time, 80);
    let f = all.child(&name("f")).unwrap();
    assert_eq!((f.total_time, f.count), (40, 2));
    assert_eq!(all.child(&name("g")).unwrap().total_time, 10);
    assert!(all.is_consistent());
}

#[test]
fn test_invalid_window_is_rejected() {
    assert_eq!(
        TimeWindow::new(10, 5),
        Err(AggregationError::InvalidWindow { start: 10, end: 5 })
    );
    assert_eq!(window(10, 20).clip(0, 30), (10, 20));
    assert_eq!(window(10, 20).clip(25, 30), (20, 20));
}
