//! Integration tests for call-graph aggregation, diff and export
//!
//! Traces are driven through AnalysisEngine, then aggregated from the store.

use tracefold::callgraph::{self, AggregationError, CancellationToken, TimeWindow};
use tracefold::context::{ContextKind, ExecutionContext};
use tracefold::engine::{AnalysisEngine, AnalysisOutput};
use tracefold::event::TraceEvent;
use tracefold::symbol::Symbol;

const MAIN: ExecutionContext = ExecutionContext(1);
const WORKER: ExecutionContext = ExecutionContext(2);

fn name(s: &str) -> Symbol {
    Symbol::name(s)
}

/// main: parse [0,10] compute [10,60] { kernel [20,50] } write [60,70], total [0,100]
fn run(kernel_end: u64) -> AnalysisOutput {
    let mut engine = AnalysisEngine::default();
    engine.register_context(MAIN, "main", ContextKind::Thread);
    engine.register_context(WORKER, "worker", ContextKind::Thread);
    let events = [
        TraceEvent::enter(0, MAIN, "main"),
        TraceEvent::enter(0, MAIN, "parse"),
        TraceEvent::leave(10, MAIN),
        TraceEvent::enter(10, MAIN, "compute"),
        TraceEvent::enter(20, MAIN, "kernel"),
        TraceEvent::leave(kernel_end, MAIN),
        TraceEvent::leave(60, MAIN),
        TraceEvent::enter(60, MAIN, "write"),
        TraceEvent::leave(70, MAIN),
        TraceEvent::leave(100, MAIN),
        TraceEvent::enter(5, WORKER, "compute"),
        TraceEvent::leave(25, WORKER),
    ];
    for event in events {
        engine.process(event);
    }
    engine.finish()
}

#[test]
fn test_self_time_conservation_everywhere() {
    let output = run(50);
    let graph = output.aggregate(None).unwrap();
    for root in graph.roots.values() {
        assert!(root.is_consistent());
    }

    let main = graph.root(MAIN).unwrap().child(&name("main")).unwrap();
    assert_eq!(main.total_time, 100);
    assert_eq!(main.self_time, 100 - 10 - 50 - 10);
    let compute = main.child(&name("compute")).unwrap();
    assert_eq!((compute.total_time, compute.self_time), (50, 20));
}

#[test]
fn test_window_restricts_the_graph() {
    let output = run(50);
    let graph = output.aggregate(Some(TimeWindow::new(15, 30).unwrap())).unwrap();

    let main = graph.root(MAIN).unwrap().child(&name("main")).unwrap();
    assert_eq!(main.total_time, 15);
    assert!(main.child(&name("parse")).is_none());
    assert_eq!(main.find(&[name("compute"), name("kernel")]).unwrap().total_time, 10);

    let worker = graph.root(WORKER).unwrap().child(&name("compute")).unwrap();
    assert_eq!(worker.total_time, 10);
}

#[test]
fn test_repeated_aggregation_fingerprints_match() {
    let output = run(50);
    let first = output.aggregate(None).unwrap().fingerprint().unwrap();
    let second = output.aggregate(None).unwrap().fingerprint().unwrap();
    let parallel = output.aggregate_parallel(None, 4).unwrap().fingerprint().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, parallel);
}

#[test]
fn test_diff_reports_slower_kernel() {
    let base = run(50).aggregate(None).unwrap();
    let slower = run(58).aggregate(None).unwrap();

    let d = callgraph::diff(base.root(MAIN).unwrap(), slower.root(MAIN).unwrap());
    let kernel = d
        .child(&name("main"))
        .and_then(|m| m.child(&name("compute")))
        .and_then(|c| c.child(&name("kernel")))
        .unwrap();
    assert_eq!(kernel.total_delta(), 8);
    assert_eq!(kernel.total_change_percent(), Some(8.0 * 100.0 / 30.0));

    let compute = d.child(&name("main")).unwrap().child(&name("compute")).unwrap();
    assert_eq!(compute.total_delta(), 0);
    assert_eq!(compute.self_delta(), -8);
}

#[test]
fn test_collapsed_stacks_use_context_names() {
    let output = run(50);
    let graph = output.aggregate(None).unwrap();
    let lines = callgraph::collapsed_stacks(&graph, Some(&output.registry));

    assert!(lines.contains(&"main;main 30".to_string()));
    assert!(lines.contains(&"main;main;compute;kernel 30".to_string()));
    assert!(lines.contains(&"worker;compute 20".to_string()));
    let total: u64 = lines
        .iter()
        .filter(|l| l.starts_with("main;"))
        .filter_map(|l| l.rsplit(' ').next()?.parse::<u64>().ok())
        .sum();
    assert_eq!(total, 100);
}

#[test]
fn test_merged_graph_combines_contexts() {
    let output = run(50);
    let graph = output.aggregate(None).unwrap();
    let all = graph.merged();

    assert_eq!(all.total_time, 200);
    assert_eq!(all.child(&name("compute")).unwrap().count, 1);
    assert_eq!(all.child(&name("main")).unwrap().count, 1);
    assert!(all.is_consistent());
}

#[test]
fn test_json_output_lists_children() {
    let output = run(50);
    let graph = output.aggregate(None).unwrap();
    let json: serde_json::Value = serde_json::from_str(&graph.to_json().unwrap()).unwrap();

    assert_eq!(json["window"]["end"], 100);
    let main_root = &json["roots"]["1"];
    assert_eq!(main_root["children"][0]["symbol"]["name"], "main");
    assert!(main_root["children"][0]["children"].is_array());
}

#[test]
fn test_cancellation_discards_the_result() {
    let output = run(50);
    let token = CancellationToken::new();
    let aggregator = output.aggregator().with_cancellation(token.clone());
    assert!(aggregator.aggregate([MAIN], output.trace_window()).is_ok());

    token.cancel();
    let result = aggregator.aggregate([MAIN, WORKER], output.trace_window());
    assert_eq!(result.unwrap_err(), AggregationError::Cancelled);
}
