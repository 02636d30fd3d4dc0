#![no_main]

use libfuzzer_sys::fuzz_target;
use tracefold::context::ExecutionContext;
use tracefold::engine::AnalysisEngine;
use tracefold::event::TraceEvent;

fuzz_target!(|events: Vec<TraceEvent>| {
    // Arbitrary order, keys and timestamps: none of this may panic
    let mut engine = AnalysisEngine::default();
    engine.register_communicator(0, (0..4).map(ExecutionContext).collect());
    for event in events {
        engine.process(event);
    }
    let output = engine.finish();
    if let Ok(graph) = output.aggregate(None) {
        for root in graph.roots.values() {
            assert!(root.is_consistent());
        }
    }
});
