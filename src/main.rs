use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracefold::callgraph::{self, CallGraph};
use tracefold::cli::{Cli, OutputFormat};
use tracefold::config::EngineConfig;
use tracefold::diagnostics::DiagnosticKind;
use tracefold::dwarf::DwarfSymbolResolver;
use tracefold::edge_linker::Edge;
use tracefold::engine::{AnalysisEngine, AnalysisOutput, AnalysisSummary};
use tracefold::event::JsonLinesSource;
use tracefold::symbol::{NoopResolver, SymbolResolver};
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a AnalysisSummary,
    call_graph: &'a CallGraph,
    fingerprint: String,
    edges: &'a [Edge],
    diagnostics: &'a BTreeMap<DiagnosticKind, u64>,
}

/// Resolve raw addresses through DWARF into a thread-safe table
///
/// Without `--binary` nothing is resolved and addresses print raw.
fn load_symbols(args: &Cli, output: &AnalysisOutput) -> Result<Box<dyn SymbolResolver + Sync>> {
    let Some(binary) = &args.binary else {
        return Ok(Box::new(NoopResolver));
    };
    let dwarf = DwarfSymbolResolver::open(binary)?;
    let addresses = output.addresses().context("Failed to scan call stacks for addresses")?;
    Ok(Box::new(dwarf.resolve_all(addresses)))
}

fn print_text(graph: &CallGraph, output: &AnalysisOutput) {
    print!("{}", callgraph::render_tree(graph, Some(&output.registry)));
    let s = &output.summary;
    println!();
    println!(
        "{} events, {} intervals, {} edges on {} lanes",
        s.events, s.intervals_closed, s.edges, s.lanes
    );
    println!(
        "{} unmatched halves, {} evictions, {} discarded pending, {} diagnostics",
        s.unmatched_halves, s.evictions, s.discarded_pending, s.diagnostics
    );
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };

    let mut engine = AnalysisEngine::new(config)?;
    for (communicator, members) in &args.communicators {
        engine.register_communicator(*communicator, members.clone());
    }
    for (context, name, kind) in &args.context_names {
        engine.register_context(*context, name.clone(), *kind);
    }

    let source = JsonLinesSource::new(&args.input);
    engine
        .process_all(&source)
        .with_context(|| format!("Failed to analyze {}", args.input.display()))?;
    let output = engine.finish();

    let symbols = load_symbols(&args, &output)?;
    let aggregator = output.aggregator().with_resolver(symbols.as_ref());
    let window = args.window.unwrap_or_else(|| output.trace_window());
    let contexts = aggregator.contexts()?;
    let graph = aggregator.aggregate_parallel(contexts, window, args.workers)?;

    match args.format {
        OutputFormat::Text => print_text(&graph, &output),
        OutputFormat::Json => {
            let report = JsonReport {
                summary: &output.summary,
                call_graph: &graph,
                fingerprint: graph.fingerprint()?,
                edges: &output.edges,
                diagnostics: output.diagnostics.counts(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Collapsed => {
            for line in callgraph::collapsed_stacks(&graph, Some(&output.registry)) {
                println!("{}", line);
            }
        }
    }

    if args.diagnostics {
        for diagnostic in output.diagnostics.entries() {
            eprintln!("{}", diagnostic);
        }
        if output.diagnostics.dropped() > 0 {
            eprintln!("({} more diagnostics not stored)", output.diagnostics.dropped());
        }
    }

    Ok(())
}
