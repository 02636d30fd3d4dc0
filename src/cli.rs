//! CLI argument parsing for Tracefold

use crate::callgraph::TimeWindow;
use crate::context::{ContextKind, ExecutionContext};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the analysis result
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented call tree plus summary (default)
    Text,
    /// JSON document with summary, call graph, edges and diagnostics
    Json,
    /// Collapsed stacks for flamegraph tools
    Collapsed,
}

#[derive(Parser, Debug)]
#[command(name = "tracefold")]
#[command(version)]
#[command(about = "Call stacks, causality edges and call graphs from enter/leave trace streams", long_about = None)]
pub struct Cli {
    /// JSON-lines event file
    #[arg(value_name = "EVENTS")]
    pub input: PathBuf,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Aggregation window START:END in nanoseconds (default: whole trace)
    #[arg(short = 'w', long = "window", value_name = "START:END", value_parser = parse_window)]
    pub window: Option<TimeWindow>,

    /// Engine configuration (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Communicator members in rank order, e.g. 0=1,2,3 (repeatable)
    #[arg(long = "communicator", value_name = "ID=CTX,...", value_parser = parse_communicator)]
    pub communicators: Vec<(u32, Vec<ExecutionContext>)>,

    /// Display name of a context, e.g. 3=worker-3 or 7=GPU0/q1:gpu_queue (repeatable)
    #[arg(long = "context-name", value_name = "CTX=NAME[:KIND]", value_parser = parse_context_name)]
    pub context_names: Vec<(ExecutionContext, String, ContextKind)>,

    /// Resolve address symbols through this binary's DWARF debug info
    #[arg(long = "binary", value_name = "PATH")]
    pub binary: Option<PathBuf>,

    /// Worker threads for call-graph aggregation
    #[arg(short = 'j', long = "workers", default_value = "1")]
    pub workers: usize,

    /// Print every stored diagnostic to stderr
    #[arg(long = "diagnostics")]
    pub diagnostics: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

fn parse_window(s: &str) -> Result<TimeWindow, String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got '{}'", s))?;
    let start: u64 = start
        .trim()
        .parse()
        .map_err(|e| format!("invalid window start '{}': {}", start, e))?;
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|e| format!("invalid window end '{}': {}", end, e))?;
    TimeWindow::new(start, end).map_err(|e| e.to_string())
}

fn parse_communicator(s: &str) -> Result<(u32, Vec<ExecutionContext>), String> {
    let (id, members) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=CTX,..., got '{}'", s))?;
    let id: u32 = id
        .trim()
        .parse()
        .map_err(|e| format!("invalid communicator id '{}': {}", id, e))?;
    let members = members
        .split(',')
        .filter(|m| !m.trim().is_empty())
        .map(|m| {
            m.trim()
                .parse::<u64>()
                .map(ExecutionContext)
                .map_err(|e| format!("invalid context '{}': {}", m, e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if members.is_empty() {
        return Err(format!("communicator {} has no members", id));
    }
    Ok((id, members))
}

fn parse_context_kind(s: &str) -> Option<ContextKind> {
    match s {
        "thread" => Some(ContextKind::Thread),
        "gpu_queue" => Some(ContextKind::GpuQueue),
        "gpu_stream" => Some(ContextKind::GpuStream),
        "api_lane" => Some(ContextKind::ApiLane),
        "rank" => Some(ContextKind::Rank),
        "other" => Some(ContextKind::Other),
        _ => None,
    }
}

/// `CTX=NAME` or `CTX=NAME:KIND`; a suffix that is not a known kind stays in the name
fn parse_context_name(s: &str) -> Result<(ExecutionContext, String, ContextKind), String> {
    let (context, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CTX=NAME[:KIND], got '{}'", s))?;
    let context: u64 = context
        .trim()
        .parse()
        .map_err(|e| format!("invalid context '{}': {}", context, e))?;
    let (name, kind) = match rest.rsplit_once(':') {
        Some((name, kind)) => match parse_context_kind(kind.trim()) {
            Some(kind) => (name, kind),
            None => (rest, ContextKind::default()),
        },
        None => (rest, ContextKind::default()),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("context {} has an empty name", context));
    }
    Ok((ExecutionContext(context), name.to_string(), kind))
}
