// Call-graph export: collapsed stacks, text tree, fingerprint

use super::call_site::AggregatedCallSite;
use super::CallGraph;
use crate::context::ContextRegistry;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Collapsed-stack lines (`frame;frame;frame self_ns`) for flamegraph tools
///
/// The first frame is the context name (from `registry` when given). Nodes
/// with no self time produce no line. Output order is deterministic.
pub fn collapsed_stacks(graph: &CallGraph, registry: Option<&ContextRegistry>) -> Vec<String> {
    let mut lines = Vec::new();
    for (context, root) in &graph.roots {
        let name = match registry {
            Some(registry) => registry.display_name(*context),
            None => context.to_string(),
        };
        let mut path = vec![name];
        if root.self_time > 0 && root.children.is_empty() {
            lines.push(format!("{} {}", path[0], root.self_time));
        }
        for child in root.children.values() {
            collapse(child, &mut path, &mut lines);
        }
    }
    lines
}

fn collapse(site: &AggregatedCallSite, path: &mut Vec<String>, lines: &mut Vec<String>) {
    path.push(site.symbol.to_string());
    if site.self_time > 0 {
        lines.push(format!("{} {}", path.join(";"), site.self_time));
    }
    for child in site.children.values() {
        collapse(child, path, lines);
    }
    path.pop();
}

/// Indented text rendering of every context's tree
pub fn render_tree(graph: &CallGraph, registry: Option<&ContextRegistry>) -> String {
    let mut out = String::new();
    for (context, root) in &graph.roots {
        let name = match registry {
            Some(registry) => registry.display_name(*context),
            None => context.to_string(),
        };
        let _ = writeln!(
            out,
            "{} [{}..{}] total={} self={}",
            name, graph.window.start, graph.window.end, root.total_time, root.self_time
        );
        for child in root.children.values() {
            render_site(child, 1, &mut out);
        }
    }
    for failure in &graph.failures {
        let _ = writeln!(out, "! {}", failure);
    }
    out
}

fn render_site(site: &AggregatedCallSite, indent: usize, out: &mut String) {
    let _ = write!(
        out,
        "{:width$}{} total={} self={} count={}",
        "",
        site.symbol,
        site.total_time,
        site.self_time,
        site.count,
        width = indent * 2
    );
    if site.count > 1 {
        let _ = write!(
            out,
            " mean={:.1} std={:.1}",
            site.statistics.duration.mean(),
            site.statistics.duration.std_dev()
        );
    }
    for (status, time) in &site.aux_series {
        let _ = write!(out, " {}={}", status, time);
    }
    out.push('\n');
    for child in site.children.values() {
        render_site(child, indent + 1, out);
    }
}

pub(super) fn fingerprint(graph: &CallGraph) -> serde_json::Result<String> {
    let json = serde_json::to_vec(graph)?;
    Ok(hex::encode(Sha256::digest(&json)))
}
