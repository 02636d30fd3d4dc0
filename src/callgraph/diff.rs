// Differential call graphs
//
// Compares two trees node by node (matched by symbol along the same path).
// A node present on one side only is compared against zero.

use super::call_site::AggregatedCallSite;
use crate::symbol::Symbol;
use serde::Serialize;
use std::collections::BTreeSet;

/// Per-node comparison of a base and another call graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferentialCallSite {
    pub symbol: Symbol,
    pub base_total: u64,
    pub other_total: u64,
    pub base_self: u64,
    pub other_self: u64,
    pub base_count: u64,
    pub other_count: u64,
    pub children: Vec<DifferentialCallSite>,
}

impl DifferentialCallSite {
    /// `other_total - base_total`
    pub fn total_delta(&self) -> i128 {
        i128::from(self.other_total) - i128::from(self.base_total)
    }

    /// `other_self - base_self`
    pub fn self_delta(&self) -> i128 {
        i128::from(self.other_self) - i128::from(self.base_self)
    }

    /// Relative change of total time in percent, `None` when the base is zero
    pub fn total_change_percent(&self) -> Option<f64> {
        if self.base_total == 0 {
            return None;
        }
        Some(self.total_delta() as f64 * 100.0 / self.base_total as f64)
    }

    /// Only in the other graph
    pub fn is_added(&self) -> bool {
        self.base_count == 0 && self.other_count > 0
    }

    /// Only in the base graph
    pub fn is_removed(&self) -> bool {
        self.other_count == 0 && self.base_count > 0
    }

    pub fn child(&self, symbol: &Symbol) -> Option<&DifferentialCallSite> {
        self.children.iter().find(|child| &child.symbol == symbol)
    }
}

/// Compare `other` against `base`
///
/// The result carries `base`'s symbol; children are the union of both sides,
/// ordered by symbol.
pub fn diff(base: &AggregatedCallSite, other: &AggregatedCallSite) -> DifferentialCallSite {
    compare(&base.symbol, Some(base), Some(other))
}

fn compare(
    symbol: &Symbol,
    base: Option<&AggregatedCallSite>,
    other: Option<&AggregatedCallSite>,
) -> DifferentialCallSite {
    let symbols: BTreeSet<&Symbol> = base
        .into_iter()
        .chain(other)
        .flat_map(|site| site.children.keys())
        .collect();

    let children = symbols
        .into_iter()
        .map(|child| {
            compare(
                child,
                base.and_then(|b| b.children.get(child)),
                other.and_then(|o| o.children.get(child)),
            )
        })
        .collect();

    DifferentialCallSite {
        symbol: symbol.clone(),
        base_total: base.map_or(0, |b| b.total_time),
        other_total: other.map_or(0, |o| o.total_time),
        base_self: base.map_or(0, |b| b.self_time),
        other_self: other.map_or(0, |o| o.self_time),
        base_count: base.map_or(0, |b| b.count),
        other_count: other.map_or(0, |o| o.count),
        children,
    }
}
