// Aggregated call-graph nodes

use super::statistics::CallStatistics;
use super::{AggregationError, Result};
use crate::symbol::Symbol;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// One node of a folded call graph
///
/// Children are keyed by symbol, so repeated calls along the same path from
/// the root accumulate into one node. Invariant after aggregation:
/// `self_time + Σ children.total_time == total_time`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedCallSite {
    pub symbol: Symbol,
    /// Covered time, clipped to the aggregation window
    pub total_time: u64,
    /// `total_time` minus the children's `total_time`
    pub self_time: u64,
    /// Number of invocations overlapping the window
    pub count: u64,
    pub statistics: CallStatistics,
    /// Time per status value (e.g. GPU `Busy`/`Idle`) overlapping this node
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aux_series: BTreeMap<String, u64>,
    #[serde(serialize_with = "children_as_list")]
    pub children: BTreeMap<Symbol, AggregatedCallSite>,
}

fn children_as_list<S: Serializer>(
    children: &BTreeMap<Symbol, AggregatedCallSite>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(children.values())
}

impl AggregatedCallSite {
    /// Empty node for `symbol`
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            total_time: 0,
            self_time: 0,
            count: 0,
            statistics: CallStatistics::default(),
            aux_series: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    /// Single invocation covering `duration`, before children are attached
    pub(crate) fn invocation(symbol: Symbol, duration: u64) -> Self {
        let mut site = Self::new(symbol);
        site.total_time = duration;
        site.count = 1;
        site
    }

    pub fn child(&self, symbol: &Symbol) -> Option<&AggregatedCallSite> {
        self.children.get(symbol)
    }

    /// Follow a path of symbols down from this node
    pub fn find(&self, path: &[Symbol]) -> Option<&AggregatedCallSite> {
        path.iter().try_fold(self, |node, symbol| node.children.get(symbol))
    }

    /// Sum of the direct children's total time
    pub fn children_time(&self) -> u64 {
        self.children.values().map(|child| child.total_time).sum()
    }

    /// Height of the subtree (1 for a leaf)
    pub fn max_depth(&self) -> usize {
        1 + self
            .children
            .values()
            .map(AggregatedCallSite::max_depth)
            .max()
            .unwrap_or(0)
    }

    /// Number of nodes in the subtree, this one included
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .values()
            .map(AggregatedCallSite::node_count)
            .sum::<usize>()
    }

    /// True if self-time conservation holds for every node of the subtree
    pub fn is_consistent(&self) -> bool {
        self.self_time + self.children_time() == self.total_time
            && self.children.values().all(AggregatedCallSite::is_consistent)
    }

    /// Fold `other` into this node; both must carry the same symbol
    pub fn merge(&mut self, other: &AggregatedCallSite) -> Result<()> {
        if self.symbol != other.symbol {
            return Err(AggregationError::SymbolMismatch {
                left: self.symbol.clone(),
                right: other.symbol.clone(),
            });
        }
        self.merge_unchecked(other);
        Ok(())
    }

    /// Add `child` under this node, merging with an existing sibling of the same symbol
    pub(crate) fn add_child(&mut self, child: AggregatedCallSite) {
        match self.children.get_mut(&child.symbol) {
            Some(existing) => existing.merge_unchecked(&child),
            None => {
                self.children.insert(child.symbol.clone(), child);
            }
        }
    }

    fn merge_unchecked(&mut self, other: &AggregatedCallSite) {
        self.total_time += other.total_time;
        self.self_time += other.self_time;
        self.count += other.count;
        self.statistics.merge(&other.statistics);
        for (status, time) in &other.aux_series {
            *self.aux_series.entry(status.clone()).or_insert(0) += time;
        }
        for child in other.children.values() {
            match self.children.get_mut(&child.symbol) {
                Some(existing) => existing.merge_unchecked(child),
                None => {
                    self.children.insert(child.symbol.clone(), child.clone());
                }
            }
        }
    }
}
