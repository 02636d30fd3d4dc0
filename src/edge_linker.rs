//! Causality edges and lane assignment
//!
//! Every matched pair becomes one directed [`Edge`] from the source context
//! to the destination context. Edges are placed on lanes so that no two
//! edges on one lane overlap in time:
//!
//! ```text
//! lane 0:  [==e0==]   [=e2=]      [====e4====]
//! lane 1:     [=====e1=====]  [e3]
//!          ─────────────────────────────────────▶ t
//! ```
//!
//! A new edge goes to the first lane whose last edge ends at or before the
//! new edge's start; if there is none, a lane is opened. Only the end time of
//! each lane's last edge is kept, so the search is linear in the number of
//! lanes, never in the number of edges placed.

use crate::context::ExecutionContext;
use crate::correlation::MatchedPair;
use crate::state_store::{self, AttributePath, StateStore, StateValue};
use serde::Serialize;

/// Directed, time-bounded causal link between two contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub id: u64,
    pub start: u64,
    pub end: u64,
    pub source: ExecutionContext,
    pub destination: ExecutionContext,
    pub lane: usize,
}

impl Edge {
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }

    /// Source and destination are the same context
    pub fn is_self(&self) -> bool {
        self.source == self.destination
    }
}

/// Assigns matched pairs to non-overlapping lanes
#[derive(Debug, Clone, Default)]
pub struct EdgeLinker {
    /// End time of the last edge on each lane
    lane_ends: Vec<u64>,
    edges: Vec<Edge>,
    next_id: u64,
}

impl EdgeLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn a matched pair into an edge on the first free lane
    pub fn link(&mut self, pair: MatchedPair) -> Edge {
        let start = pair.start();
        let end = pair.end();

        let lane = match self.lane_ends.iter().position(|last_end| *last_end <= start) {
            Some(lane) => {
                self.lane_ends[lane] = end;
                lane
            }
            None => {
                self.lane_ends.push(end);
                self.lane_ends.len() - 1
            }
        };

        let edge = Edge {
            id: self.next_id,
            start,
            end,
            source: pair.source.context,
            destination: pair.destination.context,
            lane,
        };
        self.next_id += 1;
        self.edges.push(edge);
        tracing::trace!(
            "edge {} {} -> {} [{}, {}] lane {}",
            edge.id,
            edge.source,
            edge.destination,
            edge.start,
            edge.end,
            edge.lane
        );
        edge
    }

    /// Link a pair and record the edge on its lane attribute (`Edges/<lane>`)
    pub fn link_into<S: StateStore + ?Sized>(&mut self, store: &mut S, pair: MatchedPair) -> state_store::Result<Edge> {
        let edge = self.link(pair);
        let path = AttributePath::edge_lane(edge.lane);
        store.modify_attribute(
            &path,
            edge.start,
            Some(StateValue::Edge {
                id: edge.id,
                source: edge.source,
                destination: edge.destination,
            }),
        )?;
        store.modify_attribute(&path, edge.end, None)?;
        Ok(edge)
    }

    /// Edges in creation order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn into_edges(self) -> Vec<Edge> {
        self.edges
    }

    pub fn lane_count(&self) -> usize {
        self.lane_ends.len()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
