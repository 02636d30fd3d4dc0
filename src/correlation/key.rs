// Correlation keys
//
// Keys are built from identities only (communicator, ranks, tag, operation,
// dispatch id), never from timestamps: halves from different contexts arrive
// in arbitrary relative order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite identifier pairing the halves of a point-to-point operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrelationKey {
    /// Message send/receive within a communication domain
    Message {
        /// Communicator / domain id
        communicator: u32,
        /// Sender rank within the communicator
        source_rank: u32,
        /// Receiver rank within the communicator
        destination_rank: u32,
        /// Message tag
        tag: u32,
    },
    /// Kernel launch / execution pair with an explicit dispatch id
    Dispatch {
        /// Dispatch (correlation) id
        id: u64,
    },
    /// Host-defined correlation id (flow events, request ids, ...)
    Flow {
        /// Opaque id shared by both halves
        id: u64,
    },
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Message {
                communicator,
                source_rank,
                destination_rank,
                tag,
            } => write!(
                f,
                "msg(comm={}, {}->{}, tag={})",
                communicator, source_rank, destination_rank, tag
            ),
            CorrelationKey::Dispatch { id } => write!(f, "dispatch({})", id),
            CorrelationKey::Flow { id } => write!(f, "flow({})", id),
        }
    }
}

/// Collective operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum CollectiveOp {
    Broadcast,
    Scatter,
    Scatterv,
    Gather,
    Gatherv,
    Reduce,
    Barrier,
    Allreduce,
    Allgather,
    Alltoall,
}

/// How data flows in a rooted collective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveShape {
    /// Root sends to every member (broadcast, scatter)
    OneToMany,
    /// Every member sends to the root (gather, reduce)
    ManyToOne,
}

impl CollectiveOp {
    /// Data-flow shape, or `None` for unrooted collectives that produce no edges
    pub fn shape(self) -> Option<CollectiveShape> {
        match self {
            CollectiveOp::Broadcast | CollectiveOp::Scatter | CollectiveOp::Scatterv => {
                Some(CollectiveShape::OneToMany)
            }
            CollectiveOp::Gather | CollectiveOp::Gatherv | CollectiveOp::Reduce => {
                Some(CollectiveShape::ManyToOne)
            }
            CollectiveOp::Barrier
            | CollectiveOp::Allreduce
            | CollectiveOp::Allgather
            | CollectiveOp::Alltoall => None,
        }
    }
}

/// Identity of a rooted collective operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
pub struct CollectiveKey {
    /// Communicator the operation runs on
    pub communicator: u32,
    /// Root rank within the communicator
    pub root_rank: u32,
    /// Operation kind
    pub operation: CollectiveOp,
}

impl fmt::Display for CollectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}(comm={}, root={})",
            self.operation, self.communicator, self.root_rank
        )
    }
}
