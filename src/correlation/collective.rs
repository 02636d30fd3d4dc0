// Rooted collectives: one-to-many (broadcast, scatter) and many-to-one
// (gather, reduce)
//
// Both shapes share one state machine. An operation has one root half and one
// member half per communicator member (the root included):
//
//   one-to-many   root half = root's begin    member half = each member's end
//   many-to-one   root half = root's end      member half = each member's begin
//
// Whichever half arrives first creates the operation. Member halves seen
// before the root half are buffered and flushed when it arrives; later member
// halves pair immediately. The operation is removed once the root half is
// known and no member is awaited any more.

use super::key::{CollectiveKey, CollectiveShape};
use super::pending::{PendingId, PendingRegistry};
use super::{Half, MatchedPair};
use crate::context::ExecutionContext;
use fnv::FnvHashMap;
use std::collections::BTreeSet;
use thiserror::Error;

/// Collective halves that cannot be placed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectiveError {
    #[error("Communicator {communicator} is unknown or has no rank {rank}")]
    UnknownRoot { communicator: u32, rank: u32 },

    #[error("{context} is not a member of communicator {communicator}")]
    NotAMember {
        communicator: u32,
        context: ExecutionContext,
    },
}

/// Result type for collective matching
pub type Result<T> = std::result::Result<T, CollectiveError>;

/// Communicator → member contexts; a member's rank is its position
#[derive(Debug, Clone, Default)]
pub struct CommunicatorTable {
    members: FnvHashMap<u32, Vec<ExecutionContext>>,
}

impl CommunicatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) the members of a communicator, in rank order
    pub fn register(&mut self, communicator: u32, members: Vec<ExecutionContext>) {
        self.members.insert(communicator, members);
    }

    pub fn members(&self, communicator: u32) -> Option<&[ExecutionContext]> {
        self.members.get(&communicator).map(Vec::as_slice)
    }

    /// Context holding `rank` in `communicator`
    pub fn context_of(&self, communicator: u32, rank: u32) -> Option<ExecutionContext> {
        self.members
            .get(&communicator)?
            .get(usize::try_from(rank).ok()?)
            .copied()
    }

    /// Rank of `context` in `communicator`
    pub fn rank_of(&self, communicator: u32, context: ExecutionContext) -> Option<u32> {
        let position = self
            .members
            .get(&communicator)?
            .iter()
            .position(|member| *member == context)?;
        u32::try_from(position).ok()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A live rooted collective
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectiveOperation {
    pub key: CollectiveKey,
    /// Timestamp of the first half seen
    pub created: u64,
    pub root: ExecutionContext,
    pub root_half: Option<Half>,
    /// Members whose half has not arrived yet
    pub awaited: BTreeSet<ExecutionContext>,
    /// Member halves that arrived before the root half
    pub buffered: Vec<Half>,
}

impl CollectiveOperation {
    fn is_complete(&self) -> bool {
        self.root_half.is_some() && self.awaited.is_empty()
    }
}

/// What one collective half produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectiveArrival {
    pub pairs: Vec<MatchedPair>,
    /// Operation evicted to make room for a new one
    pub evicted: Option<CollectiveOperation>,
    /// True if this half completed (and removed) its operation
    pub completed: bool,
}

/// Matcher for rooted collectives
#[derive(Debug, Clone)]
pub struct CollectiveMatcher {
    communicators: CommunicatorTable,
    pending: PendingRegistry<CollectiveKey, CollectiveOperation>,
}

impl CollectiveMatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            communicators: CommunicatorTable::new(),
            pending: PendingRegistry::new(capacity),
        }
    }

    pub fn communicators(&self) -> &CommunicatorTable {
        &self.communicators
    }

    pub fn register_communicator(&mut self, communicator: u32, members: Vec<ExecutionContext>) {
        self.communicators.register(communicator, members);
    }

    /// A member enters the collective
    pub fn begin(&mut self, key: CollectiveKey, context: ExecutionContext, timestamp: u64) -> Result<CollectiveArrival> {
        let Some(shape) = key.operation.shape() else {
            return Ok(CollectiveArrival::default());
        };
        let root = self.root_of(&key)?;
        let half = Half { context, timestamp };
        match shape {
            CollectiveShape::OneToMany if context == root => Ok(self.root_arrives(key, shape, root, half)),
            CollectiveShape::OneToMany => Ok(CollectiveArrival::default()),
            CollectiveShape::ManyToOne => self.member_arrives(key, shape, root, half),
        }
    }

    /// A member leaves the collective
    pub fn end(&mut self, key: CollectiveKey, context: ExecutionContext, timestamp: u64) -> Result<CollectiveArrival> {
        let Some(shape) = key.operation.shape() else {
            return Ok(CollectiveArrival::default());
        };
        let root = self.root_of(&key)?;
        let half = Half { context, timestamp };
        match shape {
            CollectiveShape::OneToMany => self.member_arrives(key, shape, root, half),
            CollectiveShape::ManyToOne if context == root => Ok(self.root_arrives(key, shape, root, half)),
            CollectiveShape::ManyToOne => Ok(CollectiveArrival::default()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Live operations, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &CollectiveOperation> {
        self.pending.iter().map(|(_, op)| op)
    }

    /// Remove every unfinished operation, oldest first
    pub fn drain(&mut self) -> Vec<CollectiveOperation> {
        self.pending.drain().into_iter().map(|(_, op)| op).collect()
    }

    fn root_of(&self, key: &CollectiveKey) -> Result<ExecutionContext> {
        self.communicators
            .context_of(key.communicator, key.root_rank)
            .ok_or(CollectiveError::UnknownRoot {
                communicator: key.communicator,
                rank: key.root_rank,
            })
    }

    fn root_arrives(
        &mut self,
        key: CollectiveKey,
        shape: CollectiveShape,
        root: ExecutionContext,
        half: Half,
    ) -> CollectiveArrival {
        let mut arrival = CollectiveArrival::default();
        let id = match self.pending.find(&key, |op| op.root_half.is_none()) {
            Some(id) => id,
            None => {
                let (id, evicted) = self.create(key, root, half.timestamp);
                arrival.evicted = evicted;
                id
            }
        };

        if let Some(op) = self.pending.get_mut(id) {
            op.root_half = Some(half);
            for member in std::mem::take(&mut op.buffered) {
                arrival.pairs.push(orient(shape, half, member));
            }
        }
        arrival.completed = self.remove_if_complete(id);
        arrival
    }

    fn member_arrives(
        &mut self,
        key: CollectiveKey,
        shape: CollectiveShape,
        root: ExecutionContext,
        half: Half,
    ) -> Result<CollectiveArrival> {
        if self.communicators.rank_of(key.communicator, half.context).is_none() {
            return Err(CollectiveError::NotAMember {
                communicator: key.communicator,
                context: half.context,
            });
        }

        let mut arrival = CollectiveArrival::default();
        let id = match self.pending.find(&key, |op| op.awaited.contains(&half.context)) {
            Some(id) => id,
            None => {
                let (id, evicted) = self.create(key, root, half.timestamp);
                arrival.evicted = evicted;
                id
            }
        };

        if let Some(op) = self.pending.get_mut(id) {
            op.awaited.remove(&half.context);
            match op.root_half {
                Some(root_half) => arrival.pairs.push(orient(shape, root_half, half)),
                None => op.buffered.push(half),
            }
        }
        arrival.completed = self.remove_if_complete(id);
        Ok(arrival)
    }

    fn create(
        &mut self,
        key: CollectiveKey,
        root: ExecutionContext,
        timestamp: u64,
    ) -> (PendingId, Option<CollectiveOperation>) {
        let awaited = self
            .communicators
            .members(key.communicator)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        let operation = CollectiveOperation {
            key,
            created: timestamp,
            root,
            root_half: None,
            awaited,
            buffered: Vec::new(),
        };
        let (id, evicted) = self.pending.insert(key, operation);
        (id, evicted.map(|(_, op)| op))
    }

    fn remove_if_complete(&mut self, id: PendingId) -> bool {
        let complete = self.pending.get(id).is_some_and(CollectiveOperation::is_complete);
        if complete {
            self.pending.remove(id);
        }
        complete
    }
}

fn orient(shape: CollectiveShape, root: Half, member: Half) -> MatchedPair {
    match shape {
        CollectiveShape::OneToMany => MatchedPair {
            source: root,
            destination: member,
        },
        CollectiveShape::ManyToOne => MatchedPair {
            source: member,
            destination: root,
        },
    }
}
