//! Hierarchical key → value-over-time store
//!
//! The engine records everything it derives (call-stack pushes/pops, status
//! values, edges) as values of attributes over time, and the call-graph
//! aggregator reads closed intervals back from the same store. Only the small
//! [`StateStore`] surface is required; [`MemoryStateStore`] is the in-process
//! implementation used by the engine and tests.
//!
//! # Layout
//!
//! ```text
//! Contexts/
//!   <ctx>/
//!     CallStack        Int(depth)        push/pop counter
//!       1              Symbol("main")    depth-1 intervals
//!       2              Symbol("work")    depth-2 intervals
//!     Status           Str("Busy")       auxiliary series
//! Edges/
//!   0                  Edge{..}          lane 0
//!   1                  Edge{..}          lane 1
//! ```
//!
//! # Time
//!
//! Intervals are half-open `[start, end)`, except zero-length intervals which
//! cover exactly their one timestamp. Writes to one attribute must be
//! monotonic: once `t` is accepted, an earlier timestamp is rejected with
//! [`StoreError::TimeOutOfOrder`].
//!
//! Every write also takes the next value of a store-wide sequence. Intervals
//! carry the sequence of the writes that began and ended them, which orders
//! writes that share a timestamp across attributes (a zero-length call popped
//! just before its caller, versus one pushed just after a sibling started).

use crate::context::ExecutionContext;
use crate::symbol::Symbol;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from state store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Write to {path} at {timestamp} is earlier than last write at {last}")]
    TimeOutOfOrder {
        path: AttributePath,
        timestamp: u64,
        last: u64,
    },

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(AttributePath),

    #[error("Pop on empty stack attribute: {0}")]
    EmptyStack(AttributePath),
}

/// Result type for state store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Slash-separated attribute path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct AttributePath(Vec<String>);

impl AttributePath {
    /// Path from segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty (root) path
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Child path with one more segment
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last segment
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// `Contexts/<ctx>`
    pub fn context(context: ExecutionContext) -> Self {
        Self::new(["Contexts".to_string(), context.id().to_string()])
    }

    /// `Contexts/<ctx>/CallStack`
    pub fn call_stack(context: ExecutionContext) -> Self {
        Self::context(context).child("CallStack")
    }

    /// `Contexts/<ctx>/Status`
    pub fn status(context: ExecutionContext) -> Self {
        Self::context(context).child("Status")
    }

    /// `Edges`
    pub fn edges() -> Self {
        Self::new(["Edges"])
    }

    /// `Edges/<lane>`
    pub fn edge_lane(lane: usize) -> Self {
        Self::edges().child(lane.to_string())
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Index of an attribute in the store's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeHandle(pub usize);

/// Value carried by an attribute over an interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateValue {
    Int(i64),
    Str(String),
    Symbol(Symbol),
    Edge {
        id: u64,
        source: ExecutionContext,
        destination: ExecutionContext,
    },
}

impl StateValue {
    /// Symbol payload, if this is a symbol value
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            StateValue::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// String payload, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Str(value) => Some(value),
            _ => None,
        }
    }
}

/// A value held by one attribute between two times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInterval {
    pub start: u64,
    /// `None` while the value is still ongoing
    pub end: Option<u64>,
    pub value: StateValue,
    /// Store sequence of the write that began the value
    #[serde(default)]
    pub start_seq: u64,
    /// Store sequence of the write that ended it, `None` while ongoing
    #[serde(default)]
    pub end_seq: Option<u64>,
}

impl StateInterval {
    /// True if `timestamp` falls inside the interval
    pub fn contains(&self, timestamp: u64) -> bool {
        if timestamp < self.start {
            return false;
        }
        match self.end {
            None => true,
            Some(end) if end == self.start => timestamp == end,
            Some(end) => timestamp < end,
        }
    }

    /// True if this value was written while `outer` held
    ///
    /// For stack slots this is the nesting relation: a frame began inside
    /// its caller exactly when it was pushed after the caller's push and
    /// before the caller's pop.
    pub fn began_within(&self, outer: &StateInterval) -> bool {
        outer.start_seq < self.start_seq && outer.end_seq.map_or(true, |end| self.start_seq < end)
    }

    /// True if the interval shares any time with `[start, end]`
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        let iv_end = self.end.unwrap_or(u64::MAX);
        if iv_end == self.start {
            return self.start >= start && self.start <= end;
        }
        self.start <= end && iv_end > start
    }
}

/// Minimal store surface the engine needs
pub trait StateStore {
    /// Push `value` on the stack attribute at `path`, returning the slot written
    fn push_attribute(&mut self, path: &AttributePath, timestamp: u64, value: StateValue) -> Result<AttributeHandle>;

    /// Pop the top of the stack attribute at `path`, returning the popped value
    fn pop_attribute(&mut self, path: &AttributePath, timestamp: u64) -> Result<Option<StateValue>>;

    /// Replace the value of `path` from `timestamp` on; `None` clears it
    fn modify_attribute(&mut self, path: &AttributePath, timestamp: u64, value: Option<StateValue>) -> Result<()>;

    /// Interval holding at `timestamp`, `None` when the attribute is null then
    fn query_interval_at(&self, path: &AttributePath, timestamp: u64) -> Result<Option<StateInterval>>;

    /// Child paths, optionally including all descendants
    fn query_sub_attributes(&self, path: &AttributePath, recursive: bool) -> Result<Vec<AttributePath>>;

    /// All intervals of `path` overlapping `[start, end]`, in time order
    fn query_range(&self, path: &AttributePath, start: u64, end: u64) -> Result<Vec<StateInterval>>;

    /// True if the attribute exists
    fn contains(&self, path: &AttributePath) -> bool;
}

#[derive(Debug, Clone)]
struct AttributeNode {
    path: AttributePath,
    children: Vec<AttributeHandle>,
    history: Vec<StateInterval>,
    /// (start, start sequence, value)
    ongoing: Option<(u64, u64, StateValue)>,
    last_write: Option<u64>,
}

impl AttributeNode {
    fn new(path: AttributePath) -> Self {
        Self {
            path,
            children: Vec::new(),
            history: Vec::new(),
            ongoing: None,
            last_write: None,
        }
    }
}

/// Arena-backed in-memory store
///
/// Attributes live in a `Vec` addressed by [`AttributeHandle`]; the path
/// index maps each path to its slot. Parent/child structure is kept as
/// handle lists, never as references.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    nodes: Vec<AttributeNode>,
    index: FnvHashMap<AttributePath, AttributeHandle>,
    seq: u64,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    /// Create a store containing only the root attribute
    pub fn new() -> Self {
        let root = AttributePath::root();
        let mut index = FnvHashMap::default();
        index.insert(root.clone(), AttributeHandle(0));
        Self {
            nodes: vec![AttributeNode::new(root)],
            index,
            seq: 0,
        }
    }

    /// Handle of an existing attribute
    pub fn handle(&self, path: &AttributePath) -> Option<AttributeHandle> {
        self.index.get(path).copied()
    }

    /// Path of a handle
    pub fn path_of(&self, handle: AttributeHandle) -> Option<&AttributePath> {
        self.nodes.get(handle.0).map(|node| &node.path)
    }

    /// Number of attributes (root included)
    pub fn attribute_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of closed intervals across all attributes
    pub fn interval_count(&self) -> usize {
        self.nodes.iter().map(|node| node.history.len()).sum()
    }

    /// Close every ongoing value at `end`
    ///
    /// Values that started after `end` are closed at their own start.
    pub fn close(&mut self, end: u64) {
        for node in &mut self.nodes {
            if let Some((start, start_seq, value)) = node.ongoing.take() {
                let end = end.max(start);
                self.seq += 1;
                node.history.push(StateInterval {
                    start,
                    end: Some(end),
                    value,
                    start_seq,
                    end_seq: Some(self.seq),
                });
                node.last_write = Some(node.last_write.map_or(end, |last| last.max(end)));
            }
        }
    }

    fn get_or_create(&mut self, path: &AttributePath) -> AttributeHandle {
        if let Some(handle) = self.index.get(path) {
            return *handle;
        }
        let parent = match path.parent() {
            Some(parent) => self.get_or_create(&parent),
            None => AttributeHandle(0),
        };
        let handle = AttributeHandle(self.nodes.len());
        self.nodes.push(AttributeNode::new(path.clone()));
        self.nodes[parent.0].children.push(handle);
        self.index.insert(path.clone(), handle);
        handle
    }

    fn node(&self, path: &AttributePath) -> Result<&AttributeNode> {
        self.index
            .get(path)
            .map(|handle| &self.nodes[handle.0])
            .ok_or_else(|| StoreError::UnknownAttribute(path.clone()))
    }

    fn check_time(&self, handle: AttributeHandle, timestamp: u64) -> Result<()> {
        let node = &self.nodes[handle.0];
        match node.last_write {
            Some(last) if timestamp < last => Err(StoreError::TimeOutOfOrder {
                path: node.path.clone(),
                timestamp,
                last,
            }),
            _ => Ok(()),
        }
    }

    fn write(&mut self, handle: AttributeHandle, timestamp: u64, value: Option<StateValue>) {
        self.seq += 1;
        let seq = self.seq;
        let node = &mut self.nodes[handle.0];
        if let Some((start, start_seq, previous)) = node.ongoing.take() {
            node.history.push(StateInterval {
                start,
                end: Some(timestamp),
                value: previous,
                start_seq,
                end_seq: Some(seq),
            });
        }
        node.ongoing = value.map(|value| (timestamp, seq, value));
        node.last_write = Some(timestamp);
    }

    fn current_value(&self, handle: AttributeHandle) -> Option<&StateValue> {
        self.nodes[handle.0].ongoing.as_ref().map(|(_, _, value)| value)
    }

    fn stack_depth(&self, handle: AttributeHandle) -> i64 {
        self.current_value(handle)
            .and_then(StateValue::as_int)
            .unwrap_or(0)
    }
}

impl StateStore for MemoryStateStore {
    fn push_attribute(&mut self, path: &AttributePath, timestamp: u64, value: StateValue) -> Result<AttributeHandle> {
        let counter = self.get_or_create(path);
        self.check_time(counter, timestamp)?;

        let depth = self.stack_depth(counter) + 1;
        let slot = self.get_or_create(&path.child(depth.to_string()));
        self.check_time(slot, timestamp)?;

        self.write(counter, timestamp, Some(StateValue::Int(depth)));
        self.write(slot, timestamp, Some(value));
        Ok(slot)
    }

    fn pop_attribute(&mut self, path: &AttributePath, timestamp: u64) -> Result<Option<StateValue>> {
        let counter = self
            .handle(path)
            .ok_or_else(|| StoreError::UnknownAttribute(path.clone()))?;
        let depth = self.stack_depth(counter);
        if depth <= 0 {
            return Err(StoreError::EmptyStack(path.clone()));
        }
        self.check_time(counter, timestamp)?;

        let slot_path = path.child(depth.to_string());
        let slot = self
            .handle(&slot_path)
            .ok_or(StoreError::UnknownAttribute(slot_path))?;
        self.check_time(slot, timestamp)?;

        let popped = self.current_value(slot).cloned();
        self.write(slot, timestamp, None);
        let remaining = if depth > 1 {
            Some(StateValue::Int(depth - 1))
        } else {
            None
        };
        self.write(counter, timestamp, remaining);
        Ok(popped)
    }

    fn modify_attribute(&mut self, path: &AttributePath, timestamp: u64, value: Option<StateValue>) -> Result<()> {
        let handle = self.get_or_create(path);
        self.check_time(handle, timestamp)?;
        self.write(handle, timestamp, value);
        Ok(())
    }

    fn query_interval_at(&self, path: &AttributePath, timestamp: u64) -> Result<Option<StateInterval>> {
        let node = self.node(path)?;

        if let Some((start, start_seq, value)) = &node.ongoing {
            if *start <= timestamp {
                return Ok(Some(StateInterval {
                    start: *start,
                    end: None,
                    value: value.clone(),
                    start_seq: *start_seq,
                    end_seq: None,
                }));
            }
        }

        let upper = node.history.partition_point(|iv| iv.start <= timestamp);
        if upper == 0 {
            return Ok(None);
        }
        let candidate = &node.history[upper - 1];
        Ok(candidate.contains(timestamp).then(|| candidate.clone()))
    }

    fn query_sub_attributes(&self, path: &AttributePath, recursive: bool) -> Result<Vec<AttributePath>> {
        let node = self.node(path)?;
        let mut result = Vec::new();
        let mut pending: Vec<AttributeHandle> = node.children.iter().rev().copied().collect();
        while let Some(handle) = pending.pop() {
            let child = &self.nodes[handle.0];
            result.push(child.path.clone());
            if recursive {
                pending.extend(child.children.iter().rev().copied());
            }
        }
        Ok(result)
    }

    fn query_range(&self, path: &AttributePath, start: u64, end: u64) -> Result<Vec<StateInterval>> {
        let node = self.node(path)?;
        // History is sorted by start and non-overlapping, so skip everything
        // that ends before the window.
        let first = node
            .history
            .partition_point(|iv| iv.end.is_some_and(|e| e < start));
        let mut result: Vec<StateInterval> = node.history[first..]
            .iter()
            .take_while(|iv| iv.start <= end)
            .filter(|iv| iv.overlaps(start, end))
            .cloned()
            .collect();

        if let Some((ongoing_start, start_seq, value)) = &node.ongoing {
            if *ongoing_start <= end {
                result.push(StateInterval {
                    start: *ongoing_start,
                    end: None,
                    value: value.clone(),
                    start_seq: *start_seq,
                    end_seq: None,
                });
            }
        }
        Ok(result)
    }

    fn contains(&self, path: &AttributePath) -> bool {
        self.index.contains_key(path)
    }
}
