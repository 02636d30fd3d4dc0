//! Tracefold - call stacks, causality edges and call graphs from trace streams
//!
//! This library turns timestamped enter/leave events into per-context call
//! stacks, links asynchronous operation halves (messages, kernel dispatches,
//! collectives) into directed edges, and folds closed call stacks into
//! symbol-keyed call graphs with self/total time and counts.

pub mod callgraph;
pub mod cli;
pub mod config;
pub mod context;
pub mod correlation;
pub mod diagnostics;
pub mod dwarf;
pub mod edge_linker;
pub mod engine;
pub mod event;
pub mod stack_tracker;
pub mod state_store;
pub mod symbol;
