//! Trace events as consumed by the engine
//!
//! Event kinds are decoded once, at ingestion, into the closed [`EventKind`]
//! enum. Everything downstream matches on the variant; nothing compares event
//! names against string constants.
//!
//! The on-disk form accepted by [`JsonLinesSource`] is one JSON object per
//! line, tagged by `kind`:
//!
//! ```text
//! {"timestamp":10,"context":1,"kind":"enter","symbol":{"name":"main"}}
//! {"timestamp":20,"context":1,"kind":"leave"}
//! ```

use crate::context::ExecutionContext;
use crate::correlation::{CollectiveKey, CorrelationKey};
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Function/region entry
    Enter {
        symbol: Symbol,
        /// Known end time for records that carry their own duration
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<u64>,
    },
    /// Function/region exit; the symbol, when present, is checked against the popped one
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<Symbol>,
    },
    /// First half of a point-to-point asynchronous operation
    AsyncBegin { key: CorrelationKey },
    /// Second half of a point-to-point asynchronous operation
    AsyncEnd { key: CorrelationKey },
    /// A member enters a rooted collective
    CollectiveBegin { key: CollectiveKey },
    /// A member leaves a rooted collective
    CollectiveEnd { key: CollectiveKey },
    /// Kernel launch on a host lane; the dispatch id is assigned by the engine
    DispatchLaunch,
    /// Kernel execution on a device context for a previously launched dispatch
    DispatchExecute {
        dispatch_id: u64,
        /// Additional contexts that also receive the launch edge (e.g. the GPU stream)
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        also: Vec<ExecutionContext>,
    },
    /// Supplementary status of the context (e.g. GPU occupancy); `None` clears it
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
}

/// One timestamped event on one context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
pub struct TraceEvent {
    /// Nanoseconds since trace start
    pub timestamp: u64,
    /// Context the event happened on
    pub context: ExecutionContext,
    /// Event payload
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TraceEvent {
    /// Build an event
    pub fn new(timestamp: u64, context: ExecutionContext, kind: EventKind) -> Self {
        Self {
            timestamp,
            context,
            kind,
        }
    }

    /// Enter event without a known end
    pub fn enter(timestamp: u64, context: ExecutionContext, symbol: impl Into<Symbol>) -> Self {
        Self::new(
            timestamp,
            context,
            EventKind::Enter {
                symbol: symbol.into(),
                end: None,
            },
        )
    }

    /// Leave event without a symbol check
    pub fn leave(timestamp: u64, context: ExecutionContext) -> Self {
        Self::new(timestamp, context, EventKind::Leave { symbol: None })
    }
}

/// Errors reading an event source
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Failed to read events from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// A finite, restartable sequence of events
///
/// Each call to [`EventSource::events`] starts again from the beginning.
pub trait EventSource {
    /// Iterate over all events from the start
    fn events(&self) -> Box<dyn Iterator<Item = Result<TraceEvent, EventError>> + '_>;
}

impl EventSource for Vec<TraceEvent> {
    fn events(&self) -> Box<dyn Iterator<Item = Result<TraceEvent, EventError>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

impl EventSource for [TraceEvent] {
    fn events(&self) -> Box<dyn Iterator<Item = Result<TraceEvent, EventError>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

/// JSON-lines event file
///
/// Blank lines and lines starting with `#` are skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
}

impl JsonLinesSource {
    /// Wrap a path; the file is opened lazily on each iteration
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path being read
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for JsonLinesSource {
    fn events(&self) -> Box<dyn Iterator<Item = Result<TraceEvent, EventError>> + '_> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(source) => {
                return Box::new(std::iter::once(Err(EventError::Io {
                    path: self.path.clone(),
                    source,
                })))
            }
        };

        let path = self.path.clone();
        let lines = BufReader::new(file).lines().enumerate();
        Box::new(lines.filter_map(move |(index, line)| match line {
            Err(source) => Some(Err(EventError::Io {
                path: path.clone(),
                source,
            })),
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                Some(
                    serde_json::from_str(trimmed).map_err(|source| EventError::Parse {
                        line: index + 1,
                        source,
                    }),
                )
            }
        }))
    }
}
