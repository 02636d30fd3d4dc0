//! Symbols: what is running inside an interval
//!
//! A [`Symbol`] is either already human readable (a function or region name),
//! a numeric region/function id, or a raw instruction address. Equality is by
//! value, so two intervals with the same symbol merge in the call graph no
//! matter where the symbol came from.
//!
//! Resolution to a display name is a pure lookup behind the
//! [`SymbolResolver`] trait. It is never needed for correctness: unresolved
//! symbols fall back to their raw rendering (see [`resolve_or_raw`]).

use crate::context::ExecutionContext;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for "what is running"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    /// Already-resolved name (function, region, API call)
    Name(String),
    /// Numeric region / function id from the trace's definition tables
    Region(u32),
    /// Raw instruction address
    Address(u64),
}

impl Symbol {
    /// Convenience constructor for a named symbol
    pub fn name(name: impl Into<String>) -> Self {
        Symbol::Name(name.into())
    }

    /// Raw rendering used when no resolver knows the symbol
    pub fn raw(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Name(name) => f.write_str(name),
            Symbol::Region(id) => write!(f, "region#{}", id),
            Symbol::Address(addr) => write!(f, "0x{:x}", addr),
        }
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::Name(name.to_string())
    }
}

impl From<String> for Symbol {
    fn from(name: String) -> Self {
        Symbol::Name(name)
    }
}

/// Resolves raw symbols to human-readable names
///
/// Implementations must be side-effect free: the same arguments always give
/// the same answer, so results may be cached freely.
pub trait SymbolResolver {
    /// Resolve a symbol observed on `context` at `timestamp`
    fn resolve(&self, symbol: &Symbol, context: ExecutionContext, timestamp: u64) -> Option<String>;
}

/// Resolver that never knows anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl SymbolResolver for NoopResolver {
    fn resolve(&self, _symbol: &Symbol, _context: ExecutionContext, _timestamp: u64) -> Option<String> {
        None
    }
}

/// Table-driven resolver for region ids and addresses
///
/// Typically filled from the trace's definition records (region tables,
/// symbol maps) before aggregation.
#[derive(Debug, Clone, Default)]
pub struct MapSymbolResolver {
    regions: FnvHashMap<u32, String>,
    addresses: FnvHashMap<u64, String>,
}

impl MapSymbolResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name for a region id
    pub fn add_region(&mut self, id: u32, name: impl Into<String>) {
        self.regions.insert(id, name.into());
    }

    /// Register a name for an exact address
    pub fn add_address(&mut self, addr: u64, name: impl Into<String>) {
        self.addresses.insert(addr, name.into());
    }
}

impl SymbolResolver for MapSymbolResolver {
    fn resolve(&self, symbol: &Symbol, _context: ExecutionContext, _timestamp: u64) -> Option<String> {
        match symbol {
            Symbol::Name(_) => None,
            Symbol::Region(id) => self.regions.get(id).cloned(),
            Symbol::Address(addr) => self.addresses.get(addr).cloned(),
        }
    }
}

/// Resolve a symbol, falling back to its raw rendering
///
/// Named symbols are returned as-is without consulting the resolver.
pub fn resolve_or_raw<R: SymbolResolver + ?Sized>(
    resolver: &R,
    symbol: &Symbol,
    context: ExecutionContext,
    timestamp: u64,
) -> String {
    if let Symbol::Name(name) = symbol {
        return name.clone();
    }
    resolver
        .resolve(symbol, context, timestamp)
        .unwrap_or_else(|| symbol.raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_display() {
        assert_eq!(Symbol::name("main").to_string(), "main");
        assert_eq!(Symbol::Region(12).to_string(), "region#12");
        assert_eq!(Symbol::Address(0xdead).to_string(), "0xdead");
    }

    #[test]
    fn test_symbol_equality_is_by_value() {
        assert_eq!(Symbol::from("f"), Symbol::Name("f".to_string()));
        assert_ne!(Symbol::Region(1), Symbol::Address(1));
    }

    #[test]
    fn test_map_resolver() {
        let mut resolver = MapSymbolResolver::new();
        resolver.add_region(3, "MPI_Bcast");
        resolver.add_address(0x1000, "compute");

        let ctx = ExecutionContext(0);
        assert_eq!(resolver.resolve(&Symbol::Region(3), ctx, 0).as_deref(), Some("MPI_Bcast"));
        assert_eq!(resolver.resolve(&Symbol::Address(0x1000), ctx, 0).as_deref(), Some("compute"));
        assert_eq!(resolver.resolve(&Symbol::Region(4), ctx, 0), None);
    }

    #[test]
    fn test_resolve_or_raw_falls_back() {
        let resolver = NoopResolver;
        let ctx = ExecutionContext(0);
        assert_eq!(resolve_or_raw(&resolver, &Symbol::Region(9), ctx, 0), "region#9");
        assert_eq!(resolve_or_raw(&resolver, &Symbol::name("g"), ctx, 0), "g");
    }
}
