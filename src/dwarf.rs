//! DWARF-backed symbol resolution for address symbols
//!
//! Sampled and binary-instrumented traces record raw instruction addresses
//! instead of names. [`DwarfSymbolResolver`] maps those addresses back to
//! function names (and source locations) using the binary's debug info.
//! Only binaries readable by the `object` crate (ELF, Mach-O, PE) are supported.

use crate::context::ExecutionContext;
use crate::symbol::{MapSymbolResolver, Symbol, SymbolResolver};
use anyhow::{Context, Result};
use object::{Object, ObjectSection};
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

/// Source location information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file path
    pub file: String,
    /// Line number
    pub line: u32,
    /// Column number (if available)
    pub column: Option<u32>,
    /// Function name (if available)
    pub function: Option<String>,
}

impl SourceLocation {
    /// Name used as the resolved symbol: the function if known, else `file:line`
    pub fn display_name(&self) -> String {
        match &self.function {
            Some(function) => function.clone(),
            None => format!("{}:{}", self.file, self.line),
        }
    }
}

type DebugSlice = gimli::EndianRcSlice<gimli::RunTimeEndian>;

/// Resolves [`Symbol::Address`] values through a binary's DWARF sections
///
/// Load address offsets are applied before lookup, so addresses recorded in a
/// relocated (PIE) process can be resolved against the on-disk binary.
pub struct DwarfSymbolResolver {
    context: addr2line::Context<DebugSlice>,
    load_bias: u64,
}

impl DwarfSymbolResolver {
    /// Build a resolver from the debug info of the binary that produced a trace
    pub fn open(binary: &Path) -> Result<Self> {
        let file = File::open(binary)
            .with_context(|| format!("Cannot open {} for address resolution", binary.display()))?;
        // SAFETY: read-only mapping of a file we do not write; every section
        // is copied into an owned buffer before the mapping is dropped.
        let mapping = unsafe { memmap2::Mmap::map(&file) }
            .with_context(|| format!("Cannot map {}", binary.display()))?;

        let dwarf = debug_sections(&mapping)
            .with_context(|| format!("{} has no usable debug info (build it with -g)", binary.display()))?;
        let context = addr2line::Context::from_dwarf(dwarf)
            .with_context(|| format!("Cannot index debug info of {}", binary.display()))?;

        tracing::debug!("Opened debug info of {}", binary.display());
        Ok(Self { context, load_bias: 0 })
    }

    /// Subtract `bias` from every address before lookup
    pub fn with_load_bias(mut self, bias: u64) -> Self {
        self.load_bias = bias;
        self
    }

    /// Source location of an address, `None` when debug info does not cover it
    pub fn lookup(&self, addr: u64) -> Option<SourceLocation> {
        let addr = addr.saturating_sub(self.load_bias);
        let location = self.context.find_location(addr).ok()??;
        Some(SourceLocation {
            file: location.file?.to_string(),
            line: location.line.unwrap_or(0),
            column: location.column,
            function: self.function_name(addr),
        })
    }

    /// Resolve a set of addresses once into a shareable table
    ///
    /// The DWARF context is single-threaded; the returned table is `Sync` and
    /// can back a parallel aggregation. Unresolved addresses are left out.
    pub fn resolve_all<I: IntoIterator<Item = u64>>(&self, addrs: I) -> MapSymbolResolver {
        let mut table = MapSymbolResolver::new();
        let mut resolved = 0usize;
        for addr in addrs {
            if let Some(name) = self.resolve(&Symbol::Address(addr), ExecutionContext(0), 0) {
                table.add_address(addr, name);
                resolved += 1;
            }
        }
        tracing::debug!("Resolved {} addresses from DWARF", resolved);
        table
    }

    fn function_name(&self, addr: u64) -> Option<String> {
        let mut frames = self.context.find_frames(addr).skip_all_loads().ok()?;
        // Innermost frame first; inlined callees come before their callers
        let frame = frames.next().ok()??;
        let function = frame.function?;
        function.raw_name().ok().map(|name| name.to_string())
    }
}

impl SymbolResolver for DwarfSymbolResolver {
    fn resolve(&self, symbol: &Symbol, _context: ExecutionContext, _timestamp: u64) -> Option<String> {
        let Symbol::Address(addr) = symbol else {
            return None;
        };
        match self.lookup(*addr) {
            Some(location) => Some(location.display_name()),
            None => self.function_name(addr.saturating_sub(self.load_bias)),
        }
    }
}

/// Copy the DWARF sections out of an object file image
///
/// Missing sections load as empty, so a stripped binary yields a context that
/// resolves nothing rather than an error.
fn debug_sections(image: &[u8]) -> Result<gimli::Dwarf<DebugSlice>> {
    let object = object::File::parse(image).context("not an object file")?;
    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };
    let section = |id: gimli::SectionId| -> Result<DebugSlice> {
        let bytes: Rc<[u8]> = match object.section_by_name(id.name()) {
            Some(section) => section
                .uncompressed_data()
                .with_context(|| format!("cannot decompress {}", id.name()))?
                .into_owned()
                .into(),
            None => Rc::from(Vec::new()),
        };
        Ok(gimli::EndianRcSlice::new(bytes, endian))
    };
    gimli::Dwarf::load(section)
}
