//! Function symbol table of the profiled binary, keyed by file offset.
//!
//! Symbol addresses in ELF are virtual; the rest of the pipeline works in
//! object-relative file offsets, so each symbol's start address is
//! translated through the loadable segments at index-build time.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};

use crate::domain::ProfileError;

/// A sized function symbol: name and byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    pub name: String,
    pub size: u64,
}

/// Sized function symbols of one object file, keyed by start file offset.
#[derive(Debug)]
pub struct SymbolIndex {
    object_file: Arc<str>,
    functions: BTreeMap<u64, FunctionSymbol>,
    aliases: BTreeMap<String, BTreeSet<String>>,
}

impl SymbolIndex {
    /// Reads the symbol tables of `path`. Both the static and the dynamic
    /// table contribute; a binary with no sized text symbols is an error
    /// since nothing could ever be attributed.
    pub fn from_binary(path: &Path) -> Result<Self, ProfileError> {
        let display = path.display().to_string();
        let data = fs::read(path)
            .map_err(|source| ProfileError::BinaryRead { path: display.clone(), source })?;
        let file = object::File::parse(&*data)
            .map_err(|source| ProfileError::ObjectParse { path: display.clone(), source })?;

        let segments: Vec<(u64, u64, u64)> = file
            .segments()
            .map(|seg| {
                let (file_start, file_len) = seg.file_range();
                (seg.address(), file_start, file_len)
            })
            .collect();
        let to_file_offset = |vaddr: u64| {
            segments
                .iter()
                .find(|&&(seg_vaddr, _, file_len)| {
                    vaddr >= seg_vaddr && vaddr < seg_vaddr + file_len
                })
                .map(|&(seg_vaddr, file_start, _)| vaddr - seg_vaddr + file_start)
        };

        let mut functions: BTreeMap<u64, FunctionSymbol> = BTreeMap::new();
        let mut aliases: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for symbol in file.symbols().chain(file.dynamic_symbols()) {
            if symbol.kind() != SymbolKind::Text || symbol.size() == 0 {
                continue;
            }
            let Ok(name) = symbol.name() else { continue };
            if name.is_empty() {
                continue;
            }
            let Some(offset) = to_file_offset(symbol.address()) else {
                warn!("function {name} at {:#x} is outside every segment", symbol.address());
                continue;
            };
            match functions.get(&offset) {
                None => {
                    functions.insert(
                        offset,
                        FunctionSymbol { name: name.to_string(), size: symbol.size() },
                    );
                }
                Some(existing) if existing.name == name => {}
                Some(existing) => {
                    // Same start address, different name: an alias.
                    aliases.entry(existing.name.clone()).or_default().insert(name.to_string());
                }
            }
        }

        if functions.is_empty() {
            return Err(ProfileError::NoFunctionSymbols { path: display });
        }
        debug!("indexed {} functions from {display}", functions.len());

        Ok(Self { object_file: Arc::from(display.as_str()), functions, aliases })
    }

    #[must_use]
    pub fn object_file(&self) -> &Arc<str> {
        &self.object_file
    }

    #[must_use]
    pub fn functions(&self) -> &BTreeMap<u64, FunctionSymbol> {
        &self.functions
    }

    #[must_use]
    pub fn aliases(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.aliases
    }

    /// The function whose span covers `offset`, if any.
    #[must_use]
    pub fn find(&self, offset: u64) -> Option<&FunctionSymbol> {
        let (&start, symbol) = self.functions.range(..=offset).next_back()?;
        (offset < start + symbol.size).then_some(symbol)
    }

    /// The function starting exactly at `offset`, if any.
    #[must_use]
    pub fn at_start(&self, offset: u64) -> Option<&FunctionSymbol> {
        self.functions.get(&offset)
    }
}
