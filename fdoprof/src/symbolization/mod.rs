//! Binary inspection: the ELF function-symbol index and the DWARF
//! inline-stack resolver.

pub mod dwarf;
pub mod symbol_index;

pub use dwarf::{DwarfResolver, InlineStackResolver};
pub use symbol_index::SymbolIndex;
