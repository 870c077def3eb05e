//! The hierarchical function profile: symbol map construction and the
//! builder that attributes raw counts to source positions.

pub mod builder;
pub mod symbol_map;

pub use builder::{BuilderStats, ProfileBuilder, ProfileOptions};
pub use symbol_map::{CountPolicy, ProfileInfo, Symbol, SymbolMap};
