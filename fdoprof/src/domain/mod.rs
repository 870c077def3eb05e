//! Domain model for fdoprof
//!
//! This module contains the core data types the whole pipeline is built on:
//! object-relative instruction locations, memory mappings, the three count
//! maps, source positions with their discriminator encoding, and the
//! structured error types.

pub mod discriminator;
pub mod errors;
pub mod source;
pub mod types;

// Re-export common types for convenience
pub use source::{SourceInfo, SourceStack};
pub use types::{
    AddressCountMap, Branch, BranchCountMap, InstructionLocation, MemoryMapping, Range,
    RangeCountMap, SampleProfile,
};

pub use errors::{MappingConflict, ProfileError, StoreError};
