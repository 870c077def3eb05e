//! Reconstruction of the profiled process's address space from mapping
//! events, and resolution of absolute runtime addresses into
//! object-relative file offsets.
//!
//! Mapping/unmapping order is not modeled: the first mapping covering a
//! span wins and later conflicting mappings are rejected with a warning.
//! Real traces can remap reused address ranges; callers must accept the
//! resulting unresolved samples rather than expect this model to track
//! them.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::domain::{InstructionLocation, MappingConflict, MemoryMapping};

/// The set of memory-mapped object-file regions active during collection,
/// sorted by load address.
#[derive(Debug, Default)]
pub struct AddressSpace {
    mappings: BTreeMap<u64, MemoryMapping>,
    rejected: u64,
}

impl AddressSpace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a mapping, rejecting any that overlaps an existing one.
    /// Rejection leaves the address space untouched.
    pub fn insert_mapping(&mut self, mapping: MemoryMapping) -> Result<(), MappingConflict> {
        let conflicting = self
            .mappings
            .range(..=mapping.load_address)
            .next_back()
            .map(|(_, prev)| prev)
            .is_some_and(|prev| prev.intersects(&mapping))
            || self
                .mappings
                .range(mapping.load_address..)
                .next()
                .map(|(_, next)| next)
                .is_some_and(|next| next.intersects(&mapping));

        if conflicting {
            warn!("rejecting conflicting mapping: {mapping}");
            self.rejected += 1;
            return Err(MappingConflict {
                object_file: mapping.object_file.to_string(),
                load_address: mapping.load_address,
                length: mapping.length,
            });
        }

        debug!("mapped {mapping}");
        self.mappings.insert(mapping.load_address, mapping);
        Ok(())
    }

    /// Resolves an absolute runtime address to an object-relative location.
    /// `None` means the sample is unattributable; callers drop it.
    #[must_use]
    pub fn resolve(&self, address: u64) -> Option<InstructionLocation> {
        let (_, mapping) = self.mappings.range(..=address).next_back()?;
        if !mapping.contains(address) {
            return None;
        }
        let offset = (address - mapping.load_address) + mapping.file_offset;
        Some(InstructionLocation::new(mapping.object_file.clone(), offset))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Number of mappings dropped due to conflicts, for diagnostics.
    #[must_use]
    pub fn rejected_mappings(&self) -> u64 {
        self.rejected
    }
}
