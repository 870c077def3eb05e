//! Core location and count-map types.
//!
//! Everything in the pipeline is keyed by [`InstructionLocation`]: the
//! identity of a byte inside a specific object file. Locations are only ever
//! built from object-relative file offsets, never from absolute runtime
//! addresses — translating between the two is the address space model's job.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::errors::ProfileError;

/// Identity of a byte inside a specific object file.
///
/// Ordering is lexicographic on `(offset, object_file)`, which keeps all
/// count maps sorted by offset first so per-function slices are contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstructionLocation {
    object_file: Arc<str>,
    offset: u64,
}

impl InstructionLocation {
    #[must_use]
    pub fn new(object_file: Arc<str>, offset: u64) -> Self {
        Self { object_file, offset }
    }

    #[must_use]
    pub fn object_file(&self) -> &str {
        &self.object_file
    }

    #[must_use]
    pub fn object_file_arc(&self) -> Arc<str> {
        Arc::clone(&self.object_file)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The next byte in the same object file. Used for inclusive range walks.
    #[must_use]
    pub fn succ(&self) -> Self {
        Self { object_file: Arc::clone(&self.object_file), offset: self.offset + 1 }
    }
}

impl Ord for InstructionLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset
            .cmp(&other.offset)
            .then_with(|| self.object_file.as_ref().cmp(other.object_file.as_ref()))
    }
}

impl PartialOrd for InstructionLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for InstructionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.object_file, self.offset)
    }
}

/// One mmap of part of an object file into the profiled process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub object_file: Arc<str>,
    pub load_address: u64,
    pub length: u64,
    pub file_offset: u64,
}

impl MemoryMapping {
    /// Whether the `[load_address, load_address + length)` spans overlap.
    ///
    /// Exactly-adjacent mappings do not intersect.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.load_address < other.load_address + other.length
            && other.load_address < self.load_address + self.length
    }

    /// Whether `address` falls inside this mapping's span.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.load_address && address < self.load_address + self.length
    }
}

impl fmt::Display for MemoryMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {:#x}(+{:#x}) @ {:#x}",
            self.object_file, self.load_address, self.length, self.file_offset
        )
    }
}

/// Straight-line execution between two taken branches: from the landing
/// point of one branch to the source of the next. Both endpoints live in
/// the same object file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    pub begin: InstructionLocation,
    pub end: InstructionLocation,
}

impl Range {
    /// Builds a range, enforcing that both endpoints share an object file.
    pub fn new(begin: InstructionLocation, end: InstructionLocation) -> Result<Self, ProfileError> {
        if begin.object_file() != end.object_file() {
            return Err(ProfileError::CrossObjectRange {
                begin: begin.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { begin, end })
    }

    /// Distance in bytes between the endpoints.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.offset().saturating_sub(self.begin.offset())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single taken-branch edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Branch {
    pub instruction: InstructionLocation,
    pub target: InstructionLocation,
}

pub type AddressCountMap = BTreeMap<InstructionLocation, u64>;
pub type RangeCountMap = BTreeMap<Range, u64>;
pub type BranchCountMap = BTreeMap<Branch, u64>;

/// The canonical intermediate representation: the three count maps produced
/// by sample aggregation, independent of any symbolization.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SampleProfile {
    pub address_counts: AddressCountMap,
    pub range_counts: RangeCountMap,
    pub branch_counts: BranchCountMap,
}

impl SampleProfile {
    /// Total attributed count. When range data exists every range weighs in
    /// with `count * (end - begin)`; otherwise the raw address counts sum.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        if self.range_counts.is_empty() {
            self.address_counts.values().sum()
        } else {
            self.range_counts.iter().map(|(range, count)| count * range.len()).sum()
        }
    }

    /// Number of observed samples: range observations when present,
    /// otherwise raw address samples.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        if self.range_counts.is_empty() {
            self.address_counts.values().sum()
        } else {
            self.range_counts.values().sum()
        }
    }

    /// Per-key sum of another profile's counts into this one.
    pub fn merge_from(&mut self, other: &SampleProfile) {
        for (loc, count) in &other.address_counts {
            *self.address_counts.entry(loc.clone()).or_default() += count;
        }
        for (range, count) in &other.range_counts {
            *self.range_counts.entry(range.clone()).or_default() += count;
        }
        for (branch, count) in &other.branch_counts {
            *self.branch_counts.entry(branch.clone()).or_default() += count;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.address_counts.is_empty()
            && self.range_counts.is_empty()
            && self.branch_counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(file: &str, offset: u64) -> InstructionLocation {
        InstructionLocation::new(Arc::from(file), offset)
    }

    #[test]
    fn test_location_ordering_is_offset_first() {
        let a = loc("b.so", 0x10);
        let b = loc("a.so", 0x20);
        assert!(a < b); // offset dominates object file name

        let c = loc("a.so", 0x10);
        assert!(c < a); // same offset, file name breaks the tie
    }

    #[test]
    fn test_mapping_intersection_is_half_open() {
        let base = MemoryMapping {
            object_file: Arc::from("a.so"),
            load_address: 0x1000,
            length: 0x1000,
            file_offset: 0,
        };
        let adjacent = MemoryMapping { load_address: 0x2000, ..base.clone() };
        let overlapping = MemoryMapping { load_address: 0x1fff, ..base.clone() };

        assert!(!base.intersects(&adjacent));
        assert!(base.intersects(&overlapping));
        assert!(overlapping.intersects(&base));
    }

    #[test]
    fn test_range_rejects_cross_object_endpoints() {
        let result = Range::new(loc("a.so", 0x10), loc("b.so", 0x20));
        assert!(result.is_err());
    }

    #[test]
    fn test_total_count_weighs_ranges_by_length() {
        let mut profile = SampleProfile::default();
        let range = Range::new(loc("a.so", 0x10), loc("a.so", 0x18)).unwrap();
        profile.range_counts.insert(range, 3);
        profile.address_counts.insert(loc("a.so", 0x10), 99);

        assert_eq!(profile.total_count(), 3 * 8);
        assert_eq!(profile.total_samples(), 3);
    }

    #[test]
    fn test_total_count_falls_back_to_addresses() {
        let mut profile = SampleProfile::default();
        profile.address_counts.insert(loc("a.so", 0x10), 4);
        profile.address_counts.insert(loc("a.so", 0x14), 6);

        assert_eq!(profile.total_count(), 10);
        assert_eq!(profile.total_samples(), 10);
    }

    #[test]
    fn test_merge_from_sums_per_key() {
        let mut a = SampleProfile::default();
        let mut b = SampleProfile::default();
        a.address_counts.insert(loc("a.so", 0x10), 1);
        b.address_counts.insert(loc("a.so", 0x10), 2);
        b.address_counts.insert(loc("a.so", 0x20), 5);

        a.merge_from(&b);
        assert_eq!(a.address_counts[&loc("a.so", 0x10)], 3);
        assert_eq!(a.address_counts[&loc("a.so", 0x20)], 5);
    }
}
