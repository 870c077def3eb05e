//! Aggregation of parsed perf records into the three count maps.
//!
//! Mapping records feed the address space model; sample records are resolved
//! against it. Each LBR entry whose endpoints both resolve contributes a
//! branch count, and each adjacent pair of entries contributes a range count
//! for the fall-through span between one branch's landing point and the next
//! branch's source.

use crate::domain::{Branch, Range, SampleProfile};

use super::address_space::AddressSpace;
use super::perf_text::PerfRecord;

/// Per-run tallies of samples the aggregator had to drop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregatorStats {
    pub unresolved_ips: u64,
    pub dropped_branches: u64,
    pub dropped_ranges: u64,
    pub cross_object_ranges: u64,
}

/// Folds a stream of perf records into a [`SampleProfile`].
#[derive(Debug, Default)]
pub struct LbrAggregator {
    address_space: AddressSpace,
    profile: SampleProfile,
    stats: AggregatorStats,
}

impl LbrAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, record: &PerfRecord) {
        match record {
            PerfRecord::Mapping(mapping) => {
                // Conflicts are already logged and counted by the model.
                let _ = self.address_space.insert_mapping(mapping.clone());
            }
            PerfRecord::Sample(sample) => {
                match self.address_space.resolve(sample.ip) {
                    Some(loc) => *self.profile.address_counts.entry(loc).or_default() += 1,
                    None => self.stats.unresolved_ips += 1,
                }

                let resolved: Vec<_> = sample
                    .branch_stack
                    .iter()
                    .map(|entry| {
                        (self.address_space.resolve(entry.from), self.address_space.resolve(entry.to))
                    })
                    .collect();

                for (from, to) in &resolved {
                    match (from, to) {
                        (Some(from), Some(to)) => {
                            let branch =
                                Branch { instruction: from.clone(), target: to.clone() };
                            *self.profile.branch_counts.entry(branch).or_default() += 1;
                        }
                        _ => self.stats.dropped_branches += 1,
                    }
                }

                // Entries are oldest first: execution fell through from one
                // branch's target to the next branch's source.
                for pair in resolved.windows(2) {
                    let (Some(begin), Some(end)) = (&pair[0].1, &pair[1].0) else {
                        self.stats.dropped_ranges += 1;
                        continue;
                    };
                    match Range::new(begin.clone(), end.clone()) {
                        Ok(range) => {
                            *self.profile.range_counts.entry(range).or_default() += 1;
                        }
                        Err(_) => self.stats.cross_object_ranges += 1,
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    #[must_use]
    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    /// Consumes the aggregator, yielding the accumulated count maps.
    #[must_use]
    pub fn finish(self) -> SampleProfile {
        self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstructionLocation, MemoryMapping};
    use crate::sampling::perf_text::{LbrEntry, SampleEvent};
    use std::sync::Arc;

    fn mapping(file: &str, load: u64, len: u64, off: u64) -> PerfRecord {
        PerfRecord::Mapping(MemoryMapping {
            object_file: Arc::from(file),
            load_address: load,
            length: len,
            file_offset: off,
        })
    }

    fn sample(ip: u64, stack: &[(u64, u64)]) -> PerfRecord {
        PerfRecord::Sample(SampleEvent {
            ip,
            branch_stack: stack.iter().map(|&(from, to)| LbrEntry { from, to }).collect(),
        })
    }

    fn loc(file: &str, offset: u64) -> InstructionLocation {
        InstructionLocation::new(Arc::from(file), offset)
    }

    #[test]
    fn test_single_entry_sample_counts_address_and_branch() {
        let mut agg = LbrAggregator::new();
        agg.ingest(&mapping("/lib/a.so", 0x1000, 0x2000, 0));
        agg.ingest(&sample(0x1500, &[(0x1400, 0x1600)]));

        let profile = agg.finish();
        assert_eq!(profile.address_counts[&loc("/lib/a.so", 0x500)], 1);
        let branch = Branch { instruction: loc("/lib/a.so", 0x400), target: loc("/lib/a.so", 0x600) };
        assert_eq!(profile.branch_counts[&branch], 1);
        assert!(profile.range_counts.is_empty()); // no adjacent pair
    }

    #[test]
    fn test_adjacent_entries_produce_a_fallthrough_range() {
        let mut agg = LbrAggregator::new();
        agg.ingest(&mapping("/lib/a.so", 0x1000, 0x2000, 0));
        // Landed at 0x1200, ran to 0x1400, branched to 0x1600.
        agg.ingest(&sample(0x1500, &[(0x1000, 0x1200), (0x1400, 0x1600)]));

        let profile = agg.finish();
        let range = Range::new(loc("/lib/a.so", 0x200), loc("/lib/a.so", 0x400)).unwrap();
        assert_eq!(profile.range_counts[&range], 1);
        assert_eq!(profile.branch_counts.len(), 2);
    }

    #[test]
    fn test_unresolvable_endpoints_are_counted_not_fatal() {
        let mut agg = LbrAggregator::new();
        agg.ingest(&mapping("/lib/a.so", 0x1000, 0x1000, 0));
        // ip and one branch endpoint fall outside the mapping.
        agg.ingest(&sample(0x9999, &[(0x1100, 0x9000), (0x1200, 0x1300)]));

        assert_eq!(agg.stats().unresolved_ips, 1);
        assert_eq!(agg.stats().dropped_branches, 1);
        // Fall-through begins at the unresolved 0x9000 target.
        assert_eq!(agg.stats().dropped_ranges, 1);

        let profile = agg.finish();
        assert_eq!(profile.branch_counts.len(), 1);
        assert!(profile.range_counts.is_empty());
    }

    #[test]
    fn test_cross_object_fallthrough_is_dropped() {
        let mut agg = LbrAggregator::new();
        agg.ingest(&mapping("/lib/a.so", 0x1000, 0x1000, 0));
        agg.ingest(&mapping("/lib/b.so", 0x4000, 0x1000, 0));
        // Land in a.so, next branch issues from b.so.
        agg.ingest(&sample(0x1100, &[(0x1000, 0x1100), (0x4100, 0x4200)]));

        assert_eq!(agg.stats().cross_object_ranges, 1);
        assert!(agg.finish().range_counts.is_empty());
    }

    #[test]
    fn test_repeated_samples_accumulate() {
        let mut agg = LbrAggregator::new();
        agg.ingest(&mapping("/lib/a.so", 0x1000, 0x2000, 0));
        for _ in 0..3 {
            agg.ingest(&sample(0x1500, &[(0x1400, 0x1600)]));
        }
        let profile = agg.finish();
        assert_eq!(profile.address_counts[&loc("/lib/a.so", 0x500)], 3);
    }
}
