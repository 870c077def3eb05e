//! Attribution of raw count maps to hierarchical function profiles.
//!
//! Two-phase emission: first every hot-enough function is registered so the
//! symbol map knows the complete set of top-level names, then each
//! function's counts are symbolized and attributed. Registering everything
//! up front lets branch processing credit entry counts to callees that
//! appear later in iteration order.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use crate::domain::{
    Branch, InstructionLocation, ProfileError, Range, SampleProfile, SourceStack,
};
use crate::symbolization::InlineStackResolver;

use super::symbol_map::{CountPolicy, SymbolMap};

#[derive(Debug, Clone, Copy)]
pub struct ProfileOptions {
    /// Derive position counts from LBR fall-through ranges rather than raw
    /// sampled addresses.
    pub use_lbr_ranges: bool,
    /// Fraction of the total count below which a function is not emitted.
    pub sample_threshold_frac: f64,
    pub count_policy: CountPolicy,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            use_lbr_ranges: true,
            sample_threshold_frac: 5e-6,
            count_policy: CountPolicy::Sum,
        }
    }
}

/// Attribution tallies for one build.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuilderStats {
    /// Count-map keys that matched no known function span.
    pub unattributed_keys: u64,
    /// Instructions with no line information.
    pub unsymbolized_addresses: u64,
    /// Inline-stack resolver queries (memo misses).
    pub symbolizer_queries: u64,
    pub emitted_functions: u64,
}

/// Raw counts bucketed under one top-level function.
#[derive(Debug, Default)]
struct FunctionCounts {
    addresses: Vec<(InstructionLocation, u64)>,
    ranges: Vec<(Range, u64)>,
    branches: Vec<(Branch, u64)>,
}

impl FunctionCounts {
    /// Count used for the emission decision, weighted like
    /// [`SampleProfile::total_count`].
    fn aggregated_count(&self) -> u64 {
        if self.ranges.is_empty() {
            self.addresses.iter().map(|(_, count)| count).sum()
        } else {
            self.ranges.iter().map(|(range, count)| count * range.len()).sum()
        }
    }
}

/// Builds a [`SymbolMap`]'s counts from a [`SampleProfile`].
pub struct ProfileBuilder<'r, R: InlineStackResolver> {
    resolver: &'r R,
    options: ProfileOptions,
    stack_memo: HashMap<InstructionLocation, SourceStack>,
    stats: BuilderStats,
}

impl<'r, R: InlineStackResolver> ProfileBuilder<'r, R> {
    pub fn new(resolver: &'r R, options: ProfileOptions) -> Self {
        Self { resolver, options, stack_memo: HashMap::new(), stats: BuilderStats::default() }
    }

    /// Attributes every count in `profile` to `map`'s functions and merges
    /// clone symbols. Returns the attribution tallies.
    pub fn compute(
        &mut self,
        map: &mut SymbolMap,
        profile: &SampleProfile,
    ) -> Result<BuilderStats, ProfileError> {
        map.calculate_threshold_from_total_count(
            profile.total_count(),
            self.options.sample_threshold_frac,
        );

        let buckets = self.bucket_by_function(map, profile);

        let emitted: Vec<&String> = buckets
            .iter()
            .filter(|(_, counts)| map.should_emit(counts.aggregated_count()))
            .map(|(name, _)| name)
            .collect();
        for name in &emitted {
            map.add_symbol(name);
        }
        self.stats.emitted_functions = emitted.len() as u64;
        debug!(
            "emitting {} of {} functions above threshold {}",
            emitted.len(),
            buckets.len(),
            map.count_threshold()
        );

        for (name, counts) in &buckets {
            if map.contains(name) {
                self.process_function(map, name, counts)?;
            }
        }

        map.merge();
        Ok(self.stats.clone())
    }

    /// Groups each count-map key under the function whose span covers it.
    /// Keys in other object files or outside every span are dropped.
    fn bucket_by_function(
        &mut self,
        map: &SymbolMap,
        profile: &SampleProfile,
    ) -> BTreeMap<String, FunctionCounts> {
        let mut buckets: BTreeMap<String, FunctionCounts> = BTreeMap::new();
        let mut attribute = |loc: &InstructionLocation| -> Option<String> {
            if basename(loc.object_file()) != basename(map.object_file()) {
                return None;
            }
            map.find_function(loc.offset()).map(ToString::to_string)
        };

        for (loc, &count) in &profile.address_counts {
            match attribute(loc) {
                Some(name) => {
                    buckets.entry(name).or_default().addresses.push((loc.clone(), count));
                }
                None => self.stats.unattributed_keys += 1,
            }
        }
        for (range, &count) in &profile.range_counts {
            match attribute(&range.begin) {
                Some(name) => {
                    buckets.entry(name).or_default().ranges.push((range.clone(), count));
                }
                None => self.stats.unattributed_keys += 1,
            }
        }
        for (branch, &count) in &profile.branch_counts {
            match attribute(&branch.instruction) {
                Some(name) => {
                    buckets.entry(name).or_default().branches.push((branch.clone(), count));
                }
                None => self.stats.unattributed_keys += 1,
            }
        }
        buckets
    }

    fn process_function(
        &mut self,
        map: &mut SymbolMap,
        name: &str,
        counts: &FunctionCounts,
    ) -> Result<(), ProfileError> {
        let instructions = if self.options.use_lbr_ranges {
            if counts.ranges.is_empty() {
                // With LBR data present globally, a function with no ranges
                // has no reliable position counts.
                return Ok(());
            }
            expand_ranges(&counts.ranges)
        } else {
            counts.addresses.clone()
        };

        for (loc, count) in instructions {
            let stack = self.stack_for(&loc)?;
            if stack.is_empty() {
                self.stats.unsymbolized_addresses += 1;
                continue;
            }
            map.add_source_count(name, &stack, count, 1, self.options.count_policy);
        }

        for (branch, count) in &counts.branches {
            let stack = self.stack_for(&branch.instruction)?;
            if stack.is_empty() {
                continue;
            }
            if basename(branch.target.object_file()) != basename(map.object_file()) {
                continue;
            }
            let Some(callee) = map.function_at_start(branch.target.offset()) else {
                continue;
            };
            let callee = callee.to_string();
            if map.contains(&callee) {
                map.add_symbol_entry_count(&callee, *count);
                map.add_indirect_call_target(name, &stack, &callee, *count);
            }
        }
        Ok(())
    }

    /// Memoized inline-stack lookup.
    fn stack_for(&mut self, loc: &InstructionLocation) -> Result<SourceStack, ProfileError> {
        if let Some(stack) = self.stack_memo.get(loc) {
            return Ok(stack.clone());
        }
        self.stats.symbolizer_queries += 1;
        let stack = self.resolver.resolve_inline_stack(loc.object_file(), loc.offset())?;
        self.stack_memo.insert(loc.clone(), stack.clone());
        Ok(stack)
    }
}

/// Expands each fall-through range to its instruction addresses, both
/// endpoints included.
fn expand_ranges(ranges: &[(Range, u64)]) -> Vec<(InstructionLocation, u64)> {
    let mut expanded = Vec::new();
    for (range, count) in ranges {
        if range.begin.offset() > range.end.offset() {
            warn!("ignoring inverted range {}-{}", range.begin, range.end);
            continue;
        }
        let mut loc = range.begin.clone();
        loop {
            expanded.push((loc.clone(), *count));
            if loc.offset() == range.end.offset() {
                break;
            }
            loc = loc.succ();
        }
    }
    expanded
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
