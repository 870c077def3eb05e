//! Per-function profile symbols and the map that owns them.
//!
//! Each top-level [`Symbol`] is one function of the profiled binary; nested
//! symbols hang off callsites and represent inlined callees. Counts attach
//! to positions keyed by `(line - start_line) << 16 | discriminator`, so a
//! position survives unrelated edits above the function.
//!
//! The map owns every symbol in an arena; names (including aliases and
//! clone names) bind to arena ids, and clone merging repoints ids rather
//! than copying symbols.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::warn;

use crate::domain::{SourceInfo, SourceStack};
use crate::symbolization::SymbolIndex;

/// Minimum emission threshold, regardless of profile size.
const MIN_COUNT_THRESHOLD: u64 = 10;
/// Below this many attributed events the profile is too sparse to trust.
const MIN_TOTAL_COUNT: u64 = 1_000_000;
/// A single function above this share of all counts suggests a skewed run.
const MAX_FUNCTION_SHARE: f64 = 0.8;

/// How repeated counts at one position combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountPolicy {
    #[default]
    Sum,
    Max,
}

/// Counts attached to one source position.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    pub count: u64,
    pub num_inst: u64,
    /// Indirect-call targets observed at this position, by callee name.
    pub target_map: BTreeMap<String, u64>,
}

impl ProfileInfo {
    fn merge_from(&mut self, other: &ProfileInfo) {
        self.count += other.count;
        self.num_inst += other.num_inst;
        for (target, count) in &other.target_map {
            *self.target_map.entry(target.clone()).or_default() += count;
        }
    }
}

/// A callsite inside a function: position offset plus callee name. Two
/// different callees inlined at the same position stay distinct.
pub type Callsite = (u32, String);

/// One function (or inlined instance of one) and its attributed counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub dir_name: String,
    pub file_name: String,
    pub start_line: u32,
    pub total_count: u64,
    pub head_count: u64,
    pub pos_counts: BTreeMap<u32, ProfileInfo>,
    pub callsites: BTreeMap<Callsite, Symbol>,
}

impl Symbol {
    fn named(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    fn from_frame(name: String, frame: &SourceInfo) -> Self {
        Self {
            name,
            dir_name: frame.dir_name.clone(),
            file_name: frame.file_name.clone(),
            start_line: frame.start_line,
            ..Self::default()
        }
    }

    /// Recursive per-position sum of another symbol's counts into this one.
    pub fn merge_from(&mut self, other: &Symbol) {
        self.total_count += other.total_count;
        self.head_count += other.head_count;
        if self.file_name.is_empty() {
            self.file_name.clone_from(&other.file_name);
            self.dir_name.clone_from(&other.dir_name);
        }
        for (pos, info) in &other.pos_counts {
            self.pos_counts.entry(*pos).or_default().merge_from(info);
        }
        for (callsite, callee) in &other.callsites {
            self.callsites
                .entry(callsite.clone())
                .or_insert_with(|| Symbol::named(&callsite.1))
                .merge_from(callee);
        }
    }

    /// The largest count at any position or immediate callsite. Used to
    /// decide whether a function is worth keeping at all.
    #[must_use]
    pub fn max_pos_callsite_count(&self) -> u64 {
        let max_pos = self.pos_counts.values().map(|info| info.count).max().unwrap_or(0);
        let max_callsite = self.callsites.values().map(|s| s.total_count).max().unwrap_or(0);
        max_pos.max(max_callsite)
    }
}

type SymbolId = usize;

/// All profiled functions of one object file.
pub struct SymbolMap {
    arena: Vec<Symbol>,
    map: BTreeMap<String, SymbolId>,
    name_alias_map: BTreeMap<String, BTreeSet<String>>,
    /// Function spans by start file offset: `(name, size)`.
    address_index: BTreeMap<u64, (String, u64)>,
    object_file: Arc<str>,
    count_threshold: u64,
}

impl SymbolMap {
    /// Builds an empty map over the functions of an indexed binary.
    #[must_use]
    pub fn from_index(index: &SymbolIndex) -> Self {
        let address_index = index
            .functions()
            .iter()
            .map(|(&offset, symbol)| (offset, (symbol.name.clone(), symbol.size)))
            .collect();
        Self {
            arena: Vec::new(),
            map: BTreeMap::new(),
            name_alias_map: index.aliases().clone(),
            address_index,
            object_file: Arc::clone(index.object_file()),
            count_threshold: MIN_COUNT_THRESHOLD,
        }
    }

    /// Builds a map from explicit function spans `(start, name, size)`.
    #[must_use]
    pub fn with_functions(object_file: &str, functions: &[(u64, &str, u64)]) -> Self {
        let address_index = functions
            .iter()
            .map(|&(offset, name, size)| (offset, (name.to_string(), size)))
            .collect();
        Self {
            arena: Vec::new(),
            map: BTreeMap::new(),
            name_alias_map: BTreeMap::new(),
            address_index,
            object_file: Arc::from(object_file),
            count_threshold: MIN_COUNT_THRESHOLD,
        }
    }

    #[must_use]
    pub fn object_file(&self) -> &str {
        &self.object_file
    }

    pub fn add_alias(&mut self, name: &str, alias: &str) {
        self.name_alias_map.entry(name.to_string()).or_default().insert(alias.to_string());
        if let Some(&id) = self.map.get(name) {
            self.map.insert(alias.to_string(), id);
        }
    }

    /// The function whose span covers `offset`.
    #[must_use]
    pub fn find_function(&self, offset: u64) -> Option<&str> {
        let (&start, (name, size)) = self.address_index.range(..=offset).next_back()?;
        (offset < start + size).then_some(name.as_str())
    }

    /// The function starting exactly at `offset`.
    #[must_use]
    pub fn function_at_start(&self, offset: u64) -> Option<&str> {
        self.address_index.get(&offset).map(|(name, _)| name.as_str())
    }

    /// Sets the emission threshold from the profile's total count, floored
    /// at the fixed minimum.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn calculate_threshold_from_total_count(&mut self, total_count: u64, frac: f64) {
        self.count_threshold = ((total_count as f64 * frac) as u64).max(MIN_COUNT_THRESHOLD);
    }

    #[must_use]
    pub fn count_threshold(&self) -> u64 {
        self.count_threshold
    }

    #[must_use]
    pub fn should_emit(&self, count: u64) -> bool {
        count > self.count_threshold
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Registers a top-level symbol; aliases of the name bind to the same
    /// symbol. Idempotent.
    pub fn add_symbol(&mut self, name: &str) {
        if self.map.contains_key(name) {
            return;
        }
        let id = self.arena.len();
        self.arena.push(Symbol::named(name));
        self.map.insert(name.to_string(), id);
        if let Some(aliases) = self.name_alias_map.get(name) {
            for alias in aliases.clone() {
                self.map.insert(alias, id);
            }
        }
    }

    /// Walks (and grows) the callsite tree for an inline stack, adding
    /// `count` to the total of every level, and returns the leaf symbol.
    /// `None` when the top-level function was never registered.
    fn traverse_inline_stack(
        &mut self,
        name: &str,
        stack: &SourceStack,
        count: u64,
    ) -> Option<&mut Symbol> {
        let &id = self.map.get(name)?;
        let mut symbol = &mut self.arena[id];
        symbol.total_count += count;
        if let Some(outermost) = stack.last() {
            if symbol.file_name.is_empty() {
                symbol.file_name.clone_from(&outermost.file_name);
                symbol.dir_name.clone_from(&outermost.dir_name);
            }
        }
        // Walk outermost-in: level i's position is the callsite at which
        // level i-1 was inlined.
        for i in (1..stack.len()).rev() {
            let frame = &stack[i - 1];
            let callee = if frame.func_name.is_empty() {
                "noname".to_string()
            } else {
                frame.func_name.clone()
            };
            symbol = symbol
                .callsites
                .entry((stack[i].offset(), callee.clone()))
                .or_insert_with(|| Symbol::from_frame(callee, frame));
            symbol.total_count += count;
        }
        Some(symbol)
    }

    /// Attributes `count` to the source position of an inline stack's leaf
    /// frame. The leaf position is additionally weighted by the frame's
    /// duplication factor, so an unrolled line gets credit for every copy.
    /// Empty stacks attribute nothing.
    pub fn add_source_count(
        &mut self,
        name: &str,
        stack: &SourceStack,
        count: u64,
        num_inst: u64,
        policy: CountPolicy,
    ) {
        let Some(leaf) = stack.first() else {
            return;
        };
        let leaf_offset = leaf.offset();
        let weighted = count * u64::from(leaf.duplication_factor());
        let Some(symbol) = self.traverse_inline_stack(name, stack, count) else {
            return;
        };
        let info = symbol.pos_counts.entry(leaf_offset).or_default();
        match policy {
            CountPolicy::Sum => info.count += weighted,
            CountPolicy::Max => info.count = info.count.max(weighted),
        }
        info.num_inst += num_inst;
    }

    /// Records an indirect-call target at the position of the stack's leaf
    /// frame. The target name is canonicalized so clone suffixes collapse.
    pub fn add_indirect_call_target(
        &mut self,
        name: &str,
        stack: &SourceStack,
        target: &str,
        count: u64,
    ) {
        let Some(leaf_offset) = stack.first().map(SourceInfo::offset) else {
            return;
        };
        let Some(symbol) = self.traverse_inline_stack(name, stack, 0) else {
            return;
        };
        let info = symbol.pos_counts.entry(leaf_offset).or_default();
        *info.target_map.entry(canonical_name(target).to_string()).or_default() += count;
    }

    /// Adds to a function's entry count, the number of times control
    /// branched to its first instruction.
    pub fn add_symbol_entry_count(&mut self, name: &str, count: u64) {
        if let Some(&id) = self.map.get(name) {
            self.arena[id].head_count += count;
        }
    }

    /// Folds every clone symbol (`foo.part.1`, `foo.constprop.0`, ...) into
    /// its canonical symbol. Clone names stay bound, pointing at the merged
    /// canonical symbol.
    pub fn merge(&mut self) {
        let names: Vec<String> = self.map.keys().cloned().collect();
        for name in names {
            let canonical = canonical_name(&name).to_string();
            if canonical == name {
                continue;
            }
            let clone_id = self.map[&name];
            let canonical_id = match self.map.get(&canonical) {
                Some(&id) if id != clone_id => id,
                _ => {
                    // Canonical symbol absent (or bound to the clone
                    // itself): give it a fresh symbol.
                    let id = self.arena.len();
                    self.arena.push(Symbol::named(&canonical));
                    self.map.insert(canonical.clone(), id);
                    id
                }
            };
            let mut clone = std::mem::take(&mut self.arena[clone_id]);
            self.arena[canonical_id].merge_from(&clone);
            clone.total_count = 0;
            clone.head_count = 0;
            self.arena[clone_id] = clone;
            for id in self.map.values_mut() {
                if *id == clone_id {
                    *id = canonical_id;
                }
            }
        }
    }

    /// Distinct symbols with attributed counts, each listed once even when
    /// several names bind to it.
    #[must_use]
    pub fn symbols(&self) -> Vec<&Symbol> {
        let mut seen = BTreeSet::new();
        self.map
            .values()
            .filter(|&&id| seen.insert(id))
            .map(|&id| &self.arena[id])
            .filter(|symbol| symbol.total_count > 0)
            .collect()
    }

    /// Fraction of total counts both maps attribute to the same functions.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn overlap(&self, other: &SymbolMap) -> f32 {
        let totals = |map: &SymbolMap| -> (u64, BTreeMap<String, u64>) {
            let mut total = 0;
            let mut per_name = BTreeMap::new();
            for symbol in map.symbols() {
                total += symbol.total_count;
                per_name.insert(symbol.name.clone(), symbol.total_count);
            }
            (total, per_name)
        };
        let (self_total, self_counts) = totals(self);
        let (other_total, other_counts) = totals(other);
        if self_total == 0 || other_total == 0 {
            return 0.0;
        }
        let mut shared = 0.0f32;
        for (name, &count) in &self_counts {
            if let Some(&other_count) = other_counts.get(name) {
                let self_frac = count as f32 / self_total as f32;
                let other_frac = other_count as f32 / other_total as f32;
                shared += self_frac.min(other_frac);
            }
        }
        shared
    }

    /// Sanity checks before the profile is trusted. Failures only warn;
    /// a thin profile is still a profile.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn validate(&self) -> bool {
        let symbols = self.symbols();
        let total: u64 = symbols.iter().map(|s| s.total_count).sum();
        if total < MIN_COUNT_THRESHOLD {
            warn!("profile is empty or nearly so: {total} attributed events");
            return false;
        }
        let mut healthy = true;
        if total < MIN_TOTAL_COUNT {
            warn!("profile is sparse ({total} attributed events); counts may be noisy");
            healthy = false;
        }
        if let Some(hottest) = symbols.iter().max_by_key(|s| s.total_count) {
            let share = hottest.total_count as f64 / total as f64;
            if share > MAX_FUNCTION_SHARE {
                warn!(
                    "{} holds {:.0}% of all counts; collection may be skewed",
                    hottest.name,
                    share * 100.0
                );
                healthy = false;
            }
        }
        healthy
    }
}

/// The symbol name with any clone suffix stripped: everything before the
/// first `.`.
#[must_use]
pub fn canonical_name(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}
