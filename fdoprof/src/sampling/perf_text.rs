//! Parser for `perf script --show-mmap-events` text output.
//!
//! Two record shapes matter: `PERF_RECORD_MMAP`/`PERF_RECORD_MMAP2` lines
//! describing object-file mappings, and sample lines carrying an instruction
//! pointer followed by LBR branch-stack entries. Everything else in the log
//! (comments, headers, event names) is skipped. Malformed candidate lines
//! are logged and counted, never fatal.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use log::warn;
use regex::Regex;

use crate::domain::{MemoryMapping, ProfileError, SampleProfile};

use super::aggregator::{AggregatorStats, LbrAggregator};
use super::SampleSource;

/// One LBR entry, a single taken branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbrEntry {
    pub from: u64,
    pub to: u64,
}

/// One sample: the sampled instruction pointer and its branch stack,
/// ordered oldest branch first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEvent {
    pub ip: u64,
    pub branch_stack: Vec<LbrEntry>,
}

/// A record recovered from the perf script log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerfRecord {
    Mapping(MemoryMapping),
    Sample(SampleEvent),
}

/// Streaming parser over perf script text. Yields records in file order;
/// unparseable candidate lines are dropped with a warning.
pub struct PerfScriptParser<R: BufRead> {
    reader: R,
    mmap2_re: Regex,
    mmap_re: Regex,
    lbr_re: Regex,
    dropped_lines: u64,
}

impl<R: BufRead> PerfScriptParser<R> {
    pub fn new(reader: R) -> Self {
        // Example: PERF_RECORD_MMAP2 1234/1234: [0x1000(0x2000) @ 0 fd:01 123 0]: r-xp /lib/a.so
        let mmap2_re = Regex::new(
            r"PERF_RECORD_MMAP2 \S+: \[(\S+)\((\S+)\) @ (\S+)[^\]]*\]: \S+ (/\S+)",
        )
        .unwrap();
        // Example: PERF_RECORD_MMAP 1234/1234: [0x1000(0x2000) @ 0]: /lib/a.so
        let mmap_re =
            Regex::new(r"PERF_RECORD_MMAP \S+: \[(\S+)\((\S+)\) @ (\S+)[^\]]*\]: (/\S+)").unwrap();
        // Example LBR entry: 0x1400/0x1600/P/-/-/0
        let lbr_re = Regex::new(r"^0x[0-9a-f]+/0x[0-9a-f]+(/[^/\s]+)*$").unwrap();
        Self { reader, mmap2_re, mmap_re, lbr_re, dropped_lines: 0 }
    }

    /// Number of candidate lines dropped as malformed.
    #[must_use]
    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    fn parse_mapping(&self, line: &str) -> Option<MemoryMapping> {
        let captures = self.mmap2_re.captures(line).or_else(|| self.mmap_re.captures(line))?;
        let load_address = parse_hex(&captures[1])?;
        let length = parse_hex(&captures[2])?;
        let file_offset = parse_hex(&captures[3])?;
        Some(MemoryMapping {
            object_file: Arc::from(&captures[4]),
            load_address,
            length,
            file_offset,
        })
    }

    /// A sample line is a bare-hex instruction pointer followed by one or
    /// more `from/to/flags...` branch entries.
    fn parse_sample(&self, line: &str) -> Option<SampleEvent> {
        let mut tokens = line.split_whitespace();
        let ip = parse_bare_hex(tokens.next()?)?;
        let mut branch_stack = Vec::new();
        for token in tokens {
            if !self.lbr_re.is_match(token) {
                return None;
            }
            let mut parts = token.split('/');
            let from = parse_hex(parts.next()?)?;
            let to = parse_hex(parts.next()?)?;
            branch_stack.push(LbrEntry { from, to });
        }
        if branch_stack.is_empty() {
            return None;
        }
        // perf prints the newest branch first; aggregation wants oldest first.
        branch_stack.reverse();
        Some(SampleEvent { ip, branch_stack })
    }

    fn parse_line(&mut self, line: &str) -> Option<PerfRecord> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.contains("PERF_RECORD_MMAP") {
            match self.parse_mapping(trimmed) {
                Some(mapping) => return Some(PerfRecord::Mapping(mapping)),
                None => {
                    warn!("malformed mmap record: {trimmed}");
                    self.dropped_lines += 1;
                    return None;
                }
            }
        }
        if trimmed.starts_with("PERF_RECORD") || trimmed.starts_with('#') {
            return None;
        }
        // Only lines that look like samples (leading bare hex) are candidates.
        let first = trimmed.split_whitespace().next()?;
        if parse_bare_hex(first).is_none() {
            return None;
        }
        match self.parse_sample(trimmed) {
            Some(sample) => Some(PerfRecord::Sample(sample)),
            None => {
                warn!("malformed sample line: {trimmed}");
                self.dropped_lines += 1;
                None
            }
        }
    }
}

impl<R: BufRead> Iterator for PerfScriptParser<R> {
    type Item = PerfRecord;

    fn next(&mut self) -> Option<PerfRecord> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!("read error in perf script input: {err}");
                    return None;
                }
            }
            if let Some(record) = self.parse_line(&line) {
                return Some(record);
            }
        }
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

/// Hex without a `0x` prefix, as perf prints sample instruction pointers.
fn parse_bare_hex(text: &str) -> Option<u64> {
    if text.starts_with("0x") || text.is_empty() {
        return None;
    }
    u64::from_str_radix(text, 16).ok()
}

/// [`SampleSource`] over a perf script text file.
pub struct PerfTextSource {
    parser: PerfScriptParser<BufReader<File>>,
}

impl PerfTextSource {
    pub fn open(path: &Path) -> Result<Self, ProfileError> {
        let file = File::open(path).map_err(|source| ProfileError::BinaryRead {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { parser: PerfScriptParser::new(BufReader::new(file)) })
    }
}

impl SampleSource for PerfTextSource {
    fn read(&mut self) -> Result<SampleProfile, ProfileError> {
        let mut aggregator = LbrAggregator::new();
        for record in &mut self.parser {
            aggregator.ingest(&record);
        }
        let stats = aggregator.stats().clone();
        log_ingest_stats(&stats, self.parser.dropped_lines());
        Ok(aggregator.finish())
    }
}

fn log_ingest_stats(stats: &AggregatorStats, dropped_lines: u64) {
    if dropped_lines > 0 {
        warn!("dropped {dropped_lines} malformed perf script lines");
    }
    if stats.unresolved_ips > 0 {
        warn!("{} sampled instruction pointers missed every mapping", stats.unresolved_ips);
    }
    if stats.dropped_branches > 0 || stats.dropped_ranges > 0 {
        warn!(
            "dropped {} branches and {} ranges with unresolvable endpoints",
            stats.dropped_branches, stats.dropped_ranges
        );
    }
    if stats.cross_object_ranges > 0 {
        warn!("dropped {} ranges spanning object files", stats.cross_object_ranges);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_all(text: &str) -> Vec<PerfRecord> {
        PerfScriptParser::new(Cursor::new(text)).collect()
    }

    #[test]
    fn test_parses_mmap2_record() {
        let records = parse_all(
            "PERF_RECORD_MMAP2 77/77: [0x1000(0x2000) @ 0x400 fd:01 393 0]: r-xp /lib/a.so\n",
        );
        let PerfRecord::Mapping(mapping) = &records[0] else {
            panic!("expected a mapping");
        };
        assert_eq!(mapping.object_file.as_ref(), "/lib/a.so");
        assert_eq!(mapping.load_address, 0x1000);
        assert_eq!(mapping.length, 0x2000);
        assert_eq!(mapping.file_offset, 0x400);
    }

    #[test]
    fn test_parses_legacy_mmap_record() {
        let records = parse_all("PERF_RECORD_MMAP 12/12: [0x5000(0x1000) @ 0]: /bin/tool\n");
        let PerfRecord::Mapping(mapping) = &records[0] else {
            panic!("expected a mapping");
        };
        assert_eq!(mapping.object_file.as_ref(), "/bin/tool");
        assert_eq!(mapping.file_offset, 0);
    }

    #[test]
    fn test_parses_sample_with_branch_stack_oldest_first() {
        let records = parse_all("  1500 0x1400/0x1600/P/-/-/0 0x1000/0x1200/P/-/-/0\n");
        let PerfRecord::Sample(sample) = &records[0] else {
            panic!("expected a sample");
        };
        assert_eq!(sample.ip, 0x1500);
        // Input order (newest first) gets reversed.
        assert_eq!(sample.branch_stack[0], LbrEntry { from: 0x1000, to: 0x1200 });
        assert_eq!(sample.branch_stack[1], LbrEntry { from: 0x1400, to: 0x1600 });
    }

    #[test]
    fn test_skips_noise_and_counts_malformed_lines() {
        let mut parser = PerfScriptParser::new(Cursor::new(
            "# header\n\
             \n\
             find 77 [000] 1.0: 100 cycles:\n\
             1500 not-a-branch-entry\n\
             1500 0x10/0x20/P/-/-/0\n",
        ));
        let records: Vec<_> = parser.by_ref().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(parser.dropped_lines(), 1);
    }

    #[test]
    fn test_ip_only_line_is_not_a_sample() {
        // Without at least one branch entry there is nothing to aggregate.
        let mut parser = PerfScriptParser::new(Cursor::new("1500\n"));
        assert!(parser.by_ref().next().is_none());
        assert_eq!(parser.dropped_lines(), 1);
    }

    #[test]
    fn test_malformed_mmap_is_dropped() {
        let mut parser =
            PerfScriptParser::new(Cursor::new("PERF_RECORD_MMAP2 garbage without brackets\n"));
        assert!(parser.by_ref().next().is_none());
        assert_eq!(parser.dropped_lines(), 1);
    }
}
