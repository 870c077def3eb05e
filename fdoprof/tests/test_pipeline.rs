//! End-to-end pipeline test: perf script text in, rendered profile out.
//! DWARF resolution is faked so the test controls the inline stacks.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use fdoprof::domain::{ProfileError, SourceInfo, SourceStack};
use fdoprof::export::write_symbol_map;
use fdoprof::profile::{ProfileBuilder, ProfileOptions, SymbolMap};
use fdoprof::sampling::{PerfTextSource, SampleSource};
use fdoprof::symbolization::InlineStackResolver;

struct FakeResolver {
    stacks: HashMap<u64, SourceStack>,
}

impl InlineStackResolver for FakeResolver {
    fn resolve_inline_stack(
        &self,
        _object_file: &str,
        offset: u64,
    ) -> Result<SourceStack, ProfileError> {
        Ok(self.stacks.get(&offset).cloned().unwrap_or_default())
    }
}

fn frame(func: &str, start_line: u32, line: u32) -> SourceInfo {
    SourceInfo {
        func_name: func.to_string(),
        file_name: "main.c".to_string(),
        start_line,
        line,
        ..SourceInfo::default()
    }
}

fn write_perf_log(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn test_perf_log_becomes_a_function_profile() {
    let log = write_perf_log(&[
        "PERF_RECORD_MMAP2 77/77: [0x1000(0x2000) @ 0 fd:01 393 0]: r-xp /lib/a.so",
        "# comment noise",
        // Landed at 0x1200, ran to 0x1400, branched to 0x1600.
        "1500 0x1000/0x1200/P/-/-/0 0x1400/0x1600/P/-/-/0",
        "1500 0x1000/0x1200/P/-/-/0 0x1400/0x1600/P/-/-/0",
        "1500 0x1000/0x1200/P/-/-/0 0x1400/0x1600/P/-/-/0",
    ]);

    let mut source = PerfTextSource::open(log.path()).unwrap();
    let profile = source.read().unwrap();
    // 3 samples, each one fall-through range 0x200-0x400.
    assert_eq!(profile.range_counts.len(), 1);
    assert_eq!(profile.total_samples(), 3);
    assert_eq!(profile.total_count(), 3 * 0x200);

    let mut stacks = HashMap::new();
    for offset in 0x200..=0x400u64 {
        stacks.insert(offset, vec![frame("main", 10, 12)]);
    }
    let resolver = FakeResolver { stacks };

    let mut map = SymbolMap::with_functions("/lib/a.so", &[(0x100, "main", 0x400)]);
    let mut builder = ProfileBuilder::new(&resolver, ProfileOptions::default());
    let stats = builder.compute(&mut map, &profile).unwrap();
    assert_eq!(stats.emitted_functions, 1);
    assert_eq!(stats.unsymbolized_addresses, 0);
    // One query per instruction in the expanded range, memoized thereafter.
    assert_eq!(stats.symbolizer_queries, 0x201);

    let mut out = Vec::new();
    write_symbol_map(&mut out, &map).unwrap();
    let text = String::from_utf8(out).unwrap();
    // 0x201 instructions at count 3 each, all on line 12 of main (delta 2).
    assert!(text.starts_with(&format!("main total:{} head:0\n", 3 * 0x201)), "got: {text}");
    assert!(text.contains(&format!("  2: {}\n", 3 * 0x201)), "got: {text}");
}

#[test]
fn test_address_fallback_without_branch_data() {
    let mut lines = vec!["PERF_RECORD_MMAP 77/77: [0x1000(0x2000) @ 0]: /lib/a.so"];
    // Single-entry stacks yield no fall-through ranges, only addresses and
    // branches. Enough repeats to clear the emission threshold.
    lines.resize(1 + 20, "1500 0x1400/0x1600/P/-/-/0");
    let log = write_perf_log(&lines);

    let mut source = PerfTextSource::open(log.path()).unwrap();
    let profile = source.read().unwrap();
    assert!(profile.range_counts.is_empty());
    assert_eq!(profile.address_counts.len(), 1);
    assert_eq!(profile.total_samples(), 20);

    let mut stacks = HashMap::new();
    stacks.insert(0x500u64, vec![frame("main", 10, 11)]);
    let resolver = FakeResolver { stacks };

    let mut map = SymbolMap::with_functions("/lib/a.so", &[(0x100, "main", 0x500)]);
    let options = ProfileOptions { use_lbr_ranges: false, ..ProfileOptions::default() };
    let mut builder = ProfileBuilder::new(&resolver, options);
    builder.compute(&mut map, &profile).unwrap();

    let mut out = Vec::new();
    write_symbol_map(&mut out, &map).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("main total:20 head:0\n"), "got: {text}");
    assert!(text.contains("  1: 20\n"), "got: {text}");
}
