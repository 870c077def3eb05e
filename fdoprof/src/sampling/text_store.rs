//! Persisted text form of the three count maps.
//!
//! Three sections in fixed order: ranges, addresses, branches. Each section
//! opens with a decimal record count followed by exactly that many records:
//!
//! ```text
//! 2
//! 400-410:7
//! 500-520:3
//! 1
//! 500:9
//! 1
//! 410->500:7
//! ```
//!
//! All offsets are unprefixed hex. The store is per object file, so records
//! carry offsets only; the object identity is supplied at read time. Unlike
//! live sample parsing, any malformed record fails the whole read.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::{
    Branch, InstructionLocation, ProfileError, Range, SampleProfile, StoreError,
};

use super::SampleSource;

struct Records<B> {
    lines: Lines<B>,
    line_number: usize,
}

impl<B: BufRead> Records<B> {
    fn next_line(&mut self, section: &'static str) -> Result<(usize, String), StoreError> {
        match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                Ok((self.line_number, line?))
            }
            None => Err(StoreError::Truncated { section }),
        }
    }

    fn record_count(&mut self, section: &'static str) -> Result<usize, StoreError> {
        let (number, text) = self.next_line(section)?;
        text.trim()
            .parse()
            .map_err(|_| StoreError::MalformedCount { line: number, text })
    }
}

/// Reads a stored profile, rebinding every offset to `object_file`.
pub fn read(path: &Path, object_file: &Arc<str>) -> Result<SampleProfile, StoreError> {
    let file = File::open(path)?;
    let mut records = Records { lines: BufReader::new(file).lines(), line_number: 0 };
    let mut profile = SampleProfile::default();

    let loc = |offset| InstructionLocation::new(Arc::clone(object_file), offset);

    for _ in 0..records.record_count("range")? {
        let (number, text) = records.next_line("range")?;
        let parsed = (|| {
            let (span, count) = text.split_once(':')?;
            let (begin, end) = span.split_once('-')?;
            let range = Range::new(loc(parse_offset(begin)?), loc(parse_offset(end)?)).ok()?;
            Some((range, count.trim().parse::<u64>().ok()?))
        })();
        let Some((range, count)) = parsed else {
            return Err(StoreError::MalformedRecord { section: "range", line: number, text });
        };
        *profile.range_counts.entry(range).or_default() += count;
    }

    for _ in 0..records.record_count("address")? {
        let (number, text) = records.next_line("address")?;
        let parsed = (|| {
            let (address, count) = text.split_once(':')?;
            Some((loc(parse_offset(address)?), count.trim().parse::<u64>().ok()?))
        })();
        let Some((address, count)) = parsed else {
            return Err(StoreError::MalformedRecord { section: "address", line: number, text });
        };
        *profile.address_counts.entry(address).or_default() += count;
    }

    for _ in 0..records.record_count("branch")? {
        let (number, text) = records.next_line("branch")?;
        let parsed = (|| {
            let (edge, count) = text.split_once(':')?;
            let (from, to) = edge.split_once("->")?;
            let branch =
                Branch { instruction: loc(parse_offset(from)?), target: loc(parse_offset(to)?) };
            Some((branch, count.trim().parse::<u64>().ok()?))
        })();
        let Some((branch, count)) = parsed else {
            return Err(StoreError::MalformedRecord { section: "branch", line: number, text });
        };
        *profile.branch_counts.entry(branch).or_default() += count;
    }

    Ok(profile)
}

/// Writes the three count maps. Output is deterministic: sections in fixed
/// order, records in map order.
pub fn write(path: &Path, profile: &SampleProfile) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);

    writeln!(out, "{}", profile.range_counts.len())?;
    for (range, count) in &profile.range_counts {
        writeln!(out, "{:x}-{:x}:{count}", range.begin.offset(), range.end.offset())?;
    }

    writeln!(out, "{}", profile.address_counts.len())?;
    for (address, count) in &profile.address_counts {
        writeln!(out, "{:x}:{count}", address.offset())?;
    }

    writeln!(out, "{}", profile.branch_counts.len())?;
    for (branch, count) in &profile.branch_counts {
        writeln!(
            out,
            "{:x}->{:x}:{count}",
            branch.instruction.offset(),
            branch.target.offset()
        )?;
    }

    out.flush()
}

fn parse_offset(text: &str) -> Option<u64> {
    u64::from_str_radix(text.trim(), 16).ok()
}

/// [`SampleSource`] over a stored count profile.
pub struct TextStoreSource {
    path: PathBuf,
    object_file: Arc<str>,
}

impl TextStoreSource {
    #[must_use]
    pub fn new(path: PathBuf, object_file: Arc<str>) -> Self {
        Self { path, object_file }
    }
}

impl SampleSource for TextStoreSource {
    fn read(&mut self) -> Result<SampleProfile, ProfileError> {
        Ok(read(&self.path, &self.object_file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(offset: u64) -> InstructionLocation {
        InstructionLocation::new(Arc::from("a.so"), offset)
    }

    fn sample_profile() -> SampleProfile {
        let mut profile = SampleProfile::default();
        profile.range_counts.insert(Range::new(loc(0x400), loc(0x410)).unwrap(), 7);
        profile.address_counts.insert(loc(0x500), 9);
        profile
            .branch_counts
            .insert(Branch { instruction: loc(0x410), target: loc(0x500) }, 7);
        profile
    }

    #[test]
    fn test_write_then_read_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        let profile = sample_profile();

        write(&path, &profile).unwrap();
        let read_back = read(&path, &Arc::from("a.so")).unwrap();
        assert_eq!(read_back, profile);
    }

    #[test]
    fn test_written_layout_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        write(&path, &sample_profile()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1\n400-410:7\n1\n500:9\n1\n410->500:7\n");
    }

    #[test]
    fn test_malformed_record_names_section_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        std::fs::write(&path, "1\n400-410:7\n1\nnot-a-record\n0\n").unwrap();

        let err = read(&path, &Arc::from("a.so")).unwrap_err();
        let StoreError::MalformedRecord { section, line, .. } = err else {
            panic!("expected malformed record, got {err}");
        };
        assert_eq!(section, "address");
        assert_eq!(line, 4);
    }

    #[test]
    fn test_truncated_store_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        std::fs::write(&path, "2\n400-410:7\n").unwrap();

        let err = read(&path, &Arc::from("a.so")).unwrap_err();
        assert!(matches!(err, StoreError::Truncated { section: "range" }));
    }

    #[test]
    fn test_empty_profile_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        write(&path, &SampleProfile::default()).unwrap();
        let read_back = read(&path, &Arc::from("a.so")).unwrap();
        assert!(read_back.is_empty());
    }
}
