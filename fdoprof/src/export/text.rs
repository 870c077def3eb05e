//! Text rendering of the function profile.
//!
//! One top-level record per function, hottest first:
//!
//! ```text
//! main total:1550 head:30
//!   4: 300
//!   5.1: 250  handler:200
//!   7: _Z3barv total:1000
//!     2: 1000
//! ```
//!
//! Positions print as `line[.discriminator]: count`; a callsite prints its
//! position, then the inlined callee's record indented one more level.

use std::io::{self, Write};

use crate::profile::symbol_map::{ProfileInfo, Symbol, SymbolMap};

/// Writes every symbol with attributed counts, ordered by descending total
/// count with name as the tiebreak.
pub fn write_symbol_map<W: Write>(out: &mut W, map: &SymbolMap) -> io::Result<()> {
    let mut symbols = map.symbols();
    symbols.sort_by(|a, b| {
        b.total_count.cmp(&a.total_count).then_with(|| a.name.cmp(&b.name))
    });
    for symbol in symbols {
        writeln!(out, "{} total:{} head:{}", symbol.name, symbol.total_count, symbol.head_count)?;
        write_body(out, symbol, 1)?;
    }
    Ok(())
}

fn write_body<W: Write>(out: &mut W, symbol: &Symbol, depth: usize) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    for (&offset, info) in &symbol.pos_counts {
        write!(out, "{indent}{}: {}", position(offset, symbol.start_line), info.count)?;
        write_targets(out, info)?;
        writeln!(out)?;
    }
    for ((offset, _), callee) in &symbol.callsites {
        writeln!(
            out,
            "{indent}{}: {} total:{}",
            position(*offset, symbol.start_line),
            callee.name,
            callee.total_count
        )?;
        write_body(out, callee, depth + 1)?;
    }
    Ok(())
}

/// `line[.discriminator]` recovered from a position offset.
fn position(offset: u32, start_line: u32) -> String {
    let line = (offset >> 16) + start_line;
    let discriminator = offset & 0xffff;
    if discriminator == 0 {
        line.to_string()
    } else {
        format!("{line}.{discriminator}")
    }
}

fn write_targets<W: Write>(out: &mut W, info: &ProfileInfo) -> io::Result<()> {
    let mut targets: Vec<_> = info.target_map.iter().collect();
    targets.sort_by(|(a_name, a_count), (b_name, b_count)| {
        b_count.cmp(a_count).then_with(|| b_name.cmp(a_name))
    });
    for (name, count) in targets {
        write!(out, "  {name}:{count}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceInfo;
    use crate::profile::symbol_map::CountPolicy;

    fn frame(func: &str, start_line: u32, line: u32) -> SourceInfo {
        SourceInfo {
            func_name: func.to_string(),
            file_name: "a.c".to_string(),
            start_line,
            line,
            ..SourceInfo::default()
        }
    }

    fn render(map: &SymbolMap) -> String {
        let mut out = Vec::new();
        write_symbol_map(&mut out, map).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_hottest_function_prints_first() {
        let mut map = SymbolMap::with_functions("a.out", &[(0x400, "foo", 0x100), (0x500, "bar", 0x100)]);
        map.add_symbol("foo");
        map.add_symbol("bar");
        map.add_source_count("foo", &vec![frame("foo", 10, 12)], 5, 0, CountPolicy::Sum);
        map.add_source_count("bar", &vec![frame("bar", 20, 21)], 50, 0, CountPolicy::Sum);

        let text = render(&map);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "bar total:50 head:0");
        assert_eq!(lines[1], "  1: 50");
        assert_eq!(lines[2], "foo total:5 head:0");
        assert_eq!(lines[3], "  2: 5");
    }

    #[test]
    fn test_discriminator_prints_after_line() {
        let mut map = SymbolMap::with_functions("a.out", &[(0x400, "foo", 0x100)]);
        map.add_symbol("foo");
        let mut leaf = frame("foo", 10, 15);
        leaf.discriminator = crate::domain::discriminator::encode_discriminator(3, 1, 0);
        map.add_source_count("foo", &vec![leaf], 7, 0, CountPolicy::Sum);

        let text = render(&map);
        assert!(text.contains("  5.3: 7\n"), "got: {text}");
    }

    #[test]
    fn test_inlined_callee_nests_under_callsite() {
        let mut map = SymbolMap::with_functions("a.out", &[(0x400, "foo", 0x100)]);
        map.add_symbol("foo");
        let stack = vec![frame("bar", 20, 22), frame("foo", 10, 15)];
        map.add_source_count("foo", &stack, 9, 0, CountPolicy::Sum);

        let text = render(&map);
        assert_eq!(text, "foo total:9 head:0\n  5: bar total:9\n    2: 9\n");
    }

    #[test]
    fn test_targets_append_to_position_line() {
        let mut map = SymbolMap::with_functions("a.out", &[(0x400, "foo", 0x100)]);
        map.add_symbol("foo");
        let stack = vec![frame("foo", 10, 12)];
        map.add_source_count("foo", &stack, 5, 0, CountPolicy::Sum);
        map.add_indirect_call_target("foo", &stack, "handler_a", 2);
        map.add_indirect_call_target("foo", &stack, "handler_b", 3);

        let text = render(&map);
        assert!(text.contains("  2: 5  handler_b:3  handler_a:2\n"), "got: {text}");
    }
}
