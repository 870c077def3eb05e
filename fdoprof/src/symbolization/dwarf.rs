//! DWARF-based inline-stack resolution.
//!
//! addr2line handles the heavy lifting (inline frame recovery from
//! `DW_TAG_inlined_subroutine` trees), but two inputs it does not surface
//! are read straight from the DWARF up front: per-address discriminators
//! from the line programs, and per-function declaration lines from the
//! subprogram DIEs. Both are indexed once per object file and consulted on
//! every query.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use addr2line::Context;
use gimli::{EndianRcSlice, Reader as _, RunTimeEndian};
use log::{debug, trace};
use object::{Object, ObjectSection, ObjectSegment};
use rustc_demangle::demangle;

use crate::domain::{ProfileError, SourceInfo, SourceStack};

type Reader = EndianRcSlice<RunTimeEndian>;

/// Maps an object-relative file offset to the inline stack of source
/// positions at that instruction, innermost frame first. An empty stack
/// means no line information covers the offset.
pub trait InlineStackResolver {
    fn resolve_inline_stack(
        &self,
        object_file: &str,
        offset: u64,
    ) -> Result<SourceStack, ProfileError>;
}

struct Segment {
    vaddr: u64,
    file_offset: u64,
    file_size: u64,
}

struct ObjectContext {
    ctx: Context<Reader>,
    segments: Vec<Segment>,
    /// Line-table discriminator per instruction address.
    line_hints: BTreeMap<u64, u32>,
    /// `DW_AT_decl_line` per function linkage name.
    decl_lines: HashMap<String, u32>,
}

/// Inline-stack resolver over DWARF debug info, with one cached context per
/// object file.
#[derive(Default)]
pub struct DwarfResolver {
    contexts: RefCell<HashMap<String, Rc<ObjectContext>>>,
}

impl DwarfResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn context_for(&self, object_file: &str) -> Result<Rc<ObjectContext>, ProfileError> {
        if let Some(ctx) = self.contexts.borrow().get(object_file) {
            return Ok(Rc::clone(ctx));
        }
        let ctx = Rc::new(ObjectContext::load(Path::new(object_file))?);
        self.contexts.borrow_mut().insert(object_file.to_string(), Rc::clone(&ctx));
        Ok(ctx)
    }
}

impl InlineStackResolver for DwarfResolver {
    fn resolve_inline_stack(
        &self,
        object_file: &str,
        offset: u64,
    ) -> Result<SourceStack, ProfileError> {
        let ctx = self.context_for(object_file)?;
        Ok(ctx.resolve(offset))
    }
}

impl ObjectContext {
    fn load(path: &Path) -> Result<Self, ProfileError> {
        let display = path.display().to_string();
        let data = fs::read(path)
            .map_err(|source| ProfileError::BinaryRead { path: display.clone(), source })?;
        let file = object::File::parse(&*data)
            .map_err(|source| ProfileError::ObjectParse { path: display.clone(), source })?;

        let segments = file
            .segments()
            .map(|seg| {
                let (file_offset, file_size) = seg.file_range();
                Segment { vaddr: seg.address(), file_offset, file_size }
            })
            .collect();

        let endian =
            if file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };
        let load_section = |id: gimli::SectionId| -> Result<Reader, gimli::Error> {
            let section = file
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..]));
            Ok(EndianRcSlice::new(Rc::from(&*section), endian))
        };

        let debug_info =
            |source: gimli::Error| ProfileError::DebugInfo { path: display.clone(), source };

        // Two loads of the same Rc-backed sections: one for the raw walks,
        // one consumed by addr2line.
        let dwarf = gimli::Dwarf::load(&load_section).map_err(debug_info)?;
        let (line_hints, decl_lines) = index_debug_info(&dwarf).map_err(debug_info)?;
        let dwarf = gimli::Dwarf::load(&load_section).map_err(debug_info)?;
        let ctx = Context::from_dwarf(dwarf).map_err(debug_info)?;

        debug!(
            "loaded debug info for {display}: {} line rows, {} function decls",
            line_hints.len(),
            decl_lines.len()
        );

        Ok(Self { ctx, segments, line_hints, decl_lines })
    }

    fn to_vaddr(&self, offset: u64) -> Option<u64> {
        self.segments
            .iter()
            .find(|seg| offset >= seg.file_offset && offset < seg.file_offset + seg.file_size)
            .map(|seg| seg.vaddr + (offset - seg.file_offset))
    }

    /// The discriminator of the line-table row covering `vaddr`.
    fn discriminator_at(&self, vaddr: u64) -> u32 {
        self.line_hints.range(..=vaddr).next_back().map_or(0, |(_, &disc)| disc)
    }

    fn resolve(&self, offset: u64) -> SourceStack {
        let Some(vaddr) = self.to_vaddr(offset) else {
            return SourceStack::new();
        };

        let mut stack = SourceStack::new();
        let Ok(mut frames) = self.ctx.find_frames(vaddr).skip_all_loads() else {
            return stack;
        };
        while let Ok(Some(frame)) = frames.next() {
            let func_name = frame
                .function
                .as_ref()
                .and_then(|name| name.raw_name().ok())
                .map(|name| name.to_string())
                .unwrap_or_default();
            let (dir_name, file_name) = frame
                .location
                .as_ref()
                .and_then(|loc| loc.file)
                .map_or_else(
                    || (String::new(), String::new()),
                    |file| match file.rsplit_once('/') {
                        Some((dir, base)) => (dir.to_string(), base.to_string()),
                        None => (String::new(), file.to_string()),
                    },
                );
            let line = frame.location.as_ref().and_then(|loc| loc.line).unwrap_or(0);
            let start_line = self.decl_lines.get(&func_name).copied().unwrap_or(0);
            // Discriminators belong to instructions, so only the leaf frame
            // carries one; inlined caller frames sit at call sites.
            let discriminator =
                if stack.is_empty() { self.discriminator_at(vaddr) } else { 0 };

            trace!("frame at {vaddr:#x}: {:#} line {line}", demangle(&func_name));
            stack.push(SourceInfo {
                func_name,
                dir_name,
                file_name,
                start_line,
                line,
                discriminator,
            });
        }
        stack
    }
}

/// One pass over the compilation units collecting what addr2line does not
/// expose: line-row discriminators and subprogram declaration lines.
fn index_debug_info(
    dwarf: &gimli::Dwarf<Reader>,
) -> Result<(BTreeMap<u64, u32>, HashMap<String, u32>), gimli::Error> {
    let mut line_hints = BTreeMap::new();
    let mut decl_lines = HashMap::new();

    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;

        if let Some(program) = unit.line_program.clone() {
            let mut rows = program.rows();
            while let Some((_, row)) = rows.next_row()? {
                if row.end_sequence() {
                    continue;
                }
                #[allow(clippy::cast_possible_truncation)]
                line_hints.insert(row.address(), row.discriminator() as u32);
            }
        }

        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            let name = entry
                .attr_value(gimli::DW_AT_linkage_name)?
                .or(entry.attr_value(gimli::DW_AT_name)?)
                .and_then(|value| dwarf.attr_string(&unit, value).ok())
                .and_then(|name| name.to_string_lossy().ok().map(Cow::into_owned));
            let decl_line =
                entry.attr_value(gimli::DW_AT_decl_line)?.and_then(|value| value.udata_value());
            if let (Some(name), Some(line)) = (name, decl_line) {
                #[allow(clippy::cast_possible_truncation)]
                decl_lines.insert(name, line as u32);
            }
        }
    }

    Ok((line_hints, decl_lines))
}
