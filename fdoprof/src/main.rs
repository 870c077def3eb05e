//! # fdoprof - Main Entry Point
//!
//! Two operational modes:
//! - **Profile** (default): read a sample log, attribute counts to source
//!   positions, write the function profile.
//! - **Merge** (`--merge-into <FILE>`): fold the sample log's raw counts
//!   into a persisted count store for later profile builds.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use fdoprof::cli::{Args, Profiler};
use fdoprof::domain::SampleProfile;
use fdoprof::export::write_symbol_map;
use fdoprof::profile::{CountPolicy, ProfileBuilder, ProfileOptions, SymbolMap};
use fdoprof::sampling::{text_store, PerfTextSource, SampleSource, TextStoreSource};
use fdoprof::symbolization::{DwarfResolver, SymbolIndex};

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    let args = Args::parse();

    let index = SymbolIndex::from_binary(&args.binary)
        .with_context(|| format!("failed to index {}", args.binary.display()))?;
    let object_file = Arc::clone(index.object_file());

    let mut source: Box<dyn SampleSource> = match args.profiler {
        Profiler::Perf => Box::new(PerfTextSource::open(&args.profile)?),
        Profiler::Text => {
            Box::new(TextStoreSource::new(args.profile.clone(), Arc::clone(&object_file)))
        }
    };
    let profile = source
        .read()
        .with_context(|| format!("failed to read {}", args.profile.display()))?;
    info!(
        "read {} address, {} range, {} branch records",
        profile.address_counts.len(),
        profile.range_counts.len(),
        profile.branch_counts.len()
    );

    if let Some(store_path) = &args.merge_into {
        // The store carries bare offsets, so only counts belonging to the
        // profiled binary can go in.
        let incoming = restrict_to_object(&profile, &object_file);
        let mut merged = if store_path.exists() {
            text_store::read(store_path, &object_file)
                .with_context(|| format!("failed to read {}", store_path.display()))?
        } else {
            SampleProfile::default()
        };
        merged.merge_from(&incoming);
        text_store::write(store_path, &merged)
            .with_context(|| format!("failed to write {}", store_path.display()))?;
        info!("merged counts into {}", store_path.display());
        return Ok(());
    }

    let mut map = SymbolMap::from_index(&index);
    let resolver = DwarfResolver::new();
    let options = ProfileOptions {
        use_lbr_ranges: !args.no_lbr,
        sample_threshold_frac: args.sample_threshold_frac,
        count_policy: if args.max_policy { CountPolicy::Max } else { CountPolicy::Sum },
    };
    let mut builder = ProfileBuilder::new(&resolver, options);
    let stats = builder.compute(&mut map, &profile)?;
    info!(
        "attributed counts to {} functions ({} keys unattributed, {} addresses unsymbolized, {} symbolizer queries)",
        stats.emitted_functions,
        stats.unattributed_keys,
        stats.unsymbolized_addresses,
        stats.symbolizer_queries
    );
    map.validate();

    match &args.out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            write_symbol_map(&mut out, &map)?;
            out.flush()?;
        }
        None => {
            let stdout = io::stdout();
            write_symbol_map(&mut stdout.lock(), &map)?;
        }
    }
    Ok(())
}

fn restrict_to_object(profile: &SampleProfile, object_file: &str) -> SampleProfile {
    let basename = |path: &str| path.rsplit('/').next().unwrap_or(path).to_string();
    let target = basename(object_file);
    let mut restricted = SampleProfile::default();
    for (loc, &count) in &profile.address_counts {
        if basename(loc.object_file()) == target {
            restricted.address_counts.insert(loc.clone(), count);
        }
    }
    for (range, &count) in &profile.range_counts {
        if basename(range.begin.object_file()) == target {
            restricted.range_counts.insert(range.clone(), count);
        }
    }
    for (branch, &count) in &profile.branch_counts {
        if basename(branch.instruction.object_file()) == target {
            restricted.branch_counts.insert(branch.clone(), count);
        }
    }
    restricted
}
