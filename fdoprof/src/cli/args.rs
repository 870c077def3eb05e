//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Input format of the sample log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profiler {
    /// `perf script --show-mmap-events` text output.
    Perf,
    /// A previously written count-profile text file.
    Text,
}

#[derive(Parser)]
#[command(
    name = "fdoprof",
    about = "Convert sampled LBR profiles into source-level feedback profiles",
    after_help = "\
EXAMPLES:
    fdoprof --binary ./app --profile perf.txt -o app.prof
    fdoprof --binary ./app --profile counts.txt --profiler text
    fdoprof --binary ./app --profile perf.txt --merge-into counts.txt"
)]
pub struct Args {
    /// The profiled binary, with symbols and DWARF debug info
    #[arg(short, long)]
    pub binary: PathBuf,

    /// Sample log to consume
    #[arg(short, long)]
    pub profile: PathBuf,

    /// Format of the sample log
    #[arg(long, value_enum, default_value_t = Profiler::Perf)]
    pub profiler: Profiler,

    /// Write the function profile here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Merge raw counts into this store instead of building a profile
    #[arg(long, value_name = "FILE", conflicts_with = "out")]
    pub merge_into: Option<PathBuf>,

    /// Attribute counts from raw sampled addresses, ignoring LBR ranges
    #[arg(long)]
    pub no_lbr: bool,

    /// Fraction of total counts below which a function is dropped
    #[arg(long, default_value_t = 5e-6)]
    pub sample_threshold_frac: f64,

    /// Keep the largest count seen at each position instead of the sum
    #[arg(long)]
    pub max_policy: bool,
}
