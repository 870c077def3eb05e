//! Sample ingestion: address-space reconstruction, perf-script parsing,
//! count aggregation, and the persisted text count store.

pub mod address_space;
pub mod aggregator;
pub mod perf_text;
pub mod text_store;

pub use address_space::AddressSpace;
pub use aggregator::{AggregatorStats, LbrAggregator};
pub use perf_text::{LbrEntry, PerfRecord, PerfScriptParser, PerfTextSource, SampleEvent};
pub use text_store::TextStoreSource;

use crate::domain::{ProfileError, SampleProfile};

/// A producer of raw count maps. New sample-log formats plug in here
/// without touching the rest of the pipeline.
pub trait SampleSource {
    /// Consumes the source and produces the three count maps. Not
    /// restartable: the underlying stream position is consumed.
    fn read(&mut self) -> Result<SampleProfile, ProfileError>;
}
