//! Profile output.

pub mod text;

pub use text::write_symbol_map;
