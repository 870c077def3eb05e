//! # fdoprof
//!
//! Turns sampled CPU profiles (instruction pointers plus LBR branch
//! stacks, as printed by `perf script`) into hierarchical source-level
//! profiles suitable for feedback-directed optimization.
//!
//! The pipeline:
//!
//! ```text
//! perf script text ──> sampling ──> count maps ──> profile ──> export
//!                         │                           │
//!                   address space               symbolization
//! ```
//!
//! [`sampling`] reconstructs the profiled address space and aggregates
//! samples into object-relative count maps; [`profile`] attributes those
//! counts to per-function source positions using the DWARF inline stacks
//! from [`symbolization`]; [`export`] renders the result as text.

pub mod cli;
pub mod domain;
pub mod export;
pub mod profile;
pub mod sampling;
pub mod symbolization;
