//! Structured error types for fdoprof
//!
//! Using thiserror for automatic Display implementation and error chaining.
//!
//! Two failure regimes coexist: per-sample losses (unresolvable addresses,
//! malformed log lines, conflicting mappings) are logged and counted but
//! never fatal, while setup failures and malformed persisted profiles abort
//! the run through these types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("failed to read binary {path}: {source}")]
    BinaryRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse object file {path}: {source}")]
    ObjectParse {
        path: String,
        #[source]
        source: object::read::Error,
    },

    #[error("{path} has no sized function symbols")]
    NoFunctionSymbols { path: String },

    #[error("failed to load DWARF debug info from {path}: {source}")]
    DebugInfo {
        path: String,
        #[source]
        source: gimli::Error,
    },

    #[error("range endpoints span object files: {begin} / {end}")]
    CrossObjectRange { begin: String, end: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the persisted count-profile store. Unlike live sample
/// parsing, any malformed record aborts the whole read: the store format is
/// assumed self-consistent.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("line {line}: malformed record count: {text:?}")]
    MalformedCount { line: usize, text: String },

    #[error("line {line}: malformed {section} record: {text:?}")]
    MalformedRecord {
        section: &'static str,
        line: usize,
        text: String,
    },

    #[error("unexpected end of file in {section} section")]
    Truncated { section: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A mapping whose span overlaps an already-inserted mapping. Recoverable:
/// the caller keeps the earlier mapping and drops this one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("mapping of {object_file} at {load_address:#x}(+{length:#x}) overlaps an existing mapping")]
pub struct MappingConflict {
    pub object_file: String,
    pub load_address: u64,
    pub length: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_names_the_line() {
        let err = StoreError::MalformedRecord {
            section: "branch",
            line: 7,
            text: "bogus".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("branch"));
    }

    #[test]
    fn test_mapping_conflict_display() {
        let err = MappingConflict {
            object_file: "/usr/bin/find".to_string(),
            load_address: 0x1000,
            length: 0x2000,
        };
        assert!(err.to_string().contains("/usr/bin/find"));
        assert!(err.to_string().contains("0x1000"));
    }
}
