//! Source positions and inline stacks.

use std::fmt;

use super::discriminator;

/// One source position, as reported by the inline-stack resolver.
///
/// `start_line` is the declaration line of the surrounding function; profile
/// offsets are encoded relative to it so that the profile survives code
/// motion above the function.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub func_name: String,
    pub dir_name: String,
    pub file_name: String,
    pub start_line: u32,
    pub line: u32,
    pub discriminator: u32,
}

impl SourceInfo {
    /// The position key used throughout the symbol map:
    /// `(line - start_line) << 16 | base_discriminator`.
    #[must_use]
    pub fn offset(&self) -> u32 {
        (self.line.wrapping_sub(self.start_line) << 16)
            | (discriminator::base_discriminator(self.discriminator) & 0xffff)
    }

    /// Replication multiplicity of this position's source line.
    #[must_use]
    pub fn duplication_factor(&self) -> u32 {
        discriminator::duplication_factor(self.discriminator)
    }

    #[must_use]
    pub fn relative_path(&self) -> String {
        if !self.dir_name.is_empty() {
            format!("{}/{}", self.dir_name, self.file_name)
        } else {
            self.file_name.clone()
        }
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.func_name, self.relative_path(), self.line)
    }
}

/// Inline stack for one instruction, innermost (leaf) frame first.
pub type SourceStack = Vec<SourceInfo>;
