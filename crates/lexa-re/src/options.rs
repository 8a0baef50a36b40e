use bitflags::bitflags;
use thiserror::Error;

use crate::alphabet::Alphabet;

bitflags! {
    /// Generator options as selected by the user, before conflict resolution.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Options: u8 {
        /// partition the alphabet into equivalence classes
        const CHR_CLASSES = 1;
        /// full code-point alphabet instead of bytes
        const UNICODE = 1 << 1;
        const CASE_AGNOSTIC = 1 << 2;
        const MINIMIZE = 1 << 3;
        /// two-level class map
        const COMPRESS_MAP = 1 << 4;
        /// default + exceptions per state row
        const COMPRESS_NEXT = 1 << 5;
        /// merge identical columns into meta-classes as well
        const SQUEEZE = 1 << 6;
    }
}

impl Options {
    pub fn defaults(unicode: bool) -> Options {
        let base = Options::MINIMIZE | Options::COMPRESS_NEXT;
        if unicode {
            base | Options::UNICODE | Options::CHR_CLASSES | Options::COMPRESS_MAP
        } else {
            base
        }
    }

    pub fn resolve(self) -> Result<Config, ConfigError> {
        let alphabet = if self.contains(Options::UNICODE) {
            Alphabet::Unicode
        } else {
            Alphabet::Byte
        };

        if alphabet == Alphabet::Unicode && !self.contains(Options::CHR_CLASSES) {
            return Err(ConfigError::UnicodeWithoutClasses);
        }

        let compression = if self.contains(Options::SQUEEZE) {
            Compression::Squeeze
        } else if self.contains(Options::COMPRESS_NEXT) {
            Compression::RowCompressed
        } else {
            Compression::Uncompressed
        };

        Ok(Config {
            partition: PartitionConfig {
                alphabet,
                classes: self.contains(Options::CHR_CLASSES),
                case_agnostic: self.contains(Options::CASE_AGNOSTIC),
            },
            nfa: NfaConfig {
                alphabet,
                case_agnostic: self.contains(Options::CASE_AGNOSTIC),
            },
            minimize: self.contains(Options::MINIMIZE),
            table: TableConfig {
                compression,
                compress_map: self.contains(Options::COMPRESS_MAP),
            },
        })
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::defaults(false)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the unicode alphabet requires character classes")]
    UnicodeWithoutClasses,
}

/// Resolved, immutable configuration. Each stage takes only its own slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub partition: PartitionConfig,
    pub nfa: NfaConfig,
    pub minimize: bool,
    pub table: TableConfig,
}

impl Config {
    pub fn alphabet(&self) -> Alphabet {
        self.partition.alphabet
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConfig {
    pub alphabet: Alphabet,
    pub classes: bool,
    pub case_agnostic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NfaConfig {
    pub alphabet: Alphabet,
    pub case_agnostic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Compression {
    Uncompressed,
    RowCompressed,
    Squeeze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    pub compression: Compression,
    pub compress_map: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_defaults() {
        let config = Options::default().resolve().unwrap();
        assert_eq!(config.alphabet(), Alphabet::Byte);
        assert!(!config.partition.classes);
        assert!(config.minimize);
        assert_eq!(config.table.compression, Compression::RowCompressed);
        assert!(!config.table.compress_map);
    }

    #[test]
    fn unicode_defaults_compress_the_map() {
        let config = Options::defaults(true).resolve().unwrap();
        assert_eq!(config.alphabet(), Alphabet::Unicode);
        assert!(config.partition.classes);
        assert!(config.table.compress_map);
    }

    #[test]
    fn unicode_needs_classes() {
        let options = Options::UNICODE | Options::MINIMIZE;
        assert_eq!(options.resolve(), Err(ConfigError::UnicodeWithoutClasses));
    }

    #[test]
    fn squeeze_wins_over_row_compression() {
        let options = Options::COMPRESS_NEXT | Options::SQUEEZE;
        assert_eq!(options.resolve().unwrap().table.compression, Compression::Squeeze);
        assert_eq!(Options::empty().resolve().unwrap().table.compression, Compression::Uncompressed);
    }
}
