//! Error types for index construction, persistence and configuration.
//!
//! Pruned search branches are not errors and never show up here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protein sequence containing something other than A-Z / a-z
    #[error("protein '{accession}' contains invalid character {character:?} at position {position}")]
    InvalidResidue { accession: String, character: char, position: usize },

    #[error("malformed FASTA at line {line}: {message}")]
    MalformedFasta { line: usize, message: String },

    #[error("protein database contains no sequences")]
    EmptyDatabase,

    #[error("duplicate accession '{0}'")]
    DuplicateAccession(String),

    #[error("index construction cancelled")]
    Cancelled,

    #[error("invalid variant definition at line {line}: {message}")]
    InvalidVariant { line: usize, message: String },

    #[error("variant refers to unknown accession '{0}'")]
    UnknownAccession(String),

    #[error("variant at {accession}:{position} lies outside the protein (length {length})")]
    VariantOutOfRange { accession: String, position: usize, length: usize },

    #[error("variant at {accession}:{position} expects residue {expected:?} but the protein has {found:?}")]
    VariantMismatch { accession: String, position: usize, expected: char, found: char },

    #[error("invalid index parameter: {0}")]
    InvalidParameter(String),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn invalid_variant(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidVariant { line, message: message.into() }
    }
}
