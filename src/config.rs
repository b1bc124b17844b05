//! Matching rules and index construction parameters.
//!
//! Both are plain serde structs with every field defaulted, so a JSON file only
//! needs to name what it changes:
//!
//! ```json
//! { "sequence_matching": "indistinguishable_amino_acids",
//!   "tolerance": { "value": 10.0, "unit": "ppm" },
//!   "variants": { "strategy": "generic", "max_edits": 1 } }
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::Result;
use crate::index::variant::FixedVariant;
use crate::search::modification::Modification;
use crate::util::amino::{self, ByteTable, AVERAGE_RESIDUE_MASS, STANDARD_RESIDUES};
use crate::util::mass::MassTolerance;

/// Residues beyond this many unresolved wildcards are never tracked inside a mass gap.
pub const MAX_GAP_WILDCARDS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SequenceMatchingMode {
    /// Query residue must equal the protein residue.
    #[default]
    Exact,
    /// Ambiguity codes (B, Z, J, X) match the residues they stand for.
    AminoAcid,
    /// As `AminoAcid`, and I and L are interchangeable.
    IndistinguishableAminoAcids,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum VariantStrategy {
    #[default]
    None,
    /// One budget shared by insertions, deletions and substitutions.
    Generic { max_edits: u8 },
    /// Independent budgets; substitutions restricted by the substitution matrix.
    Specific { max_insertions: u8, max_deletions: u8, max_substitutions: u8 },
    /// Only the variants recorded in the index overlay, at most `max_variants` per peptide.
    Fixed { max_variants: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionMatrix {
    /// Any residue may replace any other.
    #[default]
    All,
    /// Substitutions reachable through one nucleotide change.
    SingleBaseSubstitution,
    /// No substitution is allowed.
    None,
    /// Explicit `(protein residue, peptide residue)` pairs.
    Custom(Vec<(char, char)>),
}

impl SubstitutionMatrix {
    /// Expands the preset into a per-residue bit mask of allowed targets.
    pub fn compile(&self) -> ByteTable<u128> {
        let mut table = ByteTable::filled(0u128);
        match self {
            SubstitutionMatrix::All => {
                for &from in STANDARD_RESIDUES {
                    for &to in STANDARD_RESIDUES {
                        if from != to {
                            table[from] |= 1u128 << to;
                        }
                    }
                }
            }
            SubstitutionMatrix::SingleBaseSubstitution => {
                for &from in STANDARD_RESIDUES {
                    for to in amino::single_base_neighbours(from) {
                        table[from] |= 1u128 << to;
                    }
                }
            }
            SubstitutionMatrix::None => {}
            SubstitutionMatrix::Custom(pairs) => {
                for &(from, to) in pairs {
                    if !from.is_ascii_alphabetic() || !to.is_ascii_alphabetic() {
                        continue;
                    }
                    let (from, to) = (from.to_ascii_uppercase() as u8, to.to_ascii_uppercase() as u8);
                    if from != to {
                        table[from] |= 1u128 << to;
                    }
                }
            }
        }
        table
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingRules {
    pub sequence_matching: SequenceMatchingMode,
    /// Largest share of a query (or of a mass gap's expected residues) that may be wildcards.
    pub max_x_share: f64,
    pub tolerance: MassTolerance,
    pub variants: VariantStrategy,
    pub substitution_matrix: SubstitutionMatrix,
    pub modifications: Vec<Modification>,
    /// Variable and terminal modifications placed per matched peptide.
    pub max_ptms: u8,
    /// Split a trailing mass gap into a K- or R-terminated version.
    pub enzymatic_only: bool,
}

impl Default for MatchingRules {
    fn default() -> Self {
        Self {
            sequence_matching: SequenceMatchingMode::Exact,
            max_x_share: 0.25,
            tolerance: MassTolerance::default(),
            variants: VariantStrategy::None,
            substitution_matrix: SubstitutionMatrix::All,
            modifications: Vec::new(),
            max_ptms: 3,
            enzymatic_only: false,
        }
    }
}

impl MatchingRules {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        let rules = serde_json::from_reader(std::io::BufReader::new(f))?;
        Ok(rules)
    }

    /// Wildcard budget of a literal run of `len` residues.
    pub fn x_limit_for_length(&self, len: usize) -> u8 {
        (self.max_x_share * len as f64).floor().clamp(0.0, u8::MAX as f64) as u8
    }

    /// Wildcard budget of a mass gap, proportional to its expected residue count.
    pub fn x_limit_for_mass(&self, mass: f64) -> u8 {
        let expected = (mass / AVERAGE_RESIDUE_MASS).round();
        let limit = (self.max_x_share * expected).floor().clamp(0.0, u8::MAX as f64) as u8;
        limit.min(MAX_GAP_WILDCARDS)
    }

    /// Short stable digest of the rules, used to key cached results.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let hash = Sha256::digest(&json);
        hash.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// Residues indexed per shard before a new shard is started.
    pub chunk_size: usize,
    /// Suffix array rows kept: one every `2^sampling_shift`.
    pub sampling_shift: u8,
    /// Shard construction threads; 1 builds shards sequentially.
    pub threads: usize,
    pub fixed_variants: Vec<FixedVariant>,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self { chunk_size: 100_000_000, sampling_shift: 3, threads: 1, fixed_variants: Vec::new() }
    }
}
