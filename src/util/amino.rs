//! Protein alphabet: residue masses, ambiguity codes and the standard genetic code.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

use crate::config::SequenceMatchingMode;

/// 字符空间大小：所有表均按原始字节码直接索引。
pub const ALPHABET_SIZE: usize = 128;
/// End-of-text marker, unique and lexicographically smallest.
pub const SENTINEL: u8 = b'$';
/// Protein boundary marker, repeated once per protein.
pub const DELIMITER: u8 = b'/';
/// Unknown residue, used both as a query wildcard and as a protein residue.
pub const WILDCARD: u8 = b'X';

/// Average residue mass used to estimate how many residues a mass gap spans.
pub const AVERAGE_RESIDUE_MASS: f64 = 110.0;

/// The 20 standard amino acids.
pub const STANDARD_RESIDUES: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

/// Dense table indexed by character code, one slot per byte of the 7-bit alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteTable<T> {
    slots: Vec<T>,
}

impl<T: Clone> ByteTable<T> {
    pub fn filled(value: T) -> Self {
        Self { slots: vec![value; ALPHABET_SIZE] }
    }
}

impl<T> ByteTable<T> {
    pub fn iter(&self) -> impl Iterator<Item = (u8, &T)> {
        self.slots.iter().enumerate().map(|(c, v)| (c as u8, v))
    }
}

impl<T> Index<u8> for ByteTable<T> {
    type Output = T;

    #[inline]
    fn index(&self, c: u8) -> &T {
        assert!((c as usize) < ALPHABET_SIZE, "character {c:#x} outside the 7-bit alphabet");
        &self.slots[c as usize]
    }
}

impl<T> IndexMut<u8> for ByteTable<T> {
    #[inline]
    fn index_mut(&mut self, c: u8) -> &mut T {
        assert!((c as usize) < ALPHABET_SIZE, "character {c:#x} outside the 7-bit alphabet");
        &mut self.slots[c as usize]
    }
}

#[inline]
pub fn is_residue(c: u8) -> bool {
    c.is_ascii_uppercase()
}

/// Ambiguity codes, each standing for more than one residue.
#[inline]
pub fn is_ambiguous(c: u8) -> bool {
    matches!(c, b'B' | b'Z' | b'J' | WILDCARD)
}

/// Monoisotopic residue mass, `None` for ambiguity codes and non-residues.
pub fn residue_mass(c: u8) -> Option<f64> {
    let m = match c {
        b'A' => 71.037_114,
        b'C' => 103.009_185,
        b'D' => 115.026_943,
        b'E' => 129.042_593,
        b'F' => 147.068_414,
        b'G' => 57.021_464,
        b'H' => 137.058_912,
        b'I' => 113.084_064,
        b'K' => 128.094_963,
        b'L' => 113.084_064,
        b'M' => 131.040_485,
        b'N' => 114.042_927,
        b'O' => 237.147_727,
        b'P' => 97.052_764,
        b'Q' => 128.058_578,
        b'R' => 156.101_111,
        b'S' => 87.032_028,
        b'T' => 101.047_679,
        b'U' => 150.953_636,
        b'V' => 99.068_414,
        b'W' => 186.079_313,
        b'Y' => 163.063_329,
        _ => return None,
    };
    Some(m)
}

/// Residues a protein character may stand for when its mass is needed.
/// `X` has no candidates: its mass is unknown and handled as a wildcard.
pub fn mass_candidates(c: u8) -> &'static [u8] {
    match c {
        b'B' => b"ND",
        b'Z' => b"QE",
        b'J' => b"L",
        b'A' => b"A",
        b'C' => b"C",
        b'D' => b"D",
        b'E' => b"E",
        b'F' => b"F",
        b'G' => b"G",
        b'H' => b"H",
        b'I' => b"I",
        b'K' => b"K",
        b'L' => b"L",
        b'M' => b"M",
        b'N' => b"N",
        b'O' => b"O",
        b'P' => b"P",
        b'Q' => b"Q",
        b'R' => b"R",
        b'S' => b"S",
        b'T' => b"T",
        b'U' => b"U",
        b'V' => b"V",
        b'W' => b"W",
        b'Y' => b"Y",
        _ => b"",
    }
}

/// Sum of residue masses, no terminal groups. Ambiguous residues take their
/// first candidate; `X` contributes nothing.
pub fn residues_mass(residues: &[u8]) -> f64 {
    residues
        .iter()
        .filter_map(|&c| mass_candidates(c).first().and_then(|&r| residue_mass(r)))
        .sum()
}

/// Protein characters a query character `q` may be matched against under `mode`.
///
/// The wildcard itself is not handled here: a query `X` matches everything and the
/// engine expands it with a range query.
pub fn matching_residues(q: u8, mode: SequenceMatchingMode) -> Vec<u8> {
    let mut out = vec![q];
    if mode == SequenceMatchingMode::Exact {
        return out;
    }
    let partners: &[u8] = match q {
        b'B' => b"DN",
        b'D' | b'N' => b"B",
        b'Z' => b"EQ",
        b'E' | b'Q' => b"Z",
        b'J' => b"IL",
        b'I' | b'L' => b"J",
        _ => b"",
    };
    out.extend_from_slice(partners);
    if mode == SequenceMatchingMode::IndistinguishableAminoAcids {
        match q {
            b'I' => out.push(b'L'),
            b'L' => out.push(b'I'),
            _ => {}
        }
    }
    if q != WILDCARD {
        out.push(WILDCARD);
    }
    out
}

// Standard genetic code, codons enumerated with bases in TCAG order.
const CODON_BASES: [u8; 4] = [b'T', b'C', b'A', b'G'];
const CODON_TABLE: &[u8; 64] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

fn translate(codon: [usize; 3]) -> u8 {
    CODON_TABLE[codon[0] * 16 + codon[1] * 4 + codon[2]]
}

/// Amino acids reachable from `from` by a single nucleotide change in any of its codons.
pub fn single_base_neighbours(from: u8) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                let codon = [i, j, k];
                if translate(codon) != from {
                    continue;
                }
                for pos in 0..3 {
                    for base in 0..CODON_BASES.len() {
                        if base == codon[pos] {
                            continue;
                        }
                        let mut mutated = codon;
                        mutated[pos] = base;
                        let aa = translate(mutated);
                        if aa != b'*' && aa != from && !out.contains(&aa) {
                            out.push(aa);
                        }
                    }
                }
            }
        }
    }
    out.sort_unstable();
    out
}
