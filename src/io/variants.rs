//! Fixed-variant tables: one variant per line, tab separated
//! `accession  position  reference  alternative`, positions 1-based.
//!
//! A `-` reference is an insertion before `position`, a `-` alternative a
//! deletion. Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;

use crate::error::{IndexError, Result};
use crate::index::variant::FixedVariant;
use crate::search::mapping::Variant;

fn residue(field: &str, line: usize) -> Result<Option<u8>> {
    match field.as_bytes() {
        b"-" => Ok(None),
        [c] if c.is_ascii_alphabetic() => Ok(Some(c.to_ascii_uppercase())),
        _ => Err(IndexError::invalid_variant(line, format!("expected one residue or '-', found '{field}'"))),
    }
}

pub fn parse_line(text: &str, line: usize) -> Result<FixedVariant> {
    let fields: Vec<&str> = text.split('\t').map(str::trim).collect();
    let [accession, position, reference, alternative] = fields[..] else {
        return Err(IndexError::invalid_variant(line, format!("expected 4 fields, found {}", fields.len())));
    };
    let position: usize = position
        .parse()
        .ok()
        .filter(|&p| p > 0)
        .ok_or_else(|| IndexError::invalid_variant(line, format!("invalid position '{position}'")))?;

    let variant = match (residue(reference, line)?, residue(alternative, line)?) {
        (Some(from), Some(to)) if from != to => Variant::Substitution { from, to },
        (None, Some(c)) => Variant::Insertion(c),
        (Some(c), None) => Variant::Deletion(c),
        _ => return Err(IndexError::invalid_variant(line, "reference and alternative must differ")),
    };

    Ok(FixedVariant { accession: accession.to_string(), position: position - 1, variant })
}

pub fn read_variants<R: BufRead>(reader: R) -> Result<Vec<FixedVariant>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        out.push(parse_line(trimmed, i + 1)?);
    }
    Ok(out)
}
