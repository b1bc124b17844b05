//! FASTA header metadata. UniProt headers look like
//! `sp|P69905|HBA_HUMAN Hemoglobin subunit alpha OS=Homo sapiens OX=9606 GN=HBA1 PE=1 SV=2`;
//! anything else falls back to "first token is the accession, the rest is the description".

use serde::{Deserialize, Serialize};

/// Accession prefixes and suffixes marking decoy entries.
const DECOY_PREFIXES: [&str; 3] = ["DECOY_", "rev_", "REV_"];
const DECOY_SUFFIX: &str = "_REVERSED";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMetadata {
    pub description: Option<String>,
    pub gene_name: Option<String>,
    /// Organism name (`OS=`).
    pub taxonomy: Option<String>,
    /// Protein existence level (`PE=`), 1 to 5.
    pub protein_evidence: Option<u8>,
}

/// Accession of a header line without the leading `>`.
pub fn parse_accession(header: &str) -> &str {
    let token = header.split_whitespace().next().unwrap_or("");
    let mut fields = token.split('|');
    match (fields.next(), fields.next()) {
        (Some(db), Some(acc)) if matches!(db, "sp" | "tr") && !acc.is_empty() => acc,
        _ => token,
    }
}

pub fn parse_metadata(header: &str) -> HeaderMetadata {
    let rest = header.split_once(char::is_whitespace).map_or("", |(_, r)| r.trim());
    let mut meta = HeaderMetadata::default();

    // find the first KEY= tag, everything before it is the description
    let tags: Vec<(usize, &str)> = ["OS=", "OX=", "GN=", "PE=", "SV="]
        .iter()
        .filter_map(|k| find_tag(rest, k).map(|i| (i, *k)))
        .collect();
    let desc_end = tags.iter().map(|(i, _)| *i).min().unwrap_or(rest.len());
    let desc = rest[..desc_end].trim();
    if !desc.is_empty() {
        meta.description = Some(desc.to_string());
    }

    for &(start, key) in &tags {
        let value_start = start + key.len();
        let value_end = tags
            .iter()
            .map(|(i, _)| *i)
            .filter(|&i| i > start)
            .min()
            .unwrap_or(rest.len());
        let value = rest[value_start..value_end].trim();
        if value.is_empty() {
            continue;
        }
        match key {
            "OS=" => meta.taxonomy = Some(value.to_string()),
            "GN=" => meta.gene_name = Some(value.to_string()),
            "PE=" => meta.protein_evidence = value.parse().ok(),
            _ => {}
        }
    }
    meta
}

/// Offset of ` KEY=` (or `KEY=` at the start) in `s`.
fn find_tag(s: &str, key: &str) -> Option<usize> {
    if s.starts_with(key) {
        return Some(0);
    }
    s.match_indices(key).map(|(i, _)| i).find(|&i| s.as_bytes()[i - 1] == b' ')
}

pub fn is_decoy(accession: &str) -> bool {
    accession.ends_with(DECOY_SUFFIX) || DECOY_PREFIXES.iter().any(|p| accession.starts_with(p))
}
