use std::sync::Arc;

use peptide_fm::config::{IndexParams, MatchingRules, VariantStrategy};
use peptide_fm::index::fm::FMIndex;
use peptide_fm::index::variant::FixedVariant;
use peptide_fm::io::fasta::ProteinRecord;
use peptide_fm::search::cache::ShardedTagCache;
use peptide_fm::search::engine::SearchEngine;
use peptide_fm::search::mapping::{Mapping, PeptideVariant, Variant};
use peptide_fm::search::tag::{Tag, TagElement};
use peptide_fm::util::amino::residues_mass;
use peptide_fm::util::mass::MassTolerance;

fn records(proteins: &[(&str, &str)]) -> Vec<peptide_fm::error::Result<ProteinRecord>> {
    proteins
        .iter()
        .map(|(acc, seq)| {
            Ok(ProteinRecord {
                accession: acc.to_string(),
                header: format!("{acc} test protein"),
                sequence: seq.as_bytes().to_vec(),
            })
        })
        .collect()
}

fn index(proteins: &[(&str, &str)], params: &IndexParams) -> FMIndex {
    FMIndex::build(records(proteins), params, None).unwrap()
}

fn hits(ms: &[Mapping]) -> Vec<(String, usize)> {
    let mut v: Vec<_> = ms.iter().map(|m| (m.accession.clone(), m.offset)).collect();
    v.sort();
    v
}

fn gap_tag(n: &[u8], literal: &str, c: &[u8]) -> Tag {
    Tag::new(vec![
        TagElement::mass_gap(residues_mass(n), 0),
        TagElement::sequence(literal, 0),
        TagElement::mass_gap(residues_mass(c), 0),
    ])
}

#[test]
fn peptide_and_tag_find_the_same_protein() {
    let idx = index(&[("P1", "MSTAVPK"), ("P2", "MSTAIPK")], &IndexParams::default());
    let rules = MatchingRules { tolerance: MassTolerance::da(0.02), ..MatchingRules::default() };

    let ms = idx.get_protein_mapping("STAVPK", &rules);
    assert_eq!(hits(&ms), vec![("P1".to_string(), 1)]);
    assert_eq!(ms[0].peptide, "STAVPK");

    let ms = idx.get_tag_mapping(&gap_tag(b"ST", "AV", b"PK"), &rules);
    assert_eq!(hits(&ms), vec![("P1".to_string(), 1)]);
    assert_eq!(ms[0].peptide, "STAVPK");
}

#[test]
fn wildcard_takes_the_protein_residue() {
    let idx = index(&[("P1", "MSTAVPK"), ("P2", "MSTAIPK")], &IndexParams::default());
    let ms = idx.get_protein_mapping("SXAVPK", &MatchingRules::default());
    assert_eq!(hits(&ms), vec![("P1".to_string(), 1)]);
    assert_eq!(ms[0].peptide, "STAVPK");
}

#[test]
fn registered_variant_is_reported_at_its_peptide_site() {
    let params = IndexParams {
        fixed_variants: vec![FixedVariant {
            accession: "P1".into(),
            position: 4,
            variant: Variant::Substitution { from: b'A', to: b'G' },
        }],
        ..IndexParams::default()
    };
    let idx = index(&[("P1", "MKLPAVTR"), ("P2", "GGLPAVTK")], &params);
    let rules = MatchingRules { variants: VariantStrategy::Fixed { max_variants: 1 }, ..MatchingRules::default() };

    let ms = idx.get_protein_mapping("LPGVTR", &rules);
    assert_eq!(hits(&ms), vec![("P1".to_string(), 2)]);
    assert_eq!(ms[0].variants, vec![PeptideVariant { site: 3, variant: Variant::Substitution { from: b'A', to: b'G' } }]);

    // only registered edits are allowed
    assert!(idx.get_protein_mapping("LPCVTR", &rules).is_empty());
    assert!(idx.get_protein_mapping("LPGVTK", &rules).is_empty());
}

#[test]
fn every_substring_is_found_at_its_offset() {
    let proteins = [("A1", "MKWVTFISLLLLFSSAYS"), ("A2", "GHIKLMNPQ"), ("A3", "ACDEFACDEF"), ("A4", "W")];
    let params = IndexParams { chunk_size: 12, sampling_shift: 2, ..IndexParams::default() };
    let idx = index(&proteins, &params);
    assert!(idx.shards().len() > 1);
    let engine = SearchEngine::new(MatchingRules::default());

    for (acc, seq) in proteins {
        assert_eq!(idx.get_sequence(acc).as_deref(), Some(seq));
        for start in 0..seq.len() {
            for end in start + 1..=seq.len() {
                let sub = &seq[start..end];
                assert_eq!(idx.get_subsequence(acc, start, end).as_deref(), Some(sub));
                let ms = idx.map_peptide(sub, &engine);
                assert!(
                    ms.iter().any(|m| m.accession == acc && m.offset == start && m.peptide == sub),
                    "{sub} not found in {acc} at {start}"
                );
                for m in &ms {
                    let target = idx.get_sequence(&m.accession).unwrap();
                    assert_eq!(&target[m.offset..m.offset + sub.len()], sub);
                }
            }
        }
    }
}

#[test]
fn sharding_does_not_change_results() {
    let proteins = [
        ("P1", "MSTAVPKLLGR"),
        ("P2", "GGSTAVPKWW"),
        ("P3", "STAVPK"),
        ("P4", "MKLPAVTR"),
        ("P5", "QQQSTAIPK"),
    ];
    let rules = MatchingRules { variants: VariantStrategy::Generic { max_edits: 1 }, ..MatchingRules::default() };
    let single = index(&proteins, &IndexParams::default());
    let sharded = index(&proteins, &IndexParams { chunk_size: 6, threads: 2, ..IndexParams::default() });
    // P3 alone does not exceed the chunk size and shares a shard with P4
    assert_eq!(sharded.shards().len(), 4);

    let occurrences = |ms: Vec<Mapping>| {
        let mut v: Vec<_> = ms.into_iter().map(|m| (m.accession, m.peptide, m.offset)).collect();
        v.sort();
        v
    };
    for q in ["STAVPK", "STAIPK", "LPAVTR", "GGSTAV"] {
        let a = occurrences(single.get_protein_mapping(q, &rules));
        let b = occurrences(sharded.get_protein_mapping(q, &rules));
        assert!(!a.is_empty(), "query {q}");
        assert_eq!(a, b, "query {q}");
    }
    assert_eq!(sharded.get_accessions(), vec!["P1", "P2", "P3", "P4", "P5"]);
}

#[test]
fn enzymatic_mode_requires_tryptic_end() {
    let idx = index(&[("P1", "MSTAVPK"), ("P2", "MSTAVPGW")], &IndexParams::default());
    let relaxed = MatchingRules::default();
    let tryptic = MatchingRules { enzymatic_only: true, ..MatchingRules::default() };

    let k_tag = gap_tag(b"ST", "AV", b"PK");
    assert_eq!(hits(&idx.get_tag_mapping(&k_tag, &tryptic)), vec![("P1".to_string(), 1)]);

    let g_tag = gap_tag(b"ST", "AV", b"PG");
    assert_eq!(hits(&idx.get_tag_mapping(&g_tag, &relaxed)), vec![("P2".to_string(), 1)]);
    assert!(idx.get_tag_mapping(&g_tag, &tryptic).is_empty());
}

#[test]
fn cached_tags_return_identical_results() {
    let idx = index(&[("P1", "MSTAVPK"), ("P2", "MSTAIPK")], &IndexParams::default());
    let cache = Arc::new(ShardedTagCache::new());
    let engine = SearchEngine::new(MatchingRules::default()).with_cache(Arc::<ShardedTagCache>::clone(&cache));
    let tag = gap_tag(b"ST", "AV", b"PK");

    let first = idx.map_tag(&tag, &engine);
    assert_eq!(cache.len(), 1);
    let second = idx.map_tag(&tag, &engine);
    assert_eq!(first, second);

    // tags of other shapes are never stored
    let open = Tag::new(vec![TagElement::sequence("STAV", 0), TagElement::mass_gap(residues_mass(b"PK"), 0)]);
    assert_eq!(hits(&idx.map_tag(&open, &engine)), vec![("P1".to_string(), 1)]);
    assert_eq!(cache.len(), 1);
}

#[test]
fn tags_parse_from_text() {
    let idx = index(&[("P1", "MSTAVPK"), ("P2", "MSTAIPK")], &IndexParams::default());
    let rules = MatchingRules::default();
    let text = format!("[{:.4}]AI[{:.4}]", residues_mass(b"ST"), residues_mass(b"PK"));
    let tag = Tag::parse(&text, &rules).unwrap();
    assert_eq!(hits(&idx.get_tag_mapping(&tag, &rules)), vec![("P2".to_string(), 1)]);
}
