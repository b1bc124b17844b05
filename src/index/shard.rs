use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::bwt::{build_bwt, sample_suffix_array};
use super::sa::build_sa;
use super::variant::{marked_suffix, FixedVariant, VariantOverlay};
use super::wavelet::WaveletTree;
use crate::error::{IndexError, Result};
use crate::io::fasta::ProteinRecord;
use crate::search::mapping::Variant;
use crate::util::amino::{DELIMITER, SENTINEL};

/// 分片内蛋白质的位置信息（取代 contig 表）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinEntry {
    pub accession: String,
    /// 第一个残基在分片文本中的位置
    pub offset: usize,
    pub len: usize,
    /// 终止分隔符（文本位置 offset + len）所在的 BWT 行
    pub delimiter_row: usize,
}

/// 文本位置以 u32 存储，采样间隔不能超过 2^31。
pub const MAX_SAMPLING_SHIFT: u8 = 31;

/// 一个自包含的索引分片。
///
/// 文本布局为 `/P1/P2/.../Pn/$`；反向结构建立在 `Pn/.../P1/` 反转后再接 `$`
/// 的文本上，用于从左向右扩展。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShard {
    id: usize,
    text_len: usize,
    sampling_shift: u8,
    primary: WaveletTree,
    reversed: WaveletTree,
    /// sampled_sa[k] = SA[k << sampling_shift]
    sampled_sa: Vec<u32>,
    proteins: Vec<ProteinEntry>,
    primary_variants: Option<VariantOverlay>,
    reverse_variants: Option<VariantOverlay>,
    /// (文本位置, 变异)，有序
    fixed_sites: Vec<(usize, Variant)>,
}

fn check_variant(entry: &ProteinEntry, text: &[u8], v: &FixedVariant) -> Result<()> {
    let in_range = match v.variant {
        Variant::Insertion(_) => v.position <= entry.len,
        _ => v.position < entry.len,
    };
    if !in_range {
        return Err(IndexError::VariantOutOfRange {
            accession: v.accession.clone(),
            position: v.position,
            length: entry.len,
        });
    }
    let expected = match v.variant {
        Variant::Substitution { from, .. } => from,
        Variant::Deletion(c) => c,
        Variant::Insertion(_) => return Ok(()),
    };
    let found = text[entry.offset + v.position];
    if found != expected {
        return Err(IndexError::VariantMismatch {
            accession: v.accession.clone(),
            position: v.position,
            expected: expected as char,
            found: found as char,
        });
    }
    Ok(())
}

pub fn check_sampling_shift(shift: u8) -> Result<()> {
    if shift > MAX_SAMPLING_SHIFT {
        return Err(IndexError::InvalidParameter(format!(
            "sampling shift {shift} exceeds {MAX_SAMPLING_SHIFT}"
        )));
    }
    Ok(())
}

impl IndexShard {
    /// 在 `records` 上构建分片 `id`。`variants` 只能引用本分片的蛋白，
    /// 未知 accession 由调用方报错。
    pub fn build(id: usize, records: &[ProteinRecord], variants: &[FixedVariant], sampling_shift: u8) -> Result<Self> {
        check_sampling_shift(sampling_shift)?;
        let total: usize = records.iter().map(|r| r.sequence.len() + 1).sum();
        let mut text: Vec<u8> = Vec::with_capacity(total + 2);
        let mut proteins = Vec::with_capacity(records.len());

        for rec in records {
            text.push(DELIMITER);
            let offset = text.len();
            for (position, &c) in rec.sequence.iter().enumerate() {
                if !c.is_ascii_alphabetic() {
                    return Err(IndexError::InvalidResidue {
                        accession: rec.accession.clone(),
                        character: c as char,
                        position,
                    });
                }
                text.push(c.to_ascii_uppercase());
            }
            proteins.push(ProteinEntry {
                accession: rec.accession.clone(),
                offset,
                len: rec.sequence.len(),
                delimiter_row: 0,
            });
        }
        text.push(DELIMITER);
        text.push(SENTINEL);
        let n = text.len();
        let content_len = n - 1;

        let by_accession: HashMap<&str, usize> =
            proteins.iter().enumerate().map(|(i, p)| (p.accession.as_str(), i)).collect();
        let mut primary_sites: HashMap<usize, Vec<Variant>> = HashMap::new();
        let mut reverse_sites: HashMap<usize, Vec<Variant>> = HashMap::new();
        let mut fixed_sites = Vec::with_capacity(variants.len());
        for v in variants {
            let Some(&pi) = by_accession.get(v.accession.as_str()) else {
                return Err(IndexError::UnknownAccession(v.accession.clone()));
            };
            let entry = &proteins[pi];
            check_variant(entry, &text, v)?;
            let t = entry.offset + v.position;
            primary_sites.entry(marked_suffix(&v.variant, t, false, content_len)).or_default().push(v.variant);
            reverse_sites.entry(marked_suffix(&v.variant, t, true, content_len)).or_default().push(v.variant);
            fixed_sites.push((t, v.variant));
        }
        fixed_sites.sort_unstable_by_key(|&(t, v)| (t, v.to_string()));
        fixed_sites.dedup();

        // 正向：SA -> BWT -> 小波树
        let sa = build_sa(&text);
        let terminal: HashMap<usize, usize> =
            proteins.iter().enumerate().map(|(i, p)| (p.offset + p.len, i)).collect();
        for (row, &p) in sa.iter().enumerate() {
            if let Some(&pi) = terminal.get(&(p as usize)) {
                proteins[pi].delimiter_row = row;
            }
        }
        let primary = WaveletTree::build(&build_bwt(&text, &sa));
        let sampled_sa = sample_suffix_array(&sa, sampling_shift);
        let primary_variants = (!primary_sites.is_empty()).then(|| VariantOverlay::build(&sa, &primary_sites));
        drop(sa);

        // 反向
        let mut rtext: Vec<u8> = text[..content_len].iter().rev().copied().collect();
        rtext.push(SENTINEL);
        let rsa = build_sa(&rtext);
        let reversed = WaveletTree::build(&build_bwt(&rtext, &rsa));
        let reverse_variants = (!reverse_sites.is_empty()).then(|| VariantOverlay::build(&rsa, &reverse_sites));

        debug!(shard = id, proteins = proteins.len(), text_len = n, variants = fixed_sites.len(), "shard built");

        Ok(Self {
            id,
            text_len: n,
            sampling_shift,
            primary,
            reversed,
            sampled_sa,
            proteins,
            primary_variants,
            reverse_variants,
            fixed_sites,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn text_len(&self) -> usize {
        self.text_len
    }

    pub fn proteins(&self) -> &[ProteinEntry] {
        &self.proteins
    }

    pub fn primary(&self) -> &WaveletTree {
        &self.primary
    }

    pub fn reversed(&self) -> &WaveletTree {
        &self.reversed
    }

    pub fn primary_variants(&self) -> Option<&VariantOverlay> {
        self.primary_variants.as_ref()
    }

    pub fn reverse_variants(&self) -> Option<&VariantOverlay> {
        self.reverse_variants.as_ref()
    }

    /// 文本位置：LF 回溯到采样行后加上步数。
    pub fn text_position(&self, row: usize) -> usize {
        let mask = (1usize << self.sampling_shift) - 1;
        let mut row = row;
        let mut steps = 0usize;
        while row & mask != 0 {
            row = self.primary.lf(row);
            steps += 1;
        }
        (self.sampled_sa[row >> self.sampling_shift] as usize + steps) % self.text_len
    }

    /// 文本位置 -> (蛋白下标, 蛋白内偏移)；分隔符与哨兵返回 `None`。
    pub fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        let i = self.proteins.partition_point(|p| p.offset <= pos);
        let p = self.proteins.get(i.checked_sub(1)?)?;
        (pos < p.offset + p.len).then(|| (i - 1, pos - p.offset))
    }

    /// 从蛋白末尾分隔符沿 BWT 反向走，重建蛋白 `index` 的 `[start, end)` 残基。
    pub fn subsequence(&self, index: usize, start: usize, end: usize) -> Option<Vec<u8>> {
        let p = self.proteins.get(index)?;
        if start > end || end > p.len {
            return None;
        }
        let mut row = p.delimiter_row;
        for _ in end..p.len {
            row = self.primary.lf(row);
        }
        let mut out = Vec::with_capacity(end - start);
        for _ in start..end {
            let (c, rank) = self.primary.character_and_rank_at(row);
            out.push(c);
            row = self.primary.less(c) as usize + rank;
        }
        out.reverse();
        Some(out)
    }

    pub fn sequence(&self, index: usize) -> Option<Vec<u8>> {
        let len = self.proteins.get(index)?.len;
        self.subsequence(index, 0, len)
    }

    /// 文本位置 `pos` 上是否登记了 `variant`
    pub fn has_fixed_variant(&self, pos: usize, variant: &Variant) -> bool {
        let start = self.fixed_sites.partition_point(|&(t, _)| t < pos);
        self.fixed_sites[start..].iter().take_while(|&&(t, _)| t == pos).any(|(_, v)| v == variant)
    }

    /// 后缀起于蛋白边界的行区间
    pub fn delimiter_interval(&self, reversed: bool) -> Option<(usize, usize)> {
        let tree = if reversed { &self.reversed } else { &self.primary };
        tree.single_character_range_query(0, tree.len(), DELIMITER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sa::build_sa;

    fn record(accession: &str, seq: &str) -> ProteinRecord {
        ProteinRecord { accession: accession.into(), header: accession.into(), sequence: seq.as_bytes().to_vec() }
    }

    fn shard(shift: u8) -> IndexShard {
        let records = vec![record("P1", "MSTAVPK"), record("P2", "mstaipk"), record("P3", "GGXK")];
        IndexShard::build(0, &records, &[], shift).unwrap()
    }

    #[test]
    fn text_positions_match_full_suffix_array() {
        let text = b"/MSTAVPK/MSTAIPK/GGXK/$";
        let sa = build_sa(text);
        for shift in [0u8, 1, 3] {
            let s = shard(shift);
            assert_eq!(s.text_len(), text.len());
            for (row, &p) in sa.iter().enumerate() {
                assert_eq!(s.text_position(row), p as usize, "row {row} shift {shift}");
            }
        }
    }

    #[test]
    fn sequences_round_trip() {
        let s = shard(3);
        assert_eq!(s.sequence(0).unwrap(), b"MSTAVPK");
        assert_eq!(s.sequence(1).unwrap(), b"MSTAIPK");
        assert_eq!(s.sequence(2).unwrap(), b"GGXK");
        assert_eq!(s.subsequence(0, 1, 4).unwrap(), b"STA");
        assert_eq!(s.subsequence(1, 7, 7).unwrap(), b"");
        assert!(s.subsequence(0, 3, 9).is_none());
        assert!(s.sequence(3).is_none());
    }

    #[test]
    fn locate_skips_delimiters() {
        let s = shard(3);
        assert_eq!(s.locate(0), None);
        assert_eq!(s.locate(1), Some((0, 0)));
        assert_eq!(s.locate(7), Some((0, 6)));
        assert_eq!(s.locate(8), None);
        assert_eq!(s.locate(9), Some((1, 0)));
        assert_eq!(s.locate(22), None);
    }

    #[test]
    fn invalid_residue_is_rejected() {
        let err = IndexShard::build(0, &[record("P1", "MST*K")], &[], 3).unwrap_err();
        assert!(matches!(err, IndexError::InvalidResidue { character: '*', position: 3, .. }));
    }

    #[test]
    fn fixed_variants_are_checked_and_recorded() {
        let records = vec![record("P1", "MSTAVPKLLGR")];
        let sub = FixedVariant { accession: "P1".into(), position: 3, variant: Variant::Substitution { from: b'A', to: b'G' } };
        let s = IndexShard::build(0, &records, &[sub.clone()], 3).unwrap();
        assert!(s.has_fixed_variant(4, &sub.variant));
        assert!(!s.has_fixed_variant(3, &sub.variant));
        assert_eq!(s.primary_variants().map(VariantOverlay::site_count), Some(1));
        assert_eq!(s.reverse_variants().map(VariantOverlay::site_count), Some(1));

        let wrong = FixedVariant { variant: Variant::Substitution { from: b'V', to: b'G' }, ..sub.clone() };
        assert!(matches!(IndexShard::build(0, &records, &[wrong], 3), Err(IndexError::VariantMismatch { .. })));
        let far = FixedVariant { position: 11, ..sub };
        assert!(matches!(IndexShard::build(0, &records, &[far], 3), Err(IndexError::VariantOutOfRange { .. })));
    }
}
