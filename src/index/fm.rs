use anyhow::{bail, Context};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::shard::{check_sampling_shift, IndexShard};
use super::variant::FixedVariant;
use crate::config::{IndexParams, MatchingRules};
use crate::error::{IndexError, Result};
use crate::io::fasta::{FastaReader, ProteinRecord};
use crate::io::header::{is_decoy, parse_metadata, HeaderMetadata};
use crate::search::engine::{merge_shard_results, SearchEngine};
use crate::search::mapping::Mapping;
use crate::search::tag::{Tag, TagElement};

const MAGIC: [u8; 4] = *b"PFMI";
const FORMAT_VERSION: u32 = 1;

/// 蛋白质在索引中的定位信息（取代 contig 表）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessionRecord {
    pub accession: String,
    /// 原始 FASTA 头（不含 `>`）
    pub header: String,
    pub shard: usize,
    /// 分片内的蛋白质序号
    pub protein: usize,
    pub delimiter_row: usize,
    /// 第一个残基在分片文本中的位置
    pub start: usize,
    pub len: usize,
    pub metadata: HeaderMetadata,
}

/// 索引元信息（可选，向后兼容旧索引文件）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// 构建时使用的 FASTA 文件路径
    pub reference_file: Option<String>,
    /// 构建时间（RFC 3339）
    pub build_timestamp: Option<String>,
    /// SHA-256(FASTA 字节 + 构建参数)，用于判断 sidecar 是否过期
    pub fingerprint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    magic: [u8; 4],
    version: u32,
    fingerprint: Option<String>,
}

/// 蛋白质 FM 索引：若干自包含分片 + 按 accession 的元数据表。
///
/// 构建完成后只读；查询可在多个线程间共享同一实例。
#[derive(Debug, Serialize, Deserialize)]
pub struct FMIndex {
    params: IndexParams,
    shards: Vec<IndexShard>,
    /// 按输入顺序排列
    records: Vec<AccessionRecord>,
    by_accession: HashMap<String, usize>,
    decoys: BTreeSet<String>,
    meta: IndexMeta,
}

fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Relaxed))
}

impl FMIndex {
    /// 从蛋白质记录流构建索引。
    ///
    /// 累计残基数超过 `chunk_size` 时切出一个分片；`cancel` 在每条记录之间检查。
    pub fn build<I>(records: I, params: &IndexParams, cancel: Option<&AtomicBool>) -> Result<Self>
    where
        I: IntoIterator<Item = Result<ProteinRecord>>,
    {
        check_sampling_shift(params.sampling_shift)?;
        let mut chunks: Vec<Vec<ProteinRecord>> = Vec::new();
        let mut current = Vec::new();
        let mut current_len = 0usize;
        let mut seen = HashSet::new();

        for record in records {
            if cancelled(cancel) {
                return Err(IndexError::Cancelled);
            }
            let record = record?;
            if !seen.insert(record.accession.clone()) {
                return Err(IndexError::DuplicateAccession(record.accession));
            }
            current_len += record.sequence.len();
            current.push(record);
            if current_len > params.chunk_size {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        if chunks.is_empty() {
            return Err(IndexError::EmptyDatabase);
        }

        // 变异按所属分片分组
        let shard_of: HashMap<&str, usize> = chunks
            .iter()
            .enumerate()
            .flat_map(|(i, chunk)| chunk.iter().map(move |r| (r.accession.as_str(), i)))
            .collect();
        let mut per_shard: Vec<Vec<FixedVariant>> = vec![Vec::new(); chunks.len()];
        for v in &params.fixed_variants {
            let shard = *shard_of
                .get(v.accession.as_str())
                .ok_or_else(|| IndexError::UnknownAccession(v.accession.clone()))?;
            per_shard[shard].push(v.clone());
        }

        let build_one =
            |(id, chunk): (usize, &Vec<ProteinRecord>)| IndexShard::build(id, chunk, &per_shard[id], params.sampling_shift);
        let shards: Vec<IndexShard> = if params.threads > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(params.threads).build() {
                Ok(pool) => pool.install(|| chunks.par_iter().enumerate().map(build_one).collect::<Result<Vec<_>>>())?,
                Err(e) => {
                    warn!(error = %e, "thread pool unavailable, using the global pool");
                    chunks.par_iter().enumerate().map(build_one).collect::<Result<Vec<_>>>()?
                }
            }
        } else {
            chunks.iter().enumerate().map(build_one).collect::<Result<Vec<_>>>()?
        };

        if cancelled(cancel) {
            return Err(IndexError::Cancelled);
        }

        let mut entries = Vec::with_capacity(seen.len());
        let mut by_accession = HashMap::with_capacity(seen.len());
        let mut decoys = BTreeSet::new();
        for (chunk, shard) in chunks.iter().zip(&shards) {
            for (protein, (record, entry)) in chunk.iter().zip(shard.proteins()).enumerate() {
                if is_decoy(&record.accession) {
                    decoys.insert(record.accession.clone());
                }
                by_accession.insert(record.accession.clone(), entries.len());
                entries.push(AccessionRecord {
                    accession: record.accession.clone(),
                    header: record.header.clone(),
                    shard: shard.id(),
                    protein,
                    delimiter_row: entry.delimiter_row,
                    start: entry.offset,
                    len: entry.len,
                    metadata: parse_metadata(&record.header),
                });
            }
        }

        info!(
            proteins = entries.len(),
            shards = shards.len(),
            decoys = decoys.len(),
            variants = params.fixed_variants.len(),
            "protein index built"
        );

        Ok(Self {
            params: params.clone(),
            shards,
            records: entries,
            by_accession,
            decoys,
            meta: IndexMeta {
                build_timestamp: Some(chrono::Utc::now().to_rfc3339()),
                ..IndexMeta::default()
            },
        })
    }

    pub fn from_fasta(path: &Path, params: &IndexParams, cancel: Option<&AtomicBool>) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        let mut index = Self::build(FastaReader::new(BufReader::new(f)), params, cancel)?;
        index.meta.reference_file = Some(path.display().to_string());
        Ok(index)
    }

    /// 打开 `fasta` 对应的索引：sidecar 指纹一致则直接加载，否则重建并写回。
    pub fn open(fasta: &Path, params: &IndexParams, cancel: Option<&AtomicBool>) -> anyhow::Result<Self> {
        let fingerprint = Self::fingerprint(fasta, params)?;
        let sidecar = Self::sidecar_path(fasta);

        if sidecar.exists() {
            match Self::load_matching(&sidecar, &fingerprint) {
                Ok(index) => {
                    info!(path = %sidecar.display(), shards = index.shards.len(), "index loaded");
                    return Ok(index);
                }
                Err(e) => warn!(path = %sidecar.display(), error = %e, "stale or unreadable index, rebuilding"),
            }
        }

        let mut index = Self::from_fasta(fasta, params, cancel)
            .with_context(|| format!("failed to index {}", fasta.display()))?;
        index.meta.fingerprint = Some(fingerprint);
        if let Err(e) = index.save_to_file(&sidecar) {
            warn!(path = %sidecar.display(), error = %e, "could not write index");
        }
        Ok(index)
    }

    /// `proteins.fasta` -> `proteins.fmi`
    pub fn sidecar_path(fasta: &Path) -> PathBuf {
        fasta.with_extension("fmi")
    }

    pub fn fingerprint(fasta: &Path, params: &IndexParams) -> anyhow::Result<String> {
        let mut hasher = Sha256::new();
        let mut f = std::fs::File::open(fasta).with_context(|| format!("cannot open {}", fasta.display()))?;
        let mut buf = vec![0u8; 1 << 16];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        hasher.update(serde_json::to_vec(params)?);
        Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let f = std::fs::File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        let header = FileHeader { magic: MAGIC, version: FORMAT_VERSION, fingerprint: self.meta.fingerprint.clone() };
        bincode::serialize_into(&mut w, &header)?;
        bincode::serialize_into(&mut w, self)?;
        info!(path = %path.display(), shards = self.shards.len(), "index saved");
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let (_, index) = Self::read_sidecar(path, None)?;
        Ok(index)
    }

    fn load_matching(path: &Path, fingerprint: &str) -> anyhow::Result<Self> {
        let (_, index) = Self::read_sidecar(path, Some(fingerprint))?;
        Ok(index)
    }

    fn read_sidecar(path: &Path, expected: Option<&str>) -> anyhow::Result<(FileHeader, Self)> {
        let f = std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        let mut r = BufReader::new(f);
        let header: FileHeader = bincode::deserialize_from(&mut r).context("unreadable index header")?;
        if header.magic != MAGIC {
            bail!("{} is not a protein index", path.display());
        }
        if header.version != FORMAT_VERSION {
            bail!("index format version {} is not supported (expected {FORMAT_VERSION})", header.version);
        }
        if let Some(expected) = expected {
            if header.fingerprint.as_deref() != Some(expected) {
                bail!("fingerprint mismatch");
            }
        }
        let index: Self = bincode::deserialize_from(&mut r).context("corrupt index body")?;
        Ok((header, index))
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn shards(&self) -> &[IndexShard] {
        &self.shards
    }

    pub fn protein_count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, accession: &str) -> Option<&AccessionRecord> {
        self.by_accession.get(accession).map(|&i| &self.records[i])
    }

    // ── 查询 ──────────────────────────────────────────

    /// `rules` 下 `peptide` 在各蛋白中的全部位置。
    ///
    /// 每次调用都会重新编译规则；批量查询请持有 [`SearchEngine`] 并调用
    /// [`FMIndex::map_peptide`]。
    pub fn get_protein_mapping(&self, peptide: &str, rules: &MatchingRules) -> Vec<Mapping> {
        self.map_peptide(peptide, &SearchEngine::new(rules.clone()))
    }

    pub fn map_peptide(&self, peptide: &str, engine: &SearchEngine) -> Vec<Mapping> {
        let per_shard = self.shards.par_iter().map(|s| engine.map_peptide(s, peptide)).collect();
        merge_shard_results(per_shard)
    }

    pub fn get_tag_mapping(&self, tag: &Tag, rules: &MatchingRules) -> Vec<Mapping> {
        self.map_tag(tag, &SearchEngine::new(rules.clone()))
    }

    pub fn map_tag(&self, tag: &Tag, engine: &SearchEngine) -> Vec<Mapping> {
        let key = engine.cache().and_then(|_| engine.cache_key(tag));
        if let (Some(cache), Some(key)) = (engine.cache(), key.as_deref()) {
            if let Some(hit) = cache.get(key) {
                debug!(tag = %tag, "tag served from cache");
                return hit;
            }
        }

        let queries = self.tag_queries(tag, engine.rules());
        let per_shard: Vec<Vec<Mapping>> = queries
            .iter()
            .flat_map(|q| self.shards.par_iter().map(|s| engine.map_tag(s, q)).collect::<Vec<_>>())
            .collect();
        let out = merge_shard_results(per_shard);

        if let (Some(cache), Some(key)) = (engine.cache(), key) {
            cache.put(key, out.clone());
        }
        out
    }

    /// 酶切模式下，末尾缺口的最后一个残基固定为 K 或 R。
    fn tag_queries(&self, tag: &Tag, rules: &MatchingRules) -> Vec<Tag> {
        if !rules.enzymatic_only {
            return vec![tag.clone()];
        }
        let Some(TagElement::MassGap { mass, .. }) = tag.elements.last() else {
            return vec![tag.clone()];
        };
        let tolerance = rules.tolerance.to_da(*mass);
        let split: Vec<Tag> = [b'K', b'R'].iter().filter_map(|&r| tag.with_trailing_residue(r, tolerance)).collect();
        if split.is_empty() {
            vec![tag.clone()]
        } else {
            split
        }
    }

    // ── 元数据 ────────────────────────────────────────

    pub fn get_sequence(&self, accession: &str) -> Option<String> {
        let rec = self.record(accession)?;
        let seq = self.shards[rec.shard].sequence(rec.protein)?;
        String::from_utf8(seq).ok()
    }

    /// 蛋白的 `[start, end)` 残基，0 起始。
    pub fn get_subsequence(&self, accession: &str, start: usize, end: usize) -> Option<String> {
        let rec = self.record(accession)?;
        if start > end || end > rec.len {
            return None;
        }
        let seq = self.shards[rec.shard].subsequence(rec.protein, start, end)?;
        String::from_utf8(seq).ok()
    }

    pub fn get_header(&self, accession: &str) -> Option<&str> {
        self.record(accession).map(|r| r.header.as_str())
    }

    pub fn get_description(&self, accession: &str) -> Option<&str> {
        self.record(accession)?.metadata.description.as_deref()
    }

    pub fn get_gene_name(&self, accession: &str) -> Option<&str> {
        self.record(accession)?.metadata.gene_name.as_deref()
    }

    pub fn get_taxonomy(&self, accession: &str) -> Option<&str> {
        self.record(accession)?.metadata.taxonomy.as_deref()
    }

    pub fn get_protein_evidence(&self, accession: &str) -> Option<u8> {
        self.record(accession)?.metadata.protein_evidence
    }

    /// 按数据库顺序的 accession
    pub fn get_accessions(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.accession.as_str()).collect()
    }

    /// 诱饵 accession，已排序
    pub fn get_decoy_accessions(&self) -> Vec<&str> {
        self.decoys.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(accession: &str, sequence: &str) -> Result<ProteinRecord> {
        Ok(ProteinRecord {
            accession: accession.into(),
            header: format!("sp|{accession}|TEST_HUMAN Test protein OS=Homo sapiens GN=TST PE=2"),
            sequence: sequence.as_bytes().to_vec(),
        })
    }

    fn small_index(params: &IndexParams) -> FMIndex {
        let records = vec![record("P1", "MKSTAVPKLLQ"), record("P2", "AAAKSTAVPK"), record("REV_P3", "QLLKPVATSKM")];
        FMIndex::build(records, params, None).unwrap()
    }

    #[test]
    fn chunking_splits_shards() {
        let params = IndexParams { chunk_size: 5, sampling_shift: 1, ..IndexParams::default() };
        let idx = small_index(&params);
        assert_eq!(idx.shards().len(), 3);
        assert_eq!(idx.record("P2").unwrap().shard, 1);
        assert_eq!(idx.get_sequence("REV_P3").as_deref(), Some("QLLKPVATSKM"));
    }

    #[test]
    fn duplicate_and_empty_inputs_are_rejected() {
        let params = IndexParams::default();
        let dup = vec![record("P1", "MK"), record("P1", "AK")];
        assert!(matches!(FMIndex::build(dup, &params, None), Err(IndexError::DuplicateAccession(a)) if a == "P1"));
        assert!(matches!(FMIndex::build(Vec::new(), &params, None), Err(IndexError::EmptyDatabase)));
    }

    #[test]
    fn unknown_variant_accession_is_rejected() {
        let params = IndexParams {
            fixed_variants: vec![FixedVariant {
                accession: "NOPE".into(),
                position: 0,
                variant: crate::search::mapping::Variant::Deletion(b'M'),
            }],
            ..IndexParams::default()
        };
        assert!(matches!(
            FMIndex::build(vec![record("P1", "MK")], &params, None),
            Err(IndexError::UnknownAccession(a)) if a == "NOPE"
        ));
    }

    #[test]
    fn oversized_sampling_shift_is_rejected() {
        for shift in [32u8, 64, u8::MAX] {
            let params = IndexParams { sampling_shift: shift, ..IndexParams::default() };
            let result = FMIndex::build(vec![record("P1", "MKSTAVPK")], &params, None);
            assert!(matches!(result, Err(IndexError::InvalidParameter(_))), "shift {shift}");
        }
        let params = IndexParams { sampling_shift: 31, ..IndexParams::default() };
        let idx = FMIndex::build(vec![record("P1", "MKSTAVPK")], &params, None).unwrap();
        assert_eq!(idx.get_protein_mapping("STAV", &MatchingRules::default()).len(), 1);
    }

    #[test]
    fn cancellation_stops_construction() {
        let flag = AtomicBool::new(true);
        let result = FMIndex::build(vec![record("P1", "MK")], &IndexParams::default(), Some(&flag));
        assert!(matches!(result, Err(IndexError::Cancelled)));
    }

    #[test]
    fn metadata_getters() {
        let idx = small_index(&IndexParams::default());
        assert_eq!(idx.get_accessions(), vec!["P1", "P2", "REV_P3"]);
        assert_eq!(idx.get_decoy_accessions(), vec!["REV_P3"]);
        assert_eq!(idx.get_gene_name("P1"), Some("TST"));
        assert_eq!(idx.get_taxonomy("P1"), Some("Homo sapiens"));
        assert_eq!(idx.get_protein_evidence("P1"), Some(2));
        assert_eq!(idx.get_description("P1"), Some("Test protein"));
        assert_eq!(idx.get_subsequence("P1", 2, 6).as_deref(), Some("STAV"));
        assert_eq!(idx.get_subsequence("P1", 6, 20), None);
        assert_eq!(idx.get_header("missing"), None);
    }

    #[test]
    fn mapping_spans_shards() {
        let params = IndexParams { chunk_size: 5, ..IndexParams::default() };
        let idx = small_index(&params);
        let hits = idx.get_protein_mapping("STAVPK", &MatchingRules::default());
        let found: Vec<(&str, usize)> = hits.iter().map(|m| (m.accession.as_str(), m.offset)).collect();
        assert_eq!(found, vec![("P1", 2), ("P2", 4)]);
    }
}
