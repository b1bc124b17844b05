use serde::{Deserialize, Serialize};
use std::fmt;

use super::modification::ModificationMatch;

/// 肽段与蛋白之间的单个编辑。
///
/// 残基以大写 ASCII 字节存储。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// 肽段中有、蛋白中无的残基
    Insertion(u8),
    /// 肽段中缺失的蛋白残基
    Deletion(u8),
    /// 蛋白残基 `from` 在肽段中读作 `to`
    Substitution { from: u8, to: u8 },
}

impl Variant {
    /// 该编辑对（蛋白跨度 - 肽段长度）的贡献
    pub fn length_delta(&self) -> i32 {
        match self {
            Variant::Insertion(_) => -1,
            Variant::Deletion(_) => 1,
            Variant::Substitution { .. } => 0,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Variant::Insertion(c) => write!(f, "+{}", c as char),
            Variant::Deletion(c) => write!(f, "-{}", c as char),
            Variant::Substitution { from, to } => write!(f, "{}>{}", from as char, to as char),
        }
    }
}

/// 定位在肽段 1 起始位置上的变异；删除记在被删蛋白残基之后的肽段残基上。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeptideVariant {
    pub site: usize,
    pub variant: Variant,
}

/// 肽段或标签在蛋白中的一次出现
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub accession: String,
    /// 匹配到的肽段；通配符取蛋白残基，蛋白歧义码取查询残基
    pub peptide: String,
    /// 匹配在蛋白中的起点（0 起始）
    pub offset: usize,
    pub modifications: Vec<ModificationMatch>,
    pub variants: Vec<PeptideVariant>,
}

impl Mapping {
    /// 蛋白跨度减去肽段长度
    pub fn length_delta(&self) -> i32 {
        self.variants.iter().map(|v| v.variant.length_delta()).sum()
    }

    /// 匹配覆盖的蛋白残基数
    pub fn protein_span(&self) -> usize {
        (self.peptide.len() as i64 + self.length_delta() as i64).max(0) as usize
    }

    pub(crate) fn dedup_key(&self) -> (String, String, usize) {
        (self.accession.clone(), self.peptide.clone(), self.offset)
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.accession, self.peptide, self.offset)?;
        let mods: Vec<String> = self.modifications.iter().map(|m| format!("{}@{}", m.name, m.site)).collect();
        write!(f, "\t{}", if mods.is_empty() { "-".to_string() } else { mods.join(",") })?;
        let vars: Vec<String> = self.variants.iter().map(|v| format!("{}@{}", v.variant, v.site)).collect();
        write!(f, "\t{}", if vars.is_empty() { "-".to_string() } else { vars.join(",") })
    }
}

/// 去掉 (accession, peptide, offset) 重复的后续映射
pub fn dedup_mappings(mappings: &mut Vec<Mapping>) {
    let mut seen = std::collections::HashSet::new();
    mappings.retain(|m| seen.insert(m.dedup_key()));
}
