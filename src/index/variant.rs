use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::rank::RankBitVector;
use crate::search::mapping::Variant;

/// 某条蛋白上的已知变异，`position` 为蛋白内 0 起始位置。
///
/// 替换和删除作用于 `position` 处的残基；插入把残基放在它之前
/// （`position == len` 表示追加在末尾）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedVariant {
    pub accession: String,
    pub position: usize,
    pub variant: Variant,
}

/// 位于文本位置 `t` 的变异由哪个后缀承载。
///
/// 正向文本：`T[t]` 的替换或删除从后缀 `t + 1` 的行看到（该行 BWT 字符为 `T[t]`）；
/// 在 `T[t]` 前的插入从后缀 `t` 的行看到。内容长度为 `m` 的反向文本上两者都对应后缀 `m - t`。
pub fn marked_suffix(variant: &Variant, t: usize, reversed: bool, content_len: usize) -> usize {
    if reversed {
        return content_len - t;
    }
    match variant {
        Variant::Insertion(_) => t,
        Variant::Deletion(_) | Variant::Substitution { .. } => t + 1,
    }
}

/// 固定变异覆盖层：按 BWT 行标记变异位点，并保存每个位点允许的编辑。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantOverlay {
    marks: RankBitVector,
    /// edits[k]: 第 k 个被标记行上的编辑
    edits: Vec<Vec<Variant>>,
}

impl VariantOverlay {
    /// `sites`：后缀位置 -> 从该行可见的编辑
    pub fn build(sa: &[u32], sites: &HashMap<usize, Vec<Variant>>) -> Self {
        let mut edits = Vec::with_capacity(sites.len());
        let marks: RankBitVector = sa
            .iter()
            .map(|&p| match sites.get(&(p as usize)) {
                Some(v) => {
                    edits.push(v.clone());
                    true
                }
                None => false,
            })
            .collect();
        Self { marks, edits }
    }

    pub fn site_count(&self) -> usize {
        self.edits.len()
    }

    /// [left, right) 内是否有行携带变异
    pub fn any_in(&self, left: usize, right: usize) -> bool {
        self.marks.ones_before(right) > self.marks.ones_before(left)
    }

    /// [left, right) 内被标记的行及其编辑
    pub fn sites_in(&self, left: usize, right: usize) -> impl Iterator<Item = (usize, &[Variant])> + '_ {
        let from = self.marks.ones_before(left);
        let to = self.marks.ones_before(right);
        (from..to).filter_map(move |k| self.marks.select(k + 1, true).map(|row| (row, self.edits[k].as_slice())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sa::build_sa;

    #[test]
    fn marked_suffix_positions() {
        let sub = Variant::Substitution { from: b'A', to: b'G' };
        let ins = Variant::Insertion(b'G');
        assert_eq!(marked_suffix(&sub, 5, false, 20), 6);
        assert_eq!(marked_suffix(&ins, 5, false, 20), 5);
        assert_eq!(marked_suffix(&sub, 5, true, 20), 15);
        assert_eq!(marked_suffix(&ins, 5, true, 20), 15);
    }

    #[test]
    fn overlay_marks_rows_of_sites() {
        let text = b"/MSTAVPK/$";
        let sa = build_sa(text);
        let sub = Variant::Substitution { from: b'A', to: b'G' };
        // 'A' 位于文本位置 4
        let mut sites = HashMap::new();
        sites.insert(marked_suffix(&sub, 4, false, text.len() - 1), vec![sub]);
        let overlay = VariantOverlay::build(&sa, &sites);
        assert_eq!(overlay.site_count(), 1);
        assert!(overlay.any_in(0, sa.len()));

        let hits: Vec<(usize, Vec<Variant>)> = overlay.sites_in(0, sa.len()).map(|(r, v)| (r, v.to_vec())).collect();
        assert_eq!(hits.len(), 1);
        let (row, edits) = &hits[0];
        assert_eq!(sa[*row], 5);
        assert_eq!(text[sa[*row] as usize - 1], b'A');
        assert_eq!(edits, &vec![sub]);
        assert!(!overlay.any_in(0, *row));
        assert!(overlay.sites_in(*row + 1, sa.len()).next().is_none());
    }
}
