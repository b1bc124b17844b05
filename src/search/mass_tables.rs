//! 可达质量位集，用于剪枝质量缺口的探索；以及为未解析通配符确定残基的小型组合索引。

use crate::config::MAX_GAP_WILDCARDS;
use crate::util::amino::{residue_mass, STANDARD_RESIDUES};

use super::modification::ModificationPools;

/// 超过此值的质量和不剪枝
pub const MASS_CEILING: f64 = 800.0;
/// 每 Dalton 的分箱数
const PRECISION: f64 = 1000.0;
/// 分箱质量累加带来的舍入漂移
const SLACK: f64 = 0.005;

#[derive(Debug, Clone)]
struct Bitset {
    words: Vec<u64>,
    bins: usize,
}

impl Bitset {
    fn new(bins: usize) -> Self {
        Self { words: vec![0; (bins + 63) / 64], bins }
    }

    fn set(&mut self, i: usize) {
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    fn union_with(&mut self, other: &Bitset) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= *b;
        }
    }

    /// self |= src << shift，越过末尾分箱的位丢弃
    fn or_shifted(&mut self, src: &Bitset, shift: usize) {
        let (ws, bs) = (shift / 64, shift % 64);
        let n = self.words.len();
        for i in (ws..n).rev() {
            let j = i - ws;
            let mut v = src.words[j] << bs;
            if bs > 0 && j > 0 {
                v |= src.words[j - 1] >> (64 - bs);
            }
            self.words[i] |= v;
        }
        let tail = self.bins % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    /// [lo, hi] 内是否有置位
    fn any_in(&self, lo: usize, hi: usize) -> bool {
        if lo > hi || lo >= self.bins {
            return false;
        }
        let hi = hi.min(self.bins - 1);
        let (wl, wh) = (lo / 64, hi / 64);
        for w in wl..=wh {
            let mut word = self.words[w];
            if w == wl {
                word &= u64::MAX << (lo % 64);
            }
            if w == wh && hi % 64 != 63 {
                word &= (1u64 << (hi % 64 + 1)) - 1;
            }
            if word != 0 {
                return true;
            }
        }
        false
    }
}

fn bin(mass: f64) -> usize {
    (mass * PRECISION).round().max(0.0) as usize
}

/// [`MASS_CEILING`] 以下哪些质量是残基质量之和
#[derive(Debug, Clone)]
pub struct MassLookupTables {
    /// 一个或多个残基之和
    reachable: Bitset,
    /// exact[k - 1]：恰好 k 个残基之和
    exact: Vec<Bitset>,
}

impl MassLookupTables {
    pub fn new(masses: &[f64]) -> Self {
        let bins = bin(MASS_CEILING) + 1;
        let mut level = Bitset::new(bins);
        level.set(0);
        let mut reachable = Bitset::new(bins);
        let mut exact = Vec::new();
        let shifts: Vec<usize> = masses.iter().filter(|&&m| m > 0.0).map(|&m| bin(m)).collect();

        loop {
            let mut next = Bitset::new(bins);
            for &s in &shifts {
                next.or_shifted(&level, s);
            }
            if next.is_empty() {
                break;
            }
            if exact.len() < MAX_GAP_WILDCARDS as usize {
                exact.push(next.clone());
            }
            reachable.union_with(&next);
            level = next;
        }

        Self { reachable, exact }
    }

    fn window(delta: f64, tolerance: f64) -> (usize, usize) {
        let lo = ((delta - tolerance - SLACK) * PRECISION).floor().max(0.0) as usize;
        let hi = ((delta + tolerance + SLACK) * PRECISION).ceil().max(0.0) as usize;
        (lo, hi)
    }

    /// `delta` 可剪枝：超出容差且不是可达的残基组合
    pub fn mass_not_valid(&self, delta: f64, tolerance: f64) -> bool {
        if delta.abs() <= tolerance {
            return false;
        }
        if delta < 0.0 {
            return true;
        }
        if delta > MASS_CEILING {
            return false;
        }
        let (lo, hi) = Self::window(delta, tolerance);
        !self.reachable.any_in(lo, hi)
    }

    /// `delta` 与恰好 `wildcards` 个残基之和匹配
    pub fn within_mass_tolerance(&self, delta: f64, wildcards: u8, tolerance: f64) -> bool {
        if wildcards == 0 {
            return delta.abs() <= tolerance;
        }
        let Some(table) = self.exact.get(wildcards as usize - 1) else {
            return false;
        };
        if delta <= 0.0 || delta > MASS_CEILING + tolerance {
            return false;
        }
        let (lo, hi) = Self::window(delta, tolerance);
        table.any_in(lo, hi)
    }
}

/// 残基组合及其质量和
#[derive(Debug, Clone, PartialEq)]
pub struct MassIndexEntry {
    pub mass: f64,
    pub residues: Vec<u8>,
}

/// 至多 [`MAX_GAP_WILDCARDS`] 个残基的组合，按质量排序
#[derive(Debug, Clone)]
pub struct MassIndex {
    entries: Vec<MassIndexEntry>,
}

impl MassIndex {
    pub(crate) fn new(pools: &ModificationPools) -> Self {
        let residues: Vec<(u8, f64)> = STANDARD_RESIDUES
            .iter()
            .filter_map(|&r| residue_mass(r).map(|m| (r, m + pools.fixed_residue_mass[r])))
            .collect();
        let mut entries = Vec::new();
        let mut stack: Vec<u8> = Vec::new();
        collect_combinations(&residues, 0, 0.0, &mut stack, &mut entries);
        entries.sort_by(|a, b| a.mass.total_cmp(&b.mass));
        Self { entries }
    }

    /// 恰好 `count` 个残基、质量与 `mass` 相差不超过 `tolerance` 的第一个组合
    pub fn resolve(&self, mass: f64, count: usize, tolerance: f64) -> Option<&[u8]> {
        let lo = mass - tolerance - SLACK;
        let start = self.entries.partition_point(|e| e.mass < lo);
        self.entries[start..]
            .iter()
            .take_while(|e| e.mass <= mass + tolerance + SLACK)
            .filter(|e| e.residues.len() == count)
            .min_by(|a, b| (a.mass - mass).abs().total_cmp(&(b.mass - mass).abs()))
            .map(|e| e.residues.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn collect_combinations(
    residues: &[(u8, f64)],
    from: usize,
    mass: f64,
    stack: &mut Vec<u8>,
    out: &mut Vec<MassIndexEntry>,
) {
    if !stack.is_empty() {
        out.push(MassIndexEntry { mass, residues: stack.clone() });
    }
    if stack.len() == MAX_GAP_WILDCARDS as usize {
        return;
    }
    for (i, &(r, m)) in residues.iter().enumerate().skip(from) {
        stack.push(r);
        collect_combinations(residues, i, mass + m, stack, out);
        stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::amino::residues_mass;

    fn tables() -> MassLookupTables {
        let pools = ModificationPools::new(&[]);
        MassLookupTables::new(&pools.effective_masses(&[]))
    }

    #[test]
    fn bitset_shift_and_window() {
        let mut a = Bitset::new(200);
        a.set(3);
        let mut b = Bitset::new(200);
        b.or_shifted(&a, 70);
        assert!(b.any_in(73, 73));
        assert!(!b.any_in(0, 72));
        assert!(!b.any_in(74, 199));
        b.or_shifted(&a, 500);
        assert!(!b.any_in(74, 199));
    }

    #[test]
    fn residue_sums_are_reachable() {
        let t = tables();
        let tol = 0.02;
        assert!(!t.mass_not_valid(residues_mass(b"GG"), tol));
        assert!(!t.mass_not_valid(residues_mass(b"PK"), tol));
        assert!(!t.mass_not_valid(residues_mass(b"WWW"), tol));
        // 低于最轻残基的质量不可达
        assert!(t.mass_not_valid(30.0, tol));
        assert!(t.mass_not_valid(-1.0, tol));
        // 零附近容差内不剪枝
        assert!(!t.mass_not_valid(0.01, tol));
        // 上限以上不剪枝
        assert!(!t.mass_not_valid(MASS_CEILING + 10.0, tol));
    }

    #[test]
    fn exact_counts_are_tracked_per_wildcard() {
        let t = tables();
        let st = residues_mass(b"ST");
        assert!(t.within_mass_tolerance(st, 2, 0.02));
        assert!(!t.within_mass_tolerance(st, 1, 0.02));
        assert!(t.within_mass_tolerance(residues_mass(b"K"), 1, 0.02));
        assert!(!t.within_mass_tolerance(residues_mass(b"GGGGG"), 5, 0.02));
        assert!(t.within_mass_tolerance(0.0, 0, 0.02));
    }

    #[test]
    fn mass_index_resolves_combinations() {
        let pools = ModificationPools::new(&[]);
        let idx = MassIndex::new(&pools);
        // 20 + 210 + 1540 个多重集
        assert_eq!(idx.len(), 1770);
        assert_eq!(idx.resolve(residues_mass(b"W"), 1, 0.01), Some(&b"W"[..]));
        let two = idx.resolve(residues_mass(b"GA"), 2, 0.001).unwrap();
        assert!((residues_mass(two) - residues_mass(b"GA")).abs() < 0.001);
        assert_eq!(idx.resolve(10.0, 1, 0.01), None);
    }
}
