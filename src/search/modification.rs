//! 修饰定义，以及搜索引擎取用修饰的候选池。

use serde::{Deserialize, Serialize};

use crate::util::amino::{residue_mass, ByteTable, STANDARD_RESIDUES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModificationTarget {
    Residue { residue: char },
    ProteinNTerm { residue: Option<char> },
    ProteinCTerm { residue: Option<char> },
    PeptideNTerm { residue: Option<char> },
    PeptideCTerm { residue: Option<char> },
}

impl ModificationTarget {
    pub fn is_protein_terminal(&self) -> bool {
        matches!(self, ModificationTarget::ProteinNTerm { .. } | ModificationTarget::ProteinCTerm { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub name: String,
    /// 质量偏移（Dalton）
    pub mass: f64,
    pub target: ModificationTarget,
    #[serde(default)]
    pub fixed: bool,
}

impl Modification {
    pub fn fixed(name: &str, mass: f64, target: ModificationTarget) -> Self {
        Self { name: name.to_string(), mass, target, fixed: true }
    }

    pub fn variable(name: &str, mass: f64, target: ModificationTarget) -> Self {
        Self { name: name.to_string(), mass, target, fixed: false }
    }
}

/// 匹配肽段上的修饰，`site` 为 1 起始的残基位置
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationMatch {
    pub name: String,
    pub site: usize,
    pub variable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminus {
    N,
    C,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TerminalCandidate {
    pub index: usize,
    pub mass: f64,
    residue: Option<u8>,
    /// 仅当肽段端点就是蛋白端点时有效
    pub protein: bool,
    pub fixed: bool,
}

impl TerminalCandidate {
    fn applies_to(&self, residue: u8) -> bool {
        self.residue.map_or(true, |r| r == residue)
    }
}

/// 规则集中的修饰，按引擎可放置的位置分组
#[derive(Debug, Clone)]
pub(crate) struct ModificationPools {
    /// 固定残基修饰的质量和，总是计入
    pub fixed_residue_mass: ByteTable<f64>,
    /// 每个残基上可变修饰的下标
    pub variable_residue: ByteTable<Vec<usize>>,
    n_term: Vec<TerminalCandidate>,
    c_term: Vec<TerminalCandidate>,
}

fn residue_byte(c: Option<char>) -> Option<u8> {
    c.filter(char::is_ascii_alphabetic).map(|c| c.to_ascii_uppercase() as u8)
}

impl ModificationPools {
    pub fn new(modifications: &[Modification]) -> Self {
        let mut fixed_residue_mass = ByteTable::filled(0.0f64);
        let mut variable_residue: ByteTable<Vec<usize>> = ByteTable::filled(Vec::new());
        let mut n_term: Vec<TerminalCandidate> = Vec::new();
        let mut c_term: Vec<TerminalCandidate> = Vec::new();

        for (index, m) in modifications.iter().enumerate() {
            let candidate = |residue: Option<char>, protein: bool| TerminalCandidate {
                index,
                mass: m.mass,
                residue: residue_byte(residue),
                protein,
                fixed: m.fixed,
            };
            match m.target {
                ModificationTarget::Residue { residue } => {
                    let Some(r) = residue_byte(Some(residue)) else { continue };
                    if m.fixed {
                        fixed_residue_mass[r] += m.mass;
                    } else {
                        variable_residue[r].push(index);
                    }
                }
                ModificationTarget::ProteinNTerm { residue } => n_term.push(candidate(residue, true)),
                ModificationTarget::PeptideNTerm { residue } => n_term.push(candidate(residue, false)),
                ModificationTarget::ProteinCTerm { residue } => c_term.push(candidate(residue, true)),
                ModificationTarget::PeptideCTerm { residue } => c_term.push(candidate(residue, false)),
            }
        }

        // 固定优先于可变，指定残基优先于通用，蛋白端优先于肽段端
        for pool in [&mut n_term, &mut c_term] {
            pool.sort_by_key(|c| (!c.fixed, c.residue.is_none(), !c.protein));
        }

        Self { fixed_residue_mass, variable_residue, n_term, c_term }
    }

    fn pool(&self, terminus: Terminus) -> &[TerminalCandidate] {
        match terminus {
            Terminus::N => &self.n_term,
            Terminus::C => &self.c_term,
        }
    }

    /// 适用于 `residue` 的末端修饰，按优先顺序
    pub fn terminal_candidates(
        &self,
        terminus: Terminus,
        residue: u8,
        at_protein_boundary: bool,
    ) -> impl Iterator<Item = &TerminalCandidate> + '_ {
        self.pool(terminus)
            .iter()
            .filter(move |c| (!c.protein || at_protein_boundary) && c.applies_to(residue))
    }

    pub fn has_terminal(&self, terminus: Terminus) -> bool {
        !self.pool(terminus).is_empty()
    }

    pub fn has_protein_terminal(&self, terminus: Terminus) -> bool {
        self.pool(terminus).iter().any(|c| c.protein)
    }

    /// `residue` 作为蛋白首（N）或末（C）残基时，必须带上的固定蛋白末端修饰是否存在
    pub fn requires_protein_terminal(&self, terminus: Terminus, residue: u8) -> bool {
        self.pool(terminus).iter().any(|c| c.protein && c.fixed && c.applies_to(residue))
    }

    /// 缺口可由哪些残基质量组成：标准残基加固定修饰，再各加一个可变修饰
    pub fn effective_masses(&self, modifications: &[Modification]) -> Vec<f64> {
        let mut masses = Vec::new();
        for &r in STANDARD_RESIDUES {
            let Some(base) = residue_mass(r) else { continue };
            let m = base + self.fixed_residue_mass[r];
            masses.push(m);
            for &i in &self.variable_residue[r] {
                masses.push(m + modifications[i].mass);
            }
        }
        masses.sort_by(f64::total_cmp);
        masses.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
        masses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<Modification> {
        vec![
            Modification::variable("Acetyl", 42.010_565, ModificationTarget::PeptideNTerm { residue: None }),
            Modification::fixed("Carbamidomethyl", 57.021_464, ModificationTarget::Residue { residue: 'C' }),
            Modification::variable("Oxidation", 15.994_915, ModificationTarget::Residue { residue: 'M' }),
            Modification::variable("Acetyl-M", 42.010_565, ModificationTarget::ProteinNTerm { residue: Some('M') }),
            Modification::fixed("TMT", 229.162_932, ModificationTarget::PeptideNTerm { residue: None }),
            Modification::variable("Amidated", -0.984_016, ModificationTarget::ProteinCTerm { residue: None }),
        ]
    }

    #[test]
    fn pools_split_by_target() {
        let mods = rules();
        let pools = ModificationPools::new(&mods);
        assert!((pools.fixed_residue_mass[b'C'] - 57.021_464).abs() < 1e-9);
        assert_eq!(pools.variable_residue[b'M'], vec![2]);
        assert!(pools.has_terminal(Terminus::C));
        assert!(pools.has_protein_terminal(Terminus::C));
        assert!(pools.has_protein_terminal(Terminus::N));
    }

    #[test]
    fn only_fixed_protein_terminals_are_required() {
        let mut mods = rules();
        assert!(!ModificationPools::new(&mods).requires_protein_terminal(Terminus::N, b'M'));
        mods.push(Modification::fixed("Acetyl-A", 42.010_565, ModificationTarget::ProteinNTerm { residue: Some('A') }));
        let pools = ModificationPools::new(&mods);
        assert!(pools.requires_protein_terminal(Terminus::N, b'A'));
        assert!(!pools.requires_protein_terminal(Terminus::N, b'M'));
        assert!(!pools.requires_protein_terminal(Terminus::C, b'A'));
        assert!(ModificationTarget::ProteinCTerm { residue: None }.is_protein_terminal());
        assert!(!ModificationTarget::PeptideNTerm { residue: None }.is_protein_terminal());
    }

    #[test]
    fn terminal_candidates_are_ordered() {
        let mods = rules();
        let pools = ModificationPools::new(&mods);
        let at_boundary: Vec<usize> = pools.terminal_candidates(Terminus::N, b'M', true).map(|c| c.index).collect();
        // 先固定 TMT，再 M 专属的蛋白乙酰化，最后通用肽段乙酰化
        assert_eq!(at_boundary, vec![4, 3, 0]);
        let inside: Vec<usize> = pools.terminal_candidates(Terminus::N, b'M', false).map(|c| c.index).collect();
        assert_eq!(inside, vec![4, 0]);
        let other: Vec<usize> = pools.terminal_candidates(Terminus::N, b'S', true).map(|c| c.index).collect();
        assert_eq!(other, vec![4, 0]);
    }

    #[test]
    fn effective_masses_include_modified_residues() {
        let mods = rules();
        let pools = ModificationPools::new(&mods);
        let masses = pools.effective_masses(&mods);
        let has = |m: f64| masses.iter().any(|&x| (x - m).abs() < 1e-6);
        assert!(has(103.009_185 + 57.021_464));
        assert!(!has(103.009_185));
        assert!(has(131.040_485 + 15.994_915));
    }

    #[test]
    fn targets_deserialize_from_json() {
        let json = r#"{"name":"Phospho","mass":79.966331,"target":{"kind":"residue","residue":"S"}}"#;
        let m: Modification = serde_json::from_str(json).unwrap();
        assert!(!m.fixed);
        assert_eq!(m.target, ModificationTarget::Residue { residue: 'S' });
        let t: ModificationTarget = serde_json::from_str(r#"{"kind":"peptide_c_term"}"#).unwrap();
        assert_eq!(t, ModificationTarget::PeptideCTerm { residue: None });
    }
}
