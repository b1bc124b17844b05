//! de novo 标签：字面残基串与未解释的质量缺口交替出现。
//!
//! 命令行文本形式：`[201.0957]AV[227.1270]`。

use std::fmt;
use thiserror::Error;

use crate::config::MatchingRules;
use crate::util::amino::residue_mass;

#[derive(Debug, Clone, PartialEq)]
pub enum TagElement {
    Sequence { residues: String, x_limit: u8 },
    MassGap { mass: f64, x_limit: u8 },
}

impl TagElement {
    pub fn sequence(residues: &str, x_limit: u8) -> Self {
        TagElement::Sequence { residues: residues.to_ascii_uppercase(), x_limit }
    }

    pub fn mass_gap(mass: f64, x_limit: u8) -> Self {
        TagElement::MassGap { mass, x_limit }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum TagParseError {
    #[error("empty tag")]
    Empty,
    #[error("unterminated mass gap starting at column {0}")]
    Unterminated(usize),
    #[error("invalid mass '{0}'")]
    InvalidMass(String),
    #[error("unexpected character {0:?} at column {1}")]
    UnexpectedCharacter(char, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub elements: Vec<TagElement>,
}

impl Tag {
    pub fn new(elements: Vec<TagElement>) -> Self {
        Self { elements }
    }

    /// 解析方括号记法，通配符上限由 `rules` 推出
    pub fn parse(text: &str, rules: &MatchingRules) -> Result<Self, TagParseError> {
        let mut elements = Vec::new();
        let mut run = String::new();
        let mut chars = text.trim().char_indices().peekable();

        let flush = |run: &mut String, elements: &mut Vec<TagElement>| {
            if !run.is_empty() {
                let x_limit = rules.x_limit_for_length(run.len());
                elements.push(TagElement::sequence(run, x_limit));
                run.clear();
            }
        };

        while let Some((col, c)) = chars.next() {
            match c {
                '[' => {
                    flush(&mut run, &mut elements);
                    let mut number = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ']')) => break,
                            Some((_, d)) => number.push(d),
                            None => return Err(TagParseError::Unterminated(col)),
                        }
                    }
                    let mass: f64 = number
                        .trim()
                        .parse()
                        .map_err(|_| TagParseError::InvalidMass(number.clone()))?;
                    if !mass.is_finite() || mass <= 0.0 {
                        return Err(TagParseError::InvalidMass(number));
                    }
                    elements.push(TagElement::mass_gap(mass, rules.x_limit_for_mass(mass)));
                }
                c if c.is_ascii_alphabetic() => run.push(c.to_ascii_uppercase()),
                c => return Err(TagParseError::UnexpectedCharacter(c, col)),
            }
        }
        flush(&mut run, &mut elements);

        if elements.is_empty() {
            return Err(TagParseError::Empty);
        }
        Ok(Self { elements })
    }

    /// 最长字面串的下标，等长取第一个
    pub fn anchor(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (i, e) in self.elements.iter().enumerate() {
            if let TagElement::Sequence { residues, .. } = e {
                if best.map_or(true, |(_, len)| residues.len() > len) {
                    best = Some((i, residues.len()));
                }
            }
        }
        best.map(|(i, _)| i)
    }

    /// 缺口-字面串-缺口 形状标签的缓存键
    pub fn cache_key(&self) -> Option<String> {
        match self.elements.as_slice() {
            [TagElement::MassGap { mass: n, .. }, TagElement::Sequence { residues, .. }, TagElement::MassGap { mass: c, .. }] => {
                Some(format!("{n:.4}_{residues}_{c:.4}"))
            }
            _ => None,
        }
    }

    /// 末尾缺口以 `residue` 结尾的标签；缺口轻于该残基时为 None
    pub fn with_trailing_residue(&self, residue: u8, tolerance: f64) -> Option<Tag> {
        let (last, head) = self.elements.split_last()?;
        let TagElement::MassGap { mass, x_limit } = *last else {
            return None;
        };
        let remaining = mass - residue_mass(residue)?;
        let mut elements = head.to_vec();
        if remaining.abs() <= tolerance {
            // 缺口恰好就是该残基
        } else if remaining > 0.0 {
            elements.push(TagElement::MassGap { mass: remaining, x_limit });
        } else {
            return None;
        }
        match elements.last_mut() {
            Some(TagElement::Sequence { residues, .. }) => residues.push(residue as char),
            _ => elements.push(TagElement::Sequence { residues: (residue as char).to_string(), x_limit: 0 }),
        }
        Some(Tag { elements })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.elements {
            match e {
                TagElement::Sequence { residues, .. } => write!(f, "{residues}")?,
                TagElement::MassGap { mass, .. } => write!(f, "[{mass:.4}]")?,
            }
        }
        Ok(())
    }
}
