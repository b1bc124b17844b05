//! 后向搜索自动机。
//!
//! 查询先按搜索顺序拆成片段（字面残基串与质量缺口）。前沿节点存放在每次搜索
//! 独有的 arena 中，通过下标指向父节点；节点携带 BWT 区间以及缺口累计质量、
//! 通配符、编辑与修饰计数。节点按编辑数分桶展开，同一出现位置的低代价解释先被
//! 找到，并在去重时保留。
//!
//! 肽段只在正向索引上搜索。标签以最长字面串为锚：锚及其右侧在反向索引上搜索，
//! 得到的每条不同蛋白片段再在正向索引上精确匹配并向左扩展。

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cache::TagCache;
use super::mapping::{dedup_mappings, Mapping, PeptideVariant, Variant};
use super::mass_tables::{MassIndex, MassLookupTables};
use super::modification::{ModificationMatch, ModificationPools, ModificationTarget, TerminalCandidate, Terminus};
use super::tag::{Tag, TagElement};
use crate::config::{MatchingRules, SequenceMatchingMode, VariantStrategy, MAX_GAP_WILDCARDS};
use crate::index::shard::IndexShard;
use crate::index::variant::VariantOverlay;
use crate::index::wavelet::WaveletTree;
use crate::util::amino::{
    is_ambiguous, is_residue, mass_candidates, matching_residues, residue_mass, ByteTable, DELIMITER, WILDCARD,
};

/// 最轻残基（G），未解析通配符至少代表的质量
const MIN_RESIDUE_MASS: f64 = 57.021_464;
/// 单次搜索的节点上限，超过即放弃
const NODE_LIMIT: usize = 1 << 24;
const NO_PARENT: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    Insertion,
    Deletion,
    Substitution,
}

impl EditKind {
    fn of(v: &Variant) -> Self {
        match v {
            Variant::Insertion(_) => EditKind::Insertion,
            Variant::Deletion(_) => EditKind::Deletion,
            Variant::Substitution { .. } => EditKind::Substitution,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
struct Edits {
    insertions: u8,
    deletions: u8,
    substitutions: u8,
}

impl Edits {
    fn total(&self) -> usize {
        self.insertions as usize + self.deletions as usize + self.substitutions as usize
    }

    fn add(mut self, kind: EditKind) -> Self {
        match kind {
            EditKind::Insertion => self.insertions += 1,
            EditKind::Deletion => self.deletions += 1,
            EditKind::Substitution => self.substitutions += 1,
        }
        self
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal { residues: Vec<u8>, x_limit: u8, exact: bool },
    /// `terminal`：缺口位于搜索末端，对应肽段的该端
    Gap { mass: f64, x_limit: u8, terminal: Option<Terminus> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Start,
    Match { protein: u8, query: u8 },
    /// 缺口吸收的残基；`residue` 为 `protein` 取用的质量候选
    Gap { protein: u8, residue: u8, modification: Option<u16> },
    Edit(Variant),
    Terminal { modification: u16, terminus: Terminus },
    /// 缺口闭合，剩余 `residual` Da 留给 `wildcards` 个未解析残基
    Close { residual: f64, wildcards: u8 },
}

#[derive(Debug, Clone, Copy)]
struct Node {
    parent: u32,
    left: usize,
    right: usize,
    /// 节点等待的片段
    segment: u16,
    /// 节点所走一步所属的片段
    origin: u16,
    cursor: u16,
    mass: f64,
    wildcards: u8,
    edits: Edits,
    ptms: u8,
    last_residue: u8,
    /// 区间各行起于匹配前方的分隔符
    on_delimiter: bool,
    step: Step,
}

#[derive(Clone, Copy)]
struct Direction<'a> {
    tree: &'a WaveletTree,
    overlay: Option<&'a VariantOverlay>,
    reversed: bool,
}

/// 回溯得到的单个残基，按肽段顺序
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Residue {
    /// 被删除的蛋白残基为 None
    peptide: Option<u8>,
    /// 插入的肽段残基为 None
    protein: Option<u8>,
    modification: Option<usize>,
    variant: Option<Variant>,
}

#[derive(Debug, Clone)]
struct Trace {
    residues: Vec<Residue>,
    n_term: Option<usize>,
    c_term: Option<usize>,
    edits: Edits,
    ptms: u8,
    interval: (usize, usize),
    on_delimiter: bool,
}

/// 匹配两端的修饰，以及哪一端是质量缺口
#[derive(Debug, Clone, Copy, Default)]
struct Termini {
    n: Option<usize>,
    c: Option<usize>,
    n_gap: bool,
    c_gap: bool,
}

/// 预编译的匹配规则，供重复查询使用
pub struct SearchEngine {
    rules: MatchingRules,
    pools: ModificationPools,
    tables: MassLookupTables,
    mass_index: MassIndex,
    substitutions: ByteTable<u128>,
    cache: Option<Arc<dyn TagCache>>,
}

impl SearchEngine {
    pub fn new(rules: MatchingRules) -> Self {
        let pools = ModificationPools::new(&rules.modifications);
        let tables = MassLookupTables::new(&pools.effective_masses(&rules.modifications));
        let mass_index = MassIndex::new(&pools);
        let substitutions = rules.substitution_matrix.compile();
        Self { rules, pools, tables, mass_index, substitutions, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TagCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn rules(&self) -> &MatchingRules {
        &self.rules
    }

    pub fn cache(&self) -> Option<&dyn TagCache> {
        self.cache.as_deref()
    }

    /// 当前规则下 `tag` 的缓存键；形状不可缓存时为 `None`
    pub fn cache_key(&self, tag: &Tag) -> Option<String> {
        tag.cache_key().map(|k| format!("{}_{}", self.rules.digest(), k))
    }

    fn max_edits(&self) -> usize {
        match self.rules.variants {
            VariantStrategy::None => 0,
            VariantStrategy::Generic { max_edits } => max_edits as usize,
            VariantStrategy::Specific { max_insertions, max_deletions, max_substitutions } => {
                max_insertions as usize + max_deletions as usize + max_substitutions as usize
            }
            VariantStrategy::Fixed { max_variants } => max_variants as usize,
        }
    }

    fn allows(&self, edits: Edits, kind: EditKind) -> bool {
        match self.rules.variants {
            VariantStrategy::None => false,
            VariantStrategy::Generic { max_edits } => edits.total() < max_edits as usize,
            VariantStrategy::Specific { max_insertions, max_deletions, max_substitutions } => match kind {
                EditKind::Insertion => edits.insertions < max_insertions,
                EditKind::Deletion => edits.deletions < max_deletions,
                EditKind::Substitution => edits.substitutions < max_substitutions,
            },
            VariantStrategy::Fixed { max_variants } => edits.total() < max_variants as usize,
        }
    }

    /// `peptide` 在 `shard` 中的全部出现
    pub fn map_peptide(&self, shard: &IndexShard, peptide: &str) -> Vec<Mapping> {
        let peptide = peptide.trim().to_ascii_uppercase();
        if peptide.is_empty() || !peptide.bytes().all(|b| b.is_ascii_alphabetic()) {
            debug!(peptide = %peptide, "peptide with non-residue characters skipped");
            return Vec::new();
        }
        let segments = vec![Segment::Literal {
            residues: peptide.bytes().rev().collect(),
            x_limit: self.rules.x_limit_for_length(peptide.len()),
            exact: false,
        }];
        let dir = Direction { tree: shard.primary(), overlay: shard.primary_variants(), reversed: false };
        let root = root_node(0, shard.text_len(), Edits::default(), 0);

        let mut out = Vec::new();
        for trace in self.search(dir, &segments, root) {
            let termini = Termini { n: trace.n_term, c: trace.c_term, ..Termini::default() };
            self.emit(shard, &trace.residues, termini, trace.interval, trace.on_delimiter, &mut out);
        }
        dedup_mappings(&mut out);
        out
    }

    /// `tag` 在 `shard` 中的全部出现
    pub fn map_tag(&self, shard: &IndexShard, tag: &Tag) -> Vec<Mapping> {
        if !tag_is_searchable(tag) {
            debug!(tag = %tag, "tag with non-residue characters skipped");
            return Vec::new();
        }
        let mut out = Vec::new();
        let is_gap = |e: Option<&TagElement>| matches!(e, Some(TagElement::MassGap { .. }));
        let n_gap = is_gap(tag.elements.first());
        let c_gap = is_gap(tag.elements.last());
        let primary = Direction { tree: shard.primary(), overlay: shard.primary_variants(), reversed: false };

        let Some(anchor) = tag.anchor() else {
            let segments = primary_segments(&tag.elements, None);
            let root = root_node(0, shard.text_len(), Edits::default(), 0);
            for trace in self.search(primary, &segments, root) {
                let termini = Termini { n: trace.n_term, c: None, n_gap, c_gap: false };
                self.emit(shard, &trace.residues, termini, trace.interval, trace.on_delimiter, &mut out);
            }
            dedup_mappings(&mut out);
            return out;
        };

        let reversed = Direction { tree: shard.reversed(), overlay: shard.reverse_variants(), reversed: true };
        let right_segments = reversed_segments(&tag.elements[anchor..]);
        let root = root_node(0, shard.text_len(), Edits::default(), 0);
        let mut seen = HashSet::new();
        let right: Vec<Trace> = self
            .search(reversed, &right_segments, root)
            .into_iter()
            .filter(|t| seen.insert((t.residues.clone(), t.c_term, t.on_delimiter)))
            .collect();

        for rt in &right {
            let stretch: Vec<u8> = rt.residues.iter().filter_map(|r| r.protein).collect();
            if stretch.is_empty() {
                continue;
            }
            // 蛋白 C 端闭合：片段必须紧贴蛋白末尾
            let start = if rt.on_delimiter {
                match shard.delimiter_interval(false) {
                    Some(i) => i,
                    None => continue,
                }
            } else {
                (0, shard.text_len())
            };
            let segments = primary_segments(&tag.elements[..anchor], Some(stretch));
            let root = root_node(start.0, start.1, rt.edits, rt.ptms);
            for lt in self.search(primary, &segments, root) {
                let mut residues = lt.residues;
                residues.extend(rt.residues.iter().cloned());
                let termini = Termini { n: lt.n_term, c: rt.c_term, n_gap, c_gap };
                self.emit(shard, &residues, termini, lt.interval, lt.on_delimiter, &mut out);
            }
        }
        dedup_mappings(&mut out);
        out
    }

    fn search(&self, dir: Direction<'_>, segments: &[Segment], root: Node) -> Vec<Trace> {
        let mut search = Search {
            engine: self,
            dir,
            segments,
            nodes: Vec::new(),
            buckets: vec![Vec::new(); self.max_edits() + 1],
            leaves: Vec::new(),
            scratch: Vec::new(),
        };
        search.run(root);
        debug!(nodes = search.nodes.len(), hits = search.leaves.len(), reversed = dir.reversed, "search finished");
        search.leaves.iter().map(|&leaf| search.trace(leaf)).collect()
    }

    fn gap_tolerance(&self, target: f64) -> f64 {
        self.rules.tolerance.to_da(target)
    }

    fn closes(&self, residual: f64, wildcards: u8, tolerance: f64) -> bool {
        if wildcards == 0 {
            residual.abs() <= tolerance
        } else {
            self.tables.within_mass_tolerance(residual, wildcards, tolerance)
        }
    }

    /// 末端缺口的闭合方式：`Some(None)` 无修饰，`Some(Some(i))` 带末端修饰 `i`。
    /// 适用的固定修饰必须使用。
    fn terminal_closure(
        &self,
        node: &Node,
        residual: f64,
        tolerance: f64,
        terminus: Terminus,
        at_boundary: bool,
    ) -> Option<Option<usize>> {
        let (fixed, variable): (Vec<&TerminalCandidate>, Vec<&TerminalCandidate>) = self
            .pools
            .terminal_candidates(terminus, node.last_residue, at_boundary)
            .filter(|c| !at_boundary || c.protein)
            .partition(|c| c.fixed);

        if !fixed.is_empty() {
            return fixed
                .iter()
                .find(|c| self.closes(residual - c.mass, node.wildcards, tolerance))
                .map(|c| Some(c.index));
        }
        if !at_boundary && self.closes(residual, node.wildcards, tolerance) {
            return Some(None);
        }
        if node.ptms >= self.rules.max_ptms {
            return None;
        }
        variable
            .iter()
            .find(|c| self.closes(residual - c.mass, node.wildcards, tolerance))
            .map(|c| Some(c.index))
    }

    /// 出现位置贴着蛋白末端、缺口却没带上该端的固定蛋白末端修饰
    fn misses_protein_terminal(&self, termini: &Termini, peptide: &[u8], at_start: bool, at_end: bool) -> bool {
        let mods = &self.rules.modifications;
        let on_protein = |m: Option<usize>| m.is_some_and(|i| mods[i].target.is_protein_terminal());
        let (Some(&first), Some(&last)) = (peptide.first(), peptide.last()) else {
            return false;
        };
        (termini.n_gap && at_start && self.pools.requires_protein_terminal(Terminus::N, first) && !on_protein(termini.n))
            || (termini.c_gap && at_end && self.pools.requires_protein_terminal(Terminus::C, last) && !on_protein(termini.c))
    }

    /// 把 `interval` 上的完整回溯展开为每个出现位置一条映射
    fn emit(
        &self,
        shard: &IndexShard,
        residues: &[Residue],
        termini: Termini,
        interval: (usize, usize),
        on_delimiter: bool,
        out: &mut Vec<Mapping>,
    ) {
        let mods = &self.rules.modifications;
        let mut peptide = String::with_capacity(residues.len());
        let mut modifications = Vec::new();
        let mut variants = Vec::new();
        let mut pending_deletions = Vec::new();

        for r in residues {
            let Some(p) = r.peptide else {
                if let Some(v) = r.variant {
                    pending_deletions.push(v);
                }
                continue;
            };
            peptide.push(p as char);
            let site = peptide.len();
            for v in pending_deletions.drain(..) {
                variants.push(PeptideVariant { site, variant: v });
            }
            if let Some(v) = r.variant {
                variants.push(PeptideVariant { site, variant: v });
            }
            for m in mods.iter().filter(|m| m.fixed) {
                if let ModificationTarget::Residue { residue } = m.target {
                    if residue.to_ascii_uppercase() as u32 == p as u32 {
                        modifications.push(ModificationMatch { name: m.name.clone(), site, variable: false });
                    }
                }
            }
            if let Some(i) = r.modification {
                modifications.push(ModificationMatch { name: mods[i].name.clone(), site, variable: !mods[i].fixed });
            }
        }
        if peptide.is_empty() {
            return;
        }
        if let Some(i) = termini.n {
            modifications.push(ModificationMatch { name: mods[i].name.clone(), site: 1, variable: !mods[i].fixed });
        }
        if let Some(i) = termini.c {
            modifications.push(ModificationMatch {
                name: mods[i].name.clone(),
                site: peptide.len(),
                variable: !mods[i].fixed,
            });
        }
        modifications.sort_by_key(|m| m.site);

        let fixed_only = matches!(self.rules.variants, VariantStrategy::Fixed { .. });
        let span = residues.iter().filter(|r| r.protein.is_some()).count();
        for row in interval.0..interval.1 {
            let start = shard.text_position(row) + on_delimiter as usize;
            let Some((protein, offset)) = shard.locate(start) else {
                continue;
            };
            let entry = &shard.proteins()[protein];
            if self.misses_protein_terminal(&termini, peptide.as_bytes(), offset == 0, offset + span == entry.len) {
                continue;
            }
            if fixed_only && !variants_are_registered(shard, residues, start) {
                continue;
            }
            out.push(Mapping {
                accession: entry.accession.clone(),
                peptide: peptide.clone(),
                offset,
                modifications: modifications.clone(),
                variants: variants.clone(),
            });
        }
    }
}

/// 核对起于文本位置 `start` 的匹配中每个变异是否登记在分片的固定变异表中
fn variants_are_registered(shard: &IndexShard, residues: &[Residue], start: usize) -> bool {
    let mut pos = start;
    for r in residues {
        if let Some(v) = &r.variant {
            if !shard.has_fixed_variant(pos, v) {
                return false;
            }
        }
        if r.protein.is_some() {
            pos += 1;
        }
    }
    true
}

fn tag_is_searchable(tag: &Tag) -> bool {
    tag.elements.iter().all(|e| match e {
        TagElement::Sequence { residues, .. } => !residues.is_empty() && residues.bytes().all(|b| b.is_ascii_uppercase()),
        TagElement::MassGap { mass, .. } => mass.is_finite() && *mass > 0.0,
    })
}

fn root_node(left: usize, right: usize, edits: Edits, ptms: u8) -> Node {
    Node {
        parent: NO_PARENT,
        left,
        right,
        segment: 0,
        origin: 0,
        cursor: 0,
        mass: 0.0,
        wildcards: 0,
        edits,
        ptms,
        last_residue: 0,
        on_delimiter: false,
        step: Step::Start,
    }
}

/// 正向索引上自右向左搜索的片段；可在 `elements` 右侧先接一段精确片段
/// （按肽段顺序给出）。
fn primary_segments(elements: &[TagElement], stretch: Option<Vec<u8>>) -> Vec<Segment> {
    let mut out = Vec::new();
    if let Some(mut s) = stretch {
        s.reverse();
        out.push(Segment::Literal { residues: s, x_limit: 0, exact: true });
    }
    for (i, e) in elements.iter().enumerate().rev() {
        out.push(match e {
            TagElement::Sequence { residues, x_limit } => {
                Segment::Literal { residues: residues.bytes().rev().collect(), x_limit: *x_limit, exact: false }
            }
            TagElement::MassGap { mass, x_limit } => Segment::Gap {
                mass: *mass,
                x_limit: *x_limit,
                terminal: (i == 0).then_some(Terminus::N),
            },
        });
    }
    out
}

/// 反向索引上自左向右搜索的片段
fn reversed_segments(elements: &[TagElement]) -> Vec<Segment> {
    let last = elements.len().saturating_sub(1);
    elements
        .iter()
        .enumerate()
        .map(|(i, e)| match e {
            TagElement::Sequence { residues, x_limit } => {
                Segment::Literal { residues: residues.as_bytes().to_vec(), x_limit: *x_limit, exact: false }
            }
            TagElement::MassGap { mass, x_limit } => Segment::Gap {
                mass: *mass,
                x_limit: *x_limit,
                terminal: (i == last).then_some(Terminus::C),
            },
        })
        .collect()
}

struct Search<'e, 'a> {
    engine: &'e SearchEngine,
    dir: Direction<'a>,
    segments: &'a [Segment],
    nodes: Vec<Node>,
    /// 按编辑数分桶的待展开节点
    buckets: Vec<Vec<u32>>,
    leaves: Vec<u32>,
    scratch: Vec<(u8, usize, usize)>,
}

impl<'e, 'a> Search<'e, 'a> {
    fn run(&mut self, root: Node) {
        self.push(root);
        for b in 0..self.buckets.len() {
            while let Some(i) = self.buckets[b].pop() {
                if self.nodes.len() > NODE_LIMIT {
                    warn!(limit = NODE_LIMIT, "search frontier limit reached, results are incomplete");
                    return;
                }
                self.expand(i);
            }
        }
    }

    fn alloc(&mut self, node: Node) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    fn schedule(&mut self, idx: u32) {
        let node = &self.nodes[idx as usize];
        if node.segment as usize >= self.segments.len() {
            self.leaves.push(idx);
        } else {
            let b = node.edits.total().min(self.buckets.len() - 1);
            self.buckets[b].push(idx);
        }
    }

    fn push(&mut self, node: Node) {
        let idx = self.alloc(node);
        self.schedule(idx);
    }

    fn child(parent: u32, node: &Node, left: usize, right: usize, step: Step) -> Node {
        Node { parent, left, right, origin: node.segment, step, ..*node }
    }

    fn next_segment(node: &mut Node) {
        node.segment += 1;
        node.cursor = 0;
        node.mass = 0.0;
        node.wildcards = 0;
    }

    /// 消耗长度为 `len` 的字面串中的一个查询残基
    fn advance(node: &mut Node, len: usize) {
        node.cursor += 1;
        if node.cursor as usize == len {
            Self::next_segment(node);
        }
    }

    fn expand(&mut self, idx: u32) {
        let node = self.nodes[idx as usize];
        let segments = self.segments;
        match &segments[node.segment as usize] {
            Segment::Literal { residues, x_limit, exact } => self.expand_literal(idx, &node, residues, *x_limit, *exact),
            Segment::Gap { mass, x_limit, terminal } => self.expand_gap(idx, &node, *mass, *x_limit, *terminal),
        }
    }

    fn expand_literal(&mut self, idx: u32, node: &Node, residues: &[u8], x_limit: u8, exact: bool) {
        let engine = self.engine;
        let tree = self.dir.tree;
        let len = residues.len();
        let cursor = node.cursor as usize;
        let q = residues[cursor];
        let mode = if exact { SequenceMatchingMode::Exact } else { engine.rules.sequence_matching };

        let candidates = if q == WILDCARD && !exact {
            if node.wildcards < x_limit {
                let mut hits = std::mem::take(&mut self.scratch);
                tree.range_query(node.left, node.right, &mut hits);
                for &(c, l, r) in hits.iter().filter(|h| is_residue(h.0)) {
                    let mut child = Self::child(idx, node, l, r, Step::Match { protein: c, query: q });
                    child.wildcards += 1;
                    Self::advance(&mut child, len);
                    self.push(child);
                }
                self.scratch = hits;
            }
            Vec::new()
        } else {
            let candidates = matching_residues(q, mode);
            for &c in &candidates {
                let wildcard = c == WILDCARD && q != WILDCARD;
                if wildcard && node.wildcards >= x_limit {
                    continue;
                }
                if let Some((l, r)) = tree.single_character_range_query(node.left, node.right, c) {
                    let mut child = Self::child(idx, node, l, r, Step::Match { protein: c, query: q });
                    if wildcard {
                        child.wildcards += 1;
                    }
                    Self::advance(&mut child, len);
                    self.push(child);
                }
            }
            candidates
        };

        if exact {
            return;
        }
        let remaining = len - cursor;
        match engine.rules.variants {
            VariantStrategy::None => {}
            VariantStrategy::Fixed { .. } => self.fixed_edits(idx, node, &candidates, remaining, len),
            VariantStrategy::Generic { .. } | VariantStrategy::Specific { .. } => {
                self.free_edits(idx, node, q, &candidates, remaining, len)
            }
        }
    }

    /// 查询时自由生成的编辑（generic / specific 策略）
    fn free_edits(&mut self, idx: u32, node: &Node, q: u8, candidates: &[u8], remaining: usize, len: usize) {
        let engine = self.engine;
        let tree = self.dir.tree;
        let interior = node.cursor > 0;
        let specific = matches!(engine.rules.variants, VariantStrategy::Specific { .. });
        let can_substitute = q != WILDCARD && engine.allows(node.edits, EditKind::Substitution);
        let can_delete = interior && engine.allows(node.edits, EditKind::Deletion);

        if can_substitute || can_delete {
            let mut hits = std::mem::take(&mut self.scratch);
            tree.range_query(node.left, node.right, &mut hits);
            for &(c, l, r) in hits.iter().filter(|h| is_residue(h.0)) {
                if can_substitute && !candidates.contains(&c) && (!specific || engine.substitutions[c] & (1u128 << q) != 0) {
                    let v = Variant::Substitution { from: c, to: q };
                    let mut child = Self::child(idx, node, l, r, Step::Edit(v));
                    child.edits = node.edits.add(EditKind::Substitution);
                    Self::advance(&mut child, len);
                    self.push(child);
                }
                if can_delete {
                    let mut child = Self::child(idx, node, l, r, Step::Edit(Variant::Deletion(c)));
                    child.edits = node.edits.add(EditKind::Deletion);
                    self.push(child);
                }
            }
            self.scratch = hits;
        }

        if q != WILDCARD && interior && remaining > 1 && engine.allows(node.edits, EditKind::Insertion) {
            let mut child = Self::child(idx, node, node.left, node.right, Step::Edit(Variant::Insertion(q)));
            child.edits = node.edits.add(EditKind::Insertion);
            Self::advance(&mut child, len);
            self.push(child);
        }
    }

    /// 从变异覆盖层读取的编辑（fixed 策略）
    fn fixed_edits(&mut self, idx: u32, node: &Node, candidates: &[u8], remaining: usize, len: usize) {
        let Some(overlay) = self.dir.overlay.filter(|o| o.any_in(node.left, node.right)) else {
            return;
        };
        let engine = self.engine;
        let tree = self.dir.tree;
        let interior = node.cursor > 0;
        for (row, edits) in overlay.sites_in(node.left, node.right) {
            for &v in edits {
                let kind = EditKind::of(&v);
                if !engine.allows(node.edits, kind) {
                    continue;
                }
                let (interval, consumes) = match v {
                    Variant::Substitution { to, .. } if candidates.contains(&to) => {
                        let lf = tree.lf(row);
                        ((lf, lf + 1), true)
                    }
                    Variant::Deletion(_) if interior => {
                        let lf = tree.lf(row);
                        ((lf, lf + 1), false)
                    }
                    Variant::Insertion(c) if interior && remaining > 1 && candidates.contains(&c) => ((row, row + 1), true),
                    _ => continue,
                };
                let mut child = Self::child(idx, node, interval.0, interval.1, Step::Edit(v));
                child.edits = node.edits.add(kind);
                if consumes {
                    Self::advance(&mut child, len);
                }
                self.push(child);
            }
        }
    }

    fn expand_gap(&mut self, idx: u32, node: &Node, target: f64, x_limit: u8, terminal: Option<Terminus>) {
        let engine = self.engine;
        let tolerance = engine.gap_tolerance(target);
        let limit = x_limit.min(MAX_GAP_WILDCARDS);
        let mut hits = std::mem::take(&mut self.scratch);
        self.dir.tree.range_query(node.left, node.right, &mut hits);

        for &(c, l, r) in &hits {
            if !is_residue(c) {
                continue;
            }
            if c == WILDCARD {
                if node.wildcards < limit {
                    let mut child = Self::child(idx, node, l, r, Step::Gap { protein: c, residue: c, modification: None });
                    child.wildcards += 1;
                    child.last_residue = c;
                    self.settle_gap(child, target, tolerance, terminal);
                }
                continue;
            }
            for &res in mass_candidates(c) {
                let Some(base) = residue_mass(res) else { continue };
                let mass = base + engine.pools.fixed_residue_mass[res];
                let mut child = Self::child(idx, node, l, r, Step::Gap { protein: c, residue: res, modification: None });
                child.mass += mass;
                child.last_residue = res;
                self.settle_gap(child, target, tolerance, terminal);

                if node.ptms >= engine.rules.max_ptms {
                    continue;
                }
                for &mi in &engine.pools.variable_residue[res] {
                    let step = Step::Gap { protein: c, residue: res, modification: Some(mi as u16) };
                    let mut child = Self::child(idx, node, l, r, step);
                    child.mass += mass + engine.rules.modifications[mi].mass;
                    child.last_residue = res;
                    child.ptms += 1;
                    self.settle_gap(child, target, tolerance, terminal);
                }
            }
        }
        self.scratch = hits;
    }

    /// 判断刚扩展的缺口节点能否闭合、是否到达蛋白末端、是否继续生长
    fn settle_gap(&mut self, child: Node, target: f64, tolerance: f64, terminal: Option<Terminus>) {
        let engine = self.engine;
        let residual = target - child.mass;
        let k = child.wildcards;

        let closure = match terminal {
            Some(t) => engine.terminal_closure(&child, residual, tolerance, t, false),
            None => engine.closes(residual, k, tolerance).then_some(None),
        };

        let has_terminal_mods = terminal.is_some_and(|t| engine.pools.has_terminal(t));
        let room = residual - k as f64 * MIN_RESIDUE_MASS;
        let grows = room > tolerance
            && (k > 0 || has_terminal_mods || !engine.tables.mass_not_valid(residual, tolerance));

        // 已吸收的残基可能正好到达蛋白末端
        let boundary = terminal.filter(|&t| engine.pools.has_protein_terminal(t)).and_then(|t| {
            self.dir.tree.single_character_range_query(child.left, child.right, DELIMITER).map(|iv| (t, iv))
        });

        if closure.is_none() && !grows && boundary.is_none() {
            return;
        }
        let ci = self.alloc(child);
        if let Some(modification) = closure {
            self.close(ci, &child, residual, modification, terminal);
        }
        if let Some((t, (l, r))) = boundary {
            self.close_at_boundary(ci, &child, l, r, target, tolerance, t);
        }
        if grows {
            self.schedule(ci);
        }
    }

    /// 闭合节点 `ci` 的缺口，可经由一个末端修饰
    fn close(&mut self, ci: u32, node: &Node, residual: f64, modification: Option<usize>, terminal: Option<Terminus>) {
        let engine = self.engine;
        let mut parent = ci;
        let mut residual = residual;
        let mut base = *node;
        if let (Some(mi), Some(terminus)) = (modification, terminal) {
            let m = &engine.rules.modifications[mi];
            let mut t = Self::child(ci, node, node.left, node.right, Step::Terminal { modification: mi as u16, terminus });
            if !m.fixed {
                t.ptms += 1;
            }
            residual -= m.mass;
            parent = self.alloc(t);
            base = t;
        }
        let mut closed = Self::child(parent, &base, base.left, base.right, Step::Close { residual, wildcards: base.wildcards });
        Self::next_segment(&mut closed);
        self.push(closed);
    }

    /// 已吸收残基之后紧接蛋白边界：尝试蛋白末端修饰
    #[allow(clippy::too_many_arguments)]
    fn close_at_boundary(&mut self, idx: u32, node: &Node, l: usize, r: usize, target: f64, tolerance: f64, terminus: Terminus) {
        let residual = target - node.mass;
        // 边界处只尝试蛋白末端修饰
        let Some(modification) = self.engine.terminal_closure(node, residual, tolerance, terminus, true) else {
            return;
        };
        let mut at = *node;
        at.left = l;
        at.right = r;
        at.on_delimiter = true;
        self.close(idx, &at, residual, modification, Some(terminus));
    }

    fn trace(&self, leaf: u32) -> Trace {
        let engine = self.engine;
        let mut steps: Vec<(u16, Step)> = Vec::new();
        let mut i = leaf;
        while i != NO_PARENT {
            let n = &self.nodes[i as usize];
            steps.push((n.origin, n.step));
            i = n.parent;
        }
        // 正向索引上叶到根即肽段顺序
        if self.dir.reversed {
            steps.reverse();
        }

        // 为各缺口吸收的通配符确定具体残基
        let mut resolved: Vec<(u16, Vec<u8>)> = Vec::new();
        for &(origin, step) in &steps {
            if let Step::Close { residual, wildcards } = step {
                if wildcards == 0 {
                    continue;
                }
                if let Segment::Gap { mass, .. } = &self.segments[origin as usize] {
                    let tolerance = engine.gap_tolerance(*mass);
                    if let Some(rs) = engine.mass_index.resolve(residual, wildcards as usize, tolerance) {
                        resolved.push((origin, rs.to_vec()));
                    }
                }
            }
        }

        let leaf_node = &self.nodes[leaf as usize];
        let mut trace = Trace {
            residues: Vec::with_capacity(steps.len()),
            n_term: None,
            c_term: None,
            edits: leaf_node.edits,
            ptms: leaf_node.ptms,
            interval: (leaf_node.left, leaf_node.right),
            on_delimiter: leaf_node.on_delimiter,
        };
        for (origin, step) in steps {
            let residue = match step {
                Step::Start | Step::Close { .. } => continue,
                Step::Terminal { modification, terminus } => {
                    match terminus {
                        Terminus::N => trace.n_term = Some(modification as usize),
                        Terminus::C => trace.c_term = Some(modification as usize),
                    }
                    continue;
                }
                Step::Match { protein, query } => Residue {
                    peptide: Some(if is_ambiguous(protein) && !is_ambiguous(query) { query } else { protein }),
                    protein: Some(protein),
                    modification: None,
                    variant: None,
                },
                Step::Gap { protein, residue, modification } => {
                    let mut peptide = residue;
                    if residue == WILDCARD {
                        if let Some((_, rs)) = resolved.iter_mut().find(|(o, rs)| *o == origin && !rs.is_empty()) {
                            peptide = rs.remove(0);
                        }
                    }
                    Residue {
                        peptide: Some(peptide),
                        protein: Some(protein),
                        modification: modification.map(usize::from),
                        variant: None,
                    }
                }
                Step::Edit(v) => match v {
                    Variant::Insertion(c) => Residue { peptide: Some(c), protein: None, modification: None, variant: Some(v) },
                    Variant::Deletion(c) => Residue { peptide: None, protein: Some(c), modification: None, variant: Some(v) },
                    Variant::Substitution { from, to } => {
                        Residue { peptide: Some(to), protein: Some(from), modification: None, variant: Some(v) }
                    }
                },
            };
            // 精确片段由反向搜索的结果补回
            if let Segment::Literal { exact: true, .. } = self.segments[origin as usize] {
                continue;
            }
            trace.residues.push(residue);
        }
        trace
    }
}

/// 合并各分片结果，每个出现位置保留第一条映射
pub(crate) fn merge_shard_results(results: Vec<Vec<Mapping>>) -> Vec<Mapping> {
    let mut out: Vec<Mapping> = results.into_iter().flatten().collect();
    dedup_mappings(&mut out);
    out
}
