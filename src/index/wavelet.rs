use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::rank::RankBitVector;
use crate::util::amino::{ByteTable, ALPHABET_SIZE};

/// 子节点：内部节点编号或叶子字符。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Child {
    Node(u32),
    Leaf(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WaveletNode {
    /// 1 = 走右子树
    bits: RankBitVector,
    left: Child,
    right: Child,
}

/// 按字符频率构建 Huffman 形状的小波树（附带 C 表 / less 表）。
///
/// 高频字符（氨基酸）路径短，低频的分隔符与哨兵路径长，
/// 因而常规的单字符 LF 步只需很少的 rank 查询。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveletTree {
    nodes: Vec<WaveletNode>,
    root: Child,
    /// 根到叶子的路径（false = 左），文本中不存在的字符为 None
    codes: ByteTable<Option<Vec<bool>>>,
    /// less[c] = 文本中严格小于 c 的字符总数
    less: ByteTable<u64>,
    len: usize,
}

enum Huffman {
    Leaf(u8),
    Internal(Box<Huffman>, Box<Huffman>),
}

impl WaveletTree {
    /// 在 `text` 上建树；所有字节必须小于 128。
    pub fn build(text: &[u8]) -> Self {
        let mut freq = ByteTable::filled(0u64);
        for &c in text {
            freq[c] += 1;
        }

        let mut less = ByteTable::filled(0u64);
        let mut acc = 0u64;
        for c in 0..ALPHABET_SIZE as u8 {
            less[c] = acc;
            acc += freq[c];
        }

        let mut codes: ByteTable<Option<Vec<bool>>> = ByteTable::filled(None);
        let mut nodes = Vec::new();
        let root = match huffman_shape(&freq) {
            None => Child::Leaf(0),
            Some(shape) => {
                assign_codes(&shape, &mut Vec::new(), &mut codes);
                build_node(&shape, text, 0, &codes, &mut nodes)
            }
        };

        Self { nodes, root, codes, less, len: text.len() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn less(&self, c: u8) -> u64 {
        self.less[c]
    }

    /// `c` 在树中的深度，即一次 LF 步所需的 rank 查询次数
    pub fn code_length(&self, c: u8) -> Option<usize> {
        self.codes[c].as_ref().map(Vec::len)
    }

    /// 返回第 row 行的字符，以及该字符在 [0, row) 中的出现次数。
    pub fn character_and_rank_at(&self, row: usize) -> (u8, usize) {
        assert!(row < self.len, "row {row} out of range (len={})", self.len);
        let mut pos = row;
        let mut child = self.root;
        loop {
            match child {
                Child::Leaf(c) => return (c, pos),
                Child::Node(i) => {
                    let node = &self.nodes[i as usize];
                    let bit = node.bits.value_at(pos);
                    pos = node.bits.rank_before(pos, bit);
                    child = if bit { node.right } else { node.left };
                }
            }
        }
    }

    /// LF 映射：第 row 行前一个文本位置所在的行。
    #[inline]
    pub fn lf(&self, row: usize) -> usize {
        let (c, rank) = self.character_and_rank_at(row);
        self.less[c] as usize + rank
    }

    /// 已知字符 c 的一步反向搜索：[left, right) → 新区间，空则返回 None。
    pub fn single_character_range_query(&self, left: usize, right: usize, c: u8) -> Option<(usize, usize)> {
        debug_assert!(left <= right && right <= self.len);
        let path = self.codes[c].as_ref()?;
        let (mut l, mut r) = (left, right);
        let mut child = self.root;
        for &bit in path {
            if l >= r {
                return None;
            }
            let Child::Node(i) = child else { break };
            let node = &self.nodes[i as usize];
            l = node.bits.rank_before(l, bit);
            r = node.bits.rank_before(r, bit);
            child = if bit { node.right } else { node.left };
        }
        if l >= r {
            return None;
        }
        let base = self.less[c] as usize;
        Some((base + l, base + r))
    }

    /// 区间内出现的所有字符及其反向扩展后的区间，按字符码升序写入 `out`。
    pub fn range_query(&self, left: usize, right: usize, out: &mut Vec<(u8, usize, usize)>) {
        out.clear();
        if left >= right {
            return;
        }
        self.range_query_rec(self.root, left, right, out);
        out.sort_unstable_by_key(|e| e.0);
    }

    fn range_query_rec(&self, child: Child, l: usize, r: usize, out: &mut Vec<(u8, usize, usize)>) {
        match child {
            Child::Leaf(c) => {
                let base = self.less[c] as usize;
                out.push((c, base + l, base + r));
            }
            Child::Node(i) => {
                let node = &self.nodes[i as usize];
                let l0 = node.bits.rank_before(l, false);
                let r0 = node.bits.rank_before(r, false);
                if r0 > l0 {
                    self.range_query_rec(node.left, l0, r0, out);
                }
                let (l1, r1) = (l - l0, r - r0);
                if r1 > l1 {
                    self.range_query_rec(node.right, l1, r1, out);
                }
            }
        }
    }
}

fn huffman_shape(freq: &ByteTable<u64>) -> Option<Huffman> {
    let mut forest: Vec<Option<Huffman>> = Vec::new();
    let mut heap = BinaryHeap::new();
    for (c, &f) in freq.iter() {
        if f > 0 {
            heap.push(Reverse((f, forest.len())));
            forest.push(Some(Huffman::Leaf(c)));
        }
    }
    if forest.is_empty() {
        return None;
    }
    // 频次相同按插入顺序
    while heap.len() > 1 {
        let Reverse((f1, i1)) = heap.pop()?;
        let Reverse((f2, i2)) = heap.pop()?;
        let left = forest[i1].take()?;
        let right = forest[i2].take()?;
        heap.push(Reverse((f1 + f2, forest.len())));
        forest.push(Some(Huffman::Internal(Box::new(left), Box::new(right))));
    }
    let Reverse((_, root)) = heap.pop()?;
    forest[root].take()
}

fn assign_codes(shape: &Huffman, path: &mut Vec<bool>, codes: &mut ByteTable<Option<Vec<bool>>>) {
    match shape {
        Huffman::Leaf(c) => codes[*c] = Some(path.clone()),
        Huffman::Internal(l, r) => {
            path.push(false);
            assign_codes(l, path, codes);
            path.pop();
            path.push(true);
            assign_codes(r, path, codes);
            path.pop();
        }
    }
}

fn build_node(
    shape: &Huffman,
    text: &[u8],
    depth: usize,
    codes: &ByteTable<Option<Vec<bool>>>,
    nodes: &mut Vec<WaveletNode>,
) -> Child {
    match shape {
        Huffman::Leaf(c) => Child::Leaf(*c),
        Huffman::Internal(l, r) => {
            let goes_right = |c: u8| codes[c].as_ref().map_or(false, |p| p[depth]);
            let bits: RankBitVector = text.iter().map(|&c| goes_right(c)).collect();
            let (right_text, left_text): (Vec<u8>, Vec<u8>) = text.iter().partition(|&&c| goes_right(c));
            let left = build_node(l, &left_text, depth + 1, codes, nodes);
            let right = build_node(r, &right_text, depth + 1, codes, nodes);
            nodes.push(WaveletNode { bits, left, right });
            Child::Node((nodes.len() - 1) as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_rank(text: &[u8], c: u8, row: usize) -> usize {
        text[..row].iter().filter(|&&x| x == c).count()
    }

    #[test]
    fn character_and_rank_match_naive() {
        let text = b"MSTAVPK/MSTAIPK/$/KKKLLA";
        let wt = WaveletTree::build(text);
        for row in 0..text.len() {
            let (c, r) = wt.character_and_rank_at(row);
            assert_eq!(c, text[row]);
            assert_eq!(r, naive_rank(text, c, row));
        }
    }

    #[test]
    fn frequent_characters_get_shorter_codes() {
        let text = b"AAAAAAAAAAAAAAAAKKKKKKKK//$";
        let wt = WaveletTree::build(text);
        assert!(wt.code_length(b'A').unwrap() < wt.code_length(b'$').unwrap());
        assert!(wt.code_length(b'Q').is_none());
    }

    #[test]
    fn single_character_query_follows_less_table() {
        let text = b"PKAAKPA$/";
        let wt = WaveletTree::build(text);
        let n = text.len();
        for &c in b"AKP/$" {
            let (l, r) = wt.single_character_range_query(0, n, c).unwrap();
            assert_eq!(l, wt.less(c) as usize);
            assert_eq!(r - l, naive_rank(text, c, n));
            let (l2, r2) = wt.single_character_range_query(2, 7, c).map_or((0, 0), |x| x);
            assert_eq!(r2 - l2, text[2..7].iter().filter(|&&x| x == c).count());
        }
        assert!(wt.single_character_range_query(0, n, b'W').is_none());
        assert!(wt.single_character_range_query(3, 3, b'A').is_none());
    }

    #[test]
    fn range_query_enumerates_every_character() {
        let text = b"MSTAVPKMSTAIPK/$";
        let wt = WaveletTree::build(text);
        let mut out = Vec::new();
        wt.range_query(3, 12, &mut out);
        let mut expected: Vec<u8> = text[3..12].to_vec();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(out.iter().map(|e| e.0).collect::<Vec<_>>(), expected);
        for &(c, l, r) in &out {
            assert_eq!(wt.single_character_range_query(3, 12, c), Some((l, r)));
        }
    }

    #[test]
    fn single_symbol_text() {
        let wt = WaveletTree::build(b"$");
        assert_eq!(wt.character_and_rank_at(0), ('$' as u8, 0));
        assert_eq!(wt.single_character_range_query(0, 1, b'$'), Some((0, 1)));
    }
}
