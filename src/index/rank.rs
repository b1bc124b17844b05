use serde::{Deserialize, Serialize};

/// 每个超级块包含的 64 位字数（512 bit）。
const WORDS_PER_SUPERBLOCK: usize = 8;
const SUPERBLOCK_BITS: usize = WORDS_PER_SUPERBLOCK * 64;

/// 支持 O(1) rank 与 O(log n) select 的静态位向量。
///
/// 两级计数：`superblocks[s]` 为第 s 个超级块之前的 1 的累计数，
/// `blocks[w]` 为字 w 在其超级块内之前的 1 的数量；字内使用 popcount。
/// 越界访问属于调用方错误，直接 panic。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankBitVector {
    words: Vec<u64>,
    superblocks: Vec<u64>,
    blocks: Vec<u16>,
    len: usize,
    ones: usize,
}

impl RankBitVector {
    pub fn new(bits: &[bool]) -> Self {
        bits.iter().copied().collect()
    }

    fn from_words(words: Vec<u64>, len: usize) -> Self {
        let num_super = (words.len() + WORDS_PER_SUPERBLOCK - 1) / WORDS_PER_SUPERBLOCK;
        let mut superblocks = Vec::with_capacity(num_super + 1);
        let mut blocks = Vec::with_capacity(words.len());
        let mut total = 0u64;
        let mut within = 0u16;
        for (w, word) in words.iter().enumerate() {
            if w % WORDS_PER_SUPERBLOCK == 0 {
                superblocks.push(total);
                within = 0;
            }
            blocks.push(within);
            let c = word.count_ones();
            within += c as u16;
            total += c as u64;
        }
        superblocks.push(total);
        Self { words, superblocks, blocks, len, ones: total as usize }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    #[inline]
    pub fn value_at(&self, pos: usize) -> bool {
        assert!(pos < self.len, "bit position {pos} out of range (len={})", self.len);
        (self.words[pos / 64] >> (pos % 64)) & 1 == 1
    }

    /// 1 的数量，区间 [0, pos)，pos 可等于 len。
    #[inline]
    pub fn ones_before(&self, pos: usize) -> usize {
        assert!(pos <= self.len, "rank position {pos} out of range (len={})", self.len);
        let w = pos / 64;
        if w == self.words.len() {
            return self.ones;
        }
        let base = self.superblocks[w / WORDS_PER_SUPERBLOCK] as usize + self.blocks[w] as usize;
        let bit = pos % 64;
        if bit == 0 {
            base
        } else {
            base + (self.words[w] & ((1u64 << bit) - 1)).count_ones() as usize
        }
    }

    /// `bit` 在 [0, pos) 中的出现次数。
    #[inline]
    pub fn rank_before(&self, pos: usize, bit: bool) -> usize {
        let ones = self.ones_before(pos);
        if bit {
            ones
        } else {
            pos - ones
        }
    }

    /// `bit` 在 [0, pos] 中的出现次数。
    #[inline]
    pub fn rank(&self, pos: usize, bit: bool) -> usize {
        assert!(pos < self.len, "rank position {pos} out of range (len={})", self.len);
        self.rank_before(pos + 1, bit)
    }

    /// 第 k 个（从 1 开始）`bit` 的位置；不足 k 个时返回 None。
    pub fn select(&self, k: usize, bit: bool) -> Option<usize> {
        let available = if bit { self.ones } else { self.len - self.ones };
        if k == 0 || k > available {
            return None;
        }
        // 超块 s 之前 `bit` 的个数
        let before = |s: usize| -> usize {
            let ones = self.superblocks[s] as usize;
            if bit {
                ones
            } else {
                (s * SUPERBLOCK_BITS).min(self.len) - ones
            }
        };
        let mut lo = 0usize;
        let mut hi = self.superblocks.len() - 1;
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if before(mid) < k {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let mut remaining = k - before(lo);
        for w in lo * WORDS_PER_SUPERBLOCK..self.words.len() {
            let mut word = if bit { self.words[w] } else { !self.words[w] };
            let valid = (self.len - w * 64).min(64);
            if valid < 64 {
                word &= (1u64 << valid) - 1;
            }
            let c = word.count_ones() as usize;
            if c >= remaining {
                for _ in 1..remaining {
                    word &= word - 1;
                }
                return Some(w * 64 + word.trailing_zeros() as usize);
            }
            remaining -= c;
        }
        None
    }
}

impl FromIterator<bool> for RankBitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut words: Vec<u64> = Vec::new();
        let mut len = 0usize;
        for b in iter {
            if len % 64 == 0 {
                words.push(0);
            }
            if b {
                if let Some(last) = words.last_mut() {
                    *last |= 1u64 << (len % 64);
                }
            }
            len += 1;
        }
        Self::from_words(words, len)
    }
}
