/// 构建后缀数组（前缀倍增，O(n log² n)）。
/// 输入为原始字节文本：以唯一且最小的哨兵结尾，蛋白质之间以分隔符隔开。
pub fn build_sa(text: &[u8]) -> Vec<u32> {
    let n = text.len();
    if n == 0 {
        return Vec::new();
    }
    assert!(n <= u32::MAX as usize, "shard text too long for 32-bit suffix array");

    let mut sa: Vec<u32> = (0..n as u32).collect();
    let mut rank: Vec<u32> = text.iter().map(|&b| b as u32).collect();
    let mut tmp: Vec<u32> = vec![0; n];

    // (rank[i], rank[i + k] + 1)，越界记为 0
    let key = |rank: &[u32], i: u32, k: usize| -> (u32, u32) {
        let i = i as usize;
        let next = if i + k < n { rank[i + k] + 1 } else { 0 };
        (rank[i], next)
    };

    let mut k = 1usize;
    loop {
        sa.sort_unstable_by_key(|&i| key(&rank, i, k));

        tmp[sa[0] as usize] = 0;
        for w in 1..n {
            let prev = key(&rank, sa[w - 1], k);
            let curr = key(&rank, sa[w], k);
            tmp[sa[w] as usize] = tmp[sa[w - 1] as usize] + u32::from(curr != prev);
        }
        rank.copy_from_slice(&tmp);

        if rank[sa[n - 1] as usize] as usize == n - 1 || k >= n {
            break;
        }
        k <<= 1;
    }

    sa
}
