/// 根据后缀数组构建 BWT：BWT[i] = T[SA[i] - 1]，SA[i] == 0 时回绕到 T[n - 1]。
pub fn build_bwt(text: &[u8], sa: &[u32]) -> Vec<u8> {
    let n = text.len();
    if n == 0 {
        return Vec::new();
    }
    let mut bwt = Vec::with_capacity(n);
    for &p in sa {
        let i = p as usize;
        let prev = if i == 0 { text[n - 1] } else { text[i - 1] };
        bwt.push(prev);
    }
    bwt
}

/// 后缀数组稀疏采样：保留行号为 2^shift 整数倍的条目。
pub fn sample_suffix_array(sa: &[u32], shift: u8) -> Vec<u32> {
    sa.iter().step_by(1usize << shift).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sa::build_sa;

    #[test]
    fn bwt_is_permutation_of_text() {
        let text = b"/MSTAVPK/MSTAIPK/$";
        let sa = build_sa(text);
        let bwt = build_bwt(text, &sa);
        let mut a = bwt.clone();
        let mut b = text.to_vec();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
        // 第 0 行是哨兵后缀，其前一个字符是末尾分隔符
        assert_eq!(bwt[0], b'/');
    }

    #[test]
    fn sampling_keeps_every_stride_row() {
        let sa: Vec<u32> = (0..20).rev().collect();
        let sampled = sample_suffix_array(&sa, 3);
        assert_eq!(sampled, vec![19, 11, 3]);
        for (i, &v) in sampled.iter().enumerate() {
            assert_eq!(v, sa[i << 3]);
        }
    }
}
