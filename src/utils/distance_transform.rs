/// 广义距离变换 (Generalized Distance Transform)
///
/// 部件最优位置求解: 对每个目标位置 d
///   dst[d] = min_s src[s] + a*(d-s)^2 + b*(d-s)
///   ptr[d] = 取得最小值的 s
///
/// 递归分治: 取中点 d, 在候选区间 [s1, s2] 内线性扫描最优 s,
/// 然后左半 [d1, d-1] 只需搜索 [s1, s], 右半 [d+1, d2] 只需搜索 [s, s2]
/// (二次代价凸, 最优 s 随 d 单调不减)
use anyhow::{bail, Result};
use ndarray::Array2;

use crate::Float;

/// 二维距离变换结果
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceTransform {
    /// 变换后的代价图
    pub values: Array2<Float>,
    /// 每个目标位置的最优源 x
    pub ix: Array2<usize>,
    /// 每个目标位置的最优源 y
    pub iy: Array2<usize>,
}

// 递归子过程, 下标 = offset + i * step
#[allow(clippy::too_many_arguments)]
fn dt_helper(
    src: &[Float],
    dst: &mut [Float],
    ptr: &mut [usize],
    offset: usize,
    step: usize,
    s1: usize,
    s2: usize,
    d1: isize,
    d2: isize,
    a: Float,
    b: Float,
) {
    if d2 < d1 {
        return;
    }

    let d = (d1 + d2) >> 1;
    let mut s = s1;
    let mut src_ss = src[offset + s * step];
    for p in s1 + 1..=s2 {
        let t1 = (d - s as isize) as Float;
        let t2 = (d - p as isize) as Float;
        let src_p = src[offset + p * step];
        // 严格大于: 并列时保留先找到的 s
        if src_ss + a * t1 * t1 + b * t1 > src_p + a * t2 * t2 + b * t2 {
            s = p;
            src_ss = src_p;
        }
    }

    let t = (d - s as isize) as Float;
    let ds = offset + d as usize * step;
    dst[ds] = src_ss + a * t * t + b * t;
    ptr[ds] = s;

    dt_helper(src, dst, ptr, offset, step, s1, s, d1, d - 1, a, b);
    dt_helper(src, dst, ptr, offset, step, s, s2, d + 1, d2, a, b);
}

/// 一维距离变换 (带步长, 可直接作用于二维缓冲的行或列)
///
/// `src`/`dst`/`ptr` 共用同一套下标 `offset + i * step`, `i in 0..n`
#[allow(clippy::too_many_arguments)]
pub fn dt1d(
    src: &[Float],
    dst: &mut [Float],
    ptr: &mut [usize],
    offset: usize,
    step: usize,
    n: usize,
    a: Float,
    b: Float,
) {
    if n == 0 {
        return;
    }
    dt_helper(src, dst, ptr, offset, step, 0, n - 1, 0, n as isize - 1, a, b);
}

/// 一维距离变换 (连续数组)
pub fn distance_transform_1d(src: &[Float], a: Float, b: Float) -> (Vec<Float>, Vec<usize>) {
    let mut dst = vec![0.0; src.len()];
    let mut ptr = vec![0; src.len()];
    dt1d(src, &mut dst, &mut ptr, 0, 1, src.len(), a, b);
    (dst, ptr)
}

/// 二维可分离距离变换
///
/// 先沿 y (每一列, 系数 ay/by), 再沿 x (中间结果的每一行, 系数 ax/bx),
/// 最后合成二维最优坐标 (Ix, Iy)
pub fn distance_transform(
    vals: &Array2<Float>,
    ax: Float,
    bx: Float,
    ay: Float,
    by: Float,
) -> DistanceTransform {
    let (h, w) = vals.dim();
    let src: Vec<Float> = vals.iter().copied().collect();

    let mut tmp_m = vec![0.0; h * w];
    let mut tmp_iy = vec![0usize; h * w];
    for x in 0..w {
        dt1d(&src, &mut tmp_m, &mut tmp_iy, x, w, h, ay, by);
    }

    let mut m = vec![0.0; h * w];
    let mut tmp_ix = vec![0usize; h * w];
    for y in 0..h {
        dt1d(&tmp_m, &mut m, &mut tmp_ix, y * w, 1, w, ax, bx);
    }

    let ix = Array2::from_shape_fn((h, w), |(y, x)| tmp_ix[y * w + x]);
    let iy = Array2::from_shape_fn((h, w), |(y, x)| tmp_iy[y * w + ix[[y, x]]]);
    let values = Array2::from_shape_fn((h, w), |(y, x)| m[y * w + x]);

    DistanceTransform { values, ix, iy }
}

/// 把部件得分加到根得分上 (部件分辨率为根的 2 倍)
///
/// `score[y, x] -= m[ay + 2y, ax + 2x]`, `m` 为取负后做过距离变换的部件响应.
/// 越界属于调用方尺寸约定错误: debug 构建直接断言, release 构建返回错误且不修改 `score`.
pub fn add_part_scores(
    score: &mut Array2<Float>,
    m: &Array2<Float>,
    ax: usize,
    ay: usize,
) -> Result<()> {
    let (rh, rw) = score.dim();
    if rh == 0 || rw == 0 {
        return Ok(());
    }
    let (ph, pw) = m.dim();
    let fits = ay + 2 * (rh - 1) < ph && ax + 2 * (rw - 1) < pw;
    debug_assert!(
        fits,
        "part map {}x{} too small for root map {}x{} at anchor ({}, {})",
        pw, ph, rw, rh, ax, ay
    );
    if !fits {
        bail!(
            "部件响应图尺寸不匹配: part {}x{}, root {}x{}, anchor ({}, {})",
            pw,
            ph,
            rw,
            rh,
            ax,
            ay
        );
    }

    for ((y, x), s) in score.indexed_iter_mut() {
        *s -= m[[ay + 2 * y, ax + 2 * x]];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const QUAD: [Float; 6] = [0.0, 0.25, 0.5, 1.0, 2.0, 3.0];
    const LIN: [Float; 7] = [-2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0];

    fn brute_force_1d(src: &[Float], a: Float, b: Float) -> (Vec<Float>, Vec<usize>) {
        let n = src.len();
        let mut dst = vec![0.0; n];
        let mut ptr = vec![0; n];
        for d in 0..n {
            let mut best = Float::INFINITY;
            let mut best_s = 0;
            for (s, &v) in src.iter().enumerate() {
                let t = d as Float - s as Float;
                let cost = v + a * t * t + b * t;
                if cost < best {
                    best = cost;
                    best_s = s;
                }
            }
            dst[d] = best;
            ptr[d] = best_s;
        }
        (dst, ptr)
    }

    #[test]
    fn test_dt1d_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..300 {
            let n = rng.gen_range(1..=64);
            let src: Vec<Float> = (0..n).map(|_| rng.gen_range(-50..=50) as Float).collect();
            let a = QUAD[rng.gen_range(0..QUAD.len())];
            let b = LIN[rng.gen_range(0..LIN.len())];

            let (dst, ptr) = distance_transform_1d(&src, a, b);
            let (want_dst, want_ptr) = brute_force_1d(&src, a, b);
            assert_eq!(dst, want_dst, "a={} b={} src={:?}", a, b, src);
            assert_eq!(ptr, want_ptr, "a={} b={} src={:?}", a, b, src);
        }
    }

    #[test]
    fn test_dt1d_ties_keep_first() {
        // 全相等且 a=b=0: 每个位置都应取 s=0
        let src = vec![3.0; 9];
        let (dst, ptr) = distance_transform_1d(&src, 0.0, 0.0);
        assert!(dst.iter().all(|&v| v == 3.0));
        assert!(ptr.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_dt1d_strided_column() {
        // 3x2 缓冲的第 1 列
        let src = vec![0.0, 9.0, 0.0, 1.0, 0.0, 9.0];
        let mut dst = vec![-1.0; 6];
        let mut ptr = vec![99; 6];
        dt1d(&src, &mut dst, &mut ptr, 1, 2, 3, 1.0, 0.0);
        assert_eq!(dst[1], 2.0);
        assert_eq!(dst[3], 1.0);
        assert_eq!(dst[5], 2.0);
        assert_eq!(ptr[1], 1);
        assert_eq!(ptr[5], 1);
        // 另一列不应被写入
        assert_eq!(dst[0], -1.0);
        assert_eq!(ptr[4], 99);
    }

    #[test]
    fn test_dt2d_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(11);
        for &(h, w) in &[(5usize, 5usize), (4, 6), (7, 3), (1, 5)] {
            for _ in 0..20 {
                let vals = Array2::from_shape_fn((h, w), |_| rng.gen_range(-20..=20) as Float);
                let ax = QUAD[rng.gen_range(0..QUAD.len())];
                let ay = QUAD[rng.gen_range(0..QUAD.len())];
                let bx = LIN[rng.gen_range(0..LIN.len())];
                let by = LIN[rng.gen_range(0..LIN.len())];

                let dt = distance_transform(&vals, ax, bx, ay, by);
                let cost = |y: usize, x: usize, sy: usize, sx: usize| {
                    let dx = x as Float - sx as Float;
                    let dy = y as Float - sy as Float;
                    vals[[sy, sx]] + ax * dx * dx + bx * dx + ay * dy * dy + by * dy
                };

                for y in 0..h {
                    for x in 0..w {
                        let mut best = Float::INFINITY;
                        for sy in 0..h {
                            for sx in 0..w {
                                best = best.min(cost(y, x, sy, sx));
                            }
                        }
                        assert_eq!(dt.values[[y, x]], best);
                        // 最优坐标必须真的取得最小值
                        assert_eq!(cost(y, x, dt.iy[[y, x]], dt.ix[[y, x]]), best);
                    }
                }
            }
        }
    }

    #[test]
    fn test_dt2d_empty() {
        let dt = distance_transform(&Array2::zeros((0, 4)), 1.0, 0.0, 1.0, 0.0);
        assert_eq!(dt.values.dim(), (0, 4));
        assert!(dt.ix.is_empty());
    }

    #[test]
    fn test_add_part_scores_stride_two() {
        let mut score = Array2::from_elem((2, 3), 10.0);
        let m = Array2::from_shape_fn((5, 7), |(y, x)| (y * 10 + x) as Float);
        add_part_scores(&mut score, &m, 1, 0).unwrap();
        // score[y, x] = 10 - m[2y, 1 + 2x]
        assert_eq!(score[[0, 0]], 10.0 - 1.0);
        assert_eq!(score[[0, 2]], 10.0 - 5.0);
        assert_eq!(score[[1, 1]], 10.0 - 23.0);
        assert_eq!(score[[1, 2]], 10.0 - 25.0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn test_add_part_scores_out_of_range_asserts() {
        let mut score = Array2::zeros((3, 3));
        let m = Array2::zeros((4, 4));
        let _ = add_part_scores(&mut score, &m, 0, 0);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_add_part_scores_out_of_range_errors() {
        let mut score = Array2::from_elem((3, 3), 1.0);
        let m = Array2::zeros((4, 4));
        assert!(add_part_scores(&mut score, &m, 0, 0).is_err());
        assert!(score.iter().all(|&v| v == 1.0));
    }
}
