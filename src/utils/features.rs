/// HOG 特征提取 (Felzenszwalb 31 维)
///
/// 每个 sbin x sbin 像素的 cell 输出 31 维:
/// - 0..18:  对比度敏感方向 (18 个方向)
/// - 18..27: 对比度不敏感方向 (9 个方向)
/// - 27..31: 四个归一化块的梯度能量
///
/// 输出尺寸 = round(尺寸 / sbin) - 2 (去掉边界 cell)
use image::RgbImage;
use ndarray::Array3;

use crate::Float;

/// 每个 cell 的特征维数
pub const FEATURE_DIMS: usize = 31;

const EPS: Float = 0.0001;
const TRUNCATE: Float = 0.2;
const TEXTURE_WEIGHT: Float = 0.2357;

// 方向单位向量 (0°, 20°, ..., 160°)
const UU: [Float; 9] = [
    1.0000, 0.9397, 0.7660, 0.5000, 0.1736, -0.1736, -0.5000, -0.7660, -0.9397,
];
const VV: [Float; 9] = [
    0.0000, 0.3420, 0.6428, 0.8660, 0.9848, 0.9848, 0.8660, 0.6428, 0.3420,
];

/// 计算 HOG 特征图, 形状 (height, width, FEATURE_DIMS)
pub fn hog(image: &RgbImage, sbin: usize) -> Array3<Float> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if sbin == 0 || w < 3 || h < 3 {
        return Array3::zeros((0, 0, FEATURE_DIMS));
    }

    let blocks_y = (h as f64 / sbin as f64).round() as usize;
    let blocks_x = (w as f64 / sbin as f64).round() as usize;
    let out_h = blocks_y.saturating_sub(2);
    let out_w = blocks_x.saturating_sub(2);
    if out_h == 0 || out_w == 0 {
        return Array3::zeros((out_h, out_w, FEATURE_DIMS));
    }

    let visible_y = blocks_y * sbin;
    let visible_x = blocks_x * sbin;
    let raw = image.as_raw();
    let px = |x: usize, y: usize, c: usize| raw[(y * w + x) * 3 + c] as Float;

    // 1. 梯度方向直方图 (双线性插值到相邻 4 个 cell)
    let mut hist = vec![0.0 as Float; blocks_y * blocks_x * 18];
    for y in 1..visible_y - 1 {
        for x in 1..visible_x - 1 {
            let cx = x.min(w - 2);
            let cy = y.min(h - 2);

            // 取三个通道中梯度最大的
            let mut best_dx = 0.0;
            let mut best_dy = 0.0;
            let mut best_v = -1.0;
            for c in 0..3 {
                let dx = px(cx + 1, cy, c) - px(cx - 1, cy, c);
                let dy = px(cx, cy + 1, c) - px(cx, cy - 1, c);
                let v = dx * dx + dy * dy;
                if v > best_v {
                    best_v = v;
                    best_dx = dx;
                    best_dy = dy;
                }
            }

            // 量化到 18 个方向
            let mut best_dot = 0.0;
            let mut best_o = 0;
            for o in 0..9 {
                let dot = UU[o] * best_dx + VV[o] * best_dy;
                if dot > best_dot {
                    best_dot = dot;
                    best_o = o;
                } else if -dot > best_dot {
                    best_dot = -dot;
                    best_o = o + 9;
                }
            }

            let xp = (x as Float + 0.5) / sbin as Float - 0.5;
            let yp = (y as Float + 0.5) / sbin as Float - 0.5;
            let ixp = xp.floor() as isize;
            let iyp = yp.floor() as isize;
            let vx0 = xp - ixp as Float;
            let vy0 = yp - iyp as Float;
            let vx1 = 1.0 - vx0;
            let vy1 = 1.0 - vy0;
            let v = best_v.sqrt();

            let mut vote = |bx: isize, by: isize, weight: Float| {
                if bx >= 0 && by >= 0 && (bx as usize) < blocks_x && (by as usize) < blocks_y {
                    hist[((by as usize) * blocks_x + bx as usize) * 18 + best_o] += weight * v;
                }
            };
            vote(ixp, iyp, vx1 * vy1);
            vote(ixp + 1, iyp, vx0 * vy1);
            vote(ixp, iyp + 1, vx1 * vy0);
            vote(ixp + 1, iyp + 1, vx0 * vy0);
        }
    }

    // 2. 每个 cell 的梯度能量
    let mut norm = vec![0.0 as Float; blocks_y * blocks_x];
    for (b, n) in norm.iter_mut().enumerate() {
        let cell = &hist[b * 18..b * 18 + 18];
        for o in 0..9 {
            let s = cell[o] + cell[o + 9];
            *n += s * s;
        }
    }
    let block = |bx: usize, by: usize| {
        norm[by * blocks_x + bx]
            + norm[by * blocks_x + bx + 1]
            + norm[(by + 1) * blocks_x + bx]
            + norm[(by + 1) * blocks_x + bx + 1]
    };

    // 3. 归一化 + 截断
    let mut feat = Array3::zeros((out_h, out_w, FEATURE_DIMS));
    for y in 0..out_h {
        for x in 0..out_w {
            let n1 = 1.0 / (block(x + 1, y + 1) + EPS).sqrt();
            let n2 = 1.0 / (block(x + 1, y) + EPS).sqrt();
            let n3 = 1.0 / (block(x, y + 1) + EPS).sqrt();
            let n4 = 1.0 / (block(x, y) + EPS).sqrt();

            let b = (y + 1) * blocks_x + x + 1;
            let cell = &hist[b * 18..b * 18 + 18];
            let mut t = [0.0 as Float; 4];

            for o in 0..18 {
                let hs = [
                    (cell[o] * n1).min(TRUNCATE),
                    (cell[o] * n2).min(TRUNCATE),
                    (cell[o] * n3).min(TRUNCATE),
                    (cell[o] * n4).min(TRUNCATE),
                ];
                feat[[y, x, o]] = 0.5 * (hs[0] + hs[1] + hs[2] + hs[3]);
                for (acc, v) in t.iter_mut().zip(hs) {
                    *acc += v;
                }
            }

            for o in 0..9 {
                let sum = cell[o] + cell[o + 9];
                let h1 = (sum * n1).min(TRUNCATE);
                let h2 = (sum * n2).min(TRUNCATE);
                let h3 = (sum * n3).min(TRUNCATE);
                let h4 = (sum * n4).min(TRUNCATE);
                feat[[y, x, 18 + o]] = 0.5 * (h1 + h2 + h3 + h4);
            }

            for (k, acc) in t.iter().enumerate() {
                feat[[y, x, 27 + k]] = TEXTURE_WEIGHT * acc;
            }
        }
    }

    feat
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_hog_dims() {
        let img = RgbImage::new(64, 48);
        let feat = hog(&img, 8);
        assert_eq!(feat.dim(), (4, 6, FEATURE_DIMS));
    }

    #[test]
    fn test_hog_too_small() {
        let img = RgbImage::new(12, 12);
        assert_eq!(hog(&img, 8).dim(), (0, 0, FEATURE_DIMS));
        assert!(hog(&RgbImage::new(0, 0), 8).is_empty());
    }

    #[test]
    fn test_hog_flat_image_is_zero() {
        let img = RgbImage::from_pixel(64, 64, Rgb([90, 90, 90]));
        let feat = hog(&img, 8);
        assert!(feat.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_hog_vertical_edge_is_local() {
        // x >= 32 为白色: 梯度只出现在 x=31,32 两列
        let img = RgbImage::from_fn(64, 64, |x, _| {
            if x >= 32 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let feat = hog(&img, 8);
        let (h, w, _) = feat.dim();
        for y in 0..h {
            for x in 0..w {
                let energy: Float = (0..FEATURE_DIMS).map(|k| feat[[y, x, k]]).sum();
                // 像素 31/32 投票到 block 3,4 → 特征 cell 2,3
                if x == 2 || x == 3 {
                    assert!(energy > 0.0, "cell ({}, {}) should respond", x, y);
                } else {
                    assert_eq!(energy, 0.0, "cell ({}, {}) should be empty", x, y);
                }
            }
        }
        // 水平梯度 → 方向 0 (或 9), 对比度不敏感通道 18
        assert!(feat[[1, 2, 18]] > 0.0);
    }
}
