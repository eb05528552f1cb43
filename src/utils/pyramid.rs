/// HOG 特征金字塔 (Feature Pyramid)
///
/// 层号布局:
/// - `0..interval`:   sbin/2 特征 (2 倍分辨率, 供部件滤波器使用)
/// - `interval..`:    sbin 特征 (根滤波器), 每 `interval` 层图像缩小一半
///
/// 根层 L 对应的部件层为 L - interval, 始终是同一物体 2 倍分辨率的特征
use anyhow::{anyhow, Result};
use fast_image_resize as fr;
use image::RgbImage;
use ndarray::Array3;

use super::features::hog;
use crate::Float;

/// 金字塔单层
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// HOG 特征 (height, width, FEATURE_DIMS)
    pub features: Array3<Float>,
    /// 该层图像相对输入图像的缩放比例
    pub scale: Float,
    /// 每个特征 cell 的像素边长
    pub cell: usize,
}

impl PyramidLevel {
    pub fn width(&self) -> usize {
        self.features.dim().1
    }

    pub fn height(&self) -> usize {
        self.features.dim().0
    }

    /// 一个特征 cell 在输入图像中的像素长度
    pub fn pixels_per_cell(&self) -> Float {
        self.cell as Float / self.scale
    }

    /// 特征是否全为零 (无梯度能量)
    pub fn is_blank(&self) -> bool {
        self.features.iter().all(|&v| v == 0.0)
    }
}

#[derive(Debug, Clone)]
pub struct FeaturePyramid {
    levels: Vec<Option<PyramidLevel>>,
    interval: usize,
}

impl FeaturePyramid {
    /// 构建特征金字塔
    ///
    /// `min_root` = 最小根滤波器 (宽, 高), 根层放不下时停止降采样
    pub fn build(
        image: &RgbImage,
        sbin: usize,
        interval: usize,
        min_root: (usize, usize),
    ) -> Result<Self> {
        let interval = interval.max(1);
        let sc = (2.0f64).powf(1.0 / interval as f64);
        let (w0, h0) = image.dimensions();
        let fits = |feat: &Array3<Float>| {
            let (h, w, _) = feat.dim();
            w >= min_root.0 && h >= min_root.1 && w > 0 && h > 0
        };

        let mut levels: Vec<Option<PyramidLevel>> = vec![None; interval];
        for i in 0..interval {
            let factor = 1.0 / sc.powi(i as i32);
            let width = (w0 as f64 * factor).round() as u32;
            let height = (h0 as f64 * factor).round() as u32;
            if width == 0 || height == 0 {
                break;
            }
            let mut scaled = resize_rgb(image, width, height)?;

            let root = hog(&scaled, sbin);
            if !fits(&root) {
                continue;
            }
            levels[i] = Some(PyramidLevel {
                features: hog(&scaled, sbin / 2),
                scale: factor as Float,
                cell: sbin / 2,
            });

            // 逐个八度: 根层 i + interval * (k + 1)
            let mut feat = root;
            let mut scale = factor;
            let mut k = 1;
            loop {
                let idx = i + interval * k;
                if levels.len() <= idx {
                    levels.resize(idx + 1, None);
                }
                levels[idx] = Some(PyramidLevel {
                    features: feat,
                    scale: scale as Float,
                    cell: sbin,
                });

                let (w, h) = scaled.dimensions();
                let (nw, nh) = ((w as f64 * 0.5).round() as u32, (h as f64 * 0.5).round() as u32);
                if nw == 0 || nh == 0 {
                    break;
                }
                scaled = resize_rgb(&scaled, nw, nh)?;
                feat = hog(&scaled, sbin);
                if !fits(&feat) {
                    break;
                }
                scale *= 0.5;
                k += 1;
            }
        }

        Ok(Self { levels, interval })
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Option::is_none)
    }

    pub fn level(&self, idx: usize) -> Option<&PyramidLevel> {
        self.levels.get(idx).and_then(Option::as_ref)
    }

    /// 部件层 (根层 - interval)
    pub fn part_level(&self, root_idx: usize) -> Option<&PyramidLevel> {
        root_idx
            .checked_sub(self.interval)
            .and_then(|idx| self.level(idx))
    }

    /// 所有根层下标
    pub fn root_levels(&self) -> impl Iterator<Item = usize> + '_ {
        (self.interval..self.levels.len()).filter(move |&idx| self.level(idx).is_some())
    }

    /// 所有根层都没有梯度能量 (全黑/纯色图像)
    pub fn is_blank(&self) -> bool {
        self.root_levels()
            .filter_map(|idx| self.level(idx))
            .all(PyramidLevel::is_blank)
    }
}

/// RGB 缩放 (fast_image_resize 双线性), 尺寸不变时直接拷贝
pub fn resize_rgb(src: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    if src.dimensions() == (width, height) {
        return Ok(src.clone());
    }

    let src_image = fr::images::Image::from_vec_u8(
        src.width(),
        src.height(),
        src.as_raw().clone(),
        fr::PixelType::U8x3,
    )
    .map_err(|e| anyhow!("源图像创建失败: {:?}", e))?;
    let mut dst_image = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )
        .map_err(|e| anyhow!("图像缩放失败: {:?}", e))?;

    RgbImage::from_raw(width, height, dst_image.buffer().to_vec())
        .ok_or_else(|| anyhow!("RGB图像转换失败 {}x{}", width, height))
}
