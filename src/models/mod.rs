/// 可形变部件模型 (Deformable Part Model)
///
/// # 结构
/// - 每个类别: 根滤波器 + 若干部件 + 偏置
/// - 部件滤波器在根的 2 倍分辨率上打分, 锚点以部件层 cell 为单位
/// - 形变代价: 二次项 (ax, ay) 必须非负, 偏离锚点永远不会得到奖励
///
/// 模型加载后不可变, 可在多个打分线程间只读共享
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ndarray::Array3;
use tracing::{debug, info};

use crate::utils::features::FEATURE_DIMS;
use crate::Float;

pub mod file;

pub use file::{ClassFile, FilterFile, ModelFile, PartFile};

/// 滤波器权重 (height, width, FEATURE_DIMS)
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    weights: Array3<Float>,
}

impl Filter {
    pub fn new(weights: Array3<Float>) -> Result<Self> {
        let (h, w, d) = weights.dim();
        ensure!(w > 0 && h > 0, "滤波器尺寸为空: {}x{}", w, h);
        ensure!(d == FEATURE_DIMS, "滤波器特征维数 {} != {}", d, FEATURE_DIMS);
        ensure!(weights.iter().all(|v| v.is_finite()), "滤波器权重包含非有限值");
        Ok(Self { weights })
    }

    fn from_file(file: &FilterFile) -> Result<Self> {
        let expected = file
            .width
            .checked_mul(file.height)
            .and_then(|n| n.checked_mul(FEATURE_DIMS))
            .with_context(|| format!("滤波器尺寸溢出: {}x{}", file.width, file.height))?;
        ensure!(
            file.weights.len() == expected,
            "权重数量 {} != {}x{}x{}",
            file.weights.len(),
            file.width,
            file.height,
            FEATURE_DIMS
        );
        let weights = Array3::from_shape_vec(
            (file.height, file.width, FEATURE_DIMS),
            file.weights.iter().map(|&v| v as Float).collect(),
        )?;
        Self::new(weights)
    }

    fn to_file(&self) -> FilterFile {
        FilterFile {
            width: self.width(),
            height: self.height(),
            weights: self.weights.iter().map(|&v| v as f64).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.weights.dim().1
    }

    pub fn height(&self) -> usize {
        self.weights.dim().0
    }

    pub fn weights(&self) -> &Array3<Float> {
        &self.weights
    }
}

/// 二次形变代价: cost(dx, dy) = ax*dx^2 + bx*dx + ay*dy^2 + by*dy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deformation {
    pub ax: Float,
    pub bx: Float,
    pub ay: Float,
    pub by: Float,
}

impl Deformation {
    pub fn new(ax: Float, bx: Float, ay: Float, by: Float) -> Result<Self> {
        ensure!(
            [ax, bx, ay, by].iter().all(|v| v.is_finite()),
            "形变代价包含非有限值"
        );
        ensure!(ax >= 0.0 && ay >= 0.0, "二次形变代价必须非负: ax={} ay={}", ax, ay);
        Ok(Self { ax, bx, ay, by })
    }
}

/// 部件
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub filter: Filter,
    /// 锚点 (x, y), 相对根位置 2 倍后的部件层 cell 坐标
    pub anchor: (usize, usize),
    pub deformation: Deformation,
}

/// 单个类别的模型
#[derive(Debug, Clone, PartialEq)]
pub struct ClassModel {
    pub name: String,
    pub root: Filter,
    pub parts: Vec<Part>,
    pub bias: Float,
}

impl ClassModel {
    fn from_file(file: &ClassFile) -> Result<Self> {
        let root = Filter::from_file(&file.root).context("根滤波器")?;
        ensure!(file.bias.is_finite(), "偏置必须为有限值");

        let mut parts = Vec::with_capacity(file.parts.len());
        for (idx, part) in file.parts.iter().enumerate() {
            let filter = Filter::from_file(&part.filter).with_context(|| format!("部件 {}", idx))?;
            let [ax, bx, ay, by] = part.deformation;
            let deformation = Deformation::new(ax as Float, bx as Float, ay as Float, by as Float)
                .with_context(|| format!("部件 {}", idx))?;
            let anchor = (part.anchor[0], part.anchor[1]);

            // 部件必须落在根的 2 倍范围内
            ensure!(
                anchor.0.saturating_add(filter.width()) <= 2 * root.width()
                    && anchor.1.saturating_add(filter.height()) <= 2 * root.height(),
                "部件 {} 超出根范围: anchor ({}, {}), part {}x{}, root {}x{}",
                idx,
                anchor.0,
                anchor.1,
                filter.width(),
                filter.height(),
                root.width(),
                root.height()
            );

            parts.push(Part {
                filter,
                anchor,
                deformation,
            });
        }

        Ok(Self {
            name: file.name.clone(),
            root,
            parts,
            bias: file.bias as Float,
        })
    }

    fn to_file(&self) -> ClassFile {
        ClassFile {
            name: self.name.clone(),
            bias: self.bias as f64,
            root: self.root.to_file(),
            parts: self
                .parts
                .iter()
                .map(|p| PartFile {
                    filter: p.filter.to_file(),
                    anchor: [p.anchor.0, p.anchor.1],
                    deformation: [
                        p.deformation.ax as f64,
                        p.deformation.bx as f64,
                        p.deformation.ay as f64,
                        p.deformation.by as f64,
                    ],
                })
                .collect(),
        }
    }
}

/// 检测模型 (一个或多个类别)
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    classes: Vec<ClassModel>,
    sbin: usize,
    interval: usize,
    ratio: Float,
}

impl Model {
    /// 从 JSON 模型文件加载
    ///
    /// `ratio`: 检测前输入图像的缩放比例 (<1 更快、更粗), 必须为正
    pub fn load(path: impl AsRef<Path>, ratio: f64) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("模型文件读取失败: {}", path.display()))?;
        let file: ModelFile = serde_json::from_str(&json)
            .with_context(|| format!("模型文件解析失败: {}", path.display()))?;
        let model = Self::from_file_model(&file, ratio)
            .with_context(|| format!("模型校验失败: {}", path.display()))?;
        info!(
            "✅ 模型加载成功: {} ({} 类, sbin={}, interval={})",
            path.display(),
            model.classes.len(),
            model.sbin,
            model.interval
        );
        Ok(model)
    }

    /// 加载多个模型文件并合并类别 (类别ID按文件顺序)
    pub fn load_all<P: AsRef<Path>>(paths: &[P], ratio: f64) -> Result<Self> {
        if paths.is_empty() {
            bail!("未指定模型文件");
        }
        let mut merged: Option<Model> = None;
        for path in paths {
            let model = Self::load(path, ratio)?;
            merged = Some(match merged {
                None => model,
                Some(mut acc) => {
                    ensure!(
                        acc.sbin == model.sbin && acc.interval == model.interval,
                        "模型参数不一致: {} (sbin={}, interval={}) vs (sbin={}, interval={})",
                        path.as_ref().display(),
                        model.sbin,
                        model.interval,
                        acc.sbin,
                        acc.interval
                    );
                    acc.classes.extend(model.classes);
                    acc
                }
            });
        }
        merged.context("未加载任何模型")
    }

    /// 从内存中的模型文件构建
    pub fn from_file_model(file: &ModelFile, ratio: f64) -> Result<Self> {
        ensure!(ratio.is_finite() && ratio > 0.0, "ratio 必须为正数: {}", ratio);
        ensure!(
            file.sbin >= 2 && file.sbin % 2 == 0,
            "sbin 必须为不小于 2 的偶数: {}",
            file.sbin
        );
        ensure!(file.interval >= 1, "interval 必须 >= 1");

        let classes = file
            .classes
            .iter()
            .map(|c| ClassModel::from_file(c).with_context(|| format!("类别 {}", c.name)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            classes,
            sbin: file.sbin,
            interval: file.interval,
            ratio: ratio as Float,
        })
    }

    /// 导出为模型文件结构
    pub fn to_file_model(&self) -> ModelFile {
        ModelFile {
            sbin: self.sbin,
            interval: self.interval,
            classes: self.classes.iter().map(ClassModel::to_file).collect(),
        }
    }

    /// 释放模型 (所有缓冲随所有权一起释放)
    pub fn release(self) {
        debug!("模型释放: {} 类", self.classes.len());
    }

    pub fn classes(&self) -> &[ClassModel] {
        &self.classes
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn sbin(&self) -> usize {
        self.sbin
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn ratio(&self) -> Float {
        self.ratio
    }

    /// 最小根滤波器尺寸 (宽, 高), 用于限制金字塔层数
    pub fn min_root_size(&self) -> Option<(usize, usize)> {
        let w = self.classes.iter().map(|c| c.root.width()).min()?;
        let h = self.classes.iter().map(|c| c.root.height()).min()?;
        Some((w, h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_file(w: usize, h: usize, v: f64) -> FilterFile {
        FilterFile {
            width: w,
            height: h,
            weights: vec![v; w * h * FEATURE_DIMS],
        }
    }

    fn sample_file() -> ModelFile {
        ModelFile {
            sbin: 8,
            interval: 4,
            classes: vec![ClassFile {
                name: "car".to_string(),
                bias: -0.75,
                root: filter_file(6, 4, 0.01),
                parts: vec![PartFile {
                    filter: filter_file(4, 4, 0.02),
                    anchor: [2, 1],
                    deformation: [0.05, 0.0, 0.05, -0.01],
                }],
            }],
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("dpm-rs-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_from_file_model() {
        let model = Model::from_file_model(&sample_file(), 1.0).unwrap();
        assert_eq!(model.classes().len(), 1);
        assert_eq!(model.class_names(), vec!["car"]);
        let car = &model.classes()[0];
        assert_eq!((car.root.width(), car.root.height()), (6, 4));
        assert_eq!(car.parts[0].anchor, (2, 1));
        assert_eq!(car.parts[0].deformation.by, -0.01 as Float);
        assert_eq!(model.min_root_size(), Some((6, 4)));
    }

    #[test]
    fn test_rejects_bad_ratio() {
        assert!(Model::from_file_model(&sample_file(), 0.0).is_err());
        assert!(Model::from_file_model(&sample_file(), -1.0).is_err());
        assert!(Model::from_file_model(&sample_file(), f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_negative_deformation() {
        let mut file = sample_file();
        file.classes[0].parts[0].deformation = [-0.1, 0.0, 0.05, 0.0];
        assert!(Model::from_file_model(&file, 1.0).is_err());
    }

    #[test]
    fn test_rejects_part_outside_root() {
        let mut file = sample_file();
        // 2 * root_w = 12, anchor 9 + 4 > 12
        file.classes[0].parts[0].anchor = [9, 0];
        assert!(Model::from_file_model(&file, 1.0).is_err());
    }

    #[test]
    fn test_rejects_weight_count() {
        let mut file = sample_file();
        file.classes[0].root.weights.pop();
        assert!(Model::from_file_model(&file, 1.0).is_err());
    }

    #[test]
    fn test_rejects_oversized_filter() {
        let mut file = sample_file();
        file.classes[0].root.width = usize::MAX / 4;
        file.classes[0].root.height = 8;
        let err = Model::from_file_model(&file, 1.0).unwrap_err();
        assert!(format!("{:#}", err).contains("溢出"));

        // 部件锚点过大
        let mut file = sample_file();
        file.classes[0].parts[0].anchor = [usize::MAX, 0];
        assert!(Model::from_file_model(&file, 1.0).is_err());
    }

    #[test]
    fn test_rejects_odd_sbin() {
        let mut file = sample_file();
        file.sbin = 7;
        assert!(Model::from_file_model(&file, 1.0).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Model::load("/nonexistent/dpm-model.json", 1.0).unwrap_err();
        assert!(format!("{:#}", err).contains("dpm-model.json"));
    }

    #[test]
    fn test_load_corrupt_file() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{ \"classes\": [ ").unwrap();
        assert!(Model::load(&path, 1.0).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_roundtrip_and_merge() {
        let path = temp_path("roundtrip");
        let file = sample_file();
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let a = Model::load(&path, 0.5).unwrap();
        let b = Model::load(&path, 0.5).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.ratio(), 0.5);
        assert_eq!(a.to_file_model(), Model::from_file_model(&file, 0.5).unwrap().to_file_model());

        let merged = Model::load_all(&[&path, &path], 0.5).unwrap();
        assert_eq!(merged.classes().len(), 2);
        a.release();

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_all_requires_paths() {
        assert!(Model::load_all::<&str>(&[], 1.0).is_err());
    }
}
