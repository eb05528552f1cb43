//! 检测器 (Detector)
//! 职责: 图像 → 特征金字塔 → (层, 类别) 并行打分 → 部件形变优化 → 阈值 → NMS

use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use ndarray::{s, Array2, Array3};
use tracing::{debug, warn};

use super::types::{BBox, Detection, DetectionSet};
use crate::models::{ClassModel, Model};
use crate::utils::distance_transform::{add_part_scores, distance_transform, DistanceTransform};
use crate::utils::pyramid::{resize_rgb, FeaturePyramid};
use crate::{non_max_suppression, Float};

/// 一个打分任务: (根层, 类别)
#[derive(Debug, Clone, Copy)]
struct Task {
    level: usize,
    class_id: usize,
}

/// 检测 (单帧原子操作)
///
/// - 空图像 / 模型无类别 → 空结果
/// - `num_threads` 只决定并行度, 不影响结果顺序
pub fn detect(
    image: &RgbImage,
    model: &Model,
    threshold: Float,
    overlap_threshold: Float,
    num_threads: usize,
) -> DetectionSet {
    if image.width() == 0 || image.height() == 0 {
        warn!("⚠️ 输入图像为空: {}x{}", image.width(), image.height());
        return DetectionSet::new();
    }
    let Some(min_root) = model.min_root_size() else {
        return DetectionSet::new();
    };

    // 1. 按 ratio 缩放输入
    let ratio = model.ratio();
    let width = ((image.width() as Float * ratio).round() as u32).max(1);
    let height = ((image.height() as Float * ratio).round() as u32).max(1);
    let resized;
    let input = if (width, height) == image.dimensions() {
        image
    } else {
        resized = match resize_rgb(image, width, height) {
            Ok(img) => img,
            Err(e) => {
                warn!("❌ 输入图像缩放失败: {:#}", e);
                return DetectionSet::new();
            }
        };
        &resized
    };

    // 2. 特征金字塔
    let pyramid = match FeaturePyramid::build(input, model.sbin(), model.interval(), min_root) {
        Ok(p) => p,
        Err(e) => {
            warn!("❌ 特征金字塔构建失败: {:#}", e);
            return DetectionSet::new();
        }
    };
    if pyramid.is_blank() {
        debug!("空白帧 (无梯度能量), 跳过打分");
        return DetectionSet::new();
    }

    // 3. (层, 类别) 任务
    let tasks: Vec<Task> = pyramid
        .root_levels()
        .flat_map(|level| {
            let root = pyramid.level(level);
            model
                .classes()
                .iter()
                .enumerate()
                .filter(move |(_, class)| {
                    root.is_some_and(|r| {
                        r.width() >= class.root.width() && r.height() >= class.root.height()
                    })
                })
                .map(move |(class_id, _)| Task { level, class_id })
        })
        .collect();

    let mut candidates = run_tasks(&tasks, num_threads, |task| {
        match score_task(&pyramid, model, *task, threshold) {
            Ok(dets) => dets,
            Err(e) => {
                warn!(
                    "⚠️ 打分任务跳过 (level={}, class={}): {:#}",
                    task.level, task.class_id, e
                );
                Vec::new()
            }
        }
    });
    debug!("候选检测 {} 个 ({} 个任务)", candidates.len(), tasks.len());

    // 4. NMS
    non_max_suppression(&mut candidates, overlap_threshold);
    DetectionSet::from(candidates)
}

/// 原始像素缓冲检测 (行优先, 每像素 `channels` 字节)
///
/// 通道数不为 3 或尺寸不符时返回空结果
pub fn detect_raw(
    data: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    model: &Model,
    threshold: Float,
    overlap_threshold: Float,
    num_threads: usize,
) -> DetectionSet {
    if channels != 3 || data.len() != width as usize * height as usize * 3 {
        warn!(
            "⚠️ 输入图像格式错误: {}x{}x{}, {} 字节",
            width,
            height,
            channels,
            data.len()
        );
        return DetectionSet::new();
    }
    match RgbImage::from_raw(width, height, data.to_vec()) {
        Some(image) => detect(&image, model, threshold, overlap_threshold, num_threads),
        None => DetectionSet::new(),
    }
}

/// 并行执行打分任务
///
/// 工作线程从任务队列取下标, 结果按任务下标回填, 与完成顺序无关
fn run_tasks<F>(tasks: &[Task], num_threads: usize, f: F) -> Vec<Detection>
where
    F: Fn(&Task) -> Vec<Detection> + Sync,
{
    let workers = num_threads.max(1).min(tasks.len());
    if workers <= 1 {
        return tasks.iter().flat_map(&f).collect();
    }

    let (task_tx, task_rx) = crossbeam_channel::unbounded::<usize>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Vec<Detection>)>();
    for idx in 0..tasks.len() {
        // 接收端仍存活, 无界队列发送不会失败
        let _ = task_tx.send(idx);
    }
    drop(task_tx);

    let f = &f;
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for idx in task_rx.iter() {
                    if result_tx.send((idx, f(&tasks[idx]))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Vec<Detection>> = vec![Vec::new(); tasks.len()];
    for (idx, dets) in result_rx.iter() {
        slots[idx] = dets;
    }
    slots.into_iter().flatten().collect()
}

/// 单个 (层, 类别) 打分
fn score_task(
    pyramid: &FeaturePyramid,
    model: &Model,
    task: Task,
    threshold: Float,
) -> Result<Vec<Detection>> {
    let class = &model.classes()[task.class_id];
    let Some(root_level) = pyramid.level(task.level) else {
        return Ok(Vec::new());
    };

    // 根滤波器响应
    let mut score = correlate(&root_level.features, class.root.weights());

    // 部件: 2 倍分辨率响应 → 取负 → 距离变换 → 减去
    let mut placements: Vec<DistanceTransform> = Vec::with_capacity(class.parts.len());
    if !class.parts.is_empty() {
        let part_level = pyramid
            .part_level(task.level)
            .ok_or_else(|| anyhow::anyhow!("缺少部件层 {}", task.level))?;
        for part in &class.parts {
            let response = correlate(&part_level.features, part.filter.weights());
            let negated = response.mapv(|v| -v);
            let d = part.deformation;
            let dt = distance_transform(&negated, d.ax, d.bx, d.ay, d.by);
            add_part_scores(&mut score, &dt.values, part.anchor.0, part.anchor.1)?;
            placements.push(dt);
        }
    }
    score.mapv_inplace(|v| v + class.bias);

    // 阈值: 每个超过阈值的位置都是一个候选, 由 NMS 去重
    let ratio = model.ratio();
    let root_px = root_level.pixels_per_cell() / ratio;
    let part_px = pyramid
        .part_level(task.level)
        .map(|l| l.pixels_per_cell() / ratio)
        .unwrap_or(root_px / 2.0);

    let mut dets = Vec::new();
    for ((y, x), &v) in score.indexed_iter() {
        if !(v > threshold) {
            continue;
        }
        let bbox = cell_box(x, y, class.root.width(), class.root.height(), root_px);
        let parts = if placements.is_empty() {
            None
        } else {
            Some(part_boxes(class, &placements, x, y, part_px))
        };
        dets.push(Detection {
            bbox,
            class_id: task.class_id,
            score: v,
            level: task.level,
            parts,
        });
    }
    Ok(dets)
}

/// 滤波器与特征图的相关 (valid 区域)
pub fn correlate(features: &Array3<Float>, filter: &Array3<Float>) -> Array2<Float> {
    let (fh, fw, _) = features.dim();
    let (h, w, _) = filter.dim();
    if fh < h || fw < w {
        return Array2::zeros((0, 0));
    }

    Array2::from_shape_fn((fh - h + 1, fw - w + 1), |(y, x)| {
        features
            .slice(s![y..y + h, x..x + w, ..])
            .iter()
            .zip(filter.iter())
            .fold(0.0, |acc, (a, b)| acc + a * b)
    })
}

/// 特征 cell 坐标 → 输入图像边界框 (+1: HOG 去掉的边界 cell)
fn cell_box(x: usize, y: usize, w: usize, h: usize, px: Float) -> BBox {
    let x1 = (x + 1) as Float * px;
    let y1 = (y + 1) as Float * px;
    BBox::new(x1, y1, x1 + w as Float * px, y1 + h as Float * px)
}

fn part_boxes(
    class: &ClassModel,
    placements: &[DistanceTransform],
    x: usize,
    y: usize,
    px: Float,
) -> Vec<BBox> {
    class
        .parts
        .iter()
        .zip(placements)
        .map(|(part, dt)| {
            let (ax, ay) = (part.anchor.0 + 2 * x, part.anchor.1 + 2 * y);
            let (bx, by) = (dt.ix[[ay, ax]], dt.iy[[ay, ax]]);
            cell_box(bx, by, part.filter.width(), part.filter.height(), px)
        })
        .collect()
}

/// 检测器: 持有模型与参数, 统计帧率
pub struct Detector {
    model: Model,
    num_threads: usize,

    // 统计
    count: u64,
    last: Instant,
    current_fps: f64,
    last_ms: f64,
}

impl Detector {
    pub fn new(model: Model, num_threads: usize) -> Self {
        Self {
            model,
            num_threads: num_threads.max(1),
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            last_ms: 0.0,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// 单帧检测并更新统计
    pub fn detect(
        &mut self,
        image: &RgbImage,
        threshold: Float,
        overlap_threshold: Float,
    ) -> DetectionSet {
        let start = Instant::now();
        let dets = detect(
            image,
            &self.model,
            threshold,
            overlap_threshold,
            self.num_threads,
        );
        self.last_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.count += 1;
        let now = Instant::now();
        if now.duration_since(self.last).as_secs() >= 1 {
            self.current_fps = self.count as f64 / now.duration_since(self.last).as_secs_f64();
            self.count = 0;
            self.last = now;
        }
        dets
    }

    pub fn fps(&self) -> f64 {
        self.current_fps
    }

    /// 上一帧耗时 (毫秒)
    pub fn last_ms(&self) -> f64 {
        self.last_ms
    }

    /// 释放模型
    pub fn into_model(self) -> Model {
        self.model
    }
}
