/// 单路视频流处理上下文 (Detection Stream)
///
/// 每路视频流独立持有: 模型 + 检测参数 + 跟踪器
/// 多路视频流各自创建实例, 互不共享
use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use tracing::{debug, info};

use crate::config::DetectorConfig;
use crate::detection::{DetectionSet, Detector, Tracker};
use crate::models::Model;
use crate::Float;

/// 单帧处理结果
#[derive(Clone, Debug)]
pub struct FrameOutput {
    pub frame_id: u64, // 帧序号
    /// NMS 后的原始检测
    pub raw: DetectionSet,
    /// 跟踪确认后的检测
    pub confirmed: DetectionSet,
    pub detect_ms: f64,
    pub track_ms: f64,
}

pub struct DetectionStream {
    detector: Detector,
    tracker: Tracker,
    threshold: Float,
    overlap_threshold: Float,
    frame_id: u64,
}

impl DetectionStream {
    /// 按配置加载模型并创建跟踪器
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let model = Model::load_all(&config.models, config.ratio)?;
        Ok(Self::with_model(model, config))
    }

    pub fn with_model(model: Model, config: &DetectorConfig) -> Self {
        info!(
            "🚀 检测流创建: {} 类 {:?}, {} 线程",
            model.classes().len(),
            model.class_names(),
            config.num_threads
        );
        Self {
            detector: Detector::new(model, config.num_threads),
            // 帧尺寸在第一帧时确定
            tracker: Tracker::new(config.tracker_config(), 0, 0),
            threshold: config.threshold,
            overlap_threshold: config.overlap_threshold,
            frame_id: 0,
        }
    }

    /// 处理一帧: 检测 → 跟踪确认
    pub fn process_frame(&mut self, image: &RgbImage) -> FrameOutput {
        let raw = self
            .detector
            .detect(image, self.threshold, self.overlap_threshold);
        let detect_ms = self.detector.last_ms();

        let start = Instant::now();
        let mut confirmed = raw.clone();
        self.tracker
            .finalization(&mut confirmed, image.dimensions());
        let track_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(
            "帧 {}: 检测 {} 个 ({:.1}ms), 确认 {} 个 | {}",
            self.frame_id,
            raw.len(),
            detect_ms,
            confirmed.len(),
            self.tracker.stats()
        );

        let out = FrameOutput {
            frame_id: self.frame_id,
            raw,
            confirmed,
            detect_ms,
            track_ms,
        };
        self.frame_id += 1;
        out
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.detector.model().class_names()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// 重新开始 (清除跟踪状态)
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.frame_id = 0;
    }

    /// 关闭视频流, 释放模型
    pub fn close(self) {
        self.detector.into_model().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassFile, FilterFile, ModelFile};
    use crate::utils::features::{hog, FEATURE_DIMS};
    use image::Rgb;

    fn stream_for(img: &RgbImage) -> DetectionStream {
        let root = hog(img, 8);
        let (h, w, _) = root.dim();
        assert_eq!(root.len(), w * h * FEATURE_DIMS);
        let file = ModelFile {
            sbin: 8,
            interval: 1,
            classes: vec![ClassFile {
                name: "car".to_string(),
                bias: 0.0,
                root: FilterFile {
                    width: w,
                    height: h,
                    weights: root.iter().map(|&v| v as f64).collect(),
                },
                parts: Vec::new(),
            }],
        };
        let model = Model::from_file_model(&file, 1.0).unwrap();
        let mut config = DetectorConfig::default();
        config.threshold = Float::NEG_INFINITY;
        config.overlap_threshold = 1.0;
        config.num_threads = 2;
        DetectionStream::with_model(model, &config)
    }

    #[test]
    fn test_stream_confirms_persistent_object() {
        let img = RgbImage::from_fn(48, 48, |x, y| {
            if (16..32).contains(&x) && (16..32).contains(&y) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let mut stream = stream_for(&img);
        assert_eq!(stream.class_names(), vec!["car"]);

        let confirm = stream.tracker().config().confirm;
        for i in 0..confirm {
            let out = stream.process_frame(&img);
            assert_eq!(out.frame_id, i as u64);
            assert_eq!(out.raw.len(), 1);
            assert_eq!(out.confirmed.len(), usize::from(i + 1 == confirm));
        }

        // 空白帧: 无检测, 已确认目标惯性保持
        let out = stream.process_frame(&RgbImage::new(48, 48));
        assert!(out.raw.is_empty());
        assert_eq!(out.confirmed.len(), 1);

        // 无效帧: 不重建累积缓冲, 目标继续惯性保持
        let out = stream.process_frame(&RgbImage::new(0, 0));
        assert!(out.raw.is_empty());
        assert_eq!(out.confirmed.len(), 1);
        assert_eq!(stream.tracker().buffer().size(), (48, 48));

        stream.reset();
        assert!(stream.tracker().tracks().is_empty());
        stream.close();
    }

    #[test]
    fn test_missing_model_file_is_error() {
        let mut config = DetectorConfig::default();
        config.models = vec!["/nonexistent/dpm-rs/model.json".into()];
        assert!(DetectionStream::new(&config).is_err());
    }
}
