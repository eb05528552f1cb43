//! 检测器配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::TrackerConfig;
use crate::Float;

/// 默认工作线程数 (无法获取 CPU 核数时)
const FALLBACK_THREADS: usize = 6;

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_THREADS)
}

/// 检测 + 跟踪参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    // === 检测参数 ===
    pub threshold: Float,         // 检测分数阈值
    pub overlap_threshold: Float, // NMS IOU阈值
    pub num_threads: usize,       // 并行打分线程数
    pub models: Vec<PathBuf>,     // 模型文件 (每个文件一组类别)
    pub ratio: f64,               // 输入缩放比例

    // === 跟踪参数 ===
    pub track_confirm: usize,        // 确认阈值 THL
    pub track_window: usize,         // 命中滑动窗口
    pub track_max_misses: u32,       // 最大丢失帧数
    pub track_iou_threshold: Float,  // 关联IOU阈值
    pub score_decay: Float,          // 累积置信度衰减
    pub score_cell: usize,           // 累积缓冲 cell 大小
    pub track_confirm_score: Float,  // 确认所需累积置信度
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        Self {
            // 检测参数
            threshold: -0.5,
            overlap_threshold: 0.5,
            num_threads: default_threads(),
            models: vec![PathBuf::from("models/car.json")],
            ratio: 1.0,

            // 跟踪
            track_confirm: tracker.confirm,
            track_window: tracker.window,
            track_max_misses: tracker.max_misses,
            track_iou_threshold: tracker.iou_threshold,
            score_decay: tracker.score_decay,
            score_cell: tracker.score_cell,
            track_confirm_score: tracker.confirm_score,
        }
    }
}

impl DetectorConfig {
    /// 从JSON文件加载配置 (文件不存在时写入默认配置)
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 跟踪器参数
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            confirm: self.track_confirm.max(1),
            window: self.track_window.max(self.track_confirm),
            max_misses: self.track_max_misses,
            iou_threshold: self.track_iou_threshold,
            score_decay: self.score_decay,
            score_cell: self.score_cell.max(1),
            confirm_score: self.track_confirm_score,
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前检测配置:");
        info!("  检测阈值: {:.2}", self.threshold);
        info!("  NMS重叠阈值: {:.2}", self.overlap_threshold);
        info!("  打分线程: {}", self.num_threads);
        info!("  模型: {:?} (ratio {:.2})", self.models, self.ratio);
        info!(
            "  跟踪: THL {} / 窗口 {} / 最大丢失 {} / 确认置信度 {:.2}",
            self.track_confirm, self.track_window, self.track_max_misses, self.track_confirm_score
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dpm-rs-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.threshold, -0.5);
        assert_eq!(config.overlap_threshold, 0.5);
        assert!(config.num_threads >= 1);
        assert_eq!(config.tracker_config(), TrackerConfig::default());
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let path = temp_path("config-missing");
        let _ = fs::remove_file(&path);
        let config = DetectorConfig::load(&path);
        assert_eq!(config, DetectorConfig::default());
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_roundtrip_and_partial() {
        let path = temp_path("config-roundtrip");
        let mut config = DetectorConfig::default();
        config.threshold = -1.25;
        config.models = vec![PathBuf::from("a.json"), PathBuf::from("b.json")];
        config.save(&path);
        assert_eq!(DetectorConfig::load(&path), config);

        // 缺省字段使用默认值
        fs::write(&path, r#"{ "track_confirm": 4 }"#).unwrap();
        let partial = DetectorConfig::load(&path);
        assert_eq!(partial.track_confirm, 4);
        assert_eq!(partial.overlap_threshold, 0.5);
        // 窗口不小于 THL
        let mut narrow = partial.clone();
        narrow.track_window = 2;
        assert_eq!(narrow.tracker_config().window, 4);

        // 解析失败回退默认值
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(DetectorConfig::load(&path), DetectorConfig::default());
        let _ = fs::remove_file(&path);
    }
}
