/// 检测系统 (Detection System)
///
/// - Detector:    特征金字塔 + 可形变部件打分
/// - Tracker:     多帧关联与确认
/// - ScoreBuffer: 跨帧累积置信度
pub mod detector;
pub mod score_buffer;
pub mod tracker;
pub mod types;

pub use detector::{detect, detect_raw, Detector};
pub use score_buffer::ScoreBuffer;
pub use tracker::{TrackState, TrackStatus, Tracker, TrackerConfig};
pub use types::{BBox, Detection, DetectionSet};
