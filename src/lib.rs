#![allow(clippy::too_many_arguments)]
// dpm-rs 🚗 AGPL-3.0 License
//! 可形变部件模型 (DPM) 车辆检测与跟踪
pub mod config; // 检测/跟踪配置参数
pub mod detection; // 检测 + 跟踪
pub mod models; // 模型表示与加载
pub mod output; // 结果消息与调试输出
pub mod pipeline; // 单路视频流上下文
pub mod utils; // 距离变换 / HOG / 金字塔

/// 全局数值精度 (默认 f32, `double` 特性切换为 f64)
#[cfg(not(feature = "double"))]
pub type Float = f32;
#[cfg(feature = "double")]
pub type Float = f64;

pub use crate::config::DetectorConfig;
pub use crate::detection::{BBox, Detection, DetectionSet, Detector, Tracker, TrackerConfig};
pub use crate::models::Model;
pub use crate::pipeline::{DetectionStream, FrameOutput};

/// 非极大值抑制
///
/// 排序键: 分数降序, 再按 (类别, 层号, y1, x1), 结果与输入顺序无关
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: Float) {
    xs.sort_by(|b1, b2| {
        b2.score
            .total_cmp(&b1.score)
            .then(b1.class_id.cmp(&b2.class_id))
            .then(b1.level.cmp(&b2.level))
            .then(b1.bbox.y1.total_cmp(&b2.bbox.y1))
            .then(b1.bbox.x1.total_cmp(&b2.bbox.x1))
    });

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

pub fn gen_time_string(delimiter: &str) -> String {
    let Some(offset) = chrono::FixedOffset::east_opt(8 * 60 * 60) else {
        return String::new();
    }; // Beijing
    let t_now = chrono::Utc::now().with_timezone(&offset);
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
