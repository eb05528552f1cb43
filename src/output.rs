//! 结果输出
//!
//! - `ImageObjects`: 对外发布的扁平化消息 (数量 + 角点序列 + 类别序列)
//! - `write_kitti`:  KITTI 格式调试输出, 每个检测一行
//! - `id_to_color`:  轨迹ID → 绘制颜色

use std::io::Write;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionSet;

/// 单帧检测消息
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageObjects {
    pub car_num: usize,
    /// 每个目标 4 个整数: x-min, y-min, x-max, y-max
    pub corner_point: Vec<i32>,
    pub car_type: Vec<usize>,
}

impl ImageObjects {
    pub fn from_detections(set: &DetectionSet) -> Self {
        Self {
            car_num: set.len(),
            corner_point: set.iter().flat_map(|d| d.bbox.corners()).collect(),
            car_type: set.iter().map(|d| d.class_id).collect(),
        }
    }
}

/// 写入 KITTI 格式结果行
///
/// `{frame} -1 {class} -1 -1 1 {l} {t} {r} {b} -1 -1 -1 -1000 -1000 -1000 -10 {score}`
pub fn write_kitti<W: Write>(
    writer: &mut W,
    frame: u64,
    set: &DetectionSet,
    class_names: &[&str],
) -> Result<()> {
    for det in set {
        let class = class_names.get(det.class_id).copied().unwrap_or("DontCare");
        let [l, t, r, b] = det.bbox.corners();
        writeln!(
            writer,
            "{} -1 {} -1 -1 1 {} {} {} {} -1 -1 -1 -1000 -1000 -1000 -10 {:.4}",
            frame, class, l, t, r, b, det.score
        )
        .with_context(|| format!("写入KITTI结果失败 (frame {})", frame))?;
    }
    Ok(())
}

/// 根据ID生成不同颜色
pub fn id_to_color(id: u32) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h as u32 / 60 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, Detection};

    fn sample() -> DetectionSet {
        DetectionSet::from(vec![
            Detection::new(BBox::new(10.2, 20.0, 50.6, 60.0), 0, 0.75),
            Detection::new(BBox::new(100.0, 40.0, 180.0, 90.4), 1, -0.125),
        ])
    }

    #[test]
    fn test_image_objects_flatten() {
        let msg = ImageObjects::from_detections(&sample());
        assert_eq!(msg.car_num, 2);
        assert_eq!(msg.corner_point, vec![10, 20, 51, 60, 100, 40, 180, 90]);
        assert_eq!(msg.car_type, vec![0, 1]);
        assert_eq!(msg.corner_point.len(), 4 * msg.car_num);

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"car_num\":2"));
        assert_eq!(ImageObjects::from_detections(&DetectionSet::new()).car_num, 0);
    }

    #[test]
    fn test_kitti_lines() {
        let mut buf = Vec::new();
        write_kitti(&mut buf, 7, &sample(), &["car"]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "7 -1 car -1 -1 1 10 20 51 60 -1 -1 -1 -1000 -1000 -1000 -10 0.7500",
                "7 -1 DontCare -1 -1 1 100 40 180 90 -1 -1 -1 -1000 -1000 -1000 -10 -0.1250",
            ]
        );
    }

    #[test]
    fn test_id_to_color_distinct() {
        assert_ne!(id_to_color(1), id_to_color(2));
        assert_eq!(id_to_color(7), id_to_color(7));
    }
}
