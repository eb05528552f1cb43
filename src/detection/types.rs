/// 检测系统数据结构定义
/// Data structures for the detection system
use crate::Float;

// ========== 数据结构 ==========

/// 边界框 (输入图像像素坐标, 右/下边界不含)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BBox {
    pub x1: Float,
    pub y1: Float,
    pub x2: Float,
    pub y2: Float,
}

impl BBox {
    pub fn new(x1: Float, y1: Float, x2: Float, y2: Float) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> Float {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> Float {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> Float {
        self.width() * self.height()
    }

    /// 中心点
    pub fn center(&self) -> (Float, Float) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 平移
    pub fn shifted(&self, dx: Float, dy: Float) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// 整数角点 [x-min, y-min, x-max, y-max]
    pub fn corners(&self) -> [i32; 4] {
        [
            self.x1.round() as i32,
            self.y1.round() as i32,
            self.x2.round() as i32,
            self.y2.round() as i32,
        ]
    }

    /// IOU (Intersection over Union), 退化框返回 0
    pub fn iou(&self, other: &BBox) -> Float {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }

        intersection / union
    }
}

/// 单个检测结果
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    /// 类别ID (模型中类别的顺序)
    pub class_id: usize,
    pub score: Float,
    /// 金字塔层号
    pub level: usize,
    /// 部件最优位置 (与模型部件顺序一致)
    pub parts: Option<Vec<BBox>>,
}

impl Detection {
    pub fn new(bbox: BBox, class_id: usize, score: Float) -> Self {
        Self {
            bbox,
            class_id,
            score,
            level: 0,
            parts: None,
        }
    }
}

/// 一帧的检测结果集合 (有序, 可为空)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    pub fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub fn into_vec(self) -> Vec<Detection> {
        self.detections
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl IntoIterator for DetectionSet {
    type Item = Detection;
    type IntoIter = std::vec::IntoIter<Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.into_iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        // 退化框
        assert_eq!(a.iou(&BBox::new(3.0, 3.0, 3.0, 8.0)), 0.0);
    }

    #[test]
    fn test_corners_round() {
        let b = BBox::new(1.4, 2.6, 10.5, 20.49);
        assert_eq!(b.corners(), [1, 3, 11, 20]);
        assert_eq!(b.shifted(2.0, -2.0).corners(), [3, 1, 13, 18]);
    }
}
