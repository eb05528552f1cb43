//! 累积置信度缓冲 (Accumulated Score Buffer)
//!
//! 以 `cell x cell` 像素为单位跨帧累积检测置信度:
//! 每帧先整体衰减, 再在当前检测框覆盖的 cell 上加分

use ndarray::{s, Array2};

use super::types::BBox;
use crate::Float;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBuffer {
    cells: Array2<Float>,
    cell: usize,
    width: u32,
    height: u32,
}

impl ScoreBuffer {
    pub fn new(width: u32, height: u32, cell: usize) -> Self {
        let cell = cell.max(1);
        let rows = (height as usize).div_ceil(cell);
        let cols = (width as usize).div_ceil(cell);
        Self {
            cells: Array2::zeros((rows, cols)),
            cell,
            width,
            height,
        }
    }

    /// 对应的图像尺寸 (宽, 高)
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn cell(&self) -> usize {
        self.cell
    }

    /// 整体衰减
    pub fn decay(&mut self, factor: Float) {
        self.cells.mapv_inplace(|v| v * factor);
    }

    /// 在框覆盖的 cell 上累加
    pub fn deposit(&mut self, bbox: &BBox, value: Float) {
        if let Some((y0, y1, x0, x1)) = self.cell_range(bbox) {
            self.cells
                .slice_mut(s![y0..y1, x0..x1])
                .mapv_inplace(|v| v + value);
        }
    }

    /// 框内平均累积值 (框在图像外返回 0)
    pub fn mean(&self, bbox: &BBox) -> Float {
        match self.cell_range(bbox) {
            Some((y0, y1, x0, x1)) => self
                .cells
                .slice(s![y0..y1, x0..x1])
                .mean()
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    pub fn clear(&mut self) {
        self.cells.fill(0.0);
    }

    /// 框 → 裁剪后的 cell 区间 [y0, y1) x [x0, x1)
    fn cell_range(&self, bbox: &BBox) -> Option<(usize, usize, usize, usize)> {
        let (rows, cols) = self.cells.dim();
        let cell = self.cell as Float;
        let clip = |v: Float, max: usize| (v / cell).max(0.0).min(max as Float);

        let x0 = clip(bbox.x1, cols).floor() as usize;
        let y0 = clip(bbox.y1, rows).floor() as usize;
        let x1 = clip(bbox.x2, cols).ceil() as usize;
        let y1 = clip(bbox.y2, rows).ceil() as usize;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((y0, y1, x0, x1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_and_mean() {
        let mut buf = ScoreBuffer::new(40, 30, 4);
        assert_eq!(buf.cells.dim(), (8, 10));

        let b = BBox::new(8.0, 8.0, 16.0, 16.0);
        buf.deposit(&b, 1.0);
        assert_eq!(buf.mean(&b), 1.0);
        // 一半覆盖
        assert_eq!(buf.mean(&BBox::new(8.0, 8.0, 24.0, 16.0)), 0.5);

        buf.decay(0.5);
        buf.deposit(&b, 1.0);
        assert_eq!(buf.mean(&b), 1.5);
    }

    #[test]
    fn test_out_of_frame_boxes() {
        let mut buf = ScoreBuffer::new(40, 30, 4);
        let outside = BBox::new(-20.0, -20.0, -5.0, -5.0);
        buf.deposit(&outside, 1.0);
        assert_eq!(buf.mean(&outside), 0.0);
        assert!(buf.cells.iter().all(|&v| v == 0.0));

        // 部分越界只累加图像内部分
        buf.deposit(&BBox::new(36.0, 28.0, 60.0, 60.0), 2.0);
        assert_eq!(buf.cells[[7, 9]], 2.0);
        assert_eq!(buf.cells.sum(), 2.0);

        buf.clear();
        assert_eq!(buf.cells.sum(), 0.0);
        assert_eq!(buf.size(), (40, 30));
    }
}
