//! 多帧跟踪与确认 (Tracker)
//!
//! 状态机: `Unconfirmed → Confirmed → (Confirmed | Dropped)`
//!
//! 每帧:
//! 1. 累积置信度衰减, 当前检测框加分
//! 2. 轨迹按历史速度预测位置
//! 3. 同类别 IOU 贪心匹配
//! 4. 命中窗口内命中数达到 THL 且框内累积置信度达标 → Confirmed;
//!    连续丢失超过容忍帧数 → Dropped
//! 5. 输出已确认轨迹 (按 ID 排序)

use std::collections::VecDeque;

use tracing::debug;

use super::score_buffer::ScoreBuffer;
use super::types::{BBox, Detection, DetectionSet};
use crate::Float;

/// 历史轨迹最大长度
const MAX_TRAJECTORY: usize = 30;

// ========== 配置 ==========

/// 跟踪器参数
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// 确认阈值 THL (窗口内命中帧数)
    pub confirm: usize,
    /// 命中滑动窗口长度 (不小于 THL)
    pub window: usize,
    /// 已确认轨迹允许的连续丢失帧数
    pub max_misses: u32,
    /// 匹配 IOU 下限
    pub iou_threshold: Float,
    /// 累积置信度每帧衰减系数
    pub score_decay: Float,
    /// 累积缓冲 cell 像素边长
    pub score_cell: usize,
    /// 确认所需的框内平均累积置信度
    pub confirm_score: Float,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirm: 3,
            window: 5,
            max_misses: 5,
            iou_threshold: 0.3,
            score_decay: 0.5,
            score_cell: 4,
            confirm_score: 1.25,
        }
    }
}

// ========== 轨迹 ==========

/// 跟踪点 (中心点 + 帧号)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackPoint {
    pub x: Float,
    pub y: Float,
    pub frame: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackStatus {
    Unconfirmed,
    Confirmed,
}

/// 单个轨迹
#[derive(Clone, Debug)]
pub struct TrackState {
    /// 唯一跟踪ID
    pub id: u32,
    pub class_id: usize,
    pub status: TrackStatus,

    /// 当前边界框 (丢失时为预测框)
    pub bbox: BBox,

    /// 历史轨迹 (仅观测帧)
    pub trajectory: Vec<TrackPoint>,

    /// 连续丢失帧数
    pub misses: u32,

    /// 总共被跟踪的帧数
    pub age: u32,

    /// 框内累积置信度
    pub score: Float,

    /// 最近一次匹配的检测 (层号, 部件)
    last: Detection,
    /// 最近一次观测的框与帧号
    observed: BBox,
    observed_frame: u64,
    /// 命中窗口 (true = 命中)
    hits: VecDeque<bool>,
}

impl TrackState {
    fn new(id: u32, detection: Detection, frame: u64, config: &TrackerConfig) -> Self {
        let bbox = detection.bbox;
        let (cx, cy) = bbox.center();
        let mut track = Self {
            id,
            class_id: detection.class_id,
            status: TrackStatus::Unconfirmed,
            bbox,
            trajectory: vec![TrackPoint { x: cx, y: cy, frame }],
            misses: 0,
            age: 1,
            score: 0.0,
            last: detection,
            observed: bbox,
            observed_frame: frame,
            hits: VecDeque::new(),
        };
        track.record(true, config);
        track
    }

    /// 速度 (像素/帧), 由历史首尾两点估计
    pub fn velocity(&self) -> (Float, Float) {
        match (self.trajectory.first(), self.trajectory.last()) {
            (Some(a), Some(b)) if b.frame > a.frame => {
                let dt = (b.frame - a.frame) as Float;
                ((b.x - a.x) / dt, (b.y - a.y) / dt)
            }
            _ => (0.0, 0.0),
        }
    }

    /// 预测第 `frame` 帧的框
    pub fn predict(&self, frame: u64) -> BBox {
        let (vx, vy) = self.velocity();
        let dt = frame.saturating_sub(self.observed_frame) as Float;
        self.observed.shifted(vx * dt, vy * dt)
    }

    /// 窗口内命中数
    pub fn hit_count(&self) -> usize {
        self.hits.iter().filter(|&&h| h).count()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TrackStatus::Confirmed
    }

    fn record(&mut self, hit: bool, config: &TrackerConfig) {
        self.hits.push_back(hit);
        while self.hits.len() > config.window.max(config.confirm) {
            self.hits.pop_front();
        }
    }

    /// 命中数与累积置信度同时达标才确认
    fn try_confirm(&mut self, config: &TrackerConfig) {
        if self.status == TrackStatus::Unconfirmed
            && self.hit_count() >= config.confirm
            && self.score >= config.confirm_score
        {
            self.status = TrackStatus::Confirmed;
        }
    }

    fn update(&mut self, detection: Detection, frame: u64, config: &TrackerConfig) {
        self.bbox = detection.bbox;
        self.observed = detection.bbox;
        self.observed_frame = frame;
        self.misses = 0;
        self.age += 1;

        let (cx, cy) = self.bbox.center();
        self.trajectory.push(TrackPoint { x: cx, y: cy, frame });
        if self.trajectory.len() > MAX_TRAJECTORY {
            self.trajectory.remove(0);
        }
        self.last = detection;
        self.record(true, config);
    }

    fn mark_lost(&mut self, frame: u64, config: &TrackerConfig) {
        self.bbox = self.predict(frame);
        self.misses += 1;
        self.age += 1;
        self.record(false, config);
    }

    /// 是否应当删除
    fn is_dropped(&self, config: &TrackerConfig) -> bool {
        match self.status {
            TrackStatus::Confirmed => self.misses > config.max_misses,
            // 窗口内已无命中, 不可能再确认
            TrackStatus::Unconfirmed => self.hit_count() == 0,
        }
    }

    /// 输出用的检测结果
    fn to_detection(&self) -> Detection {
        Detection {
            bbox: self.bbox,
            class_id: self.class_id,
            score: self.score,
            level: self.last.level,
            parts: if self.misses == 0 {
                self.last.parts.clone()
            } else {
                None
            },
        }
    }
}

// ========== 跟踪器 ==========

/// 单路视频流的跟踪器 (跨帧状态)
pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<TrackState>,
    buffer: ScoreBuffer,
    previous: DetectionSet,
    next_id: u32,
    frame: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig, width: u32, height: u32) -> Self {
        let buffer = ScoreBuffer::new(width, height, config.score_cell);
        Self {
            config,
            tracks: Vec::new(),
            buffer,
            previous: DetectionSet::new(),
            next_id: 1,
            frame: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// 当前所有轨迹 (含未确认)
    pub fn tracks(&self) -> &[TrackState] {
        &self.tracks
    }

    /// 上一帧的已确认结果
    pub fn previous(&self) -> &DetectionSet {
        &self.previous
    }

    pub fn buffer(&self) -> &ScoreBuffer {
        &self.buffer
    }

    /// 已处理帧数
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// 单帧确认
    ///
    /// `current` 输入为本帧检测, 输出替换为已确认的检测; 返回确认数量
    pub fn finalization(&mut self, current: &mut DetectionSet, frame_size: (u32, u32)) -> usize {
        let frame = self.frame;
        self.frame += 1;

        // 1. 累积置信度 (无效帧只衰减, 不重建缓冲)
        let valid = frame_size.0 > 0 && frame_size.1 > 0;
        if valid && self.buffer.size() != frame_size {
            debug!(
                "帧尺寸变化 {:?} → {:?}, 重置累积缓冲",
                self.buffer.size(),
                frame_size
            );
            self.buffer = ScoreBuffer::new(frame_size.0, frame_size.1, self.config.score_cell);
        }
        self.buffer.decay(self.config.score_decay);
        if valid {
            for det in current.iter() {
                self.buffer.deposit(&det.bbox, 1.0);
            }
        }

        // 2. 匹配
        let detections = std::mem::take(current).into_vec();
        let predicted: Vec<BBox> = self.tracks.iter().map(|t| t.predict(frame)).collect();
        let assignments = self.match_detections_to_tracks(&detections, &predicted);

        let mut matched_track = vec![false; self.tracks.len()];
        let mut detections: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
        for (det_idx, track_idx) in assignments {
            matched_track[track_idx] = true;
            if let Some(det) = detections[det_idx].take() {
                self.tracks[track_idx].update(det, frame, &self.config);
            }
        }

        // 3. 未匹配的轨迹 → 丢失
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].mark_lost(frame, &self.config);
            }
        }

        // 4. 未匹配的检测 → 新建轨迹
        for det in detections.into_iter().flatten() {
            self.tracks
                .push(TrackState::new(self.next_id, det, frame, &self.config));
            self.next_id += 1;
        }

        // 5. 累积置信度 + 确认
        for track in &mut self.tracks {
            track.score = self.buffer.mean(&track.bbox);
            track.try_confirm(&self.config);
        }

        // 6. 删除
        let config = &self.config;
        let before = self.tracks.len();
        self.tracks.retain(|t| !t.is_dropped(config));
        if self.tracks.len() != before {
            debug!("删除轨迹 {} 个", before - self.tracks.len());
        }

        // 7. 输出已确认轨迹
        let mut confirmed: Vec<&TrackState> =
            self.tracks.iter().filter(|t| t.is_confirmed()).collect();
        confirmed.sort_by_key(|t| t.id);

        let out = DetectionSet::from(
            confirmed
                .into_iter()
                .map(TrackState::to_detection)
                .collect::<Vec<_>>(),
        );
        self.previous = out.clone();
        *current = out;
        current.len()
    }

    /// 同类别 IOU 贪心匹配, 返回 (检测下标, 轨迹下标)
    fn match_detections_to_tracks(
        &self,
        detections: &[Detection],
        predicted: &[BBox],
    ) -> Vec<(usize, usize)> {
        if detections.is_empty() || predicted.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (track_idx, (track, pred)) in self.tracks.iter().zip(predicted).enumerate() {
            for (det_idx, det) in detections.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                let iou = det.bbox.iou(pred);
                if iou >= self.config.iou_threshold {
                    candidates.push((1.0 - iou, track_idx, det_idx));
                }
            }
        }

        // 贪心匹配: 按 (代价, 轨迹, 检测) 排序
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assignments = Vec::new();
        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; predicted.len()];
        for (_, track_idx, det_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                assignments.push((det_idx, track_idx));
                used_det[det_idx] = true;
                used_track[track_idx] = true;
            }
        }
        assignments
    }

    /// 清除所有跟踪状态
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.buffer.clear();
        self.previous = DetectionSet::new();
        self.next_id = 1;
        self.frame = 0;
    }

    /// 跟踪统计信息
    pub fn stats(&self) -> String {
        let confirmed = self.tracks.iter().filter(|t| t.is_confirmed()).count();
        format!(
            "跟踪: {} 个 (已确认 {}) | 总ID: {}",
            self.tracks.len(),
            confirmed,
            self.next_id - 1
        )
    }
}
