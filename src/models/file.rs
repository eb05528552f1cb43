//! 模型文件格式 (JSON)
//!
//! ```json
//! { "sbin": 8, "interval": 10,
//!   "classes": [ { "name": "car", "bias": -1.2,
//!       "root":  { "width": 7, "height": 4, "weights": [ ... ] },
//!       "parts": [ { "filter": { "width": 6, "height": 6, "weights": [ ... ] },
//!                    "anchor": [0, 0],
//!                    "deformation": [0.01, 0.0, 0.01, 0.0] } ] } ] }
//! ```
//!
//! 权重按 `[y][x][feature]` 行优先排列, 每个 cell 31 维

use serde::{Deserialize, Serialize};

fn default_sbin() -> usize {
    8
}

fn default_interval() -> usize {
    10
}

/// 模型文件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    #[serde(default = "default_sbin")]
    pub sbin: usize,
    #[serde(default = "default_interval")]
    pub interval: usize,
    pub classes: Vec<ClassFile>,
}

/// 单个类别
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassFile {
    pub name: String,
    #[serde(default)]
    pub bias: f64,
    pub root: FilterFile,
    #[serde(default)]
    pub parts: Vec<PartFile>,
}

/// 滤波器权重
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterFile {
    pub width: usize,
    pub height: usize,
    pub weights: Vec<f64>,
}

/// 部件: 滤波器 + 锚点 + 形变代价 [ax, bx, ay, by]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartFile {
    pub filter: FilterFile,
    pub anchor: [usize; 2],
    pub deformation: [f64; 4],
}
