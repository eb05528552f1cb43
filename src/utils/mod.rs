/// 工具模块
/// Utility modules
pub mod distance_transform;
pub mod features;
pub mod pyramid;
