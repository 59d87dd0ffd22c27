//! 每帧声明式调度的帧图
//!
//! 资源表、依赖分析、拓扑排序、多队列 barrier 合成与命令录制，见 [`frame_graph`]。

pub mod frame_graph;
pub mod profiling;
