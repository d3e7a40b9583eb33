/// 工位与连接相关模型定义模块
pub mod station;

// 重新导出所有类型，方便其他模块使用
pub use station::*;
