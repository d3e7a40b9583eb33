/// 产线监控系统 - PLC通信子系统核心库
pub mod models;
pub mod utils;
pub mod services;

// 重新导出常用类型，方便使用
pub use models::*;
pub use services::*;
pub use utils::{AppConfig, AppError, AppResult};
