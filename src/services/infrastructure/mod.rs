/// 基础设施层服务模块
/// 负责与外部系统的交互，目前只有PLC通信

/// PLC通信相关模块
pub mod plc;

// 重新导出常用接口和实现
pub use plc::*;
