/// PLC通信相关模块

/// S7数据编解码工具
pub mod codec;

/// S7底层通道抽象和TCP实现
pub mod wire;

/// 真实PLC连接实现
pub mod connection;

/// 模拟PLC连接实现（用于调试模式和测试）
pub mod simulated;

/// 调试控制状态
pub mod debug_store;

/// PLC连接管理器
pub mod manager;

/// 单元测试模块
#[cfg(test)]
pub mod tests;

// 重新导出主要接口和类型
pub use connection::S7Connection;
pub use debug_store::{DebugControlStore, InMemoryDebugStore};
pub use manager::PlcConnectionManager;
pub use simulated::{SimWriteOperation, SimulatedLayout, SimulatedS7Connection};
pub use wire::{S7TcpWire, S7Wire, S7_PORT};
