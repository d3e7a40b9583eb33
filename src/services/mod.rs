/// 服务层模块
///
/// 按照清洁架构原则组织：
/// - Infrastructure Layer: 基础设施服务，处理外部依赖（PLC通信）

/// 基础设施层服务模块
pub mod infrastructure;

/// 服务层基础trait定义
pub mod traits;

// 重新导出基础trait
pub use traits::{BaseService, IPlcConnection};

// 重新导出基础设施层服务
pub use infrastructure::plc::{
    DebugControlStore, InMemoryDebugStore, PlcConnectionManager, S7Connection, S7TcpWire, S7Wire,
    SimulatedLayout, SimulatedS7Connection,
};
