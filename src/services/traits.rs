/// 服务层基础trait定义
/// 提供各层服务的接口规范，支持依赖注入和测试

use async_trait::async_trait;

use crate::models::station::ConnectionSummary;
use crate::utils::error::AppResult;

/// 基础服务trait，所有服务都应实现
#[async_trait]
pub trait BaseService: Send + Sync {
    /// 服务名称
    fn service_name(&self) -> &'static str;

    /// 初始化服务
    async fn initialize(&mut self) -> AppResult<()>;

    /// 关闭服务
    async fn shutdown(&mut self) -> AppResult<()>;

    /// 健康检查
    async fn health_check(&self) -> AppResult<()>;
}

/// PLC连接接口
///
/// 真实连接和模拟连接都实现此接口，采集层只依赖trait对象，
/// 调试模式与生产模式的切换对上层完全透明。
///
/// **降级约定**: 所有类型化读操作在通信失败时返回该类型的默认值
/// （bool为false、整数为0、字符串为None），绝不向调用方抛错。
/// 采集循环因此可以无条件地按节拍轮询，不需要逐点处理异常。
#[async_trait]
pub trait IPlcConnection: Send + Sync {
    /// 连接句柄ID（日志关联用）
    fn handle_id(&self) -> &str;

    /// 端点描述，用于日志和诊断展示
    fn endpoint_label(&self) -> String;

    /// 当前是否在线
    ///
    /// `force` 为保留参数：历史接口允许调用方索要一次即时探测，
    /// 现在统一返回缓存的连接标志，后台循环负责保持其新鲜。
    async fn is_connected(&self, force: bool) -> bool;

    /// 读取一个位，失败返回false
    async fn read_bool(&self, db: u16, byte: u32, bit: u8) -> bool;

    /// 写入一个位（读改写），返回是否成功
    async fn write_bool(&self, db: u16, byte: u32, bit: u8, value: bool) -> bool;

    /// 读取16位有符号整数（大端），失败返回0
    async fn read_int(&self, db: u16, byte: u32) -> i16;

    /// 写入16位有符号整数（大端），返回是否成功
    ///
    /// 写入前先回读当前2字节。与写位不同，这里不做重试，
    /// 失败静默返回false（历史行为，见调优参数中的重试策略）。
    async fn write_int(&self, db: u16, byte: u32, value: i16) -> bool;

    /// 读取单个字节，失败返回None
    async fn read_byte(&self, db: u16, byte: u32) -> Option<u8>;

    /// 读取32位浮点数（大端），失败返回None
    async fn read_real(&self, db: u16, byte: u32) -> Option<f32>;

    /// 读取S7格式字符串
    ///
    /// 通信失败返回None；读到的数据不足以构成完整字符串时返回Some("")，
    /// 两种情况上层处理方式不同（None触发诊断告警，空串按无码处理）。
    async fn read_string(&self, db: u16, byte: u32, max_size: u8) -> Option<String>;

    /// 写入S7格式字符串（超长自动截断），返回是否成功
    async fn write_string(&self, db: u16, byte: u32, max_size: u8, value: &str) -> bool;

    /// 读取S7 DATE_AND_TIME（8字节BCD），失败或非法日期返回None
    async fn read_date_time(&self, db: u16, byte: u32) -> Option<chrono::NaiveDateTime>;

    /// 分片读取连续数据块，失败返回与请求等长的全零缓冲
    async fn read_block(&self, db: u16, start: u32, size: usize) -> Vec<u8>;

    /// 分片读取连续数据块，带截止时间，超时返回错误而非全零
    async fn try_read_block(&self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>>;

    /// 手动强制重连（断开、等待、重建）
    ///
    /// 10秒内的重复调用会被忽略，防止诊断页面上的连点。
    async fn force_reconnect(&self, reason: &str);

    /// 断开连接并停止后台任务
    async fn disconnect(&self);

    /// 连接状态快照
    async fn summary(&self) -> ConnectionSummary;
}
