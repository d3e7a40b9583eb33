//! 模拟PLC连接
//!
//! 用于脱机开发和测试阶段，模拟真实PLC的读写行为。
//! 数据保存在内存DB块中，字节布局与真实PLC完全一致，
//! 触发位和模组条码从调试控制状态注入。

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::models::station::{
    BitAddress, ConnectionStats, ConnectionSummary, StationSignals, StringAddress,
};
use crate::services::infrastructure::plc::codec;
use crate::services::infrastructure::plc::debug_store::DebugControlStore;
use crate::services::traits::IPlcConnection;
use crate::utils::error::{AppError, AppResult};

/// 模拟连接需要识别的特殊地址
///
/// 触发位和模组条码之外的信号都按普通内存读写处理。
#[derive(Debug, Clone)]
pub struct SimulatedLayout {
    /// 触发位地址，读取时从调试控制状态取值
    pub trigger: BitAddress,
    /// 模组条码地址，读取时注入调试控制状态中的条码
    pub id_modulo: StringAddress,
}

impl From<&StationSignals> for SimulatedLayout {
    fn from(signals: &StationSignals) -> Self {
        Self {
            trigger: signals.trigger,
            id_modulo: signals.id_modulo,
        }
    }
}

/// 写入操作记录
/// 用于测试验证写入操作是否按预期执行
#[derive(Debug, Clone)]
pub struct SimWriteOperation {
    /// 写入时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// DB块号
    pub db: u16,
    /// 字节偏移
    pub byte: u32,
    /// 操作类型描述
    pub operation_type: String,
}

/// 模拟PLC连接实现
pub struct SimulatedS7Connection {
    handle_id: String,
    /// 所属工位键（"产线.工位"）
    station_key: String,
    layout: SimulatedLayout,
    debug_store: Arc<dyn DebugControlStore>,
    /// 内存DB块存储（块号 -> 字节缓冲，按需扩容）
    blocks: Mutex<HashMap<u16, Vec<u8>>>,
    /// 写入操作记录（用于测试验证）
    write_log: Mutex<Vec<SimWriteOperation>>,
    stats: Mutex<ConnectionStats>,
    /// 是否模拟网络延迟
    simulate_network_delay: bool,
    /// 网络延迟时间（毫秒）
    network_delay_ms: u64,
    /// 是否模拟随机读写错误
    simulate_errors: bool,
    /// 错误率（0.0-1.0）
    error_rate: f64,
}

impl SimulatedS7Connection {
    /// 创建新的模拟连接实例
    pub fn new(
        station_key: impl Into<String>,
        layout: SimulatedLayout,
        debug_store: Arc<dyn DebugControlStore>,
    ) -> Self {
        Self {
            handle_id: uuid::Uuid::new_v4().to_string(),
            station_key: station_key.into(),
            layout,
            debug_store,
            blocks: Mutex::new(HashMap::new()),
            write_log: Mutex::new(Vec::new()),
            stats: Mutex::new(ConnectionStats::default()),
            simulate_network_delay: true,
            network_delay_ms: 20,
            simulate_errors: false,
            error_rate: 0.01,
        }
    }

    /// 创建用于测试的模拟连接实例
    /// 禁用网络延迟和错误模拟，以便快速测试
    pub fn new_for_testing(
        station_key: impl Into<String>,
        layout: SimulatedLayout,
        debug_store: Arc<dyn DebugControlStore>,
    ) -> Self {
        let mut conn = Self::new(station_key, layout, debug_store);
        conn.simulate_network_delay = false;
        conn.simulate_errors = false;
        conn
    }

    /// 预置DB块内容，测试中用来构造初始数据
    pub async fn preset_block(&self, db: u16, offset: u32, data: &[u8]) {
        let mut blocks = self.blocks.lock().await;
        let block = blocks.entry(db).or_default();
        Self::ensure_len(block, offset as usize + data.len());
        block[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    /// 获取写入日志
    pub async fn write_log(&self) -> Vec<SimWriteOperation> {
        self.write_log.lock().await.clone()
    }

    /// 清空写入日志
    pub async fn clear_write_log(&self) {
        self.write_log.lock().await.clear();
    }

    fn ensure_len(block: &mut Vec<u8>, len: usize) {
        if block.len() < len {
            block.resize(len, 0);
        }
    }

    async fn simulate_latency(&self) {
        if self.simulate_network_delay {
            sleep(Duration::from_millis(self.network_delay_ms)).await;
        }
    }

    fn should_fail(&self) -> bool {
        self.simulate_errors && rand::thread_rng().gen_bool(self.error_rate)
    }

    async fn log_write(&self, db: u16, byte: u32, operation_type: &str) {
        let mut log = self.write_log.lock().await;
        log.push(SimWriteOperation {
            timestamp: Utc::now(),
            db,
            byte,
            operation_type: operation_type.to_string(),
        });
        let mut stats = self.stats.lock().await;
        stats.successful_writes += 1;
        stats.last_communication = Some(Utc::now());
    }

    async fn record_read(&self) {
        let mut stats = self.stats.lock().await;
        stats.successful_reads += 1;
        stats.last_communication = Some(Utc::now());
    }

    /// 把调试控制状态物化到内存DB块中
    ///
    /// 触发位和模组条码写入对应的缓冲位置后再读取，
    /// 保证逐点读和整块读看到同一份数据。
    fn materialize_debug_state(&self, blocks: &mut HashMap<u16, Vec<u8>>) {
        // 触发位
        let trigger = self.debug_store.trigger(&self.station_key);
        let addr = self.layout.trigger;
        let block = blocks.entry(addr.db).or_default();
        Self::ensure_len(block, addr.byte as usize + 1);
        block[addr.byte as usize] = codec::set_bit(block[addr.byte as usize], addr.bit, trigger);

        // 模组条码（仅在调试状态里有值时覆盖缓冲）
        if let Some(code) = self.debug_store.module_code(&self.station_key) {
            let addr = self.layout.id_modulo;
            let encoded = codec::encode_s7_string(&code, addr.max_size);
            let block = blocks.entry(addr.db).or_default();
            Self::ensure_len(block, addr.byte as usize + encoded.len());
            block[addr.byte as usize..addr.byte as usize + encoded.len()].copy_from_slice(&encoded);
        }
    }

    async fn read_bytes(&self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>> {
        self.simulate_latency().await;
        if self.should_fail() {
            return Err(AppError::plc_communication_error(format!(
                "模拟读取错误: {} DB{}.{}",
                self.station_key, db, start
            )));
        }
        let mut blocks = self.blocks.lock().await;
        self.materialize_debug_state(&mut blocks);
        let block = blocks.entry(db).or_default();
        Self::ensure_len(block, start as usize + size);
        self.record_read().await;
        Ok(block[start as usize..start as usize + size].to_vec())
    }

    async fn write_bytes(&self, db: u16, start: u32, data: &[u8], operation_type: &str) -> bool {
        self.simulate_latency().await;
        if self.should_fail() {
            let mut stats = self.stats.lock().await;
            stats.failed_writes += 1;
            return false;
        }
        {
            let mut blocks = self.blocks.lock().await;
            let block = blocks.entry(db).or_default();
            Self::ensure_len(block, start as usize + data.len());
            block[start as usize..start as usize + data.len()].copy_from_slice(data);
        }
        self.log_write(db, start, operation_type).await;
        true
    }
}

#[async_trait]
impl IPlcConnection for SimulatedS7Connection {
    fn handle_id(&self) -> &str {
        &self.handle_id
    }

    fn endpoint_label(&self) -> String {
        format!("模拟PLC ({})", self.station_key)
    }

    async fn is_connected(&self, _force: bool) -> bool {
        // 模拟连接永远在线
        true
    }

    async fn read_bool(&self, db: u16, byte: u32, bit: u8) -> bool {
        let addr = BitAddress::new(db, byte, bit);
        if addr == self.layout.trigger {
            self.record_read().await;
            return self.debug_store.trigger(&self.station_key);
        }
        match self.read_bytes(db, byte, 1).await {
            Ok(bytes) => codec::get_bit(bytes.first().copied().unwrap_or(0), bit),
            Err(_) => false,
        }
    }

    async fn write_bool(&self, db: u16, byte: u32, bit: u8, value: bool) -> bool {
        let addr = BitAddress::new(db, byte, bit);
        // 采集侧复位触发位时同步清掉调试状态，否则下一拍会立即再次触发
        if addr == self.layout.trigger {
            self.debug_store.set_trigger(&self.station_key, value);
        }
        let current = {
            let mut blocks = self.blocks.lock().await;
            let block = blocks.entry(db).or_default();
            Self::ensure_len(block, byte as usize + 1);
            block[byte as usize]
        };
        let updated = codec::set_bit(current, bit, value);
        self.write_bytes(db, byte, &[updated], "write_bool").await
    }

    async fn read_int(&self, db: u16, byte: u32) -> i16 {
        match self.read_bytes(db, byte, 2).await {
            Ok(bytes) => codec::decode_int(&bytes),
            Err(_) => 0,
        }
    }

    async fn write_int(&self, db: u16, byte: u32, value: i16) -> bool {
        self.write_bytes(db, byte, &codec::encode_int(value), "write_int")
            .await
    }

    async fn read_byte(&self, db: u16, byte: u32) -> Option<u8> {
        match self.read_bytes(db, byte, 1).await {
            Ok(bytes) => Some(bytes.first().copied().unwrap_or(0)),
            Err(_) => None,
        }
    }

    async fn read_real(&self, db: u16, byte: u32) -> Option<f32> {
        match self.read_bytes(db, byte, 4).await {
            Ok(bytes) => Some(codec::decode_real(&bytes)),
            Err(_) => None,
        }
    }

    async fn read_string(&self, db: u16, byte: u32, max_size: u8) -> Option<String> {
        let wire_len = max_size as usize + 2;
        match self.read_bytes(db, byte, wire_len).await {
            Ok(bytes) => Some(codec::decode_s7_string(&bytes, max_size)),
            Err(_) => None,
        }
    }

    async fn write_string(&self, db: u16, byte: u32, max_size: u8, value: &str) -> bool {
        let addr = StringAddress::new(db, byte, max_size);
        if addr.db == self.layout.id_modulo.db && addr.byte == self.layout.id_modulo.byte {
            self.debug_store.set_module_code(&self.station_key, value);
        }
        self.write_bytes(db, byte, &codec::encode_s7_string(value, max_size), "write_string")
            .await
    }

    async fn read_date_time(&self, db: u16, byte: u32) -> Option<chrono::NaiveDateTime> {
        match self.read_bytes(db, byte, 8).await {
            Ok(bytes) => codec::decode_date_time(&bytes),
            Err(_) => None,
        }
    }

    async fn read_block(&self, db: u16, start: u32, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        match self.read_bytes(db, start, size).await {
            Ok(bytes) => bytes,
            Err(_) => vec![0u8; size],
        }
    }

    async fn try_read_block(&self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.read_bytes(db, start, size).await
    }

    async fn force_reconnect(&self, reason: &str) {
        log::info!("🔄 模拟连接忽略强制重连请求: {} 原因: {}", self.station_key, reason);
    }

    async fn disconnect(&self) {
        log::info!("🔌 模拟连接关闭: {}", self.station_key);
    }

    async fn summary(&self) -> ConnectionSummary {
        let stats = self.stats.lock().await.clone();
        ConnectionSummary {
            handle_id: self.handle_id.clone(),
            endpoint: self.endpoint_label(),
            connected: true,
            stats,
        }
    }
}
