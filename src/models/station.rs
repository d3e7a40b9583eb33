use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::error::{AppError, AppResult};

/// PLC端点定义
///
/// 一台物理PLC由 主机地址+机架号+插槽号 唯一确定，
/// 多个工位可以共享同一端点（同一条产线的工位通常接同一台PLC）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlcEndpoint {
    /// PLC IP地址
    pub host: String,
    /// 机架号
    pub rack: u16,
    /// 插槽号
    pub slot: u16,
}

impl PlcEndpoint {
    pub fn new(host: impl Into<String>, rack: u16, slot: u16) -> Self {
        Self {
            host: host.into(),
            rack,
            slot,
        }
    }

    /// 端点唯一键，用于连接池去重
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.host, self.rack, self.slot)
    }
}

impl fmt::Display for PlcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (机架{} 插槽{})", self.host, self.rack, self.slot)
    }
}

/// 位地址：DB块号 + 字节偏移 + 位号(0..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitAddress {
    pub db: u16,
    pub byte: u32,
    pub bit: u8,
}

impl BitAddress {
    pub fn new(db: u16, byte: u32, bit: u8) -> Self {
        Self { db, byte, bit }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.bit > 7 {
            return Err(AppError::validation_error(format!(
                "位号超出范围: DB{}.DBX{}.{}，位号必须在0到7之间",
                self.db, self.byte, self.bit
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB{}.DBX{}.{}", self.db, self.byte, self.bit)
    }
}

/// 字地址：DB块号 + 字节偏移（16位整数，大端）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WordAddress {
    pub db: u16,
    pub byte: u32,
}

impl WordAddress {
    pub fn new(db: u16, byte: u32) -> Self {
        Self { db, byte }
    }
}

impl fmt::Display for WordAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB{}.DBW{}", self.db, self.byte)
    }
}

/// 字符串地址：DB块号 + 字节偏移 + 最大字符数
///
/// S7字符串在线上占 max_size + 2 个字节：
/// 首字节为容量，次字节为实际长度，之后为ASCII内容。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringAddress {
    pub db: u16,
    pub byte: u32,
    pub max_size: u8,
}

impl StringAddress {
    pub fn new(db: u16, byte: u32, max_size: u8) -> Self {
        Self { db, byte, max_size }
    }

    /// 线上占用的总字节数（容量字节 + 长度字节 + 内容）
    pub fn wire_len(&self) -> usize {
        self.max_size as usize + 2
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.max_size == 0 {
            return Err(AppError::validation_error(format!(
                "字符串容量不能为0: DB{}.DBB{}",
                self.db, self.byte
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StringAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB{}.DBB{}[{}]", self.db, self.byte, self.max_size)
    }
}

/// 工位信号表
///
/// 字段名沿用现场PLC程序中的信号命名，避免与电气图纸脱节。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSignals {
    /// 触发位：上升沿表示一个模组到位，开始采集
    pub trigger: BitAddress,
    /// 模组条码字符串
    pub id_modulo: StringAddress,
    /// 良品完成位
    pub fine_buona: BitAddress,
    /// 不良品完成位
    pub fine_scarto: BitAddress,
    /// 不良原因已填写位
    pub esito_scarto_compilato: BitAddress,
    /// 串焊机编号（部分工位没有）
    #[serde(default)]
    pub stringatrice: Option<WordAddress>,
}

impl StationSignals {
    pub fn validate(&self) -> AppResult<()> {
        self.trigger.validate()?;
        self.id_modulo.validate()?;
        self.fine_buona.validate()?;
        self.fine_scarto.validate()?;
        self.esito_scarto_compilato.validate()?;
        Ok(())
    }
}

/// 工位配置：归属产线、工位名、所接PLC端点和信号表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// 产线名称
    pub line: String,
    /// 工位名称
    pub station: String,
    /// 工位所接的PLC端点
    pub endpoint: PlcEndpoint,
    /// 信号地址表
    pub signals: StationSignals,
}

impl StationConfig {
    /// 工位唯一键，格式为 "产线.工位"
    pub fn station_key(&self) -> String {
        format!("{}.{}", self.line, self.station)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.line.is_empty() || self.station.is_empty() {
            return Err(AppError::validation_error("产线名称和工位名称不能为空"));
        }
        if self.endpoint.host.is_empty() {
            return Err(AppError::validation_error(format!(
                "工位 {} 的PLC主机地址不能为空",
                self.station_key()
            )));
        }
        self.signals.validate()
    }
}

/// 连接运行统计
///
/// 由连接对象在每次读写后更新，供诊断接口汇总展示。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub successful_reads: u64,
    pub failed_reads: u64,
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub reconnect_attempts: u64,
    /// 最后一次成功通信时间
    pub last_communication: Option<chrono::DateTime<chrono::Utc>>,
}

/// 连接状态快照，用于诊断接口
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSummary {
    /// 连接句柄ID
    pub handle_id: String,
    /// 端点描述
    pub endpoint: String,
    /// 当前是否在线
    pub connected: bool,
    /// 运行统计
    pub stats: ConnectionStats,
}
