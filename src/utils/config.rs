use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::station::StationConfig;
use crate::utils::error::{AppError, AppResult};

/// 应用程序主配置结构
/// 包含PLC通信子系统运行所需的所有配置信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 应用程序基本设置
    pub app_settings: AppSettings,
    /// PLC通信调优参数
    pub plc_tuning: PlcTuning,
    /// 工位配置列表
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

/// 应用程序基本设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// 应用程序名称
    pub app_name: String,
    /// 应用程序版本
    pub app_version: String,
    /// 运行环境 (development, testing, production)
    pub environment: String,
    /// 是否启用调试模式（调试模式下使用模拟PLC连接）
    pub debug_mode: bool,
    /// 操作超时时间（毫秒）
    pub default_timeout_ms: u64,
}

/// 重试策略：尝试次数与指数退避参数
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub attempts: u32,
    /// 首次重试前的等待时间（毫秒）
    pub initial_backoff_ms: u64,
    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// 第 n 次失败后的退避时间（n 从 0 计），指数翻倍并封顶
    pub fn backoff_ms(&self, failure_index: u32) -> u64 {
        let doubled = self
            .initial_backoff_ms
            .saturating_mul(1u64 << failure_index.min(32));
        doubled.min(self.max_backoff_ms)
    }
}

/// PLC通信调优参数
///
/// 默认值与现场运行多年的参数保持一致，调整前务必在测试线验证。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcTuning {
    /// 连接超时时间（毫秒）
    pub connect_timeout_ms: u64,
    /// 读取超时时间（毫秒）
    pub read_timeout_ms: u64,
    /// 写入超时时间（毫秒）
    pub write_timeout_ms: u64,
    /// 块读取单次请求的最大字节数
    pub chunk_size: usize,
    /// 块读取整体截止时间（毫秒），0表示不限
    pub read_block_deadline_ms: u64,
    /// 块内分片失败的重试退避策略（次数字段不参与，分片会一直重试到截止时间）
    pub chunk_retry: RetryPolicy,
    /// 写位操作的重试策略
    pub bool_write_retry: RetryPolicy,
    /// 写字/写字符串操作的重试策略
    pub word_write_retry: RetryPolicy,
    /// 是否抑制所有写操作（联调时保护现场设备）
    pub write_suppression: bool,
    /// 后台机会式重连两次尝试之间的最小间隔（秒）
    pub reconnect_min_gap_s: u64,
    /// 定时强制重连的周期（分钟），0表示禁用
    pub forced_reconnect_interval_min: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_settings: AppSettings::default(),
            plc_tuning: PlcTuning::default(),
            stations: Vec::new(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "LineaPlc".to_string(),
            app_version: "1.0.0".to_string(),
            environment: "development".to_string(),
            debug_mode: false,
            default_timeout_ms: 30000,
        }
    }
}

impl Default for PlcTuning {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            chunk_size: 480,
            read_block_deadline_ms: 30000,
            chunk_retry: RetryPolicy {
                attempts: 0,
                initial_backoff_ms: 50,
                max_backoff_ms: 5000,
            },
            bool_write_retry: RetryPolicy {
                attempts: 3,
                initial_backoff_ms: 10,
                max_backoff_ms: 5000,
            },
            word_write_retry: RetryPolicy {
                attempts: 1,
                initial_backoff_ms: 10,
                max_backoff_ms: 5000,
            },
            write_suppression: false,
            reconnect_min_gap_s: 5,
            forced_reconnect_interval_min: 360,
        }
    }
}

/// 配置管理器
/// 负责加载、保存和管理应用程序配置
pub struct ConfigManager {
    config: AppConfig,
    config_file_path: PathBuf,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_file_path: PathBuf) -> Self {
        Self {
            config: AppConfig::default(),
            config_file_path,
        }
    }

    /// 从文件加载配置
    pub async fn load_from_file(&mut self) -> AppResult<()> {
        if !self.config_file_path.exists() {
            // 如果配置文件不存在，创建默认配置文件
            self.save_to_file().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_file_path)
            .await
            .map_err(|e| AppError::io_error(format!("读取配置文件失败: {}", e), e.kind().to_string()))?;

        self.config = serde_json::from_str(&content)
            .map_err(|e| AppError::configuration_error(format!("解析配置文件失败: {}", e)))?;

        Ok(())
    }

    /// 将配置保存到文件
    pub async fn save_to_file(&self) -> AppResult<()> {
        // 确保目录存在
        if let Some(parent) = self.config_file_path.parent() {
            tokio::fs::create_dir_all(parent).await
                .map_err(|e| AppError::io_error(format!("创建配置目录失败: {}", e), e.kind().to_string()))?;
        }

        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| AppError::json_error(format!("序列化配置失败: {}", e)))?;

        tokio::fs::write(&self.config_file_path, content)
            .await
            .map_err(|e| AppError::io_error(format!("写入配置文件失败: {}", e), e.kind().to_string()))?;

        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn override_from_env(&mut self) {
        // 应用程序设置
        if let Ok(env) = std::env::var("APP_ENVIRONMENT") {
            self.config.app_settings.environment = env;
        }
        if let Ok(debug) = std::env::var("DEBUG_MODE") {
            self.config.app_settings.debug_mode = debug.to_lowercase() == "true";
        }

        // PLC 调优参数
        if let Ok(suppress) = std::env::var("PLC_WRITE_SUPPRESSION") {
            self.config.plc_tuning.write_suppression = suppress.to_lowercase() == "true";
        }
        if let Ok(interval) = std::env::var("PLC_FORCED_RECONNECT_MIN") {
            if let Ok(interval) = interval.parse::<u64>() {
                self.config.plc_tuning.forced_reconnect_interval_min = interval;
            }
        }
    }

    /// 获取配置的只读引用
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取配置的可变引用
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// 验证配置的有效性
    pub fn validate_config(&self) -> AppResult<()> {
        // 验证环境配置
        let valid_environments = ["development", "testing", "production"];
        if !valid_environments.contains(&self.config.app_settings.environment.as_str()) {
            return Err(AppError::configuration_error(format!(
                "无效的环境配置: {}，有效值: {:?}",
                self.config.app_settings.environment, valid_environments
            )));
        }

        // 验证调优参数
        let tuning = &self.config.plc_tuning;
        if tuning.chunk_size == 0 {
            return Err(AppError::configuration_error("块读取分片大小不能为0"));
        }
        if tuning.bool_write_retry.attempts == 0 {
            return Err(AppError::configuration_error("写位重试次数不能为0"));
        }

        // 验证工位配置
        for station in &self.config.stations {
            station.validate()?;
        }

        // 同一产线内工位键不允许重复
        let mut seen = std::collections::HashSet::new();
        for station in &self.config.stations {
            if !seen.insert(station.station_key()) {
                return Err(AppError::configuration_error(format!(
                    "工位键重复: {}",
                    station.station_key()
                )));
            }
        }

        Ok(())
    }

    /// 重置为默认配置
    pub fn reset_to_default(&mut self) {
        self.config = AppConfig::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 5000,
        };
        assert_eq!(policy.backoff_ms(0), 10);
        assert_eq!(policy.backoff_ms(1), 20);
        assert_eq!(policy.backoff_ms(2), 40);
        assert_eq!(policy.backoff_ms(20), 5000);
    }

    #[test]
    fn test_default_tuning_values() {
        let tuning = PlcTuning::default();
        assert_eq!(tuning.connect_timeout_ms, 5000);
        assert_eq!(tuning.chunk_size, 480);
        assert_eq!(tuning.bool_write_retry.attempts, 3);
        assert_eq!(tuning.word_write_retry.attempts, 1);
        assert!(!tuning.write_suppression);
    }

    #[test]
    fn test_config_save_and_reload() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("app_config.json");
            let mut manager = ConfigManager::new(path.clone());
            manager.get_config_mut().app_settings.debug_mode = true;
            manager.save_to_file().await.unwrap();

            let mut reloaded = ConfigManager::new(path);
            reloaded.load_from_file().await.unwrap();
            assert!(reloaded.get_config().app_settings.debug_mode);
        });
    }

    #[test]
    fn test_duplicate_station_key_rejected() {
        use crate::models::station::*;
        let signals = StationSignals {
            trigger: BitAddress::new(10, 0, 0),
            id_modulo: StringAddress::new(10, 2, 20),
            fine_buona: BitAddress::new(10, 0, 1),
            fine_scarto: BitAddress::new(10, 0, 2),
            esito_scarto_compilato: BitAddress::new(10, 0, 3),
            stringatrice: None,
        };
        let station = StationConfig {
            line: "Linea1".to_string(),
            station: "ST01".to_string(),
            endpoint: PlcEndpoint::new("192.168.1.10", 0, 1),
            signals,
        };
        let mut manager = ConfigManager::new(PathBuf::from("unused.json"));
        manager.get_config_mut().stations.push(station.clone());
        manager.get_config_mut().stations.push(station);
        assert!(manager.validate_config().is_err());
    }
}
