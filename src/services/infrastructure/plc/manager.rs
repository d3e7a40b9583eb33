//! PLC连接管理器
//!
//! 按端点维护连接池：同一台PLC（主机+机架+插槽）上的多个工位
//! 共享一条连接。调试模式下改为每个工位一个独立的模拟连接，
//! 上层拿到的都是 `Arc<dyn IPlcConnection>`，无感切换。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::models::station::ConnectionSummary;
use crate::services::infrastructure::plc::connection::S7Connection;
use crate::services::infrastructure::plc::debug_store::DebugControlStore;
use crate::services::infrastructure::plc::simulated::{SimulatedLayout, SimulatedS7Connection};
use crate::services::infrastructure::plc::wire::S7TcpWire;
use crate::services::traits::{BaseService, IPlcConnection};
use crate::utils::config::AppConfig;
use crate::utils::error::{AppError, AppResult};

pub struct PlcConnectionManager {
    config: AppConfig,
    debug_store: Arc<dyn DebugControlStore>,
    /// 端点键 -> 共享的真实连接（保留具体类型，关停时需要stop）
    endpoints: Mutex<HashMap<String, Arc<S7Connection<S7TcpWire>>>>,
    /// 工位键 -> 连接对象
    stations: Mutex<HashMap<String, Arc<dyn IPlcConnection>>>,
}

impl PlcConnectionManager {
    pub fn new(config: AppConfig, debug_store: Arc<dyn DebugControlStore>) -> Self {
        Self {
            config,
            debug_store,
            endpoints: Mutex::new(HashMap::new()),
            stations: Mutex::new(HashMap::new()),
        }
    }

    /// 按配置建立所有工位的连接
    ///
    /// 真实模式下初始连接失败不视为错误：连接保持离线，
    /// 后台重连任务会持续尝试，工位读取在恢复前返回默认值。
    pub async fn start(&self) -> AppResult<()> {
        let debug_mode = self.config.app_settings.debug_mode;
        if debug_mode {
            info!("🧪 调试模式启用，使用模拟PLC连接");
        }

        let mut endpoints = self.endpoints.lock().await;
        let mut stations = self.stations.lock().await;

        for station in &self.config.stations {
            let key = station.station_key();
            if stations.contains_key(&key) {
                continue;
            }

            if debug_mode {
                let conn = SimulatedS7Connection::new(
                    key.clone(),
                    SimulatedLayout::from(&station.signals),
                    Arc::clone(&self.debug_store),
                );
                stations.insert(key.clone(), Arc::new(conn));
                info!("🧪 模拟连接就绪: {}", key);
                continue;
            }

            let endpoint_key = station.endpoint.key();
            let conn = match endpoints.get(&endpoint_key) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let tuning = self.config.plc_tuning.clone();
                    let wire = S7TcpWire::new(
                        station.endpoint.clone(),
                        tuning.read_timeout_ms,
                        tuning.write_timeout_ms,
                    );
                    let conn = Arc::new(S7Connection::new(wire, tuning));
                    if conn.connect().await.is_err() {
                        warn!("⚠️ 初始连接失败，等待后台重连: {}", station.endpoint);
                    }
                    conn.start().await;
                    endpoints.insert(endpoint_key, Arc::clone(&conn));
                    conn
                }
            };
            stations.insert(key.clone(), conn as Arc<dyn IPlcConnection>);
            info!("🔗 工位连接就绪: {} -> {}", key, station.endpoint);
        }

        info!(
            "🚀 PLC连接管理器启动完成: {}个工位, {}条物理连接",
            stations.len(),
            if debug_mode { stations.len() } else { endpoints.len() }
        );
        Ok(())
    }

    /// 关闭所有连接和后台任务
    pub async fn stop(&self) {
        let endpoints: Vec<Arc<S7Connection<S7TcpWire>>> = {
            let mut map = self.endpoints.lock().await;
            map.drain().map(|(_, v)| v).collect()
        };
        futures::future::join_all(endpoints.iter().map(|conn| conn.stop())).await;
        self.stations.lock().await.clear();
        info!("🛑 PLC连接管理器已关闭");
    }

    /// 获取工位对应的连接
    pub async fn connection_for(&self, station_key: &str) -> Option<Arc<dyn IPlcConnection>> {
        self.stations.lock().await.get(station_key).map(Arc::clone)
    }

    /// 所有连接的状态快照（按句柄去重，共享连接只出现一次）
    pub async fn summaries(&self) -> Vec<ConnectionSummary> {
        let stations = self.stations.lock().await;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for conn in stations.values() {
            if seen.insert(conn.handle_id().to_string()) {
                out.push(conn.summary().await);
            }
        }
        out
    }

    /// 对指定工位的连接执行手动强制重连
    pub async fn force_reconnect_station(&self, station_key: &str, reason: &str) -> AppResult<()> {
        match self.connection_for(station_key).await {
            Some(conn) => {
                conn.force_reconnect(reason).await;
                Ok(())
            }
            None => Err(AppError::not_found_error(
                "PlcConnection",
                format!("工位未配置: {}", station_key),
            )),
        }
    }
}

#[async_trait]
impl BaseService for PlcConnectionManager {
    fn service_name(&self) -> &'static str {
        "PlcConnectionManager"
    }

    async fn initialize(&mut self) -> AppResult<()> {
        self.start().await
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        self.stop().await;
        Ok(())
    }

    async fn health_check(&self) -> AppResult<()> {
        let stations = self.stations.lock().await;
        if stations.is_empty() {
            return Err(AppError::service_health_check_error(
                self.service_name(),
                "没有已建立的工位连接",
            ));
        }
        let mut online = 0usize;
        for conn in stations.values() {
            if conn.is_connected(false).await {
                online += 1;
            }
        }
        if online == 0 {
            return Err(AppError::service_health_check_error(
                self.service_name(),
                "所有PLC连接均离线",
            ));
        }
        Ok(())
    }
}
