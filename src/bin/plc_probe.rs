//! PLC连通性诊断工具
//!
//! 按配置文件建立所有工位连接，观察一个短暂窗口后
//! 打印各物理连接的在线状态和通信统计。
//! 用法: plc_probe [配置文件路径]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use linea_plc::services::infrastructure::plc::{InMemoryDebugStore, PlcConnectionManager};
use linea_plc::utils::config::ConfigManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/app_config.json".to_string());
    println!("=== PLC连通性检查 ===");
    println!("配置文件: {}", config_path);

    let mut config_manager = ConfigManager::new(PathBuf::from(config_path));
    config_manager.load_from_file().await?;
    config_manager.override_from_env();
    config_manager.validate_config()?;
    let config = config_manager.get_config().clone();

    if config.stations.is_empty() {
        println!("❌ 配置中没有任何工位，无可检查的连接");
        return Ok(());
    }
    println!("共 {} 个工位", config.stations.len());

    let debug_store = Arc::new(InMemoryDebugStore::new());
    let manager = PlcConnectionManager::new(config, debug_store);
    manager.start().await?;

    // 给初始连接和后台重连留出观察窗口
    tokio::time::sleep(Duration::from_secs(3)).await;

    println!("\n=== 连接状态 ===");
    for (i, summary) in manager.summaries().await.iter().enumerate() {
        println!(
            "{}. {} 在线={} 读成功={} 读失败={} 写成功={} 写失败={} 重连尝试={}",
            i + 1,
            summary.endpoint,
            if summary.connected { "✅" } else { "❌" },
            summary.stats.successful_reads,
            summary.stats.failed_reads,
            summary.stats.successful_writes,
            summary.stats.failed_writes,
            summary.stats.reconnect_attempts,
        );
    }

    manager.stop().await;
    Ok(())
}
