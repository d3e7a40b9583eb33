// PLC连接相关的单元测试
//
// 真实连接用内存通道（MemoryWire）驱动，可以精确控制
// 连接失败次数、读写故障和请求计数；时间相关的行为
// 全部在tokio暂停时钟下验证，不依赖真实等待。

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};

    use crate::models::station::{BitAddress, PlcEndpoint, StringAddress};
    use crate::services::infrastructure::plc::connection::S7Connection;
    use crate::services::infrastructure::plc::debug_store::{DebugControlStore, InMemoryDebugStore};
    use crate::services::infrastructure::plc::simulated::{SimulatedLayout, SimulatedS7Connection};
    use crate::services::infrastructure::plc::wire::S7Wire;
    use crate::services::traits::IPlcConnection;
    use crate::utils::config::PlcTuning;
    use crate::utils::error::{AppError, AppResult};

    /// 内存通道的共享状态，测试持有一份克隆用于断言
    #[derive(Default)]
    struct WireState {
        blocks: HashMap<u16, Vec<u8>>,
        connected: bool,
        reachable: bool,
        fail_connects_remaining: u32,
        fail_reads_remaining: u32,
        fail_io: bool,
        connect_calls: u32,
        disconnect_calls: u32,
        reads: Vec<(u16, u32, usize)>,
        writes: Vec<(u16, u32, Vec<u8>)>,
    }

    struct MemoryWire {
        endpoint: PlcEndpoint,
        state: Arc<StdMutex<WireState>>,
    }

    impl MemoryWire {
        fn new() -> (Self, Arc<StdMutex<WireState>>) {
            let state = Arc::new(StdMutex::new(WireState {
                reachable: true,
                ..WireState::default()
            }));
            let wire = Self {
                endpoint: PlcEndpoint::new("10.0.0.1", 0, 1),
                state: Arc::clone(&state),
            };
            (wire, state)
        }
    }

    impl S7Wire for MemoryWire {
        fn endpoint(&self) -> &PlcEndpoint {
            &self.endpoint
        }

        fn connect(&mut self) -> AppResult<()> {
            let mut s = self.state.lock().unwrap();
            s.connect_calls += 1;
            if s.fail_connects_remaining > 0 {
                s.fail_connects_remaining -= 1;
                return Err(AppError::plc_communication_error("模拟连接失败"));
            }
            s.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            let mut s = self.state.lock().unwrap();
            s.disconnect_calls += 1;
            s.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.state.lock().unwrap().connected
        }

        fn read_block(&mut self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>> {
            let mut s = self.state.lock().unwrap();
            s.reads.push((db, start, size));
            if !s.connected {
                return Err(AppError::plc_communication_error("通道未连接"));
            }
            if s.fail_reads_remaining > 0 {
                s.fail_reads_remaining -= 1;
                return Err(AppError::plc_communication_error("模拟读取失败"));
            }
            if s.fail_io {
                return Err(AppError::plc_communication_error("模拟IO故障"));
            }
            let block = s.blocks.entry(db).or_default();
            let end = start as usize + size;
            if block.len() < end {
                block.resize(end, 0);
            }
            Ok(block[start as usize..end].to_vec())
        }

        fn write_block(&mut self, db: u16, start: u32, data: &[u8]) -> AppResult<()> {
            let mut s = self.state.lock().unwrap();
            if !s.connected || s.fail_io {
                return Err(AppError::plc_communication_error("模拟写入失败"));
            }
            let end = start as usize + data.len();
            {
                let block = s.blocks.entry(db).or_default();
                if block.len() < end {
                    block.resize(end, 0);
                }
                block[start as usize..end].copy_from_slice(data);
            }
            s.writes.push((db, start, data.to_vec()));
            Ok(())
        }

        fn probe_reachable(&self) -> bool {
            self.state.lock().unwrap().reachable
        }
    }

    fn test_tuning() -> PlcTuning {
        PlcTuning {
            // 测试中不需要定时强制重连任务
            forced_reconnect_interval_min: 0,
            ..PlcTuning::default()
        }
    }

    fn test_layout() -> SimulatedLayout {
        SimulatedLayout {
            trigger: BitAddress::new(10, 0, 0),
            id_modulo: StringAddress::new(10, 40, 20),
        }
    }

    // ============ 真实连接 ============

    /// 连接建立后类型化读写按预期工作
    #[tokio::test]
    async fn test_connection_typed_roundtrip() {
        let (wire, _state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();

        assert!(conn.write_int(2, 10, -1234).await);
        assert_eq!(conn.read_int(2, 10).await, -1234);

        assert!(conn.write_string(2, 20, 16, "MOD-42").await);
        assert_eq!(conn.read_string(2, 20, 16).await.as_deref(), Some("MOD-42"));

        assert!(conn.write_bool(2, 50, 5, true).await);
        assert!(conn.read_bool(2, 50, 5).await);
        assert_eq!(conn.read_byte(2, 50).await, Some(1 << 5));
    }

    /// 目标位已是期望值时跳过物理写入
    #[tokio::test]
    async fn test_write_bool_noop_skips_write() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();
        state.lock().unwrap().blocks.insert(5, vec![0b0000_1000]);

        assert!(conn.write_bool(5, 0, 3, true).await);
        assert!(state.lock().unwrap().writes.is_empty());

        assert!(conn.write_bool(5, 0, 3, false).await);
        assert_eq!(state.lock().unwrap().writes.len(), 1);
    }

    /// 写保护启用时所有写操作直接返回成功，不触碰通道
    #[tokio::test]
    async fn test_write_suppression() {
        let (wire, state) = MemoryWire::new();
        let mut tuning = test_tuning();
        tuning.write_suppression = true;
        let conn = S7Connection::new(wire, tuning);
        conn.connect().await.unwrap();

        assert!(conn.write_bool(3, 0, 0, true).await);
        assert!(conn.write_int(3, 2, 7).await);
        assert!(conn.write_string(3, 4, 8, "X").await);

        let s = state.lock().unwrap();
        assert!(s.writes.is_empty());
        assert!(s.reads.is_empty());
    }

    /// 写位重试在第3次尝试成功
    #[tokio::test(start_paused = true)]
    async fn test_write_bool_retry_recovers() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();
        state.lock().unwrap().fail_reads_remaining = 2;

        assert!(conn.write_bool(7, 0, 1, true).await);
        // 前两次读改写的读取失败，第三次完成
        assert_eq!(state.lock().unwrap().writes.len(), 1);
    }

    /// 写位重试耗尽后返回失败而不是panic
    #[tokio::test(start_paused = true)]
    async fn test_write_bool_retry_exhausted() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();
        state.lock().unwrap().fail_io = true;

        assert!(!conn.write_bool(7, 0, 1, true).await);
        // 默认策略3次尝试，每次尝试一次读取
        assert_eq!(state.lock().unwrap().reads.len(), 3);
    }

    /// 写字只尝试一次
    #[tokio::test(start_paused = true)]
    async fn test_write_int_single_attempt() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();
        state.lock().unwrap().fail_io = true;

        assert!(!conn.write_int(7, 0, 99).await);
        assert!(state.lock().unwrap().writes.is_empty());
    }

    /// 写字前先回读目标2字节
    #[tokio::test]
    async fn test_write_int_reads_before_write() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();

        assert!(conn.write_int(9, 4, 300).await);
        let s = state.lock().unwrap();
        assert_eq!(s.reads, vec![(9, 4, 2)]);
        assert_eq!(s.writes, vec![(9, 4, vec![0x01, 0x2C])]);
    }

    /// 通信失败时类型化读取返回默认值，连接标记为离线
    #[tokio::test]
    async fn test_read_defaults_on_failure() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();
        state.lock().unwrap().fail_io = true;

        assert_eq!(conn.read_int(1, 0).await, 0);
        assert!(!conn.is_connected(false).await);
        assert!(!conn.read_bool(1, 0, 0).await);
        assert_eq!(conn.read_string(1, 0, 10).await, None);
        assert_eq!(conn.read_real(1, 0).await, None);
        assert_eq!(conn.read_byte(1, 0).await, None);
        assert_eq!(conn.read_date_time(1, 0).await, None);
    }

    /// 大块读取按480字节分片，拼接结果与原始数据一致
    #[tokio::test]
    async fn test_read_block_chunking() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();

        let reference: Vec<u8> = (0..1000usize).map(|i| (i % 251) as u8).collect();
        state.lock().unwrap().blocks.insert(20, reference.clone());

        let data = conn.read_block(20, 0, 1000).await;
        assert_eq!(data, reference);

        let reads = state.lock().unwrap().reads.clone();
        assert_eq!(reads, vec![(20, 0, 480), (20, 480, 480), (20, 960, 40)]);
    }

    /// 从未写过的DB块整块读取返回全零
    #[tokio::test]
    async fn test_read_block_fresh_block_is_zeroed() {
        let (wire, _state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();

        let data = conn.read_block(33, 0, 600).await;
        assert_eq!(data, vec![0u8; 600]);
    }

    /// 连接离线时块读取立即返回与请求等长的全零缓冲
    #[tokio::test]
    async fn test_read_block_zero_fill_when_offline() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        // 未连接

        let data = conn.read_block(20, 0, 600).await;
        assert_eq!(data, vec![0u8; 600]);
        assert!(state.lock().unwrap().reads.is_empty());
    }

    /// 带截止时间的块读取在超时后返回超时错误
    #[tokio::test(start_paused = true)]
    async fn test_try_read_block_deadline() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();
        state.lock().unwrap().fail_io = true;

        let result = conn.try_read_block(20, 0, 100).await;
        match result {
            Err(AppError::TimeoutError { operation, .. }) => {
                assert_eq!(operation, "read_block");
            }
            other => panic!("期望超时错误，实际: {:?}", other),
        }
    }

    /// 手动强制重连有10秒限流
    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_rate_limited() {
        let (wire, state) = MemoryWire::new();
        let conn = S7Connection::new(wire, test_tuning());
        conn.connect().await.unwrap();
        assert_eq!(state.lock().unwrap().connect_calls, 1);

        conn.force_reconnect("诊断页面触发").await;
        assert_eq!(state.lock().unwrap().connect_calls, 2);
        assert_eq!(state.lock().unwrap().disconnect_calls, 1);

        // 紧接着的第二次请求应被忽略
        conn.force_reconnect("连点").await;
        assert_eq!(state.lock().unwrap().connect_calls, 2);

        // 超过限流窗口后生效
        tokio::time::sleep(std::time::Duration::from_secs(15)).await;
        conn.force_reconnect("再次触发").await;
        assert_eq!(state.lock().unwrap().connect_calls, 3);
    }

    /// 手动重连期间排队等锁的机会式检查不得重复握手
    ///
    /// 强制重连先置离线再持锁等待1秒，这个窗口内到达的机会式
    /// 节拍会通过离线检查后排队；拿到锁时连接已恢复，必须放弃
    /// 本次握手而不是拆掉刚建好的会话。
    #[tokio::test(start_paused = true)]
    async fn test_reconnect_tick_skips_restored_connection() {
        let (wire, state) = MemoryWire::new();
        let conn = Arc::new(S7Connection::new(wire, test_tuning()));
        conn.connect().await.unwrap();
        conn.start().await;

        conn.force_reconnect("联调").await;
        assert_eq!(state.lock().unwrap().connect_calls, 2);

        // 留出多个机会式节拍，在线连接不应再产生握手
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(state.lock().unwrap().connect_calls, 2);
        assert!(conn.is_connected(false).await);

        conn.stop().await;
    }

    /// 断线后机会式重连任务自动恢复连接（前两次握手失败）
    #[tokio::test(start_paused = true)]
    async fn test_background_reconnect_recovers() {
        let (wire, state) = MemoryWire::new();
        let conn = Arc::new(S7Connection::new(wire, test_tuning()));
        let _ = conn.connect().await;
        conn.start().await;

        // 模拟断线：通道断开并标记离线，后续两次握手失败
        {
            let mut s = state.lock().unwrap();
            s.connected = false;
            s.fail_connects_remaining = 2;
        }
        assert_eq!(conn.read_int(1, 0).await, 0);
        assert!(!conn.read_bool(1, 0, 0).await);
        assert!(!conn.is_connected(false).await);

        // 每次尝试间隔不低于5秒，给3次尝试留足时间
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert!(conn.is_connected(false).await);

        conn.stop().await;
    }

    /// 端口不可达时不执行握手
    #[tokio::test(start_paused = true)]
    async fn test_reconnect_skips_unreachable_endpoint() {
        let (wire, state) = MemoryWire::new();
        let conn = Arc::new(S7Connection::new(wire, test_tuning()));
        conn.start().await;
        state.lock().unwrap().reachable = false;

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        // 探测失败，握手从未被调用
        assert_eq!(state.lock().unwrap().connect_calls, 0);
        assert!(conn.reconnect_attempts() > 0);

        conn.stop().await;
    }

    /// 手动重连后的冷却期抑制定时强制重连
    #[tokio::test(start_paused = true)]
    async fn test_scheduled_reconnect_respects_manual_cooldown() {
        let (wire, state) = MemoryWire::new();
        let mut tuning = test_tuning();
        tuning.forced_reconnect_interval_min = 1;
        let conn = Arc::new(S7Connection::new(wire, tuning));
        conn.connect().await.unwrap();
        conn.start().await;

        conn.force_reconnect("联调").await;
        assert_eq!(state.lock().unwrap().connect_calls, 2);

        // 一个定时周期后仍在10分钟冷却期内，本轮被跳过
        tokio::time::sleep(std::time::Duration::from_secs(70)).await;
        assert_eq!(state.lock().unwrap().connect_calls, 2);

        // 冷却期结束后的定时周期正常执行
        tokio::time::sleep(std::time::Duration::from_secs(700)).await;
        assert!(state.lock().unwrap().connect_calls >= 3);

        conn.stop().await;
    }

    // ============ 模拟连接 ============

    /// 模拟连接的类型化读写与真实连接字节级一致
    #[tokio::test]
    async fn test_simulated_roundtrip() {
        let store: Arc<dyn DebugControlStore> = Arc::new(InMemoryDebugStore::new());
        let conn = SimulatedS7Connection::new_for_testing("Linea1.ST01", test_layout(), store);

        assert!(conn.write_int(30, 0, 512).await);
        assert_eq!(conn.read_int(30, 0).await, 512);

        assert!(conn.write_string(30, 10, 12, "ABCDEFGHIJKLMNOP").await);
        // 超长截断到容量
        assert_eq!(conn.read_string(30, 10, 12).await.as_deref(), Some("ABCDEFGHIJKL"));

        // 未写过的区域读出类型默认值
        assert_eq!(conn.read_int(30, 100).await, 0);
        assert!(!conn.read_bool(30, 100, 0).await);
        assert!(conn.is_connected(false).await);
    }

    /// 触发位从调试控制状态注入，复位写入会同步清除注入状态
    #[tokio::test]
    async fn test_simulated_trigger_injection() {
        let store = Arc::new(InMemoryDebugStore::new());
        let conn = SimulatedS7Connection::new_for_testing(
            "Linea1.ST01",
            test_layout(),
            Arc::clone(&store) as Arc<dyn DebugControlStore>,
        );

        assert!(!conn.read_bool(10, 0, 0).await);
        store.set_trigger("Linea1.ST01", true);
        assert!(conn.read_bool(10, 0, 0).await);

        // 采集侧握手复位
        assert!(conn.write_bool(10, 0, 0, false).await);
        assert!(!store.trigger("Linea1.ST01"));
        assert!(!conn.read_bool(10, 0, 0).await);
    }

    /// 注入的模组条码在逐点读和整块读中可见且一致
    #[tokio::test]
    async fn test_simulated_module_code_injection() {
        let store = Arc::new(InMemoryDebugStore::new());
        let conn = SimulatedS7Connection::new_for_testing(
            "Linea1.ST01",
            test_layout(),
            Arc::clone(&store) as Arc<dyn DebugControlStore>,
        );

        store.set_module_code("Linea1.ST01", "MOD-2024-001");
        assert_eq!(
            conn.read_string(10, 40, 20).await.as_deref(),
            Some("MOD-2024-001")
        );

        // 整块读取覆盖条码区域时，窗口内容是S7字符串线上格式
        let block = conn.read_block(10, 0, 62).await;
        assert_eq!(block[40], 20); // 容量字节
        assert_eq!(block[41], 12); // 长度字节
        assert_eq!(&block[42..54], b"MOD-2024-001");
    }

    /// 写入日志记录所有写操作，供测试验证
    #[tokio::test]
    async fn test_simulated_write_log() {
        let store: Arc<dyn DebugControlStore> = Arc::new(InMemoryDebugStore::new());
        let conn = SimulatedS7Connection::new_for_testing("Linea1.ST01", test_layout(), store);

        conn.write_int(30, 0, 1).await;
        conn.write_bool(30, 2, 0, true).await;
        let log = conn.write_log().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].operation_type, "write_int");
        assert_eq!(log[1].operation_type, "write_bool");

        conn.clear_write_log().await;
        assert!(conn.write_log().await.is_empty());
    }

    /// DATE_AND_TIME解码（模拟连接预置原始字节）
    #[tokio::test]
    async fn test_simulated_date_time_read() {
        let store: Arc<dyn DebugControlStore> = Arc::new(InMemoryDebugStore::new());
        let conn = SimulatedS7Connection::new_for_testing("Linea1.ST01", test_layout(), store);

        conn.preset_block(40, 0, &[0x24, 0x06, 0x01, 0x08, 0x15, 0x30, 0x00, 0x00])
            .await;
        let dt = conn.read_date_time(40, 0).await.unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-06-01 08:15:30");

        // 未初始化区域（全零）返回None
        assert_eq!(conn.read_date_time(40, 100).await, None);
    }
}
