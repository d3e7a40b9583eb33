//! 真实PLC连接
//!
//! 在 `S7Wire` 通道之上叠加连接管理语义：
//! - 读写失败自动降级（读返回默认值，写按策略重试）
//! - 大块数据分片读取，单片失败只重试该片
//! - 后台机会式重连（断线后先探测端口再握手）
//! - 定时强制重连（现场PLC长连接数天后会出现静默僵死）
//!
//! 通道操作全部是阻塞式socket I/O，统一切换到tokio阻塞线程池执行，
//! 不占用运行时的reactor线程。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::station::{ConnectionStats, ConnectionSummary, PlcEndpoint};
use crate::services::infrastructure::plc::codec;
use crate::services::infrastructure::plc::wire::S7Wire;
use crate::services::traits::IPlcConnection;
use crate::utils::config::{PlcTuning, RetryPolicy};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;

/// 手动强制重连的最小间隔
const MANUAL_RECONNECT_GAP: Duration = Duration::from_secs(10);
/// 手动重连后抑制定时强制重连的时长
const MANUAL_RECONNECT_COOLDOWN: Duration = Duration::from_secs(600);
/// 强制重连中断开与重建之间的等待，给PLC侧释放连接资源的时间
const RECONNECT_SETTLE: Duration = Duration::from_secs(1);
/// 机会式重连循环的节拍
const RECONNECT_TICK: Duration = Duration::from_secs(1);

/// 真实S7连接
///
/// 对通道的所有访问都经过异步互斥锁串行化，owned锁守卫随阻塞任务
/// 移动。连接标志单独用原子布尔缓存，读路径检查在线状态时不需要
/// 排队；标志的修改只发生在持通道锁的任务内。
pub struct S7Connection<W: S7Wire> {
    handle_id: String,
    endpoint: PlcEndpoint,
    tuning: PlcTuning,
    wire: Arc<Mutex<W>>,
    connected: Arc<AtomicBool>,
    stats: Mutex<ConnectionStats>,
    reconnect_attempts: AtomicU64,
    last_reconnect_attempt: Mutex<Option<Instant>>,
    last_manual_reconnect: Mutex<Option<Instant>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<W: S7Wire> S7Connection<W> {
    pub fn new(wire: W, tuning: PlcTuning) -> Self {
        let endpoint = wire.endpoint().clone();
        Self {
            handle_id: uuid::Uuid::new_v4().to_string(),
            endpoint,
            tuning,
            wire: Arc::new(Mutex::new(wire)),
            connected: Arc::new(AtomicBool::new(false)),
            stats: Mutex::new(ConnectionStats::default()),
            reconnect_attempts: AtomicU64::new(0),
            last_reconnect_attempt: Mutex::new(None),
            last_manual_reconnect: Mutex::new(None),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 建立初始连接
    ///
    /// 失败不致命：连接保持离线状态，后台重连任务会继续尝试。
    pub async fn connect(&self) -> AppResult<()> {
        let mut wire = Arc::clone(&self.wire).lock_owned().await;
        let connected = Arc::clone(&self.connected);
        let result = tokio::task::spawn_blocking(move || {
            let result = wire.connect();
            connected.store(result.is_ok(), Ordering::SeqCst);
            result
        })
        .await
        .map_err(|e| AppError::concurrency_error(format!("通道任务执行失败: {}", e)))?;
        match result {
            Ok(()) => {
                info!("✅ PLC连接成功: {}", self.endpoint);
                Ok(())
            }
            Err(e) => {
                warn!("❌ PLC连接失败: {}: {}", self.endpoint, e);
                Err(e)
            }
        }
    }

    /// 启动后台任务（机会式重连 + 定时强制重连）
    ///
    /// 可重复调用，已启动时为空操作。任务生命周期由取消令牌控制，
    /// `stop` 会等待它们全部退出。
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        // 机会式重连：断线后每秒检查一次，尝试间隔不低于配置下限
        {
            let conn = Arc::clone(self);
            let token = self.cancel.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(RECONNECT_TICK);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => conn.reconnect_tick().await,
                    }
                }
                debug!("🛑 机会式重连任务退出: {}", conn.endpoint);
            }));
        }

        // 定时强制重连：周期性重建连接，清理PLC侧的僵死会话
        if self.tuning.forced_reconnect_interval_min > 0 {
            let conn = Arc::clone(self);
            let token = self.cancel.clone();
            let interval = Duration::from_secs(self.tuning.forced_reconnect_interval_min * 60);
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(interval) => conn.scheduled_reconnect().await,
                    }
                }
                debug!("🛑 定时强制重连任务退出: {}", conn.endpoint);
            }));
        }

        info!("🚀 PLC后台任务已启动: {} ({}个)", self.endpoint, tasks.len());
    }

    /// 停止后台任务并断开连接
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        let mut wire = Arc::clone(&self.wire).lock_owned().await;
        let connected = Arc::clone(&self.connected);
        if tokio::task::spawn_blocking(move || {
            wire.disconnect();
            connected.store(false, Ordering::SeqCst);
        })
        .await
        .is_err()
        {
            warn!("⚠️ 断开通道的后台任务未正常结束: {}", self.endpoint);
        }
        info!("🔌 PLC连接已关闭: {}", self.endpoint);
    }

    /// 当前重连尝试次数
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    async fn record_read(&self, ok: bool) {
        let mut stats = self.stats.lock().await;
        if ok {
            stats.successful_reads += 1;
            stats.last_communication = Some(Utc::now());
        } else {
            stats.failed_reads += 1;
        }
    }

    async fn record_write(&self, ok: bool) {
        let mut stats = self.stats.lock().await;
        if ok {
            stats.successful_writes += 1;
            stats.last_communication = Some(Utc::now());
        } else {
            stats.failed_writes += 1;
        }
    }

    /// 在阻塞线程池上执行一次通道操作
    ///
    /// 持通道锁直到操作完成；失败时在锁内清掉在线标志，保证标志
    /// 不会在连接已被重建后才迟到地翻成离线。
    async fn with_wire<T, F>(&self, op: F) -> AppResult<T>
    where
        F: FnOnce(&mut W) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut wire = Arc::clone(&self.wire).lock_owned().await;
        let connected = Arc::clone(&self.connected);
        tokio::task::spawn_blocking(move || {
            let result = op(&mut wire);
            if result.is_err() {
                connected.store(false, Ordering::SeqCst);
            }
            result
        })
        .await
        .map_err(|e| AppError::concurrency_error(format!("通道任务执行失败: {}", e)))?
    }

    /// 单次整块读取，失败时标记离线
    async fn read_bytes(&self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>> {
        if !self.connected.load(Ordering::SeqCst) {
            self.record_read(false).await;
            return Err(AppError::plc_communication_error(format!(
                "连接离线: {}",
                self.endpoint
            )));
        }
        match self.with_wire(move |wire| wire.read_block(db, start, size)).await {
            Ok(bytes) => {
                self.record_read(true).await;
                Ok(bytes)
            }
            Err(e) => {
                self.record_read(false).await;
                debug!("📉 PLC读取失败 {} DB{}.{}: {}", self.endpoint, db, start, e);
                Err(e)
            }
        }
    }

    /// 按重试策略写入，返回是否成功
    async fn write_bytes_with_retry(
        &self,
        db: u16,
        start: u32,
        data: &[u8],
        policy: RetryPolicy,
    ) -> bool {
        if self.tuning.write_suppression {
            debug!("⏭️ 写保护启用，跳过写入 {} DB{}.{} ({}字节)", self.endpoint, db, start, data.len());
            return true;
        }
        for attempt in 0..policy.attempts {
            let payload = data.to_vec();
            let result = self
                .with_wire(move |wire| wire.write_block(db, start, &payload))
                .await;
            match result {
                Ok(()) => {
                    self.record_write(true).await;
                    return true;
                }
                Err(e) => {
                    if attempt + 1 < policy.attempts {
                        let backoff = Duration::from_millis(policy.backoff_ms(attempt));
                        debug!(
                            "🔁 PLC写入重试 {} DB{}.{} (第{}次): {}",
                            self.endpoint, db, start, attempt + 1, e
                        );
                        tokio::time::sleep(backoff).await;
                    } else {
                        warn!("❌ PLC写入失败 {} DB{}.{}: {}", self.endpoint, db, start, e);
                    }
                }
            }
        }
        self.record_write(false).await;
        false
    }

    /// 位写入的读改写，持通道锁保证原子性
    ///
    /// 目标位已是期望值时跳过写入：多数写位调用来自握手确认，
    /// 重复置位是常态，省掉的写请求在高频轮询下很可观。
    async fn rmw_bit(&self, db: u16, byte: u32, bit: u8, value: bool) -> AppResult<()> {
        self.with_wire(move |wire| {
            let current = wire.read_block(db, byte, 1)?;
            let current = current.first().copied().unwrap_or(0);
            let updated = codec::set_bit(current, bit, value);
            if updated == current {
                return Ok(());
            }
            wire.write_block(db, byte, &[updated])
        })
        .await
    }

    /// 写字前先回读当前2字节，持通道锁保证读写原子
    async fn read_then_write_word(&self, db: u16, byte: u32, value: i16) -> AppResult<()> {
        self.with_wire(move |wire| {
            let _current = wire.read_block(db, byte, 2)?;
            wire.write_block(db, byte, &codec::encode_int(value))
        })
        .await
    }

    /// 分片读取，单片失败指数退避重试，直到成功或超过截止时间
    async fn read_block_chunked(&self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>> {
        let deadline = if self.tuning.read_block_deadline_ms > 0 {
            Some(Instant::now() + Duration::from_millis(self.tuning.read_block_deadline_ms))
        } else {
            None
        };
        let retry = self.tuning.chunk_retry;
        let mut out = Vec::with_capacity(size);
        let mut offset = 0usize;
        while offset < size {
            let chunk = (size - offset).min(self.tuning.chunk_size);
            let mut failures: u32 = 0;
            loop {
                let result = self
                    .with_wire(move |wire| wire.read_block(db, start + offset as u32, chunk))
                    .await;
                match result {
                    Ok(bytes) => {
                        self.record_read(true).await;
                        out.extend_from_slice(&bytes);
                        break;
                    }
                    Err(e) => {
                        self.record_read(false).await;
                        let backoff = Duration::from_millis(retry.backoff_ms(failures));
                        failures = failures.saturating_add(1);
                        if let Some(d) = deadline {
                            if Instant::now() + backoff >= d {
                                return Err(AppError::timeout_error(
                                    "read_block",
                                    format!(
                                        "{} DB{} 偏移{} 分片读取超过截止时间: {}",
                                        self.endpoint, db, offset, e
                                    ),
                                ));
                            }
                        }
                        debug!(
                            "🔁 分片读取重试 {} DB{} 偏移{} (第{}次): {}",
                            self.endpoint, db, offset, failures, e
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
            offset += chunk;
        }
        Ok(out)
    }

    /// 机会式重连的单次检查
    async fn reconnect_tick(&self) {
        if self.connected.load(Ordering::SeqCst) {
            return;
        }
        {
            let last = self.last_reconnect_attempt.lock().await;
            if let Some(prev) = *last {
                if prev.elapsed() < Duration::from_secs(self.tuning.reconnect_min_gap_s) {
                    return;
                }
            }
        }
        let mut wire = Arc::clone(&self.wire).lock_owned().await;
        // 等锁期间连接可能已被强制重连恢复，此时不再重复握手
        if self.connected.load(Ordering::SeqCst) {
            return;
        }
        *self.last_reconnect_attempt.lock().await = Some(Instant::now());
        let attempt_no = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut stats = self.stats.lock().await;
            stats.reconnect_attempts += 1;
        }

        let connected = Arc::clone(&self.connected);
        let outcome = tokio::task::spawn_blocking(move || {
            // 先做廉价的端口探测，设备不可达时不走完整握手
            if !wire.probe_reachable() {
                return None;
            }
            let result = wire.connect();
            if result.is_ok() {
                connected.store(true, Ordering::SeqCst);
            }
            Some(result)
        })
        .await;
        match outcome {
            Ok(None) => {
                if Self::should_log_attempt(attempt_no) {
                    warn!("🔌 PLC端口不可达: {} (第{}次尝试)", self.endpoint, attempt_no);
                }
            }
            Ok(Some(Ok(()))) => {
                info!("✅ PLC重连成功: {} (第{}次尝试)", self.endpoint, attempt_no);
            }
            Ok(Some(Err(e))) => {
                if Self::should_log_attempt(attempt_no) {
                    warn!("❌ PLC重连失败: {} (第{}次尝试): {}", self.endpoint, attempt_no, e);
                }
            }
            Err(e) => warn!("⚠️ 重连任务执行失败: {}: {}", self.endpoint, e),
        }
    }

    /// 重连日志限流：前3次逐条输出，之后每60次输出一条
    fn should_log_attempt(attempt_no: u64) -> bool {
        attempt_no <= 3 || attempt_no % 60 == 0
    }

    /// 定时强制重连的单轮执行
    async fn scheduled_reconnect(&self) {
        {
            let last = self.last_manual_reconnect.lock().await;
            if let Some(prev) = *last {
                if prev.elapsed() < MANUAL_RECONNECT_COOLDOWN {
                    info!("⏭️ 跳过定时强制重连 {}: 手动重连冷却期内", self.endpoint);
                    return;
                }
            }
        }
        info!("🔄 定时强制重连开始: {}", self.endpoint);
        self.reconnect_cycle().await;
    }

    /// 完整的重连周期：断开、等待、重建
    ///
    /// 全程持通道锁，期间的读写请求排队等待而不是打到半开的连接上。
    async fn reconnect_cycle(&self) {
        let started = Instant::now();
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut stats = self.stats.lock().await;
            stats.reconnect_attempts += 1;
        }
        let wire = Arc::clone(&self.wire).lock_owned().await;
        let connected = Arc::clone(&self.connected);
        let mut wire = match tokio::task::spawn_blocking(move || {
            let mut wire = wire;
            wire.disconnect();
            connected.store(false, Ordering::SeqCst);
            wire
        })
        .await
        {
            Ok(wire) => wire,
            Err(e) => {
                warn!("⚠️ 重连任务执行失败: {}: {}", self.endpoint, e);
                return;
            }
        };
        tokio::time::sleep(RECONNECT_SETTLE).await;
        let connected = Arc::clone(&self.connected);
        let result = tokio::task::spawn_blocking(move || {
            let result = wire.connect();
            connected.store(result.is_ok(), Ordering::SeqCst);
            result
        })
        .await;
        match result {
            Ok(Ok(())) => {
                info!("✅ 强制重连完成: {} 耗时{:?}", self.endpoint, started.elapsed());
            }
            Ok(Err(e)) => {
                warn!("❌ 强制重连失败: {}: {}", self.endpoint, e);
            }
            Err(e) => warn!("⚠️ 重连任务执行失败: {}: {}", self.endpoint, e),
        }
    }
}

#[async_trait]
impl<W: S7Wire> IPlcConnection for S7Connection<W> {
    fn handle_id(&self) -> &str {
        &self.handle_id
    }

    fn endpoint_label(&self) -> String {
        self.endpoint.to_string()
    }

    async fn is_connected(&self, _force: bool) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_bool(&self, db: u16, byte: u32, bit: u8) -> bool {
        match self.read_bytes(db, byte, 1).await {
            Ok(bytes) => codec::get_bit(bytes.first().copied().unwrap_or(0), bit),
            Err(_) => false,
        }
    }

    async fn write_bool(&self, db: u16, byte: u32, bit: u8, value: bool) -> bool {
        if self.tuning.write_suppression {
            debug!("⏭️ 写保护启用，跳过写位 {} DB{}.DBX{}.{}", self.endpoint, db, byte, bit);
            return true;
        }
        let policy = self.tuning.bool_write_retry;
        for attempt in 0..policy.attempts {
            match self.rmw_bit(db, byte, bit, value).await {
                Ok(()) => {
                    self.record_write(true).await;
                    return true;
                }
                Err(e) => {
                    if attempt + 1 < policy.attempts {
                        let backoff = Duration::from_millis(policy.backoff_ms(attempt));
                        debug!(
                            "🔁 写位重试 {} DB{}.DBX{}.{} (第{}次): {}",
                            self.endpoint, db, byte, bit, attempt + 1, e
                        );
                        tokio::time::sleep(backoff).await;
                    } else {
                        warn!(
                            "❌ 写位失败 {} DB{}.DBX{}.{}: {}",
                            self.endpoint, db, byte, bit, e
                        );
                    }
                }
            }
        }
        self.record_write(false).await;
        false
    }

    async fn read_int(&self, db: u16, byte: u32) -> i16 {
        match self.read_bytes(db, byte, 2).await {
            Ok(bytes) => codec::decode_int(&bytes),
            Err(_) => 0,
        }
    }

    async fn write_int(&self, db: u16, byte: u32, value: i16) -> bool {
        if self.tuning.write_suppression {
            debug!("⏭️ 写保护启用，跳过写字 {} DB{}.DBW{}", self.endpoint, db, byte);
            return true;
        }
        let policy = self.tuning.word_write_retry;
        for attempt in 0..policy.attempts {
            match self.read_then_write_word(db, byte, value).await {
                Ok(()) => {
                    self.record_write(true).await;
                    return true;
                }
                Err(e) => {
                    if attempt + 1 < policy.attempts {
                        tokio::time::sleep(Duration::from_millis(policy.backoff_ms(attempt))).await;
                    } else {
                        warn!("❌ 写字失败 {} DB{}.DBW{}: {}", self.endpoint, db, byte, e);
                    }
                }
            }
        }
        self.record_write(false).await;
        false
    }

    async fn read_byte(&self, db: u16, byte: u32) -> Option<u8> {
        match self.read_bytes(db, byte, 1).await {
            Ok(bytes) => bytes.first().copied(),
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
        let data = codec::encode_s7_string(value, max_size);
        self.write_bytes_with_retry(db, byte, &data, self.tuning.word_write_retry)
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
        if !self.connected.load(Ordering::SeqCst) {
            debug!("📴 连接离线，块读取返回全零缓冲: {} DB{} ({}字节)", self.endpoint, db, size);
            return vec![0u8; size];
        }
        match self.read_block_chunked(db, start, size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("❌ 块读取失败 {} DB{}: {}", self.endpoint, db, e);
                vec![0u8; size]
            }
        }
    }

    async fn try_read_block(&self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.read_block_chunked(db, start, size).await
    }

    async fn force_reconnect(&self, reason: &str) {
        {
            let mut last = self.last_manual_reconnect.lock().await;
            if let Some(prev) = *last {
                if prev.elapsed() < MANUAL_RECONNECT_GAP {
                    info!(
                        "⏳ 忽略重复的手动重连请求: {} (距上次不足{}秒)",
                        self.endpoint,
                        MANUAL_RECONNECT_GAP.as_secs()
                    );
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        warn!("🔄 手动强制重连: {} 原因: {}", self.endpoint, reason);
        self.reconnect_cycle().await;
    }

    async fn disconnect(&self) {
        self.stop().await;
    }

    async fn summary(&self) -> ConnectionSummary {
        let stats = self.stats.lock().await.clone();
        ConnectionSummary {
            handle_id: self.handle_id.clone(),
            endpoint: self.endpoint.to_string(),
            connected: self.connected.load(Ordering::SeqCst),
            stats,
        }
    }
}
