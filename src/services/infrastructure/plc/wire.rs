//! S7底层通道
//!
//! `S7Wire` 把协议库隔离在一个窄接口之后：连接对象只关心
//! 连接/断开/整块读写，不接触协议细节，测试时可以替换为内存实现。

use std::net::ToSocketAddrs;
use std::time::Duration;

use s7::{client::Client, tcp, transport};

use crate::models::station::PlcEndpoint;
use crate::utils::error::{AppError, AppResult};

/// S7 ISO-TSAP服务端口
pub const S7_PORT: u16 = 102;

/// 端口探测超时
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// S7物理通道抽象
///
/// 方法全部为同步阻塞：协议库本身是阻塞式的，上层用异步互斥锁
/// 保证同一通道同一时刻只有一个操作在途。
pub trait S7Wire: Send + 'static {
    /// 通道对应的PLC端点
    fn endpoint(&self) -> &PlcEndpoint;

    /// 建立连接，已连接时先断开旧连接
    fn connect(&mut self) -> AppResult<()>;

    /// 断开连接（幂等）
    fn disconnect(&mut self);

    /// 通道层是否持有活动连接
    fn is_connected(&self) -> bool;

    /// 从DB块读取连续字节
    fn read_block(&mut self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>>;

    /// 向DB块写入连续字节
    fn write_block(&mut self, db: u16, start: u32, data: &[u8]) -> AppResult<()>;

    /// 端点可达性探测：尝试TCP连接102端口，1秒超时
    ///
    /// 后台重连循环用它做廉价预检，避免对不可达设备
    /// 反复执行完整的ISO-on-TCP握手。
    fn probe_reachable(&self) -> bool {
        let target = (self.endpoint().host.as_str(), S7_PORT);
        let addrs = match target.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(_) => return false,
        };
        for addr in addrs {
            if std::net::TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok() {
                return true;
            }
        }
        false
    }
}

/// 基于s7协议库的生产通道实现
///
/// 连接类型固定为PG（编程器连接），这是现场所有西门子PLC
/// 统一开放的连接资源。
pub struct S7TcpWire {
    endpoint: PlcEndpoint,
    read_timeout: Duration,
    write_timeout: Duration,
    client: Option<Client<tcp::Transport>>,
}

impl S7TcpWire {
    pub fn new(endpoint: PlcEndpoint, read_timeout_ms: u64, write_timeout_ms: u64) -> Self {
        Self {
            endpoint,
            read_timeout: Duration::from_millis(read_timeout_ms),
            write_timeout: Duration::from_millis(write_timeout_ms),
            client: None,
        }
    }

    fn client_mut(&mut self) -> AppResult<&mut Client<tcp::Transport>> {
        self.client.as_mut().ok_or_else(|| {
            AppError::plc_communication_error(format!("通道未连接: {}", self.endpoint))
        })
    }
}

impl S7Wire for S7TcpWire {
    fn endpoint(&self) -> &PlcEndpoint {
        &self.endpoint
    }

    fn connect(&mut self) -> AppResult<()> {
        // 丢弃旧连接，底层socket随之关闭
        self.client = None;

        let addr: std::net::IpAddr = self.endpoint.host.parse().map_err(|e| {
            AppError::configuration_error(format!("无效的PLC主机地址 {}: {}", self.endpoint.host, e))
        })?;

        let mut opts = tcp::Options::new(
            addr,
            self.endpoint.rack,
            self.endpoint.slot,
            transport::Connection::PG,
        );
        opts.read_timeout = self.read_timeout;
        opts.write_timeout = self.write_timeout;

        let transport = tcp::Transport::connect(opts)?;
        let client = Client::new(transport)?;
        self.client = Some(client);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.client = None;
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn read_block(&mut self, db: u16, start: u32, size: usize) -> AppResult<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        self.client_mut()?
            .ag_read(db as i32, start as i32, size as i32, &mut buffer)?;
        Ok(buffer)
    }

    fn write_block(&mut self, db: u16, start: u32, data: &[u8]) -> AppResult<()> {
        let mut buffer = data.to_vec();
        self.client_mut()?
            .ag_write(db as i32, start as i32, buffer.len() as i32, &mut buffer)?;
        Ok(())
    }
}
