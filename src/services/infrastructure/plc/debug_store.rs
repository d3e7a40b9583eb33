//! 调试控制状态
//!
//! 调试模式下，操作员通过诊断界面手动拨动各工位的触发位、
//! 填入模组条码，模拟连接从这里取值注入到读取结果中。
//! 状态通过构造注入传递，不使用任何全局变量。

use std::collections::HashMap;
use std::sync::RwLock;

/// 调试控制状态访问接口
pub trait DebugControlStore: Send + Sync {
    /// 工位当前的触发位
    fn trigger(&self, station: &str) -> bool;

    /// 设置工位触发位
    fn set_trigger(&self, station: &str, value: bool);

    /// 工位当前注入的模组条码
    fn module_code(&self, station: &str) -> Option<String>;

    /// 设置工位注入的模组条码
    fn set_module_code(&self, station: &str, code: &str);
}

/// 内存实现，按工位键保存状态
#[derive(Default)]
pub struct InMemoryDebugStore {
    triggers: RwLock<HashMap<String, bool>>,
    module_codes: RwLock<HashMap<String, String>>,
}

impl InMemoryDebugStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebugControlStore for InMemoryDebugStore {
    fn trigger(&self, station: &str) -> bool {
        self.triggers
            .read()
            .map(|m| m.get(station).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    fn set_trigger(&self, station: &str, value: bool) {
        if let Ok(mut m) = self.triggers.write() {
            m.insert(station.to_string(), value);
        }
    }

    fn module_code(&self, station: &str) -> Option<String> {
        self.module_codes
            .read()
            .ok()
            .and_then(|m| m.get(station).cloned())
    }

    fn set_module_code(&self, station: &str, code: &str) {
        if let Ok(mut m) = self.module_codes.write() {
            m.insert(station.to_string(), code.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_per_station() {
        let store = InMemoryDebugStore::new();
        store.set_trigger("Linea1.ST01", true);
        assert!(store.trigger("Linea1.ST01"));
        assert!(!store.trigger("Linea1.ST02"));

        store.set_module_code("Linea1.ST01", "MOD-001");
        assert_eq!(store.module_code("Linea1.ST01").as_deref(), Some("MOD-001"));
        assert_eq!(store.module_code("Linea1.ST02"), None);
    }
}
