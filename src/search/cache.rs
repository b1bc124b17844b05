//! 按标签形状缓存的标签查询结果（可选）。
//!
//! 只缓存 缺口-字面串-缺口 形状的标签；键由规则摘要、两个缺口质量和字面串组成，
//! 不同规则集之间的结果互不可见。

use dashmap::DashMap;

use super::mapping::Mapping;

pub trait TagCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<Mapping>>;
    fn put(&self, key: String, value: Vec<Mapping>);
}

/// 分段加锁的映射表，并发查询只在同一分段上竞争
#[derive(Debug, Default)]
pub struct ShardedTagCache {
    map: DashMap<String, Vec<Mapping>>,
    capacity: Option<usize>,
}

impl ShardedTagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存满 `capacity` 条后不再接收新键
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self { map: DashMap::new(), capacity: Some(capacity) }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl TagCache for ShardedTagCache {
    fn get(&self, key: &str) -> Option<Vec<Mapping>> {
        self.map.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: String, value: Vec<Mapping>) {
        if self.capacity.is_some_and(|c| self.map.len() >= c) && !self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key, value);
    }
}
