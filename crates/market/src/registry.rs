use std::collections::HashMap;
use std::sync::Mutex;
use tickwatch_core::common::Code;

/// # Summary
/// 分桶的代码注册表，调度器按桶为单位轮询。
///
/// # Invariants
/// - 同一代码至多属于一个桶，桶之间互不重叠。
/// - 任一桶的大小不超过 `max_bucket_size`。
/// - 所有桶大小之和等于已注册代码数。
/// - 删除不会重新打包，已分配的代码始终留在原桶中。
/// - 所有操作在同一把互斥锁下串行执行。
pub struct CodeRegistry {
    max_bucket_size: usize,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    // 按开桶顺序排列的桶
    buckets: Vec<Vec<Code>>,
    // 代码 -> 所在桶下标
    owner: HashMap<Code, usize>,
}

impl CodeRegistry {
    /// # Summary
    /// 创建空注册表。
    ///
    /// # Arguments
    /// * `max_bucket_size`: 单桶容量，小于 1 时按 1 处理。
    pub fn new(max_bucket_size: usize) -> Self {
        Self {
            max_bucket_size: max_bucket_size.max(1),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn max_bucket_size(&self) -> usize {
        self.max_bucket_size
    }

    /// # Summary
    /// 注册一个代码。
    ///
    /// # Logic
    /// 1. 已存在则返回 false。
    /// 2. 当前开放桶（最后一个桶）未满则放入，否则新开一个桶。
    ///
    /// # Returns
    /// 成功插入返回 true。
    pub fn add(&self, code: Code) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.owner.contains_key(&code) {
            return false;
        }

        let open_has_room = state
            .buckets
            .last()
            .is_some_and(|bucket| bucket.len() < self.max_bucket_size);
        if !open_has_room {
            state.buckets.push(Vec::with_capacity(self.max_bucket_size));
        }

        let slot = state.buckets.len() - 1;
        if let Some(bucket) = state.buckets.get_mut(slot) {
            bucket.push(code.clone());
        }
        state.owner.insert(code, slot);
        true
    }

    /// # Summary
    /// 注销一个代码。
    ///
    /// # Logic
    /// 1. 从所在桶中移除，其余桶保持不变。
    /// 2. 末尾的空桶被回收，使其前一个桶重新成为开放桶。
    ///
    /// # Returns
    /// 代码存在时返回 true。
    pub fn remove(&self, code: &Code) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = state.owner.remove(code) else {
            return false;
        };

        if let Some(bucket) = state.buckets.get_mut(slot) {
            bucket.retain(|c| c != code);
        }
        while state.buckets.last().is_some_and(|b| b.is_empty()) {
            state.buckets.pop();
        }
        true
    }

    /// 清空全部代码，总是返回 true。
    pub fn clear(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buckets.clear();
        state.owner.clear();
        true
    }

    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .owner
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .owner
            .len()
    }

    /// # Summary
    /// 获取全部非空桶的一致性快照。
    ///
    /// # Logic
    /// 在锁内克隆非空桶，调用方此后对快照的遍历不受并发增删影响。
    ///
    /// # Returns
    /// 按桶顺序排列的代码列表。
    pub fn snapshot(&self) -> Vec<Vec<Code>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .buckets
            .iter()
            .filter(|b| !b.is_empty())
            .cloned()
            .collect()
    }
}
