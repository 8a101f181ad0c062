//! 槽位池（Pool）
//!
//! 固定槽位数组 + 空闲下标列表：借出即分配下标，归还即回收下标。
//! 借出时调用 reset 回调，归还时调用 cleanup 回调；槽位本身永不释放，
//! 因此 `count_all` 只会在需要扩容或 `warm_up` 时增长。
//!
use serde::Serialize;

/// 槽位下标
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}

type SlotCallback<T> = Box<dyn Fn(&mut T) + Send + Sync>;

pub struct Pool<T> {
    slots: Vec<T>,
    in_use: Vec<bool>,
    free: Vec<usize>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    on_get: Option<SlotCallback<T>>,
    on_release: Option<SlotCallback<T>>,
}

/// 池统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatistics {
    pub count_all: usize,
    pub count_active: usize,
    pub count_inactive: usize,
}

impl<T> Pool<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            slots: Vec::new(),
            in_use: Vec::new(),
            free: Vec::new(),
            factory: Box::new(factory),
            on_get: None,
            on_release: None,
        }
    }

    /// 借出时的重置回调
    pub fn with_reset(mut self, f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_get = Some(Box::new(f));
        self
    }

    /// 归还时的清理回调
    pub fn with_cleanup(mut self, f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(f));
        self
    }

    /// 预先创建 `n` 个空闲槽位
    pub fn warm_up(&mut self, n: usize) {
        self.slots.reserve(n);
        for _ in 0..n {
            let index = self.slots.len();
            self.slots.push((self.factory)());
            self.in_use.push(false);
            self.free.push(index);
        }
    }

    pub fn get(&mut self) -> SlotId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push((self.factory)());
                self.in_use.push(false);
                self.slots.len() - 1
            }
        };
        self.in_use[index] = true;
        if let Some(reset) = &self.on_get {
            reset(&mut self.slots[index]);
        }
        SlotId(index)
    }

    /// 归还槽位；重复归还或越界返回 false
    pub fn release(&mut self, slot: SlotId) -> bool {
        match self.in_use.get(slot.0) {
            Some(true) => {}
            _ => return false,
        }
        if let Some(cleanup) = &self.on_release {
            cleanup(&mut self.slots[slot.0]);
        }
        self.in_use[slot.0] = false;
        self.free.push(slot.0);
        true
    }

    pub fn get_ref(&self, slot: SlotId) -> Option<&T> {
        if self.is_active(slot) {
            self.slots.get(slot.0)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut T> {
        if self.is_active(slot) {
            self.slots.get_mut(slot.0)
        } else {
            None
        }
    }

    pub fn is_active(&self, slot: SlotId) -> bool {
        self.in_use.get(slot.0).copied().unwrap_or(false)
    }

    /// 归还全部已借出槽位
    pub fn clear(&mut self) {
        for index in 0..self.slots.len() {
            if self.in_use[index] {
                self.release(SlotId(index));
            }
        }
    }

    pub fn count_all(&self) -> usize {
        self.slots.len()
    }

    pub fn count_active(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn count_inactive(&self) -> usize {
        self.free.len()
    }

    pub fn statistics(&self) -> PoolStatistics {
        PoolStatistics {
            count_all: self.count_all(),
            count_active: self.count_active(),
            count_inactive: self.count_inactive(),
        }
    }
}
