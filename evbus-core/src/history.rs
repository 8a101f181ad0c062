//! 事件历史（按事件类型的环形缓冲）
//!
use crate::event::Event;
use std::any::{Any, type_name};
use std::collections::{HashMap, VecDeque};

struct Ring<E> {
    entries: VecDeque<E>,
}

pub struct HistoryStore {
    capacity: usize,
    rings: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rings: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一条记录，超出容量时淘汰最旧的
    pub fn record<E: Event>(&mut self, event: &E) {
        let capacity = self.capacity;
        if capacity == 0 {
            return;
        }
        let slot = self.rings.entry(E::TYPE).or_insert_with(|| {
            Box::new(Ring::<E> {
                entries: VecDeque::with_capacity(capacity),
            })
        });
        let Some(ring) = slot.downcast_mut::<Ring<E>>() else {
            tracing::warn!(
                event_type = E::TYPE,
                rust_type = type_name::<E>(),
                "history ring holds a different type under this tag, entry dropped"
            );
            return;
        };
        while ring.entries.len() >= capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(event.clone());
    }

    /// 最近的 `count` 条记录，按时间从旧到新
    pub fn recent<E: Event>(&self, count: usize) -> Vec<E> {
        let Some(ring) = self
            .rings
            .get(E::TYPE)
            .and_then(|r| r.downcast_ref::<Ring<E>>())
        else {
            return Vec::new();
        };
        let skip = ring.entries.len().saturating_sub(count);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len_of<E: Event>(&self) -> usize {
        self.rings
            .get(E::TYPE)
            .and_then(|r| r.downcast_ref::<Ring<E>>())
            .map(|r| r.entries.len())
            .unwrap_or(0)
    }

    pub fn event_types(&self) -> usize {
        self.rings.len()
    }

    pub fn clear(&mut self) {
        self.rings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBase;

    #[derive(Debug, Clone)]
    struct Num {
        base: EventBase,
        n: usize,
    }

    impl Event for Num {
        const TYPE: &'static str = "Num";

        fn base(&self) -> &EventBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut EventBase {
            &mut self.base
        }
    }

    fn num(n: usize) -> Num {
        Num {
            base: EventBase::new(),
            n,
        }
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let mut history = HistoryStore::new(3);
        for n in 0..10 {
            history.record(&num(n));
        }
        assert_eq!(history.len_of::<Num>(), 3);
        let ns: Vec<_> = history.recent::<Num>(10).into_iter().map(|e| e.n).collect();
        assert_eq!(ns, vec![7, 8, 9]);
    }

    #[test]
    fn recent_returns_latest_oldest_first() {
        let mut history = HistoryStore::new(10);
        for n in 0..6 {
            history.record(&num(n));
        }
        let ns: Vec<_> = history.recent::<Num>(2).into_iter().map(|e| e.n).collect();
        assert_eq!(ns, vec![4, 5]);
        assert!(history.recent::<Num>(0).is_empty());
    }

    #[test]
    fn clear_drops_all_types() {
        let mut history = HistoryStore::new(2);
        history.record(&num(1));
        history.clear();
        assert_eq!(history.event_types(), 0);
        assert!(history.recent::<Num>(5).is_empty());
    }
}
