//! 事件过滤器（EventFilter）
//!
//! 按事件类型注册，发布时全部过滤器都通过（AND 语义）才会进入处理器阶段。
//!
use crate::event::Event;

pub trait EventFilter<E: Event>: Send + Sync {
    fn should_handle(&self, event: &E) -> bool;
}

impl<E, F> EventFilter<E> for F
where
    E: Event,
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_handle(&self, event: &E) -> bool {
        self(event)
    }
}
