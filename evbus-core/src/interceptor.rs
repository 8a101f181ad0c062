//! 事件拦截器（EventInterceptor）
//!
//! 围绕每一个处理器调用提供 before / after / exception 三个钩子，
//! 按 `priority()` 升序执行，优先级相同则按添加顺序。
//!
use crate::event::{Event, Priority};
use crate::handler::HandlerInfo;

pub trait EventInterceptor<E: Event>: Send + Sync {
    fn priority(&self) -> Priority {
        0
    }

    /// 返回 false 时仅跳过当前处理器
    fn on_before_handle(&self, _event: &E, _handler: &HandlerInfo<'_>) -> bool {
        true
    }

    fn on_after_handle(&self, _event: &E, _handler: &HandlerInfo<'_>) {}

    /// 返回 true 表示异常已被处理，后续处理器继续执行
    fn on_exception(&self, _event: &E, _handler: &HandlerInfo<'_>, _error: &anyhow::Error) -> bool {
        false
    }
}
