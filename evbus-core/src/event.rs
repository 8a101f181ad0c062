//! 事件模型（Event）
//!
//! 每个事件携带一份 `EventBase`（事件 ID、创建时间、已处理/已取消标记、优先级与可选载荷），
//! 并通过 `Event::TYPE` 声明稳定的事件类型标签，注册表与历史记录均以该标签为键。
//!
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 排序键：数值越小越先执行
pub type Priority = i32;

/// 事件基础字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBase {
    event_id: Uuid,
    timestamp: DateTime<Utc>,
    handled: bool,
    cancelled: bool,
    priority: Priority,
    data: Option<serde_json::Value>,
}

impl Default for EventBase {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBase {
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            handled: false,
            cancelled: false,
            priority: 0,
            data: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn set_handled(&mut self, handled: bool) {
        self.handled = handled;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    pub fn set_data(&mut self, data: Option<serde_json::Value>) {
        self.data = data;
    }
}

/// 可发布的事件
///
/// 通常通过 `#[event]` 宏实现；手写实现时只需给出 `TYPE` 与 `base/base_mut`。
pub trait Event: Clone + Send + Sync + 'static {
    /// 事件类型标签，同一总线内必须唯一
    const TYPE: &'static str;

    fn base(&self) -> &EventBase;

    fn base_mut(&mut self) -> &mut EventBase;

    fn event_id(&self) -> Uuid {
        self.base().event_id()
    }

    fn timestamp(&self) -> &DateTime<Utc> {
        self.base().timestamp()
    }

    fn priority(&self) -> Priority {
        self.base().priority()
    }

    fn is_cancelled(&self) -> bool {
        self.base().is_cancelled()
    }

    /// 取消本次发布中剩余的处理器
    fn cancel(&mut self) {
        self.base_mut().set_cancelled(true);
    }

    fn is_handled(&self) -> bool {
        self.base().is_handled()
    }

    fn mark_handled(&mut self) {
        self.base_mut().set_handled(true);
    }

    fn data(&self) -> Option<&serde_json::Value> {
        self.base().data()
    }
}
