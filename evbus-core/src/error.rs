//! 事件总线统一错误定义
//!
//! 覆盖参数校验、分发失败、事件类型标签冲突、生命周期（dispose 之后）与配置解析，
//! 处理器自身的错误统一使用 `anyhow::Error`，在分发层被包装为 `DispatchFailed`。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventBusError {
    // --- 参数校验 ---
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
    #[error("config error: {source}")]
    Config {
        #[from]
        source: serde_json::Error,
    },

    // --- 分发 ---
    #[error("dispatch failed: event_type={event_type}, handler={handler}, reason={source}")]
    DispatchFailed {
        event_type: &'static str,
        handler: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("type mismatch: event_type={event_type}, expected={expected}, found={found}")]
    TypeMismatch {
        event_type: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    // --- 运行时与生命周期 ---
    #[error("event bus disposed")]
    Disposed,
    #[error("no async runtime: {reason}")]
    NoRuntime { reason: String },
    #[error("lock poisoned: {reason}")]
    LockPoisoned { reason: String },
    #[error("event bus already exists: name={name}")]
    BusAlreadyExists { name: String },
}

/// 统一 Result 类型别名
pub type EventBusResult<T> = Result<T, EventBusError>;

impl EventBusError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        EventBusError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn lock_poisoned(reason: impl Into<String>) -> Self {
        EventBusError::LockPoisoned {
            reason: reason.into(),
        }
    }

    /// 分发失败时保留的原始处理器错误
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            EventBusError::DispatchFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for EventBusError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        EventBusError::lock_poisoned(err.to_string())
    }
}
