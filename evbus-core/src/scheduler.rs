//! 队列调度
//!
//! - `schedule_drain`：延迟发布使用的一次性定时器，到期后在后台任务中分发到期项；
//! - `spawn_queue_worker`：周期性分发到期项的长驻任务，返回可关闭/等待的句柄；
//! - `drain_due`：在当前任务中依次分发全部到期项。
//!
//! 后台失败只记录日志与计数，不会抛给发布方。
//!
use crate::dispatch::{DispatchOutcome, DispatchState};
use crate::error::{EventBusError, EventBusResult as Result};
use crate::queue::{EventQueue, PreparedDispatch, QueueItem};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 可从队列取出到期项并完成分发的一方
pub trait QueueDispatch: Send + Sync + 'static {
    fn queue(&self) -> &EventQueue;

    /// 取消后定时器与工作任务全部退出
    fn shutdown_token(&self) -> CancellationToken;

    /// 基于当前注册状态解析队列项；无负载的项返回 None
    fn prepare(&self, item: QueueItem) -> Result<Option<PreparedDispatch>>;

    fn dispatch_state(&self) -> &DispatchState;
}

/// 一轮队列分发的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueDrainReport {
    pub dispatched: usize,
    pub delivered: usize,
    pub filtered: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl QueueDrainReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Delivered => self.delivered += 1,
            DispatchOutcome::Filtered => self.filtered += 1,
            DispatchOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

pub async fn drain_due<D: QueueDispatch + ?Sized>(dispatcher: &D) -> QueueDrainReport {
    let mut report = QueueDrainReport::default();
    while let Some(item) = dispatcher.queue().dequeue() {
        let event_type = item.event_type();
        let prepared = match dispatcher.prepare(item) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => continue,
            Err(err) => {
                // 未进入分发流程，计数器需要在这里补记
                dispatcher.dispatch_state().note_failure();
                report.failed += 1;
                tracing::warn!(event_type, error = %err, "queued event could not be dispatched");
                continue;
            }
        };

        report.dispatched += 1;
        match prepared.await {
            Ok(outcome) => report.record(outcome),
            Err(err) => {
                // 处理器失败已在分发流程中计数
                if !matches!(err, EventBusError::DispatchFailed { .. }) {
                    dispatcher.dispatch_state().note_failure();
                }
                report.failed += 1;
                tracing::warn!(event_type, error = %err, "queued event dispatch failed");
            }
        }
    }
    report
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| EventBusError::NoRuntime {
        reason: e.to_string(),
    })
}

/// 在 `due` 时刻分发到期项；需要处于 tokio 运行时中
pub fn schedule_drain<D: QueueDispatch>(dispatcher: Arc<D>, due: Instant) -> Result<()> {
    let runtime = current_runtime()?;
    let token = dispatcher.shutdown_token();
    runtime.spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = time::sleep_until(time::Instant::from_std(due)) => {
                let report = drain_due(dispatcher.as_ref()).await;
                tracing::trace!(?report, "delayed drain finished");
            }
        }
    });
    Ok(())
}

/// 周期性分发到期项
pub fn spawn_queue_worker<D: QueueDispatch>(
    dispatcher: Arc<D>,
    interval: Duration,
) -> Result<QueueWorkerHandle> {
    if interval.is_zero() {
        return Err(EventBusError::invalid_argument(
            "queue worker interval must be positive",
        ));
    }
    let runtime = current_runtime()?;
    let token = dispatcher.shutdown_token().child_token();

    let task = runtime.spawn({
        let token = token.clone();
        async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = drain_due(dispatcher.as_ref()).await;
                        if report.dispatched > 0 || report.failed > 0 {
                            tracing::trace!(?report, "queue worker drained");
                        }
                    }
                }
            }
        }
    });

    Ok(QueueWorkerHandle {
        token,
        tasks: vec![task],
    })
}

/// 队列工作任务句柄：用于关闭与等待任务结束
pub struct QueueWorkerHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl QueueWorkerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for QueueWorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
