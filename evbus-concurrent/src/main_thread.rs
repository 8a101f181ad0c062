//! 主线程动作队列
//!
//! 处理器在任意线程被调用时，只把“克隆的事件 + 原处理器”打包成动作投递到无界通道；
//! 宿主在自己的主循环里调用 `run_pending` 依次执行。
//!
use evbus_core::{Event, EventHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type MainThreadAction = Box<dyn FnOnce() + Send>;

pub struct MainThreadQueue {
    tx: mpsc::UnboundedSender<MainThreadAction>,
    rx: Mutex<mpsc::UnboundedReceiver<MainThreadAction>>,
    pending: Arc<AtomicUsize>,
}

impl Default for MainThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 包装处理器：被调用时把事件转交主线程
    pub fn relay<E: Event>(&self, handler: Arc<dyn EventHandler<E>>) -> MainThreadRelay<E> {
        MainThreadRelay {
            handler,
            tx: self.tx.clone(),
            pending: self.pending.clone(),
        }
    }

    fn take_all(&self) -> Vec<MainThreadAction> {
        // 接收端只在这里被访问，不会在持锁时执行动作
        let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        let mut actions = Vec::new();
        while let Ok(action) = rx.try_recv() {
            actions.push(action);
        }
        self.pending.fetch_sub(actions.len(), Ordering::SeqCst);
        actions
    }

    /// 执行当前已投递的全部动作，返回执行数；执行期间新投递的动作留到下一轮
    pub fn run_pending(&self) -> usize {
        let actions = self.take_all();
        let count = actions.len();
        for action in actions {
            action();
        }
        count
    }

    /// 关闭队列并丢弃全部未执行的动作；之后转交的事件返回错误
    pub fn close(&self) -> usize {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).close();
        self.take_all().len()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// 转交主线程执行的处理器
pub struct MainThreadRelay<E: Event> {
    handler: Arc<dyn EventHandler<E>>,
    tx: mpsc::UnboundedSender<MainThreadAction>,
    pending: Arc<AtomicUsize>,
}

impl<E: Event> EventHandler<E> for MainThreadRelay<E> {
    fn handler_name(&self) -> &str {
        self.handler.handler_name()
    }

    fn is_active(&self) -> bool {
        self.handler.is_active()
    }

    fn handle(&self, event: &mut E) -> anyhow::Result<()> {
        let handler = self.handler.clone();
        let mut event = event.clone();
        let action: MainThreadAction = Box::new(move || {
            if let Err(error) = handler.handle(&mut event) {
                tracing::warn!(
                    event_type = E::TYPE,
                    handler = handler.handler_name(),
                    error = %error,
                    "main-thread handler failed"
                );
            }
        });
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(action).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("main-thread queue is closed");
        }
        Ok(())
    }
}
