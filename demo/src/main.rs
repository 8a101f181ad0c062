use async_trait::async_trait;
use evbus_concurrent::EventBusManager;
use evbus_core::{
    AsyncEventHandler, Event, EventBase, EventBusConfig, EventInterceptor, FnHandler, HandlerInfo,
};
use evbus_macros::event;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

#[event(event_type = "order.placed")]
struct OrderPlaced {
    order_id: u64,
    amount: i64,
}

#[event(event_type = "order.shipped")]
struct OrderShipped {
    order_id: u64,
}

fn placed(order_id: u64, amount: i64) -> OrderPlaced {
    OrderPlaced {
        base: EventBase::new(),
        order_id,
        amount,
    }
}

/// 记录每个处理器的调用并吞掉风控处理器的错误
struct Audit;

impl EventInterceptor<OrderPlaced> for Audit {
    fn on_before_handle(&self, event: &OrderPlaced, handler: &HandlerInfo<'_>) -> bool {
        info!(order_id = event.order_id, handler = handler.name, "before");
        true
    }

    fn on_exception(
        &self,
        event: &OrderPlaced,
        handler: &HandlerInfo<'_>,
        error: &anyhow::Error,
    ) -> bool {
        info!(order_id = event.order_id, handler = handler.name, %error, "recovered");
        handler.name == "risk"
    }
}

struct Ledger {
    total: AtomicU64,
}

#[async_trait]
impl AsyncEventHandler<OrderPlaced> for Ledger {
    fn handler_name(&self) -> &str {
        "ledger"
    }

    async fn handle(&self, event: &mut OrderPlaced) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.total
            .fetch_add(event.amount.unsigned_abs(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,evbus_core=debug".into()),
        )
        .init();

    let manager = EventBusManager::new(
        EventBusConfig::builder()
            .max_history_size(16)
            .max_concurrent_async(4)
            .build(),
    )?;
    let bus = manager.get_or_create("orders")?;

    let ledger = Arc::new(Ledger {
        total: AtomicU64::new(0),
    });
    bus.add_interceptor::<OrderPlaced>(Arc::new(Audit))?;
    bus.add_filter::<OrderPlaced>(Arc::new(|e: &OrderPlaced| e.amount != 0))?;
    bus.subscribe::<OrderPlaced>(
        Arc::new(FnHandler::named("risk", |e: &mut OrderPlaced| {
            anyhow::ensure!(e.amount < 10_000, "order {} needs manual review", e.order_id);
            Ok(())
        })),
        -10,
    )?;
    bus.subscribe_fn::<OrderPlaced, _>(0, |e| {
        if e.amount < 0 {
            info!(order_id = e.order_id, "refund, stop processing");
            e.cancel();
        }
        Ok(())
    })?;
    bus.subscribe_async::<OrderPlaced>(ledger.clone(), 10)?;
    bus.subscribe_on_main_thread::<OrderShipped>(
        Arc::new(FnHandler::named("notify", |e: &mut OrderShipped| {
            info!(order_id = e.order_id, "customer notified");
            Ok(())
        })),
        0,
    )?;

    for (order_id, amount) in [(1, 120), (2, 0), (3, -40), (4, 25_000)] {
        let outcome = bus.publish_async(&mut placed(order_id, amount)).await?;
        info!(order_id, ?outcome, "published");
    }

    bus.publish_delayed(
        OrderShipped {
            base: EventBase::new(),
            order_id: 1,
        },
        Duration::from_millis(50),
    )?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let ran = bus.process_main_thread_queue()?;
    info!(ran, "main-thread actions executed");

    info!(total = ledger.total.load(Ordering::SeqCst), "ledger");
    let recent: Vec<u64> = bus
        .event_history::<OrderPlaced>(10)?
        .iter()
        .map(|e| e.order_id)
        .collect();
    info!(?recent, "history");
    println!("{}", bus.statistics()?);

    manager.dispose_all();
    Ok(())
}
