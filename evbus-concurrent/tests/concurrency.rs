use async_trait::async_trait;
use evbus_concurrent::{EventBusManager, ThreadSafeEventBus};
use evbus_core::{
    AsyncEventHandler, DispatchOutcome, EventBase, EventBusConfig, EventBusError, EventHandler,
    HandlerRef,
};
use evbus_macros::event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[event]
struct Tick {
    n: usize,
}

fn tick(n: usize) -> Tick {
    Tick {
        base: EventBase::new(),
        n,
    }
}

struct Counter {
    calls: Arc<AtomicUsize>,
}

impl EventHandler<Tick> for Counter {
    fn handle(&self, _event: &mut Tick) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_subscribe_and_unsubscribe_stay_consistent() {
    let bus = ThreadSafeEventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for i in 0..16 {
        let bus = bus.clone();
        let calls = calls.clone();
        set.spawn(async move {
            let mut kept = 0usize;
            for j in 0..25 {
                let h: Arc<dyn EventHandler<Tick>> = Arc::new(Counter {
                    calls: calls.clone(),
                });
                let handler = HandlerRef::from(h);
                bus.subscribe_ref(handler.clone(), (i * j % 7) as i32).unwrap();
                if j % 3 == 0 {
                    assert!(bus.unsubscribe_handler(&handler).unwrap());
                } else {
                    kept += 1;
                }
                tokio::task::yield_now().await;
            }
            kept
        });
    }

    let mut expected = 0;
    while let Some(res) = set.join_next().await {
        expected += res.unwrap();
    }

    let final_count = bus.subscriber_count::<Tick>().unwrap();
    assert_eq!(final_count, expected);

    bus.publish(&mut tick(0)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), final_count);
    bus.dispose();
}

#[test]
fn publishing_from_many_threads_counts_every_event() {
    let bus = ThreadSafeEventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe::<Tick>(Arc::new(Counter { calls: calls.clone() }), 0)
        .unwrap();

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for n in 0..50 {
                    bus.publish(&mut tick(t * 100 + n)).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 400);
    let counters = bus.counters().unwrap();
    assert_eq!(counters.published, 400);
    assert_eq!(counters.processed, 400);
    bus.dispose();
}

struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl AsyncEventHandler<Tick> for InFlight {
    async fn handle(&self, _event: &mut Tick) -> anyhow::Result<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_publishes_are_bounded_by_the_semaphore() {
    let bus =
        ThreadSafeEventBus::with_config(EventBusConfig::builder().max_concurrent_async(2).build())
            .unwrap();
    let in_flight = Arc::new(InFlight {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    bus.subscribe_async::<Tick>(in_flight.clone(), 0).unwrap();

    let mut set = JoinSet::new();
    for n in 0..8 {
        let bus = bus.clone();
        set.spawn(async move { bus.publish_async(&mut tick(n)).await });
    }
    while let Some(res) = set.join_next().await {
        assert_eq!(res.unwrap().unwrap(), DispatchOutcome::Delivered);
    }

    assert!(in_flight.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(in_flight.peak.load(Ordering::SeqCst), 2);
    assert_eq!(bus.available_async_permits(), 2);
    bus.dispose();
}

struct Rejecting;

#[async_trait]
impl AsyncEventHandler<Tick> for Rejecting {
    async fn handle(&self, _event: &mut Tick) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        anyhow::bail!("rejected")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_async_handlers_release_their_permits() {
    let bus =
        ThreadSafeEventBus::with_config(EventBusConfig::builder().max_concurrent_async(3).build())
            .unwrap();
    bus.subscribe_async::<Tick>(Arc::new(Rejecting), 0).unwrap();

    let mut set = JoinSet::new();
    for n in 0..6 {
        let bus = bus.clone();
        set.spawn(async move { bus.publish_async(&mut tick(n)).await });
    }
    while let Some(res) = set.join_next().await {
        assert!(matches!(
            res.unwrap(),
            Err(EventBusError::DispatchFailed { .. })
        ));
    }

    assert_eq!(bus.available_async_permits(), 3);
    assert_eq!(bus.counters().unwrap().failed, 6);
    bus.dispose();
}

#[tokio::test(flavor = "multi_thread")]
async fn delayed_publish_through_the_wrapper() {
    let bus = ThreadSafeEventBus::new();
    let fired: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let f = fired.clone();
    bus.subscribe_fn::<Tick, _>(0, move |t| {
        f.lock().unwrap().push((t.n, Instant::now()));
        Ok(())
    })
    .unwrap();

    let started = Instant::now();
    bus.publish_delayed(tick(1), Duration::from_millis(100))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fired.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(250)).await;
    let fired = fired.lock().unwrap().clone();
    assert_eq!(fired.len(), 1);
    assert!(fired[0].1.duration_since(started) >= Duration::from_millis(100));
    assert_eq!(bus.event_history::<Tick>(5).unwrap().len(), 1);
    bus.dispose();
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_worker_feeds_main_thread_subscribers() {
    let bus = ThreadSafeEventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    bus.subscribe_on_main_thread::<Tick>(
        Arc::new(evbus_core::FnHandler::new(move |t: &mut Tick| {
            s.lock().unwrap().push(t.n);
            Ok(())
        })),
        0,
    )
    .unwrap();

    let worker = bus.start_queue_worker(Duration::from_millis(5)).unwrap();
    bus.enqueue(tick(2), Duration::from_millis(40), false).unwrap();
    bus.enqueue(tick(1), Duration::ZERO, true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(bus.process_main_thread_queue().unwrap(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

    worker.shutdown();
    worker.join().await;
    bus.dispose();
}

#[test]
fn manager_hands_out_shared_buses() {
    let manager = EventBusManager::new(EventBusConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    manager
        .get_or_create("gameplay")
        .unwrap()
        .subscribe::<Tick>(Arc::new(Counter { calls: calls.clone() }), 0)
        .unwrap();

    let bus = manager.get("gameplay").expect("bus registered");
    bus.publish(&mut tick(1)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(manager.dispose_all(), 1);
    assert!(bus.is_disposed());
}
