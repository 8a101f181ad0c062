use evbus_core::{Event, EventBase};
use evbus_macros::event;

#[event]
struct OrderPlaced {
    order_id: u64,
    amount: u32,
}

fn main() {
    let mut e = OrderPlaced {
        base: EventBase::new().with_priority(3),
        order_id: 7,
        amount: 120,
    };
    assert_eq!(OrderPlaced::TYPE, "OrderPlaced");
    assert_eq!(e.priority(), 3);
    e.cancel();

    let copy = e.clone();
    assert!(copy.is_cancelled());
    assert_eq!(copy.event_id(), e.event_id());
    assert_eq!(copy.order_id + u64::from(copy.amount), 127);
    let _ = format!("{copy:?}");
}
