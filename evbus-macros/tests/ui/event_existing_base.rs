use evbus_core::{Event, EventBase};
use evbus_macros::event;

// 已声明的 base 字段保持原位，不会重复追加
#[event]
#[derive(Clone)]
struct Tick {
    seq: u32,
    base: EventBase,
}

fn main() {
    let mut t = Tick {
        seq: 1,
        base: EventBase::new(),
    };
    t.mark_handled();
    assert!(t.clone().is_handled());
    assert_eq!(Tick::TYPE, "Tick");
    assert_eq!(t.seq, 1);
}
