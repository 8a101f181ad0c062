use evbus_core::{Event, EventBase};
use evbus_macros::event;
use std::fmt;

// debug = false：自行实现 Debug
#[event(event_type = "user.signed_up", debug = false)]
#[derive(PartialEq)]
struct SignedUp {
    name: String,
}

impl fmt::Debug for SignedUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignedUp({})", self.name)
    }
}

fn main() {
    let e = SignedUp {
        base: EventBase::default(),
        name: "ann".into(),
    };
    assert_eq!(SignedUp::TYPE, "user.signed_up");
    assert_eq!(format!("{e:?}"), "SignedUp(ann)");
    assert!(e == e.clone());
}
