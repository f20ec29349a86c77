use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{Engine, DEFER_QUEUE_CAPACITY};
use crate::error::Error;

#[test]
fn calls_dispatch_in_submission_order() {
    let mut engine = Engine::new(10);
    let log: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

    for i in 0..5 {
        let log = Rc::clone(&log);
        engine.call(move |_| log.borrow_mut().push(i)).unwrap();
    }
    engine.process();

    assert_eq!(*log.borrow(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn full_queue_rejects_then_drains_exactly_capacity() {
    let mut engine = Engine::new(10);
    let log: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

    for i in 0..DEFER_QUEUE_CAPACITY {
        let log = Rc::clone(&log);
        engine.call(move |_| log.borrow_mut().push(i)).unwrap();
    }
    let overflow = engine.call(|_| panic!("must never run"));
    assert!(matches!(overflow, Err(Error::QueueFull)));

    engine.process();
    let log = log.borrow();
    assert_eq!(log.len(), DEFER_QUEUE_CAPACITY);
    assert!(log.iter().copied().eq(0..DEFER_QUEUE_CAPACITY));
}

#[test]
fn drain_reaches_a_fixed_point() {
    let mut engine = Engine::new(10);
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let inner = Rc::clone(&log);
    engine
        .call(move |e| {
            inner.borrow_mut().push("outer");
            let inner2 = Rc::clone(&inner);
            e.call(move |_| inner2.borrow_mut().push("nested")).unwrap();
        })
        .unwrap();
    engine.process();

    assert_eq!(*log.borrow(), vec!["outer", "nested"]);
}
