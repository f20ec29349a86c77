use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::Engine;
use crate::error::Error;
use crate::timer::TimerHandle;

type FireLog = Rc<RefCell<Vec<u32>>>;

fn logging_timer(engine: &mut Engine, log: &FireLog, tag: u32, initial_ms: u32) -> TimerHandle {
    let log = Rc::clone(log);
    engine.timer_init(initial_ms, None, move |_| log.borrow_mut().push(tag))
}

fn run_ticks(engine: &mut Engine, ticks: u32) {
    for _ in 0..ticks {
        engine.tick();
        engine.process();
    }
}

#[test]
fn fires_in_timeout_order_regardless_of_start_order() {
    let mut engine = Engine::new(10);
    let log: FireLog = Rc::new(RefCell::new(Vec::new()));

    let t30 = logging_timer(&mut engine, &log, 30, 30);
    let t10 = logging_timer(&mut engine, &log, 10, 10);
    let t20 = logging_timer(&mut engine, &log, 20, 20);
    engine.timer_start(t30).unwrap();
    engine.timer_start(t10).unwrap();
    engine.timer_start(t20).unwrap();

    run_ticks(&mut engine, 4);
    assert_eq!(*log.borrow(), vec![10, 20, 30]);
}

#[test]
fn simultaneous_expiries_keep_start_order() {
    let mut engine = Engine::new(10);
    let log: FireLog = Rc::new(RefCell::new(Vec::new()));

    for tag in [1, 2, 3] {
        let t = logging_timer(&mut engine, &log, tag, 20);
        engine.timer_start(t).unwrap();
    }

    run_ticks(&mut engine, 3);
    assert_eq!(*log.borrow(), vec![1, 2, 3]);
}

#[test]
fn guard_tick_delays_the_first_expiry() {
    // 10 ms at a 10 ms tick is one tick plus the guard tick: the timer must
    // not fire on the very next tick after it was armed.
    let mut engine = Engine::new(10);
    let log: FireLog = Rc::new(RefCell::new(Vec::new()));

    let t = logging_timer(&mut engine, &log, 1, 10);
    engine.timer_start(t).unwrap();

    run_ticks(&mut engine, 1);
    assert!(log.borrow().is_empty());
    run_ticks(&mut engine, 1);
    assert_eq!(*log.borrow(), vec![1]);
}

#[test]
fn maximum_initial_saturates_at_the_tick_ceiling() {
    let mut engine = Engine::new(1);
    let log: FireLog = Rc::new(RefCell::new(Vec::new()));

    let t = logging_timer(&mut engine, &log, 1, u32::MAX);
    engine.timer_start(t).unwrap();
    assert_eq!(engine.timer_remaining(t), Some(u32::MAX));
}

#[test]
fn intervals_round_up_to_whole_ticks() {
    let mut engine = Engine::new(10);
    let log: FireLog = Rc::new(RefCell::new(Vec::new()));

    // 11 ms rounds up to 2 ticks, plus the guard tick.
    let t = logging_timer(&mut engine, &log, 11, 11);
    engine.timer_start(t).unwrap();
    assert_eq!(engine.timer_remaining(t), Some(3));

    // 0 ms still waits at least one tick.
    let z = logging_timer(&mut engine, &log, 0, 0);
    engine.timer_start(z).unwrap();
    assert_eq!(engine.timer_remaining(z), Some(2));
}

#[test]
fn deltas_preserve_absolute_expiry_across_removals() {
    let mut engine = Engine::new(10);
    let noop = |_: &mut Engine| {};

    let a = engine.timer_init(10, None, noop);
    let b = engine.timer_init(20, None, noop);
    let c = engine.timer_init(40, None, noop);
    engine.timer_start(a).unwrap();
    engine.timer_start(b).unwrap();
    engine.timer_start(c).unwrap();
    assert_eq!(engine.timer_remaining(a), Some(2));
    assert_eq!(engine.timer_remaining(b), Some(3));
    assert_eq!(engine.timer_remaining(c), Some(5));

    // Removing the middle entry must not move its successor.
    engine.timer_stop(b);
    assert_eq!(engine.timer_remaining(a), Some(2));
    assert_eq!(engine.timer_remaining(c), Some(5));

    // Removing the head must not move anything behind it either.
    engine.timer_stop(a);
    assert_eq!(engine.timer_remaining(c), Some(5));

    engine.tick();
    assert_eq!(engine.timer_remaining(c), Some(4));
}

#[test]
fn periodic_timer_rearms_every_interval_without_guard() {
    let mut engine = Engine::new(10);
    let fired: FireLog = Rc::new(RefCell::new(Vec::new()));

    let probe = Rc::clone(&fired);
    let tick_no = Rc::new(RefCell::new(0u32));
    let tick_probe = Rc::clone(&tick_no);
    let t = engine.timer_init(20, Some(20), move |_| {
        probe.borrow_mut().push(*tick_probe.borrow());
    });
    engine.timer_start(t).unwrap();

    for _ in 0..11 {
        *tick_no.borrow_mut() += 1;
        engine.tick();
        engine.process();
    }

    // First expiry carries the guard tick; re-arms do not.
    assert_eq!(*fired.borrow(), vec![3, 5, 7, 9, 11]);
}

#[test]
fn repeat_change_applies_only_after_the_pending_expiry() {
    let mut engine = Engine::new(10);
    let fired: FireLog = Rc::new(RefCell::new(Vec::new()));

    let probe = Rc::clone(&fired);
    let tick_no = Rc::new(RefCell::new(0u32));
    let tick_probe = Rc::clone(&tick_no);
    let t = engine.timer_init(20, Some(20), move |_| {
        probe.borrow_mut().push(*tick_probe.borrow());
    });
    engine.timer_start(t).unwrap();

    for now in 1..=8 {
        *tick_no.borrow_mut() = now;
        engine.tick();
        engine.process();
        if now == 4 {
            // Fired at 3, already re-armed for 5; the pending expiry stays put.
            engine.timer_set_repeat(t, Some(30)).unwrap();
        }
    }

    assert_eq!(*fired.borrow(), vec![3, 5, 8]);
}

#[test]
fn stop_is_idempotent_and_survives_stale_handles() {
    let mut engine = Engine::new(10);
    let t = engine.timer_init(10, None, |_| {});
    engine.timer_start(t).unwrap();
    engine.timer_stop(t);
    engine.timer_stop(t);
    assert!(engine.timer_is_stopped(t));

    engine.timer_free(t);
    engine.timer_stop(t);
    assert!(engine.timer_is_stopped(t));
    assert!(matches!(engine.timer_start(t), Err(Error::StaleTimer)));
    assert_eq!(engine.timer_initial(t), None);
}

#[test]
fn reused_slot_invalidates_the_old_handle() {
    let mut engine = Engine::new(10);
    let old = engine.timer_init(10, None, |_| {});
    engine.timer_free(old);

    let fresh = engine.timer_init(50, None, |_| {});
    assert_ne!(old, fresh);
    assert!(matches!(engine.timer_start(old), Err(Error::StaleTimer)));
    assert_eq!(engine.timer_initial(fresh), Some(50));
}

#[test]
fn expiry_already_queued_still_dispatches_after_stop() {
    let mut engine = Engine::new(10);
    let seen: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
    let handle_cell: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));

    let probe = Rc::clone(&seen);
    let cell = Rc::clone(&handle_cell);
    let t = engine.timer_init(10, Some(10), move |e| {
        let h = cell.borrow().unwrap();
        probe.borrow_mut().push(e.timer_is_stopped(h));
    });
    *handle_cell.borrow_mut() = Some(t);
    engine.timer_start(t).unwrap();

    engine.tick();
    engine.tick();
    // The expiry is queued; stopping now must not lose it, and the callback
    // observes the timer already stopped.
    engine.timer_stop(t);
    engine.process();

    assert_eq!(*seen.borrow(), vec![true]);
}

#[test]
fn freeing_between_expiry_and_dispatch_drops_the_callback() {
    let mut engine = Engine::new(10);
    let log: FireLog = Rc::new(RefCell::new(Vec::new()));

    let t = logging_timer(&mut engine, &log, 1, 10);
    engine.timer_start(t).unwrap();
    engine.tick();
    engine.tick();
    engine.timer_free(t);
    engine.process();

    assert!(log.borrow().is_empty());
}

#[test]
fn callback_may_restart_its_own_one_shot() {
    let mut engine = Engine::new(10);
    let fired: FireLog = Rc::new(RefCell::new(Vec::new()));
    let handle_cell: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));

    let probe = Rc::clone(&fired);
    let cell = Rc::clone(&handle_cell);
    let t = engine.timer_init(10, None, move |e| {
        probe.borrow_mut().push(0);
        let h = cell.borrow().unwrap();
        e.timer_start(h).unwrap();
    });
    *handle_cell.borrow_mut() = Some(t);
    engine.timer_start(t).unwrap();

    run_ticks(&mut engine, 6);
    assert_eq!(fired.borrow().len(), 3);
}
