use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use evq::{Channel, ChannelEvents, Engine, Runtime};
use evq_posix::ThreadedRuntime;

const MAX_STEPS: usize = 500;

fn step_until(
    runtime: &mut ThreadedRuntime,
    engine: &mut Engine,
    mut done: impl FnMut() -> bool,
) {
    for _ in 0..MAX_STEPS {
        if done() {
            return;
        }
        runtime.step(engine).expect("runtime step failed");
    }
    panic!("condition not reached within {MAX_STEPS} steps");
}

#[test]
fn remote_call_runs_on_the_logic_thread() {
    let mut runtime = ThreadedRuntime::new(5).expect("runtime");
    let mut engine = Engine::new(5);

    let ran = Arc::new(AtomicBool::new(false));
    let remote = runtime.remote();
    let flag = Arc::clone(&ran);
    let sender = thread::spawn(move || {
        remote
            .call(Box::new(move |_| flag.store(true, Ordering::SeqCst)))
            .expect("remote call");
    });

    step_until(&mut runtime, &mut engine, || ran.load(Ordering::SeqCst));
    sender.join().expect("sender thread");
}

#[test]
fn ticks_drive_engine_timers() {
    let mut runtime = ThreadedRuntime::new(5).expect("runtime");
    let mut engine = Engine::new(5);

    let fired = Rc::new(RefCell::new(false));
    let probe = Rc::clone(&fired);
    let t = engine.timer_init(10, None, move |_| *probe.borrow_mut() = true);
    engine.timer_start(t).expect("start timer");

    step_until(&mut runtime, &mut engine, || *fired.borrow());
}

#[test]
fn worker_completion_marshals_back_to_the_loop() {
    let mut runtime = ThreadedRuntime::new(5).expect("runtime");
    let mut engine = Engine::new(5);

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    runtime
        .spawn_worker(Box::new(move || {
            // Off-loop work happens here; the returned closure runs on the
            // logic thread.
            let result = 6 * 7;
            Box::new(move |_: &mut Engine| {
                assert_eq!(result, 42);
                flag.store(true, Ordering::SeqCst);
            })
        }))
        .expect("spawn worker");

    step_until(&mut runtime, &mut engine, || done.load(Ordering::SeqCst));
}

#[test]
fn tcp_channel_round_trips_through_an_echo_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let echo = thread::spawn(move || {
        let (mut sock, _) = listener.accept().expect("accept");
        let mut buf = [0u8; 64];
        let n = sock.read(&mut buf).expect("read");
        sock.write_all(&buf[..n]).expect("write");
        // Closing here exercises the on_closed path.
    });

    let mut runtime = ThreadedRuntime::new(5).expect("runtime");
    let mut engine = Engine::new(5);

    let channel = Rc::new(RefCell::new(
        runtime.open_tcp("127.0.0.1", port).expect("open_tcp"),
    ));
    let opened = Rc::new(RefCell::new(false));
    let closed = Rc::new(RefCell::new(false));
    let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));

    let opened_probe = Rc::clone(&opened);
    let closed_probe = Rc::clone(&closed);
    let received_probe = Rc::clone(&received);
    let reader = Rc::clone(&channel);
    let events = ChannelEvents {
        on_opened: Box::new(move |_, result| {
            result.expect("connect should succeed");
            *opened_probe.borrow_mut() = true;
        }),
        on_closed: Box::new(move |_| *closed_probe.borrow_mut() = true),
        on_input: Box::new(move |_| {
            let mut buf = [0u8; 64];
            loop {
                let n = reader.borrow_mut().read(&mut buf);
                if n == 0 {
                    break;
                }
                received_probe.borrow_mut().extend_from_slice(&buf[..n]);
            }
        }),
    };
    channel.borrow_mut().open(events).expect("open");

    step_until(&mut runtime, &mut engine, || *opened.borrow());
    assert!(channel.borrow().is_open());

    let written = channel.borrow_mut().write(b"hello");
    assert_eq!(written, 5);

    step_until(&mut runtime, &mut engine, || received.borrow().len() >= 5);
    assert_eq!(&*received.borrow(), b"hello");

    step_until(&mut runtime, &mut engine, || *closed.borrow());
    assert!(!channel.borrow().is_open());
    echo.join().expect("echo thread");
}

#[test]
fn connect_failure_reports_through_on_opened() {
    // Bind then drop to learn a port with nothing listening on it.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    let mut runtime = ThreadedRuntime::new(5).expect("runtime");
    let mut engine = Engine::new(5);

    let mut channel = runtime.open_tcp("127.0.0.1", port).expect("open_tcp");
    let failed = Rc::new(RefCell::new(false));
    let probe = Rc::clone(&failed);
    channel
        .open(ChannelEvents {
            on_opened: Box::new(move |_, result| {
                assert!(result.is_err());
                *probe.borrow_mut() = true;
            }),
            ..Default::default()
        })
        .expect("open");

    step_until(&mut runtime, &mut engine, || *failed.borrow());
    assert!(!channel.is_open());
}
