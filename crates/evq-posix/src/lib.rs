//! # evq-posix
//!
//! Threaded POSIX runtime for the `evq` engine. The loop is split in two:
//!
//! - the **I/O thread** owns every socket, sleeps in a mio poll and turns
//!   socket readiness plus a drift-free monotonic ticker into events;
//! - the **logic thread** blocks on the event channel, feeds each event into
//!   the engine and drains the deferred-call queue after every one.
//!
//! The threads share nothing mutable. All coupling is two bounded channels
//! of plain values, so neither side ever takes a lock to make progress.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mio::{Poll, Waker};

use evq::{Channel, Engine, Error, Remote, RemoteFn, Runtime, WorkerJob};

mod io_thread;
mod message;
mod tcp;

use io_thread::{IoThread, WAKER_TOKEN};
use message::{Command, ConnId, LoopEvent};
use tcp::{ChanState, IoHandle, SharedState, TcpChannel};

const EVENT_QUEUE_DEPTH: usize = 256;
const COMMAND_QUEUE_DEPTH: usize = 256;

type Registry = Rc<RefCell<HashMap<ConnId, SharedState>>>;

/// The two-thread runtime. Construct it, then hand it to
/// [`Engine::run_forever`] on the thread that should become the logic
/// thread; that call only returns when the runtime shuts down.
pub struct ThreadedRuntime {
    events_rx: Receiver<LoopEvent>,
    events_tx: SyncSender<LoopEvent>,
    io: IoHandle,
    registry: Registry,
    next_conn: Cell<u64>,
    io_join: Option<JoinHandle<()>>,
}

impl ThreadedRuntime {
    pub fn new(tick_ms: u32) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (events_tx, events_rx) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
        let (cmds_tx, cmds_rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);

        let mut io_thread = IoThread::new(poll, cmds_rx, events_tx.clone(), tick_ms);
        let io_join = thread::Builder::new()
            .name("evq-io".into())
            .spawn(move || io_thread.run())?;

        Ok(Self {
            events_rx,
            events_tx,
            io: IoHandle::new(cmds_tx, waker),
            registry: Rc::new(RefCell::new(HashMap::new())),
            next_conn: Cell::new(0),
            io_join: Some(io_join),
        })
    }

    /// Blocks for one event, dispatches it and drains the engine queue.
    /// `run_forever` is this in a loop; tests call it directly to drive the
    /// runtime a bounded number of steps.
    pub fn step(&mut self, engine: &mut Engine) -> Result<(), Error> {
        let event = self.events_rx.recv().map_err(|_| Error::Shutdown)?;
        self.dispatch(engine, event);
        engine.process();
        Ok(())
    }

    fn dispatch(&self, engine: &mut Engine, event: LoopEvent) {
        match event {
            LoopEvent::Tick => engine.tick(),
            LoopEvent::Call(f) => f(engine),
            LoopEvent::Connected { conn, result } => {
                let Some(state) = self.lookup(conn) else {
                    return;
                };
                state.borrow_mut().open = result.is_ok();
                defer(engine, move |e| {
                    with_events(&state, |ev, e| (ev.on_opened)(e, result), e);
                });
            }
            LoopEvent::Data { conn, bytes } => {
                let Some(state) = self.lookup(conn) else {
                    return;
                };
                state.borrow_mut().buf.extend(bytes);
                let io = self.io.clone();
                defer(engine, move |e| {
                    with_events(&state, |ev, e| (ev.on_input)(e), e);
                    // Re-arm only after the owner had its chance to drain.
                    if io.send(Command::RearmRead { conn }).is_err() {
                        log::debug!("rearm after shutdown on {conn:?}");
                    }
                });
            }
            LoopEvent::Closed { conn } => {
                let Some(state) = self.lookup(conn) else {
                    return;
                };
                state.borrow_mut().open = false;
                defer(engine, move |e| {
                    with_events(&state, |ev, e| (ev.on_closed)(e), e);
                });
            }
        }
    }

    fn lookup(&self, conn: ConnId) -> Option<SharedState> {
        let found = self.registry.borrow().get(&conn).cloned();
        if found.is_none() {
            log::debug!("event for unknown connection {conn:?}");
        }
        found
    }
}

/// Marshals a channel notification through the deferred-call queue so the
/// owner never observes it reentrantly.
fn defer(engine: &mut Engine, f: impl FnOnce(&mut Engine) + 'static) {
    if engine.call(f).is_err() {
        log::error!("deferred-call queue full, dropping channel notification");
    }
}

/// Takes the event callbacks out of the shared state for the duration of
/// the call, so the callback may freely use its channel handle.
fn with_events(
    state: &SharedState,
    f: impl FnOnce(&mut evq::ChannelEvents, &mut Engine),
    engine: &mut Engine,
) {
    let taken = state.borrow_mut().events.take();
    if let Some(mut ev) = taken {
        f(&mut ev, engine);
        let mut s = state.borrow_mut();
        if s.events.is_none() {
            s.events = Some(ev);
        }
    }
}

impl Runtime for ThreadedRuntime {
    fn run_forever(&mut self, engine: &mut Engine) -> Result<(), Error> {
        loop {
            self.step(engine)?;
        }
    }

    fn remote(&self) -> Box<dyn Remote> {
        Box::new(RemoteHandle {
            tx: self.events_tx.clone(),
        })
    }

    fn spawn_worker(&self, job: WorkerJob) -> Result<(), Error> {
        let tx = self.events_tx.clone();
        thread::Builder::new()
            .name("evq-worker".into())
            .spawn(move || {
                let done = job();
                if tx.send(LoopEvent::Call(done)).is_err() {
                    log::debug!("worker finished after runtime shutdown");
                }
            })
            .map_err(|err| Error::Transport(err.to_string()))?;
        Ok(())
    }

    fn open_tcp(&self, host: &str, port: u16) -> Result<Box<dyn Channel>, Error> {
        let conn = ConnId(self.next_conn.get());
        self.next_conn.set(conn.0 + 1);
        let state: SharedState = Rc::new(RefCell::new(ChanState::new()));
        self.registry.borrow_mut().insert(conn, Rc::clone(&state));
        Ok(Box::new(TcpChannel::new(
            conn,
            host.to_owned(),
            port,
            state,
            self.io.clone(),
        )))
    }
}

struct RemoteHandle {
    tx: SyncSender<LoopEvent>,
}

impl Remote for RemoteHandle {
    fn call(&self, f: RemoteFn) -> Result<(), Error> {
        self.tx.send(LoopEvent::Call(f)).map_err(|_| Error::Shutdown)
    }
}

impl Drop for ThreadedRuntime {
    fn drop(&mut self) {
        // Release the receiver first: an I/O thread blocked shipping an
        // event gets an immediate send error and can reach the shutdown
        // command instead of deadlocking the join below.
        let (_tx, rx) = mpsc::sync_channel(1);
        drop(std::mem::replace(&mut self.events_rx, rx));
        if self.io.send(Command::Shutdown).is_err() {
            log::debug!("i/o thread already gone at shutdown");
        }
        if let Some(join) = self.io_join.take() {
            if join.join().is_err() {
                log::error!("i/o thread panicked");
            }
        }
    }
}
