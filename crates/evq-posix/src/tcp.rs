//! TCP channel handle for the logic thread.
//!
//! The channel never touches a socket. Writes become commands to the I/O
//! thread; reads drain bytes the runtime already copied into the per
//! connection buffer while dispatching `Data` events.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;

use mio::Waker;

use evq::{Channel, ChannelEvents, Error};

use crate::message::{Command, ConnId};

/// Command path into the I/O thread: bounded queue plus poll wakeup.
#[derive(Clone)]
pub(crate) struct IoHandle {
    cmds: SyncSender<Command>,
    waker: Arc<Waker>,
}

impl IoHandle {
    pub(crate) fn new(cmds: SyncSender<Command>, waker: Arc<Waker>) -> Self {
        Self { cmds, waker }
    }

    /// Blocking send for commands that must not be lost.
    pub(crate) fn send(&self, cmd: Command) -> Result<(), Error> {
        self.cmds.send(cmd).map_err(|_| Error::Shutdown)?;
        self.wake();
        Ok(())
    }

    /// Non-blocking send for the write path, where a full queue maps onto
    /// the channel's would-block contract.
    pub(crate) fn try_send(&self, cmd: Command) -> Result<(), Error> {
        match self.cmds.try_send(cmd) {
            Ok(()) => {
                self.wake();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::Backpressure),
            Err(TrySendError::Disconnected(_)) => Err(Error::Shutdown),
        }
    }

    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            log::debug!("i/o waker failed: {err}");
        }
    }
}

/// Per-connection state shared between the channel handle and the runtime's
/// event dispatch. Logic-thread only.
pub(crate) struct ChanState {
    pub(crate) open: bool,
    pub(crate) buf: VecDeque<u8>,
    pub(crate) events: Option<ChannelEvents>,
}

impl ChanState {
    pub(crate) fn new() -> Self {
        Self {
            open: false,
            buf: VecDeque::new(),
            events: None,
        }
    }
}

pub(crate) type SharedState = Rc<RefCell<ChanState>>;

pub(crate) struct TcpChannel {
    conn: ConnId,
    host: String,
    port: u16,
    state: SharedState,
    io: IoHandle,
}

impl TcpChannel {
    pub(crate) fn new(conn: ConnId, host: String, port: u16, state: SharedState, io: IoHandle) -> Self {
        Self {
            conn,
            host,
            port,
            state,
            io,
        }
    }
}

impl Channel for TcpChannel {
    fn open(&mut self, events: ChannelEvents) -> Result<(), Error> {
        self.state.borrow_mut().events = Some(events);
        self.io.send(Command::Connect {
            conn: self.conn,
            host: self.host.clone(),
            port: self.port,
        })
    }

    fn close(&mut self) {
        if self.io.send(Command::Close { conn: self.conn }).is_err() {
            log::debug!("close after runtime shutdown on {:?}", self.conn);
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut state = self.state.borrow_mut();
        let mut copied = 0;
        while copied < buf.len() {
            match state.buf.pop_front() {
                Some(byte) => {
                    buf[copied] = byte;
                    copied += 1;
                }
                None => break,
            }
        }
        copied
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if !self.state.borrow().open {
            return 0;
        }
        match self.io.try_send(Command::Write {
            conn: self.conn,
            bytes: data.to_vec(),
        }) {
            Ok(()) => data.len(),
            Err(_) => 0,
        }
    }

    fn is_open(&self) -> bool {
        self.state.borrow().open
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        if self.state.borrow().open {
            self.close();
        }
    }
}
