//! The I/O thread: mio poll loop, tick source and TCP plumbing.
//!
//! One thread owns every socket. It sleeps in `Poll::poll` with a timeout
//! derived from the next absolute tick deadline, so the tick train does not
//! drift no matter how long event handling takes. Commands from the logic
//! thread arrive through a bounded channel; a `Waker` interrupts the poll
//! when one is queued.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use evq::Error;

use crate::message::{Command, ConnId, LoopEvent};

pub(crate) const WAKER_TOKEN: Token = Token(0);

const READ_CHUNK: usize = 4096;

struct Conn {
    id: ConnId,
    stream: TcpStream,
    connected: bool,
    /// Edge-triggered handshake: after shipping a `Data` event, reads stay
    /// paused until the logic thread sends `RearmRead`.
    read_paused: bool,
    pending_writes: VecDeque<Vec<u8>>,
}

pub(crate) struct IoThread {
    poll: Poll,
    cmds: Receiver<Command>,
    out: SyncSender<LoopEvent>,
    tick_period: Duration,
    conns: HashMap<Token, Conn>,
}

fn token_for(conn: ConnId) -> Token {
    Token(conn.0 as usize + 1)
}

impl IoThread {
    pub(crate) fn new(
        poll: Poll,
        cmds: Receiver<Command>,
        out: SyncSender<LoopEvent>,
        tick_ms: u32,
    ) -> Self {
        Self {
            poll,
            cmds,
            out,
            tick_period: Duration::from_millis(u64::from(tick_ms.max(1))),
            conns: HashMap::new(),
        }
    }

    pub(crate) fn run(&mut self) {
        if let Err(err) = self.poll_loop() {
            log::error!("i/o thread terminated: {err}");
        }
    }

    fn poll_loop(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(64);
        let mut next_tick = Instant::now() + self.tick_period;
        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            self.poll.poll(&mut events, Some(timeout))?;

            // Absolute deadlines: late wakeups catch up without shifting
            // the schedule.
            let now = Instant::now();
            while now >= next_tick {
                next_tick += self.tick_period;
                self.ship(LoopEvent::Tick);
            }

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                self.handle_socket(event.token(), event.is_writable(), event.is_readable());
            }

            loop {
                match self.cmds.try_recv() {
                    Ok(Command::Shutdown) => return Ok(()),
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => break,
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { conn, host, port } => self.connect(conn, &host, port),
            Command::Write { conn, bytes } => {
                let token = token_for(conn);
                if let Some(c) = self.conns.get_mut(&token) {
                    c.pending_writes.push_back(bytes);
                    self.flush(token);
                } else {
                    log::debug!("write to unknown connection {conn:?}");
                }
            }
            Command::RearmRead { conn } => {
                let token = token_for(conn);
                if let Some(c) = self.conns.get_mut(&token) {
                    c.read_paused = false;
                    // The readable edge may already have passed while paused.
                    self.drain_reads(token);
                }
            }
            Command::Close { conn } => {
                if self.conns.contains_key(&token_for(conn)) {
                    self.drop_conn(token_for(conn));
                    self.ship(LoopEvent::Closed { conn });
                }
            }
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self, conn: ConnId, host: &str, port: u16) {
        let addr = match (host, port).to_socket_addrs().map(|mut it| it.next()) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                self.report_connect(conn, Err(Error::Transport(format!("no address for {host}"))));
                return;
            }
            Err(err) => {
                self.report_connect(conn, Err(Error::Transport(err.to_string())));
                return;
            }
        };
        let mut stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(err) => {
                self.report_connect(conn, Err(Error::Transport(err.to_string())));
                return;
            }
        };
        let token = token_for(conn);
        if let Err(err) = self.poll.registry().register(
            &mut stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            self.report_connect(conn, Err(Error::Transport(err.to_string())));
            return;
        }
        self.conns.insert(
            token,
            Conn {
                id: conn,
                stream,
                connected: false,
                read_paused: false,
                pending_writes: VecDeque::new(),
            },
        );
    }

    fn handle_socket(&mut self, token: Token, writable: bool, readable: bool) {
        let (id, connected) = match self.conns.get(&token) {
            Some(conn) => (conn.id, conn.connected),
            None => return,
        };
        if writable && !connected {
            // A writable edge on a connecting socket reports the outcome.
            let outcome = match self.conns.get_mut(&token) {
                Some(conn) => match conn.stream.take_error() {
                    Ok(Some(err)) => Err(err),
                    Ok(None) => conn.stream.peer_addr().map(|_| ()),
                    Err(err) => Err(err),
                },
                None => return,
            };
            match outcome {
                Ok(()) => {
                    if let Some(conn) = self.conns.get_mut(&token) {
                        conn.connected = true;
                    }
                    self.report_connect(id, Ok(()));
                    self.flush(token);
                }
                Err(err) => {
                    self.drop_conn(token);
                    self.report_connect(id, Err(Error::Transport(err.to_string())));
                    return;
                }
            }
        } else if writable {
            self.flush(token);
        }
        if readable {
            self.drain_reads(token);
        }
    }

    /// Reads until `WouldBlock`, ships everything as one `Data` event and
    /// pauses further reads until the logic thread re-arms.
    fn drain_reads(&mut self, token: Token) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        if !conn.connected || conn.read_paused {
            return;
        }
        let id = conn.id;
        let mut bytes = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        let closed = loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => break true,
                Ok(n) => bytes.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break false,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::debug!("read error on {id:?}: {err}");
                    break true;
                }
            }
        };
        if !bytes.is_empty() {
            conn.read_paused = true;
            self.ship(LoopEvent::Data { conn: id, bytes });
        }
        if closed {
            self.drop_conn(token);
            self.ship(LoopEvent::Closed { conn: id });
        }
    }

    fn flush(&mut self, token: Token) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        if !conn.connected {
            return;
        }
        let id = conn.id;
        let mut failure = None;
        while let Some(chunk) = conn.pending_writes.front_mut() {
            match conn.stream.write(chunk) {
                Ok(n) if n == chunk.len() => {
                    conn.pending_writes.pop_front();
                }
                Ok(n) => {
                    chunk.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            log::debug!("write error on {id:?}: {err}");
            self.drop_conn(token);
            self.ship(LoopEvent::Closed { conn: id });
        }
    }

    fn drop_conn(&mut self, token: Token) {
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
    }

    fn report_connect(&self, conn: ConnId, result: Result<(), Error>) {
        self.ship(LoopEvent::Connected { conn, result });
    }

    /// Ticks are droppable under backpressure; everything else blocks so a
    /// busy logic thread slows the I/O thread down instead of losing data.
    fn ship(&self, event: LoopEvent) {
        match event {
            LoopEvent::Tick => {
                if let Err(TrySendError::Full(_)) = self.out.try_send(LoopEvent::Tick) {
                    log::warn!("logic thread behind, dropping tick");
                }
            }
            other => {
                if self.out.send(other).is_err() {
                    log::debug!("logic thread gone, dropping event");
                }
            }
        }
    }
}
