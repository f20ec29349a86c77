//! The MQTT client: connection lifecycle over one byte-stream channel.
//!
//! All state lives on the logic thread behind `Rc<RefCell<..>>`. Channel
//! notifications and timer expiries arrive as engine callbacks; user-facing
//! callbacks are invoked only after the internal borrow is released, so a
//! callback may freely call back into the client.

use std::cell::RefCell;
use std::rc::Rc;

use evq::{Channel, ChannelEvents, Engine, Error, TimerHandle};

use crate::codec::{self, packet_type, Decoder, Will};
use crate::error::ProtocolError;
use crate::reader::{Frame, PacketReader};

pub struct MqttOptions {
    pub client_id: String,
    /// Keep-alive interval in seconds; 0 disables PINGREQ traffic.
    pub keep_alive_s: u16,
    /// Fixed backoff between reconnect attempts.
    pub reconnect_ms: u32,
    pub clean_start: bool,
    /// Largest acceptable inbound packet body.
    pub max_packet: usize,
    pub will: Option<Will>,
}

impl Default for MqttOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            keep_alive_s: 30,
            reconnect_ms: 2_000,
            clean_start: false,
            max_packet: 1_024,
            will: None,
        }
    }
}

/// User-facing notifications. Every hook defaults to a no-op.
pub struct MqttEvents {
    pub on_connected: Box<dyn FnMut(&mut Engine)>,
    /// Fires once per failed connect attempt or lost session; never for a
    /// user-initiated [`stop`](MqttClient::stop).
    pub on_disconnected: Box<dyn FnMut(&mut Engine)>,
    pub on_publish: Box<dyn FnMut(&mut Engine, &str, &[u8])>,
    pub on_subscribe_complete: Box<dyn FnMut(&mut Engine, u16)>,
    pub on_unsubscribe_complete: Box<dyn FnMut(&mut Engine, u16)>,
}

impl Default for MqttEvents {
    fn default() -> Self {
        Self {
            on_connected: Box::new(|_| {}),
            on_disconnected: Box::new(|_| {}),
            on_publish: Box::new(|_, _, _| {}),
            on_subscribe_complete: Box::new(|_, _| {}),
            on_unsubscribe_complete: Box::new(|_, _| {}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Idle,
    Opening,
    AwaitingConnack,
    Connected,
}

struct Inner {
    opts: MqttOptions,
    channel: Box<dyn Channel>,
    reader: PacketReader,
    session: Session,
    running: bool,
    next_packet_id: u16,
    keepalive: Option<TimerHandle>,
    reconnect: Option<TimerHandle>,
}

/// Effects decoded from inbound frames, applied after the internal borrow
/// is dropped.
enum Action {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    SubscribeDone(u16),
    UnsubscribeDone(u16),
    PingResp,
}

pub struct MqttClient {
    inner: Rc<RefCell<Inner>>,
    events: Rc<RefCell<MqttEvents>>,
}

impl MqttClient {
    pub fn new(channel: Box<dyn Channel>, opts: MqttOptions, events: MqttEvents) -> Self {
        let reader = PacketReader::new(opts.max_packet);
        Self {
            inner: Rc::new(RefCell::new(Inner {
                opts,
                channel,
                reader,
                session: Session::Idle,
                running: false,
                next_packet_id: 1,
                keepalive: None,
                reconnect: None,
            })),
            events: Rc::new(RefCell::new(events)),
        }
    }

    /// Begins connecting and keeps the session alive until [`stop`].
    ///
    /// [`stop`]: MqttClient::stop
    pub fn start(&self, engine: &mut Engine) {
        {
            let mut g = self.inner.borrow_mut();
            g.running = true;
            if g.keepalive.is_none() && g.opts.keep_alive_s > 0 {
                let interval_ms = u32::from(g.opts.keep_alive_s) * 1_000;
                let inner = Rc::clone(&self.inner);
                g.keepalive = Some(engine.timer_init(interval_ms, Some(interval_ms), move |_| {
                    send_pingreq(&inner);
                }));
            }
            if g.reconnect.is_none() {
                let inner = Rc::clone(&self.inner);
                let events = Rc::clone(&self.events);
                g.reconnect = Some(engine.timer_init(g.opts.reconnect_ms, None, move |engine| {
                    open_channel(&inner, &events, engine);
                }));
            }
        }
        open_channel(&self.inner, &self.events, engine);
    }

    /// Sends DISCONNECT when connected, closes the channel and disables
    /// reconnection. No callbacks fire for a user-initiated stop.
    pub fn stop(&self, engine: &mut Engine) {
        let (keepalive, reconnect) = {
            let mut g = self.inner.borrow_mut();
            g.running = false;
            if g.session == Session::Connected {
                let packet = codec::disconnect();
                if g.channel.write(&packet) == 0 {
                    log::debug!("disconnect packet not accepted at stop");
                }
            }
            g.session = Session::Idle;
            g.channel.close();
            (g.keepalive, g.reconnect)
        };
        if let Some(t) = keepalive {
            engine.timer_stop(t);
        }
        if let Some(t) = reconnect {
            engine.timer_stop(t);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().session == Session::Connected
    }

    /// QoS 0 publish. Fails with [`Error::NotOpen`] before the session is
    /// established and [`Error::Backpressure`] when the transport rejects
    /// the write.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let mut g = self.inner.borrow_mut();
        if g.session != Session::Connected {
            return Err(Error::NotOpen);
        }
        let packet = codec::publish(topic, payload);
        if g.channel.write(&packet) == 0 {
            return Err(Error::Backpressure);
        }
        Ok(())
    }

    /// Requests a QoS 0 subscription and returns the packet id that the
    /// matching `on_subscribe_complete` will carry.
    pub fn subscribe(&self, topic: &str) -> Result<u16, Error> {
        self.request(topic, codec::subscribe)
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<u16, Error> {
        self.request(topic, codec::unsubscribe)
    }

    fn request(&self, topic: &str, encode: fn(u16, &str) -> Vec<u8>) -> Result<u16, Error> {
        let mut g = self.inner.borrow_mut();
        if g.session != Session::Connected {
            return Err(Error::NotOpen);
        }
        let id = g.take_packet_id();
        let packet = encode(id, topic);
        if g.channel.write(&packet) == 0 {
            return Err(Error::Backpressure);
        }
        Ok(id)
    }
}

impl Inner {
    /// Packet ids cycle through 1..=65535; 0 is reserved by the protocol.
    fn take_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = if id == u16::MAX { 1 } else { id + 1 };
        id
    }

    fn handle_frame(&mut self, frame: &Frame, actions: &mut Vec<Action>) {
        match frame.packet_type() {
            packet_type::CONNACK => self.handle_connack(frame, actions),
            packet_type::PUBLISH => self.handle_publish(frame, actions),
            packet_type::SUBACK => match decode_ack("SUBACK", &frame.body) {
                Ok((id, reason)) if reason < 0x80 => actions.push(Action::SubscribeDone(id)),
                Ok((id, reason)) => {
                    log::warn!("subscribe {id} rejected with reason {reason:#x}");
                }
                Err(err) => log::debug!("{err}, dropped"),
            },
            packet_type::UNSUBACK => match decode_ack("UNSUBACK", &frame.body) {
                Ok((id, reason)) if reason < 0x80 => actions.push(Action::UnsubscribeDone(id)),
                Ok((id, reason)) => {
                    log::warn!("unsubscribe {id} rejected with reason {reason:#x}");
                }
                Err(err) => log::debug!("{err}, dropped"),
            },
            packet_type::PINGRESP => actions.push(Action::PingResp),
            packet_type::DISCONNECT => {
                log::info!("broker sent DISCONNECT");
                self.channel.close();
            }
            other => log::debug!("ignoring packet type {other}"),
        }
    }

    fn handle_connack(&mut self, frame: &Frame, actions: &mut Vec<Action>) {
        if self.session != Session::AwaitingConnack {
            log::debug!("unexpected CONNACK dropped");
            return;
        }
        let reason = {
            let mut dec = Decoder::new(&frame.body);
            dec.u8().and_then(|_flags| dec.u8())
        }
        .ok_or(ProtocolError::Malformed("CONNACK"));
        match reason {
            Ok(0) => {
                self.session = Session::Connected;
                actions.push(Action::Connected);
            }
            Ok(reason) => {
                log::warn!("broker refused connection, reason {reason:#x}");
                self.channel.close();
            }
            Err(err) => {
                log::debug!("{err}, closing");
                self.channel.close();
            }
        }
    }

    fn handle_publish(&mut self, frame: &Frame, actions: &mut Vec<Action>) {
        let qos = (frame.flags() >> 1) & 0x03;
        if qos != 0 {
            log::warn!("dropping QoS {qos} publish, only QoS 0 is supported");
            return;
        }
        let parsed = (|| {
            let mut dec = Decoder::new(&frame.body);
            let topic = dec.str()?.to_owned();
            let props = dec.varint()? as usize;
            dec.skip(props)?;
            Some((topic, dec.rest().to_vec()))
        })()
        .ok_or(ProtocolError::Malformed("PUBLISH"));
        match parsed {
            Ok((topic, payload)) => actions.push(Action::Message { topic, payload }),
            Err(err) => log::debug!("{err}, dropped"),
        }
    }
}

/// SUBACK/UNSUBACK share a body layout: packet id, properties, one reason
/// code per requested filter (this client sends one filter per request).
fn decode_ack(kind: &'static str, body: &[u8]) -> Result<(u16, u8), ProtocolError> {
    let mut dec = Decoder::new(body);
    let parsed = (|| {
        let id = dec.u16()?;
        let props = dec.varint()? as usize;
        dec.skip(props)?;
        let reason = dec.u8()?;
        Some((id, reason))
    })();
    parsed.ok_or(ProtocolError::Malformed(kind))
}

fn send_pingreq(inner: &Rc<RefCell<Inner>>) {
    let mut g = inner.borrow_mut();
    if g.session != Session::Connected {
        return;
    }
    let packet = codec::pingreq();
    if g.channel.write(&packet) == 0 {
        log::warn!("pingreq not accepted, transport backlogged");
    }
}

fn open_channel(inner: &Rc<RefCell<Inner>>, events: &Rc<RefCell<MqttEvents>>, engine: &mut Engine) {
    let chan_events = channel_events(inner, events);
    let reconnect = {
        let mut g = inner.borrow_mut();
        // Idle-only: a stale retry must not stack a second open onto an
        // attempt already in flight.
        if !g.running || g.session != Session::Idle {
            return;
        }
        g.session = Session::Opening;
        g.reader.reset();
        match g.channel.open(chan_events) {
            Ok(()) => return,
            Err(err) => {
                log::warn!("channel open failed: {err}");
                g.session = Session::Idle;
                g.reconnect
            }
        }
    };
    schedule_reconnect(reconnect, engine);
}

fn schedule_reconnect(timer: Option<TimerHandle>, engine: &mut Engine) {
    if let Some(t) = timer {
        if engine.timer_start(t).is_err() {
            log::error!("reconnect timer vanished");
        }
    }
}

fn channel_events(inner: &Rc<RefCell<Inner>>, events: &Rc<RefCell<MqttEvents>>) -> ChannelEvents {
    let on_opened = {
        let inner = Rc::clone(inner);
        let events = Rc::clone(events);
        move |engine: &mut Engine, result: Result<(), Error>| match result {
            Ok(()) => {
                let reconnect = {
                    let mut g = inner.borrow_mut();
                    let packet = codec::connect(
                        &g.opts.client_id,
                        g.opts.keep_alive_s,
                        g.opts.clean_start,
                        g.opts.will.as_ref(),
                    );
                    g.session = Session::AwaitingConnack;
                    if g.channel.write(&packet) == 0 {
                        log::warn!("CONNECT not accepted, recycling connection");
                        g.channel.close();
                    }
                    g.reconnect
                };
                // A retry scheduled before this attempt completed is stale.
                if let Some(t) = reconnect {
                    engine.timer_stop(t);
                }
            }
            Err(err) => {
                log::warn!("connect failed: {err}");
                let reconnect = {
                    let mut g = inner.borrow_mut();
                    g.session = Session::Idle;
                    g.running.then_some(g.reconnect).flatten()
                };
                (events.borrow_mut().on_disconnected)(engine);
                schedule_reconnect(reconnect, engine);
            }
        }
    };

    let on_closed = {
        let inner = Rc::clone(inner);
        let events = Rc::clone(events);
        move |engine: &mut Engine| {
            let (was_active, keepalive, reconnect) = {
                let mut g = inner.borrow_mut();
                let was_active = g.session != Session::Idle;
                g.session = Session::Idle;
                g.reader.reset();
                (
                    was_active,
                    g.keepalive,
                    g.running.then_some(g.reconnect).flatten(),
                )
            };
            if let Some(t) = keepalive {
                engine.timer_stop(t);
            }
            // A close after stop() finds the session already idle and
            // reports nothing.
            if was_active {
                (events.borrow_mut().on_disconnected)(engine);
            }
            schedule_reconnect(reconnect, engine);
        }
    };

    let on_input = {
        let inner = Rc::clone(inner);
        let events = Rc::clone(events);
        move |engine: &mut Engine| {
            let mut actions = Vec::new();
            {
                let mut g = inner.borrow_mut();
                let mut buf = [0u8; 512];
                loop {
                    let n = g.channel.read(&mut buf);
                    if n == 0 {
                        break;
                    }
                    for &byte in &buf[..n] {
                        match g.reader.push(byte) {
                            Ok(Some(frame)) => g.handle_frame(&frame, &mut actions),
                            Ok(None) => {}
                            // Recovered locally: the reader has reset and the
                            // stream keeps going.
                            Err(err) => log::warn!("packet discarded: {err}"),
                        }
                    }
                }
            }
            apply_actions(&inner, &events, engine, actions);
        }
    };

    ChannelEvents {
        on_opened: Box::new(on_opened),
        on_closed: Box::new(on_closed),
        on_input: Box::new(on_input),
    }
}

fn apply_actions(
    inner: &Rc<RefCell<Inner>>,
    events: &Rc<RefCell<MqttEvents>>,
    engine: &mut Engine,
    actions: Vec<Action>,
) {
    let keepalive = inner.borrow().keepalive;
    for action in actions {
        match action {
            Action::Connected => {
                if let Some(t) = keepalive {
                    if engine.timer_start(t).is_err() {
                        log::error!("keep-alive timer vanished");
                    }
                }
                (events.borrow_mut().on_connected)(engine);
            }
            Action::Message { topic, payload } => {
                (events.borrow_mut().on_publish)(engine, &topic, &payload);
            }
            Action::SubscribeDone(id) => {
                (events.borrow_mut().on_subscribe_complete)(engine, id);
            }
            Action::UnsubscribeDone(id) => {
                (events.borrow_mut().on_unsubscribe_complete)(engine, id);
            }
            Action::PingResp => {
                // Restarting re-phases the keep-alive train on the response.
                if let Some(t) = keepalive {
                    if engine.timer_start(t).is_err() {
                        log::error!("keep-alive timer vanished");
                    }
                }
            }
        }
    }
}
