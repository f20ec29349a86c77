//! Connects to a local broker, subscribes to `demo/in` and republishes
//! every message on `demo/out`.
//!
//! Run a broker on localhost:1883 first, then:
//!   cargo run -p evq-mqtt --example pubsub

use std::cell::RefCell;
use std::rc::Rc;

use evq::{Engine, Runtime};
use evq_mqtt::{MqttClient, MqttEvents, MqttOptions};
use evq_posix::ThreadedRuntime;

type ClientSlot = Rc<RefCell<Option<Rc<MqttClient>>>>;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut runtime = ThreadedRuntime::new(100)?;
    let mut engine = Engine::new(100);

    // The callbacks need the client and the client needs the callbacks;
    // a slot filled in after construction breaks the cycle.
    let slot: ClientSlot = Rc::new(RefCell::new(None));

    let on_connect = Rc::clone(&slot);
    let on_msg = Rc::clone(&slot);
    let events = MqttEvents {
        on_connected: Box::new(move |_| {
            println!("connected");
            if let Some(client) = on_connect.borrow().as_ref() {
                match client.subscribe("demo/in") {
                    Ok(id) => println!("subscribe sent, packet id {id}"),
                    Err(err) => eprintln!("subscribe failed: {err}"),
                }
            }
        }),
        on_disconnected: Box::new(|_| println!("session lost, reconnecting")),
        on_publish: Box::new(move |_, topic, payload| {
            println!("{topic}: {} bytes", payload.len());
            if let Some(client) = on_msg.borrow().as_ref() {
                if let Err(err) = client.publish("demo/out", payload) {
                    eprintln!("republish failed: {err}");
                }
            }
        }),
        ..Default::default()
    };

    let client = Rc::new(MqttClient::new(
        runtime.open_tcp("127.0.0.1", 1883)?,
        MqttOptions {
            client_id: "evq-pubsub-demo".into(),
            keep_alive_s: 30,
            reconnect_ms: 2_000,
            ..Default::default()
        },
        events,
    ));
    *slot.borrow_mut() = Some(Rc::clone(&client));

    client.start(&mut engine);
    engine.run_forever(&mut runtime)?;
    Ok(())
}
