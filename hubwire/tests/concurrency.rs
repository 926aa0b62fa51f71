//! Concurrent callers on one sender must never overlap engine runs.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use hubwire::{ConnectionParameters, DispatchSender, Message, TransportKind};
use hubwire_sim::{SimEngineFactory, SimScript};

#[test]
fn concurrent_dispatches_are_serialized() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let params = ConnectionParameters::new(
        "contoso.azure-devices.net",
        "iothubowner",
        "token",
        TransportKind::AmqpsWs,
    )
    .expect("valid params");
    let factory = SimEngineFactory::new(SimScript::accepting().latency(Duration::from_millis(10)));
    let observer = factory.observer();
    let sender = Arc::new(DispatchSender::new(params, factory));
    sender.open();

    let barrier = Arc::new(Barrier::new(2));
    let callers: Vec<_> = ["dev-a", "dev-b"]
        .into_iter()
        .map(|device| {
            let sender = Arc::clone(&sender);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                sender.dispatch(device, None, Message::new(device))
            })
        })
        .collect();

    for caller in callers {
        caller
            .join()
            .expect("caller thread panicked")
            .expect("dispatch accepted");
    }

    assert_eq!(observer.engines_created(), 2);
    assert_eq!(observer.max_concurrent_runs(), 1);

    let runs = observer.runs();
    let first_finished = runs[0].finished_at.expect("first run finished");
    let second_started = runs[1].started_at.expect("second run started");
    assert!(second_started >= first_finished);

    // Each run only ever saw its own envelope.
    for run in &runs {
        assert_eq!(run.sent.len(), 1);
    }
    assert_ne!(runs[0].sent[0].body, runs[1].sent[0].body);
    assert_eq!(sender.metrics().settled, 2);
}
