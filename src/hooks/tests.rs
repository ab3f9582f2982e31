use super::*;
use crate::{
    config::Config,
    event::{AlertPayload, PowerUpdate, SensorUpdate, VoltagePayload, VoltageUpdate},
    manager::ConnectionManager,
    transport::{MemoryTransport, ServerHandle, ServerLink},
};
use parking_lot::Mutex;
use serde_json::json;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{sync::watch, time::sleep};

async fn connected() -> (ConnectionManager, ServerHandle, ServerLink) {
    let (transport, mut server) = MemoryTransport::pair();
    let manager = ConnectionManager::new(Config::default(), Arc::new(transport));
    manager.connect("t").await.unwrap();
    let link = server.next_link().await.unwrap();
    (manager, server, link)
}

fn voltage(link: &ServerLink, value: f64) {
    link.send("voltage:update", &json!({ "deviceId": "d1", "voltage": value }))
        .unwrap();
}

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_swaps_handler_in_place() {
    let (manager, _server, link) = connected().await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = seen.clone();
    let subscriber = Subscriber::<VoltageUpdate>::new(&manager, "panel", move |p| {
        first.lock().push(format!("old:{}", p.voltage));
    });
    let id = subscriber.listener_id();

    voltage(&link, 1.0);
    settle().await;

    let second = seen.clone();
    subscriber.replace_handler(move |p| second.lock().push(format!("new:{}", p.voltage)));
    voltage(&link, 2.0);
    settle().await;

    assert_eq!(*seen.lock(), vec!["old:1", "new:2"]);
    assert_eq!(subscriber.listener_id(), id);
    assert_eq!(manager.listeners().total_listeners(), 1);

    subscriber.unsubscribe();
    assert_eq!(manager.listeners().total_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_value_publishes_last_payload_per_frame() {
    let (manager, _server, link) = connected().await;
    let value = ThrottledValue::<VoltageUpdate>::new(&manager, "gauge");
    let mut rx = value.watch();

    for v in 1..=5 {
        voltage(&link, v as f64);
    }
    settle().await;
    assert_eq!(value.get(), None);

    sleep(Duration::from_millis(20)).await;
    assert!(rx.has_changed().unwrap());
    let published: Option<VoltagePayload> = rx.borrow_and_update().clone();
    assert_eq!(published.map(|p| p.voltage), Some(5.0));
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_history_keeps_newest_entries() {
    let (manager, _server, link) = connected().await;
    let history = EventHistory::<VoltageUpdate>::new(&manager, "chart", 3);

    for v in 1..=5 {
        voltage(&link, v as f64);
    }
    settle().await;
    assert_eq!(history.len(), 3);

    sleep(Duration::from_millis(20)).await;
    let values: Vec<f64> = history.events().iter().map(|p| p.voltage).collect();
    assert_eq!(values, vec![3.0, 4.0, 5.0]);

    sleep(Duration::from_secs(10)).await;
    voltage(&link, 6.0);
    settle().await;
    let recent: Vec<f64> = history
        .recent(Duration::from_secs(1))
        .iter()
        .map(|p| p.voltage)
        .collect();
    assert_eq!(recent, vec![6.0]);
}

#[tokio::test(start_paused = true)]
async fn test_history_with_max_age_sweeps() {
    let (manager, _server, link) = connected().await;
    let history =
        EventHistory::<VoltageUpdate>::with_max_age(&manager, "chart", 10, Duration::from_secs(2));
    voltage(&link, 1.0);
    settle().await;
    assert_eq!(history.len(), 1);
    sleep(Duration::from_millis(20)).await;
    assert_eq!(history.events().len(), 1);

    sleep(Duration::from_secs(5)).await;
    assert!(history.is_empty());
    assert!(history.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_aggregated_reduces_each_window_once() {
    let (manager, _server, link) = connected().await;
    let reductions = Arc::new(AtomicUsize::new(0));
    let counter = reductions.clone();
    let total = Aggregated::<PowerUpdate, f64>::new(&manager, "meter", move |items| {
        counter.fetch_add(1, Ordering::SeqCst);
        items.iter().map(|p| p.power).sum()
    });

    for power in [100.0, 250.0, 50.0] {
        link.send("power:update", &json!({ "deviceId": "d1", "power": power }))
            .unwrap();
    }
    settle().await;
    assert_eq!(total.get(), None);

    sleep(AGGREGATE_WINDOW).await;
    assert_eq!(total.get(), Some(400.0));
    assert_eq!(reductions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_latest_value_turns_stale_without_events() {
    let (manager, _server, link) = connected().await;
    let latest = LatestValue::<SensorUpdate>::new(&manager, "tile", Duration::from_secs(10));
    assert!(!latest.is_stale());

    link.send(
        "hardware:sensor_update",
        &json!({ "deviceId": "d1", "sensor": "temp", "value": 21.5, "unit": "C" }),
    )
    .unwrap();
    settle().await;
    let current = latest.get();
    assert_eq!(current.value.map(|p| p.value), Some(21.5));
    assert!(current.last_updated.is_some());
    assert!(!current.is_stale);

    sleep(Duration::from_secs(12)).await;
    assert!(!latest.is_stale());

    sleep(Duration::from_secs(4)).await;
    assert!(latest.is_stale());

    link.send(
        "hardware:sensor_update",
        &json!({ "deviceId": "d1", "sensor": "temp", "value": 22.0, "unit": "C" }),
    )
    .unwrap();
    settle().await;
    assert!(!latest.is_stale());
}

#[tokio::test(start_paused = true)]
async fn test_latest_value_keeps_updating_past_listener_max_age() {
    let (manager, _server, link) = connected().await;
    let latest = LatestValue::<VoltageUpdate>::new(&manager, "tile", Duration::from_secs(10));

    sleep(Duration::from_secs(7 * 60)).await;
    voltage(&link, 229.0);
    settle().await;
    assert_eq!(latest.value().map(|p| p.voltage), Some(229.0));
}

#[tokio::test(start_paused = true)]
async fn test_batched_flushes_by_size_and_on_drop() {
    let (manager, _server, link) = connected().await;
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = batches.clone();
    let batched = Batched::<VoltageUpdate>::new(
        &manager,
        "logger",
        3,
        Duration::from_secs(10),
        move |items| sink.lock().push(items.len()),
    );

    for v in 1..=5 {
        voltage(&link, v as f64);
    }
    settle().await;
    assert_eq!(*batches.lock(), vec![3]);
    assert_eq!(batched.pending(), 2);

    drop(batched);
    assert_eq!(*batches.lock(), vec![3, 2]);
    assert_eq!(manager.listeners().total_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_conditional_follows_flag() {
    let (manager, _server, link) = connected().await;
    let (enabled_tx, enabled_rx) = watch::channel(false);
    let alerts = Arc::new(Mutex::new(Vec::<AlertPayload>::new()));
    let sink = alerts.clone();
    let conditional = Conditional::<crate::event::Alert>::new(
        &manager,
        "banner",
        enabled_rx,
        move |alert| sink.lock().push(alert.clone()),
    );
    assert!(!conditional.is_active());

    let alert = |id: &str| {
        link.send(
            "alert",
            &json!({ "id": id, "severity": "info", "message": "m" }),
        )
        .unwrap();
    };

    alert("ignored");
    settle().await;
    assert!(alerts.lock().is_empty());

    enabled_tx.send_replace(true);
    settle().await;
    assert!(conditional.is_active());
    alert("seen");
    settle().await;

    enabled_tx.send_replace(false);
    settle().await;
    assert!(!conditional.is_active());
    assert_eq!(manager.listeners().total_listeners(), 0);
    alert("ignored-again");
    settle().await;

    let ids: Vec<String> = alerts.lock().iter().map(|a| a.id.clone()).collect();
    assert_eq!(ids, vec!["seen"]);
}

#[tokio::test(start_paused = true)]
async fn test_conditional_blocks_events_queued_before_flag_drops() {
    let (manager, _server, link) = connected().await;
    let (enabled_tx, enabled_rx) = watch::channel(true);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _conditional = Conditional::<crate::event::Alert>::new(
        &manager,
        "banner",
        enabled_rx,
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    link.send(
        "alert",
        &json!({ "id": "late", "severity": "info", "message": "m" }),
    )
    .unwrap();
    enabled_tx.send_replace(false);
    settle().await;
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}
