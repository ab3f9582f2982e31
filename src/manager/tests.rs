use super::*;
use crate::{
    classify::ErrorKind,
    config::MIN_TIMER_PERIOD,
    event::{Alert, VoltagePayload, VoltageUpdate},
    transport::{HandshakeOutcome, MemoryTransport, ServerHandle},
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use tokio::time::{Instant, sleep};

fn setup(config: Config) -> (ConnectionManager, ServerHandle) {
    let (transport, server) = MemoryTransport::pair();
    (ConnectionManager::new(config, Arc::new(transport)), server)
}

fn refused() -> HandshakeOutcome {
    HandshakeOutcome::Reject(Error::transport_code("connect failed", "ECONNREFUSED"))
}

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_opens_session_with_token() {
    let (manager, server) = setup(Config::new("ws://plant.local"));
    manager.connect("secret").await.unwrap();

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.transport, Some(TransportMode::WebSocket));
    assert_eq!(snapshot.reconnect_attempt, 0);

    let handshakes = server.handshakes();
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].endpoint, "ws://plant.local");
    assert_eq!(handshakes[0].token.as_str(), "secret");

    let timers = manager.timers().await.unwrap();
    assert!(timers.heartbeat_interval);
    assert!(!timers.connect_timeout && !timers.reconnect && !timers.heartbeat_timeout);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_connected_is_noop() {
    let (manager, server) = setup(Config::default());
    manager.connect("a").await.unwrap();
    manager.connect("b").await.unwrap();
    assert_eq!(server.handshake_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_falls_back_to_polling() {
    let (manager, server) = setup(Config::default());
    server.set_websocket_available(false);
    manager.connect("t").await.unwrap();
    assert_eq!(manager.snapshot().transport, Some(TransportMode::Polling));
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_is_not_retried() {
    let (manager, server) = setup(Config::default());
    server.set_default_outcome(HandshakeOutcome::Reject(Error::transport_status(
        "handshake rejected",
        401,
    )));

    let result = manager.connect("expired").await;
    assert!(matches!(result, Err(Error::Authentication(_))));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.snapshot().last_error.unwrap().is_auth());

    sleep(Duration::from_secs(120)).await;
    assert_eq!(server.handshake_count(), 1);
    assert!(!manager.timers().await.unwrap().any());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_follows_table_then_gives_up() {
    let (manager, server) = setup(Config::default());
    server.set_default_outcome(refused());

    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorded = starts.clone();
    let _sub = manager.subscribe_to_state("test", move |snapshot| {
        if snapshot.state == ConnectionState::Connecting {
            recorded.lock().push(Instant::now());
        }
    });

    let result = manager.connect("t").await;
    assert!(matches!(
        result,
        Err(Error::ReconnectExhausted { attempts: 5 })
    ));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(server.handshake_count(), 6);

    let starts = starts.lock().clone();
    assert_eq!(starts.len(), 6);
    let table = [1, 2, 5, 10, 30];
    for (i, pair) in starts.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        let base = Duration::from_secs(table[i]);
        assert!(
            gap >= base && gap < base + Duration::from_millis(1001),
            "reconnect #{} waited {gap:?}",
            i + 1
        );
    }

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::Network);
    assert!(!manager.timers().await.unwrap().any());
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_resets_attempts() {
    let (manager, server) = setup(Config::default().with_max_attempts(1));
    server.set_default_outcome(refused());
    assert!(manager.connect("t").await.is_err());
    assert_eq!(server.handshake_count(), 2);

    server.set_default_outcome(HandshakeOutcome::Accept);
    manager.reconnect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.snapshot().reconnect_attempt, 0);
    assert_eq!(server.handshakes()[2].token.as_str(), "t");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_disabled_fails_once() {
    let (manager, server) = setup(Config::default().with_reconnect_enabled(false));
    server.set_default_outcome(refused());
    let result = manager.connect("t").await;
    assert!(matches!(result, Err(Error::Transport { .. })));
    sleep(Duration::from_secs(60)).await;
    assert_eq!(server.handshake_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_schedules_reconnect() {
    let (manager, server) = setup(Config::default());
    server.script(HandshakeOutcome::Hang);

    let started = Instant::now();
    let pending = manager.clone();
    let connect = tokio::spawn(async move { pending.connect("t").await });

    manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(20) && waited < Duration::from_millis(20_005));
    assert_eq!(
        manager.snapshot().last_error.unwrap().kind,
        ErrorKind::Timeout
    );

    connect.await.unwrap().unwrap();
    assert_eq!(server.handshake_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_connect_rejects_pending() {
    let (manager, server) = setup(Config::default());
    server.set_default_outcome(HandshakeOutcome::Hang);

    let pending = manager.clone();
    let connect = tokio::spawn(async move { pending.connect("t").await });
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(manager.timers().await.unwrap().connect_timeout);

    manager.disconnect().await;
    assert!(matches!(connect.await.unwrap(), Err(Error::Disconnected)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.timers().await.unwrap().any());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(server.handshake_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_leaves_no_timers_from_any_state() {
    // Connected.
    let (manager, _server) = setup(Config::default());
    manager.connect("t").await.unwrap();
    sleep(Duration::from_secs(26)).await;
    manager.disconnect().await;
    assert!(!manager.timers().await.unwrap().any());
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // Reconnecting.
    let (manager, server) = setup(Config::default());
    server.set_default_outcome(refused());
    let pending = manager.clone();
    let connect = tokio::spawn(async move { pending.connect("t").await });
    manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();
    assert!(manager.timers().await.unwrap().reconnect);
    manager.disconnect().await;
    assert!(!manager.timers().await.unwrap().any());
    assert!(matches!(connect.await.unwrap(), Err(Error::Disconnected)));

    // Already disconnected.
    manager.disconnect().await;
    assert!(!manager.timers().await.unwrap().any());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_measures_latency() {
    let (manager, _server) = setup(Config::default());
    manager.connect("t").await.unwrap();
    assert_eq!(manager.snapshot().latency, None);

    sleep(Duration::from_secs(26)).await;
    assert_eq!(manager.snapshot().latency, Some(Duration::ZERO));
    assert!(!manager.timers().await.unwrap().heartbeat_timeout);
    assert_eq!(manager.logger().metrics().heartbeat_timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_forces_reconnect() {
    let (manager, server) = setup(Config::default());
    server.set_auto_pong(false);
    manager.connect("t").await.unwrap();

    // Pings at 25s, 50s and 75s; only the first arms the 60s timeout.
    sleep(Duration::from_secs(84)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.timers().await.unwrap().heartbeat_timeout);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(manager.logger().metrics().heartbeat_timeouts, 1);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(server.handshake_count(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_server_close_reconnects_and_rejoins_rooms() {
    let (manager, mut server) = setup(Config::default());
    manager.join_room("lab-1").unwrap();
    manager.connect("t").await.unwrap();

    let mut link = server.next_link().await.unwrap();
    let join = link.recv_event("room:join").await.unwrap();
    assert_eq!(join.payload, json!({ "room": "lab-1" }));
    link.send("room:joined", &json!({ "room": "lab-1" })).unwrap();
    settle().await;
    assert!(manager.rooms().await.unwrap().joined.contains("lab-1"));

    link.close("server restart");
    manager
        .wait_for_state(ConnectionState::Reconnecting)
        .await
        .unwrap();
    assert!(manager.rooms().await.unwrap().joined.is_empty());
    manager
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    let mut relink = server.next_link().await.unwrap();
    assert!(relink.recv_event("room:join").await.is_some());
    assert_eq!(manager.snapshot().reconnect_attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_auth_error_disconnects_without_retry() {
    let (manager, mut server) = setup(Config::default());
    manager.connect("t").await.unwrap();
    let link = server.next_link().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _sub = manager.on::<crate::event::ServerError>("test", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    link.send("error", &json!({ "message": "jwt expired", "status": 401 }))
        .unwrap();
    manager
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(manager.snapshot().last_error.unwrap().is_auth());

    sleep(Duration::from_secs(120)).await;
    assert_eq!(server.handshake_count(), 1);
    assert!(matches!(
        manager.reconnect().await,
        Err(Error::NoCredential)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_recorded_without_dropping() {
    let (manager, mut server) = setup(Config::default());
    manager.connect("t").await.unwrap();
    let link = server.next_link().await.unwrap();

    link.send_error(Error::transport_code("socket hiccup", "ETIMEDOUT"))
        .unwrap();
    settle().await;
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_update_token_reestablishes_session() {
    let (manager, server) = setup(Config::default());
    manager.connect("old").await.unwrap();
    manager.update_token("new").unwrap();
    settle().await;
    manager
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    let tokens: Vec<String> = server
        .handshakes()
        .iter()
        .map(|h| h.token.as_str().to_string())
        .collect();
    assert_eq!(tokens, vec!["old", "new"]);
}

#[tokio::test(start_paused = true)]
async fn test_update_token_while_connecting_restarts_handshake() {
    let (manager, mut server) = setup(Config::default());
    server.script(HandshakeOutcome::AcceptAfter(Duration::from_secs(1)));
    server.script(HandshakeOutcome::AcceptAfter(Duration::from_secs(1)));

    let pending = manager.clone();
    let connect = tokio::spawn(async move { pending.connect("one").await });
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    manager.update_token("two").unwrap();
    connect.await.unwrap().unwrap();

    let tokens: Vec<String> = server
        .handshakes()
        .iter()
        .map(|h| h.token.as_str().to_string())
        .collect();
    assert_eq!(tokens, vec!["one", "two"]);
    let link = server.next_link().await.unwrap();
    assert_eq!(link.token.as_str(), "two");

    // The abandoned handshake never produces a session.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.snapshot().reconnect_attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_sweep_interval_keeps_actor_alive() {
    let mut config = Config::default();
    config.listeners.sweep_interval = Duration::ZERO;
    config.heartbeat.interval = Duration::ZERO;
    let (manager, _server) = setup(config);

    assert_eq!(manager.config().listeners.sweep_interval, MIN_TIMER_PERIOD);
    manager.connect("t").await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert!(manager.is_connected());
    assert!(manager.timers().await.unwrap().heartbeat_interval);
}

#[tokio::test(start_paused = true)]
async fn test_emit_when_disconnected_is_dropped() {
    let (manager, _server) = setup(Config::default());
    let result = manager.emit(OutboundCommand::JoinRoom {
        room: "lab".into(),
    });
    assert!(matches!(result, Err(Error::NotConnected)));
    assert_eq!(manager.logger().metrics().messages_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_emit_reaches_server() {
    let (manager, mut server) = setup(Config::default());
    manager.connect("t").await.unwrap();
    let mut link = server.next_link().await.unwrap();

    manager
        .send_hardware_command(HardwareCommand {
            command_id: "c1".into(),
            device_id: "relay-7".into(),
            action: "toggle".into(),
            params: json!({ "channel": 2 }),
        })
        .unwrap();

    let message = link.recv_event("hardware:command").await.unwrap();
    assert_eq!(message.payload["deviceId"], "relay-7");
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_order_survives_panicking_handler() {
    let (manager, mut server) = setup(Config::default());
    manager.connect("t").await.unwrap();
    let link = server.next_link().await.unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let first = calls.clone();
    let _a = manager.on::<VoltageUpdate>("a", move |p: &VoltagePayload| {
        first.lock().push(format!("a:{}", p.voltage));
    });
    let _b = manager.on::<VoltageUpdate>("b", |_| panic!("boom"));
    let third = calls.clone();
    let _c = manager.on::<VoltageUpdate>("c", move |p: &VoltagePayload| {
        third.lock().push(format!("c:{}", p.voltage));
    });

    link.send("voltage:update", &json!({ "deviceId": "d1", "voltage": 230.5 }))
        .unwrap();
    settle().await;

    assert_eq!(*calls.lock(), vec!["a:230.5", "c:230.5"]);
    assert_eq!(manager.logger().metrics().handler_panics, 1);
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_subscription_unregisters_handler() {
    let (manager, _server) = setup(Config::default());
    let sub = manager.on::<Alert>("panel", |_| {});
    let id = sub.listener_id().unwrap();
    assert!(manager.listeners().contains(EventKind::Alert, id));

    drop(sub);
    assert!(!manager.listeners().contains(EventKind::Alert, id));
    assert_eq!(manager.listeners().total_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_live_subscription_outlives_age_sweep() {
    let (manager, mut server) = setup(Config::default());
    manager.connect("t").await.unwrap();
    let link = server.next_link().await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _held = manager.on::<VoltageUpdate>("gauge", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let detached = manager.on::<Alert>("banner", |_| {});
    let detached_id = detached.listener_id().unwrap();
    detached.detach();

    // Past max_age (5 min) plus one sweep interval (60s).
    sleep(Duration::from_secs(7 * 60)).await;
    assert!(!manager.listeners().contains(EventKind::Alert, detached_id));
    assert_eq!(manager.listeners().listener_count(EventKind::VoltageUpdate), 1);

    link.send("voltage:update", &json!({ "deviceId": "d1", "voltage": 231.0 }))
        .unwrap();
    settle().await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_state_callback_replaced_by_id() {
    let (manager, _server) = setup(Config::default());
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let f = first.clone();
    let stale = manager.subscribe_to_state("view", move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });
    let s = second.clone();
    let _current = manager.subscribe_to_state("view", move |_| {
        s.fetch_add(1, Ordering::SeqCst);
    });
    // The stale disposer must not remove the replacement.
    drop(stale);

    manager.connect("t").await.unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert!(second.load(Ordering::SeqCst) >= 2);
}
