//! tests/common/harness.rs
#![allow(dead_code)]

use realtime_link::{
    Config, ConnectionManager,
    transport::{MemoryTransport, ServerHandle, ServerLink},
};
use serde::Serialize;
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "realtime_link=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .init();
    });
}

/// A manager wired to an in-process server.
pub struct TestHarness {
    pub manager: ConnectionManager,
    pub server: ServerHandle,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::new("ws://test.local"))
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let (transport, server) = MemoryTransport::pair();
        let manager = ConnectionManager::new(config, Arc::new(transport));
        Self { manager, server }
    }

    /// Connects and returns the server side of the new session.
    pub async fn connect(&mut self, token: &str) -> ServerLink {
        self.manager.connect(token).await.unwrap();
        self.server.next_link().await.unwrap()
    }
}

/// Pushes one event from the server.
pub fn push<P: Serialize>(link: &ServerLink, event: &str, payload: &P) {
    link.send(event, payload).unwrap();
}

/// Lets spawned tasks run without advancing the paused clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}
