#![deny(clippy::expect_used, clippy::unwrap_used)]

//! A realtime telemetry link: one supervised, self-healing connection per
//! process, with typed events, bounded listener bookkeeping and throughput
//! control for high-frequency streams.
//!
//! The layers, bottom up:
//!
//! - [`transport`]: the session seam, plus an in-process implementation.
//! - [`manager`]: the connection state machine (connect, heartbeat, backoff).
//! - [`provider`]: ties the manager to a credential store and to user-facing
//!   feedback.
//! - [`hooks`]: consumer views built from [`buffer`] and [`throttle`].
//!
//! 实时遥测链路：每个进程一个受监督、可自愈的连接，提供带类型的事件、有界的监听器
//! 簿记，以及针对高频数据流的吞吐控制。

pub mod auth;
pub mod buffer;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod hooks;
pub mod listener;
pub mod logger;
pub mod manager;
pub mod provider;
pub mod subscription;
pub mod throttle;
pub mod transport;

pub use auth::{AuthToken, CredentialStore, MemoryCredentialStore};
pub use classify::{ClassifiedError, ErrorKind, RecoveryAction, classify};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventKind, InboundEvent, OutboundCommand};
pub use listener::{ListenerId, ListenerMemoryManager, OwnerId};
pub use logger::ConnectionLogger;
pub use manager::{ArmedTimers, ConnectionManager, ConnectionSnapshot, ConnectionState};
pub use provider::{ConnectionProvider, Navigator, Notifier, ProviderStatus, Toast};
pub use subscription::Subscription;
pub use transport::{Transport, TransportMode};
