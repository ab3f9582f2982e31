//! 连接在应用层的所有者。
//!
//! 提供者为进程构建唯一的 [`ConnectionManager`]，使其与凭据存储保持同步，并把连接故障
//! 转换为用户可见的内容：提示、跳转登录以及状态栏。
//!
//! Application-level owner of the connection.
//!
//! The provider builds the single [`ConnectionManager`] for the process, keeps it
//! in step with the credential store, and turns connection failures into what the
//! user sees: toasts, a redirect to login, a status line.

mod recording;

pub use recording::{RecordingNavigator, RecordingNotifier};

use crate::{
    auth::{AuthToken, CredentialStore},
    classify::ClassifiedError,
    config::{Config, ProviderConfig},
    event::{Alert, AlertSeverity, NotificationLevel},
    manager::{ConnectionManager, ConnectionSnapshot, ConnectionState},
    subscription::Subscription,
    transport::Transport,
};
use std::{future::pending, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, sleep_until},
};
use tracing::{debug, info, warn};

/// 将用户引导到登录流程。
///
/// Sends the user to the sign-in flow.
pub trait Navigator: Send + Sync + 'static {
    fn redirect_to_login(&self);
}

/// 向用户展示一条临时消息。
///
/// Shows a transient message to the user.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, toast: Toast);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Toast {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// 提供者向应用其余部分暴露的信息。
///
/// What the provider exposes to the rest of the application.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatus {
    pub state: ConnectionState,
    pub error: Option<ClassifiedError>,
    pub attempts: u32,
    pub latency: Option<Duration>,
}

impl Default for ProviderStatus {
    fn default() -> Self {
        Self::from(&ConnectionSnapshot::default())
    }
}

impl From<&ConnectionSnapshot> for ProviderStatus {
    fn from(snapshot: &ConnectionSnapshot) -> Self {
        Self {
            state: snapshot.state,
            error: snapshot.last_error.clone(),
            attempts: snapshot.reconnect_attempt,
            latency: snapshot.latency,
        }
    }
}

impl ProviderStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// 在应用外壳的生命周期内拥有连接。
///
/// Owns the connection for the lifetime of the application shell.
pub struct ConnectionProvider {
    manager: ConnectionManager,
    status_rx: watch::Receiver<ProviderStatus>,
    supervisor: Option<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("status", &*self.status_rx.borrow())
            .finish()
    }
}

impl ConnectionProvider {
    /// 构建连接管理器并开始监督它。必须在tokio运行时内调用。
    ///
    /// Builds the connection manager and starts supervising it.
    /// Must be called from within a tokio runtime.
    pub fn mount(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let manager = ConnectionManager::new(config, transport);
        let provider_config = manager.config().provider.clone();
        let (status_tx, status_rx) = watch::channel(ProviderStatus::default());
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();

        let mut subscriptions = vec![manager.subscribe_to_state("provider", move |snapshot| {
            let _ = snapshot_tx.send(snapshot.clone());
        })];

        if provider_config.surface_critical_alerts {
            let alerts = notifier.clone();
            subscriptions.push(manager.on::<Alert>("provider", move |alert| {
                if alert.severity == AlertSeverity::Critical {
                    alerts.notify(Toast::new(
                        NotificationLevel::Error,
                        "Critical alert",
                        alert.message.clone(),
                    ));
                }
            }));
        }

        let supervisor = Supervisor {
            manager: manager.clone(),
            store,
            navigator,
            notifier,
            config: provider_config,
            status_tx,
            snapshots: snapshot_rx,
            attempted: None,
            last_state: ConnectionState::Disconnected,
            transient_reported: false,
            auth_handled: false,
            redirect_at: None,
        };
        info!("Connection provider mounted");

        Self {
            manager,
            status_rx,
            supervisor: Some(tokio::spawn(supervisor.run())),
            subscriptions,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn status(&self) -> ProviderStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ProviderStatus> {
        self.status_rx.clone()
    }

    /// 停止监督并断开连接。
    ///
    /// Stops supervision and disconnects.
    pub async fn unmount(mut self) {
        self.stop();
        self.manager.disconnect().await;
        info!("Connection provider unmounted");
    }

    fn stop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
        self.subscriptions.clear();
    }
}

impl Drop for ConnectionProvider {
    fn drop(&mut self) {
        if self.supervisor.is_some() {
            self.stop();
            self.manager.request_disconnect();
        }
    }
}

struct Supervisor {
    manager: ConnectionManager,
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    config: ProviderConfig,
    status_tx: watch::Sender<ProviderStatus>,
    snapshots: mpsc::UnboundedReceiver<ConnectionSnapshot>,
    /// The credential the last connect was started with.
    attempted: Option<AuthToken>,
    last_state: ConnectionState,
    transient_reported: bool,
    auth_handled: bool,
    redirect_at: Option<Instant>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

impl Supervisor {
    async fn run(mut self) {
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => self.poll_credentials(),
                Some(snapshot) = self.snapshots.recv() => self.on_snapshot(snapshot),
                _ = sleep_until_opt(self.redirect_at) => {
                    self.redirect_at = None;
                    info!("Redirecting to login");
                    self.navigator.redirect_to_login();
                }
            }
        }
    }

    /// 新凭据出现时连接，凭据变化时轮换，凭据消失时断开。
    ///
    /// Connects when a new credential shows up, rotates it when it changes, and
    /// disconnects when it disappears.
    fn poll_credentials(&mut self) {
        let Some(token) = self.store.get() else {
            if self.attempted.take().is_some() {
                info!("Credential removed, disconnecting");
                self.manager.request_disconnect();
            }
            return;
        };

        if self.attempted.as_ref() == Some(&token) {
            return;
        }
        self.attempted = Some(token.clone());
        self.auth_handled = false;

        if self.manager.state() == ConnectionState::Disconnected {
            debug!("Credential available, connecting");
            let manager = self.manager.clone();
            tokio::spawn(async move {
                if let Err(err) = manager.connect(token).await {
                    debug!(error = %err, "Provider connect did not succeed");
                }
            });
        } else if let Err(err) = self.manager.update_token(token) {
            warn!(error = %err, "Failed to rotate credential");
        }
    }

    fn on_snapshot(&mut self, snapshot: ConnectionSnapshot) {
        let previous = std::mem::replace(&mut self.last_state, snapshot.state);
        self.status_tx.send_replace(ProviderStatus::from(&snapshot));

        if snapshot.state == ConnectionState::Connected {
            self.transient_reported = false;
            self.auth_handled = false;
            return;
        }

        let Some(error) = &snapshot.last_error else {
            return;
        };

        if error.is_auth() {
            if snapshot.state == ConnectionState::Disconnected && !self.auth_handled {
                self.handle_auth_failure(error);
            }
        } else if snapshot.state == ConnectionState::Reconnecting
            && snapshot.reconnect_attempt >= self.config.transient_error_threshold
            && !self.transient_reported
        {
            self.transient_reported = true;
            self.notifier.notify(Toast::new(
                NotificationLevel::Warning,
                "Connection problem",
                error.user_message(),
            ));
        } else if snapshot.state == ConnectionState::Disconnected
            && previous != ConnectionState::Disconnected
            && snapshot.reconnect_attempt > 0
        {
            self.notifier.notify(Toast::new(
                NotificationLevel::Error,
                "Connection lost",
                "Unable to reach the server. Reconnect to try again.",
            ));
        }
    }

    /// 丢弃凭据、通知用户，并安排跳转登录。
    ///
    /// Drops the credential, tells the user, and schedules the login redirect.
    fn handle_auth_failure(&mut self, error: &ClassifiedError) {
        warn!(message = %error.message, "Authentication lost, clearing credential");
        self.auth_handled = true;
        self.attempted = None;
        self.store.clear();
        self.notifier.notify(Toast::new(
            NotificationLevel::Error,
            "Session expired",
            error.user_message(),
        ));
        self.redirect_at = Some(Instant::now() + self.config.reauth_redirect_delay);
    }
}
