//! 定义连接状态机。
//!
//! Defines the connection state machine.

use std::fmt;
use tracing::{trace, warn};

/// 进程级连接的状态。
/// The state of the process-wide connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// 初始与终止状态。没有任何定时器处于激活状态。
    /// Initial and terminal state. Nothing is armed.
    Disconnected,
    /// 握手进行中，连接超时已激活。
    /// A handshake is in flight and the connect timeout is armed.
    Connecting,
    /// 会话已打开，心跳正在运行。
    /// The session is open and the heartbeat is running.
    Connected,
    /// 正在等待重连定时器。
    /// Waiting for the reconnect timer.
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected transition, returned by [`StateMachine::transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// 守护连接状态之间允许的转换边。
///
/// Guards the allowed edges between connection states.
#[derive(Debug)]
pub(crate) struct StateMachine {
    current: ConnectionState,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            current: ConnectionState::Disconnected,
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.current
    }

    /// 尝试一次状态转换；若该转换边不被允许，状态保持不变。
    ///
    /// Attempts a transition; the state is left unchanged when the edge is not allowed.
    pub(crate) fn transition_to(
        &mut self,
        new_state: ConnectionState,
    ) -> Result<ConnectionState, InvalidTransition> {
        let old_state = self.current;
        if Self::is_valid_transition(old_state, new_state) {
            self.current = new_state;
            trace!(from = %old_state, to = %new_state, "State transition successful");
            Ok(old_state)
        } else {
            warn!(
                current_state = %old_state,
                attempted_state = %new_state,
                "Invalid state transition attempted"
            );
            Err(InvalidTransition {
                from: old_state,
                to: new_state,
            })
        }
    }

    pub(crate) fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_only_documented_edges_are_allowed() {
        let all = [Disconnected, Connecting, Connected, Reconnecting];
        let allowed = [
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connecting, Reconnecting),
            (Connecting, Disconnected),
            (Connected, Reconnecting),
            (Connected, Disconnected),
            (Reconnecting, Connecting),
            (Reconnecting, Disconnected),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    StateMachine::is_valid_transition(from, to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_rejected_transition_keeps_state() {
        let mut machine = StateMachine::new();
        assert_eq!(
            machine.transition_to(Connected),
            Err(InvalidTransition {
                from: Disconnected,
                to: Connected
            })
        );
        assert_eq!(machine.current(), Disconnected);
        assert_eq!(machine.transition_to(Connecting), Ok(Disconnected));
        assert_eq!(machine.current(), Connecting);
    }
}
