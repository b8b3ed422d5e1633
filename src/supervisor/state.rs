use std::fmt;

/// Lifecycle of the supervised push channel.
///
/// Owned by the supervisor task and published through a watch channel;
/// observers can read the latest value or await transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Built but not yet started.
    Idle,
    /// No usable credentials; polling the store until a login appears.
    WaitingForCredentials,
    /// Handshake in progress (with retries).
    Connecting,
    /// Channel live, events flowing.
    Connected,
    /// Channel lost; tearing down and reconnecting.
    Reconnecting,
    /// Stop requested; tearing down for good.
    ShuttingDown,
    /// Supervisor task has exited.
    Closed,
}

impl ConnectionState {
    /// Stable lowercase name, used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::WaitingForCredentials => "waiting_for_credentials",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ShuttingDown => "shutting_down",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
