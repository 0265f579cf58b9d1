use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{parse_message, ServerMessage, CLEAN_CLOSE};
use crate::domain::{ConnectionState, ServerCredentials};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const RECONNECT_CEILING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`-th consecutive reconnect (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(1 << exponent)
            }
        };
        delay.min(RECONNECT_CEILING)
    }
}

/// Work the owner of the manager has to carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEffect {
    OpenChannel { generation: u64, url: Url },
    CloseChannel,
    ScheduleReconnect { token: u64, delay: Duration },
    CancelReconnect,
    StateChanged(ConnectionState),
    Notify { title: &'static str, message: String },
}

/// Channel lifecycle state machine. Does no I/O itself: every input returns
/// the effects to apply, in order.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    state: ConnectionState,
    credentials: Option<ServerCredentials>,
    policy: ReconnectPolicy,
    generation: u64,
    channel_open: bool,
    pending_reconnect: Option<u64>,
    next_timer_token: u64,
    reconnect_attempts: u32,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn set_policy(&mut self, policy: ReconnectPolicy) {
        self.policy = policy;
    }

    /// Replaces credentials and starts over, whatever the current state.
    pub fn configure(&mut self, credentials: Option<ServerCredentials>) -> Vec<ConnectionEffect> {
        let mut effects = Vec::new();
        self.cancel_reconnect(&mut effects);
        self.close_channel(&mut effects);
        self.reconnect_attempts = 0;
        self.credentials = credentials;

        match &self.credentials {
            Some(credentials) => {
                info!(server = %credentials.server_address, "credentials configured");
                self.begin_attempt(&mut effects);
            }
            None => {
                info!("no server settings configured");
                self.transition(ConnectionState::Disconnected, &mut effects);
            }
        }
        effects
    }

    pub fn connect(&mut self) -> Vec<ConnectionEffect> {
        let mut effects = Vec::new();
        if self.state == ConnectionState::AuthFailed {
            warn!("not reconnecting: credentials were rejected");
            return effects;
        }
        if self.credentials.is_none() {
            debug!("cannot connect: missing server address or API key");
            return effects;
        }
        self.begin_attempt(&mut effects);
        effects
    }

    pub fn on_open(&mut self, generation: u64) -> Vec<ConnectionEffect> {
        let mut effects = Vec::new();
        if self.is_stale(generation) {
            return effects;
        }
        info!(generation, "channel connected");
        self.cancel_reconnect(&mut effects);
        self.reconnect_attempts = 0;
        self.transition(ConnectionState::Connected, &mut effects);
        effects
    }

    /// Parses an inbound frame. Status and settings pushes are handed back for
    /// the hub; auth errors are consumed here.
    pub fn on_message(
        &mut self,
        generation: u64,
        text: &str,
    ) -> (Vec<ConnectionEffect>, Option<ServerMessage>) {
        let mut effects = Vec::new();
        if self.is_stale(generation) {
            return (effects, None);
        }

        let message = match parse_message(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(generation, "dropping server message: {}", e);
                return (effects, None);
            }
        };
        debug!(generation, kind = message.kind(), "server message received");

        match message {
            ServerMessage::AuthError { message } => {
                warn!("authentication failed: {}", message);
                self.cancel_reconnect(&mut effects);
                self.close_channel(&mut effects);
                self.transition(ConnectionState::AuthFailed, &mut effects);
                let message = if message.is_empty() {
                    "Invalid API key".to_string()
                } else {
                    message
                };
                effects.push(ConnectionEffect::Notify {
                    title: "Authentication failed",
                    message,
                });
                (effects, None)
            }
            other => (effects, Some(other)),
        }
    }

    pub fn on_error(&mut self, generation: u64, error: &str) -> Vec<ConnectionEffect> {
        let mut effects = Vec::new();
        if self.is_stale(generation) {
            return effects;
        }
        warn!(generation, "channel error: {}", error);
        self.transition(ConnectionState::Disconnected, &mut effects);
        effects
    }

    pub fn on_close(&mut self, generation: u64, code: Option<u16>) -> Vec<ConnectionEffect> {
        let mut effects = Vec::new();
        if self.is_stale(generation) {
            return effects;
        }
        info!(generation, ?code, "channel disconnected");
        self.channel_open = false;
        self.transition(ConnectionState::Disconnected, &mut effects);
        self.schedule_reconnect(code, &mut effects);
        effects
    }

    pub fn on_reconnect_timer(&mut self, token: u64) -> Vec<ConnectionEffect> {
        if self.pending_reconnect != Some(token) {
            return Vec::new();
        }
        self.pending_reconnect = None;
        info!(attempt = self.reconnect_attempts, "attempting to reconnect");
        self.connect()
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation != self.generation || !self.channel_open
    }

    fn begin_attempt(&mut self, effects: &mut Vec<ConnectionEffect>) {
        let Some(credentials) = &self.credentials else {
            return;
        };
        let url = credentials.channel_url();
        debug!(url = %credentials.redacted_channel_url(), "opening channel");

        self.cancel_reconnect(effects);
        self.close_channel(effects);
        self.generation += 1;
        self.channel_open = true;
        self.transition(ConnectionState::Connecting, effects);
        effects.push(ConnectionEffect::OpenChannel {
            generation: self.generation,
            url,
        });
    }

    fn schedule_reconnect(&mut self, code: Option<u16>, effects: &mut Vec<ConnectionEffect>) {
        if self.pending_reconnect.is_some() {
            return;
        }
        if code != Some(CLEAN_CLOSE) && self.reconnect_attempts == 0 {
            effects.push(ConnectionEffect::Notify {
                title: "Disconnected",
                message: "Reconnecting...".to_string(),
            });
        }

        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.next_timer_token += 1;
        self.pending_reconnect = Some(self.next_timer_token);
        effects.push(ConnectionEffect::ScheduleReconnect {
            token: self.next_timer_token,
            delay: self.policy.delay_for(self.reconnect_attempts),
        });
    }

    fn cancel_reconnect(&mut self, effects: &mut Vec<ConnectionEffect>) {
        if self.pending_reconnect.take().is_some() {
            effects.push(ConnectionEffect::CancelReconnect);
        }
    }

    fn close_channel(&mut self, effects: &mut Vec<ConnectionEffect>) {
        if self.channel_open {
            self.channel_open = false;
            effects.push(ConnectionEffect::CloseChannel);
        }
    }

    fn transition(&mut self, next: ConnectionState, effects: &mut Vec<ConnectionEffect>) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "connection state changed");
            self.state = next;
            effects.push(ConnectionEffect::StateChanged(next));
        }
    }
}
