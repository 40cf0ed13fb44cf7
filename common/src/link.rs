//! Escalating recovery for the uplink connection.

use crate::types::Timestamp;

pub const ADDRESS_TIMEOUT_MS: u64 = 60_000;
pub const MAX_RECONNECTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// How long the link may stay without an address after connecting.
    pub address_timeout_ms: u64,
    /// Longest gap between successful exchanges; 0 disables the check.
    pub grace_ms: u64,
    pub max_reconnects: u8,
}

impl RecoveryPolicy {
    pub fn with_grace(grace_ms: u64) -> Self {
        Self {
            address_timeout_ms: ADDRESS_TIMEOUT_MS,
            grace_ms,
            max_reconnects: MAX_RECONNECTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Keep the connection and try again on the next send.
    Retry,
    /// Drop and re-establish the connection.
    Reconnect,
    /// Tear the link down completely and start over.
    Reinitialize,
}

impl RecoveryStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Reconnect => "reconnect",
            Self::Reinitialize => "reinitialize",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkRecovery {
    policy: RecoveryPolicy,
    connected_at: Timestamp,
    last_success: Timestamp,
    reconnects: u8,
}

impl LinkRecovery {
    pub fn new(policy: RecoveryPolicy, now: Timestamp) -> Self {
        Self {
            policy,
            connected_at: now,
            last_success: now,
            reconnects: 0,
        }
    }

    pub fn reconnects(&self) -> u8 {
        self.reconnects
    }

    pub fn on_connected(&mut self, now: Timestamp) {
        self.connected_at = now;
    }

    pub fn on_success(&mut self, now: Timestamp) {
        self.last_success = now;
        self.reconnects = 0;
    }

    /// Decides what to do after a failed exchange. The caller performs the
    /// step; counters are already updated for it.
    pub fn on_failure(&mut self, now: Timestamp, has_address: bool) -> RecoveryStep {
        let address_lost =
            !has_address && now.saturating_sub(self.connected_at) > self.policy.address_timeout_ms;
        let silent = self.policy.grace_ms > 0
            && now.saturating_sub(self.last_success) > self.policy.grace_ms;
        if !address_lost && !silent {
            return RecoveryStep::Retry;
        }

        if self.reconnects < self.policy.max_reconnects {
            self.reconnects += 1;
            self.last_success = now;
            self.connected_at = now;
            RecoveryStep::Reconnect
        } else {
            self.reconnects = 0;
            self.last_success = now;
            self.connected_at = now;
            RecoveryStep::Reinitialize
        }
    }
}
