//! Per-session heartbeat state.
//!
//! `alive --ping--> awaiting pong --pong--> alive`. A check that comes due
//! while the previous one is still unanswered means the peer is gone.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// What the session should do when a check comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Send a ping and wait for the pong.
    Send,
    /// The last ping was never answered; drop the transport.
    Dead,
}

#[derive(Debug)]
pub struct LivenessMonitor {
    interval: Interval,
    awaiting_pong: bool,
}

impl LivenessMonitor {
    /// The first check fires one full `period` after creation.
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            awaiting_pong: false,
        }
    }

    /// Wait until the next check is due. Cancel-safe.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    pub fn on_pong(&mut self) {
        self.awaiting_pong = false;
    }

    /// Advance the state machine for a due check.
    pub fn on_tick(&mut self) -> Pulse {
        if self.awaiting_pong {
            return Pulse::Dead;
        }
        self.awaiting_pong = true;
        Pulse::Send
    }

    #[cfg(test)]
    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }
}
