use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// What to do with a connection when the heartbeat interval elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Peer answered the last ping; send another
    Ping,
    /// No pong since the last ping; drop the connection
    Terminate,
}

/// Liveness flag of one connection
#[derive(Debug, Clone)]
pub struct Heartbeat {
    alive: bool,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self { alive: true }
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn on_pong(&mut self) {
        self.alive = true;
    }

    pub fn on_tick(&mut self) -> HeartbeatAction {
        if !self.alive {
            return HeartbeatAction::Terminate;
        }
        self.alive = false;
        HeartbeatAction::Ping
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Heartbeat timer for one connection. The first tick lands one `period`
/// after connect; a late tick pushes the next one back instead of bursting.
pub fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
