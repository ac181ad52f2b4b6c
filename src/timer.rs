//! Turn countdown owned by the active player's client.
//!
//! Only one tick source exists per [`TurnTimer`]. Starting a new one aborts
//! the previous task and bumps the generation, so a tick that was already in
//! flight is recognised as stale and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// One period elapsed on the tick source identified by `generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    pub generation: u64,
}

struct TickSource {
    handle: JoinHandle<()>,
}

impl Drop for TickSource {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct TurnTimer {
    period: u64,
    turn_length: u64,
    seed: u64,
    elapsed_ticks: u64,
    remaining: u64,
    generation: u64,
    source: Option<TickSource>,
    tick_tx: mpsc::UnboundedSender<TimerTick>,
}

impl TurnTimer {
    pub fn new(period: Duration, tick_tx: mpsc::UnboundedSender<TimerTick>) -> Self {
        Self {
            period: (period.as_millis() as u64).max(1),
            turn_length: 0,
            seed: 0,
            elapsed_ticks: 0,
            remaining: 0,
            generation: 0,
            source: None,
            tick_tx,
        }
    }

    /// Sets the per-turn budget. Stops any running countdown.
    pub fn configure(&mut self, turn_length: u64) {
        self.stop();
        self.turn_length = turn_length;
        self.seed = turn_length;
        self.elapsed_ticks = 0;
        self.remaining = turn_length;
    }

    pub fn turn_length(&self) -> u64 {
        self.turn_length
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.source.is_some()
    }

    /// Begins a fresh turn at the full turn length.
    pub fn start_turn(&mut self) {
        self.resume_from(self.turn_length);
    }

    /// Continues counting down from `remaining`, as after a pause.
    pub fn resume_from(&mut self, remaining: u64) {
        self.stop();
        self.seed = self.clamp(remaining);
        self.elapsed_ticks = 0;
        self.remaining = self.seed;
        if self.remaining == 0 {
            return;
        }
        self.source = Some(self.spawn_source());
    }

    /// Stops the tick source; the remaining value is kept.
    pub fn stop(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!(generation = self.generation, "tick source stopped");
        }
        self.generation += 1;
    }

    /// Overwrites the displayed value without running a tick source.
    pub fn set_remaining(&mut self, value: u64) -> u64 {
        self.remaining = self.clamp(value);
        self.remaining
    }

    /// Applies one tick. Returns the new remaining value, or `None` for a
    /// stale tick from a cancelled source.
    pub fn tick(&mut self, tick: TimerTick) -> Option<u64> {
        if tick.generation != self.generation || self.source.is_none() {
            return None;
        }
        self.elapsed_ticks += 1;
        let elapsed = self.elapsed_ticks.saturating_mul(self.period);
        self.remaining = self.clamp(self.seed.saturating_sub(elapsed));
        if self.remaining == 0 {
            self.stop();
        }
        Some(self.remaining)
    }

    fn clamp(&self, value: u64) -> u64 {
        value.min(self.turn_length)
    }

    fn spawn_source(&self) -> TickSource {
        let generation = self.generation;
        let period = Duration::from_millis(self.period);
        let tick_tx = self.tick_tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick_tx.send(TimerTick { generation }).is_err() {
                    return;
                }
            }
        });
        tracing::debug!(generation, "tick source started");
        TickSource { handle }
    }
}
