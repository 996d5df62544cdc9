//! Replay of deferred events.
//!
//! A deferred event is not retried in a loop. It waits here until a later
//! trigger finds it due, with the delay growing per attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::event::LifecycleEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQueueConfig {
    /// Attempts per event, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            multiplier: 2,
        }
    }
}

impl RetryQueueConfig {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    pub event: LifecycleEvent,
    /// Attempts made so far.
    pub attempt: u32,
    pub retry_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferral {
    Scheduled { attempt: u32, retry_at: DateTime<Utc> },
    /// Out of attempts; the event was dropped.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    config: RetryQueueConfig,
    pending: VecDeque<PendingEvent>,
}

impl RetryQueue {
    pub fn new(config: RetryQueueConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
        }
    }

    /// Queue `event` after its `attempt`-th failure. An identical event
    /// already waiting is replaced.
    pub fn defer(
        &mut self,
        event: LifecycleEvent,
        attempt: u32,
        reason: String,
        now: DateTime<Utc>,
    ) -> Deferral {
        self.pending.retain(|p| p.event != event);
        if attempt >= self.config.max_attempts {
            return Deferral::Exhausted { attempts: attempt };
        }
        let delay = chrono::Duration::from_std(self.config.backoff_for(attempt))
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let retry_at = now + delay;
        self.pending.push_back(PendingEvent {
            event,
            attempt,
            retry_at,
            reason,
        });
        Deferral::Scheduled { attempt, retry_at }
    }

    /// Remove and return events due at `now`, oldest first.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<PendingEvent> {
        let (due, waiting): (VecDeque<_>, VecDeque<_>) =
            self.pending.drain(..).partition(|p| p.retry_at <= now);
        self.pending = waiting;
        due.into()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
