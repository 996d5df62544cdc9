//! Circuit breaker for collaborator boundaries.
//!
//! Stops hammering a collaborator that keeps failing: after enough
//! consecutive failures calls are refused outright until the reset timeout
//! passes, then a limited number of probe calls decide whether to close.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::boundary::Boundary;
use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct Transition {
    state: CircuitState,
    opened_at: Option<Instant>,
    at: DateTime<Utc>,
}

pub struct CircuitBreaker {
    boundary: Boundary,
    config: CircuitBreakerConfig,
    transition: RwLock<Transition>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_requests: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(boundary: Boundary, config: CircuitBreakerConfig) -> Self {
        Self {
            boundary,
            config,
            transition: RwLock::new(Transition {
                state: CircuitState::Closed,
                opened_at: None,
                at: Utc::now(),
            }),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_requests: AtomicU32::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Transition> {
        self.transition.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Transition> {
        self.transition.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn state(&self) -> CircuitState {
        self.check_timeout();
        self.read().state
    }

    pub fn allow_request(&self) -> bool {
        self.check_timeout();

        match self.read().state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                let current = self.half_open_requests.fetch_add(1, Ordering::SeqCst);
                current < self.config.half_open_max_requests
            }
        }
    }

    pub fn record_success(&self) {
        let mut transition = self.write();

        match transition.state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    info!(
                        boundary = %self.boundary,
                        successes,
                        "Circuit closing, collaborator recovered"
                    );
                    self.transition_to(&mut transition, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut transition = self.write();

        match transition.state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(
                        boundary = %self.boundary,
                        failures,
                        "Circuit opening after repeated failures"
                    );
                    self.transition_to(&mut transition, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(boundary = %self.boundary, "Circuit re-opening, probe call failed");
                self.transition_to(&mut transition, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut transition = self.write();
        self.transition_to(&mut transition, CircuitState::Closed);
    }

    pub fn last_transition(&self) -> DateTime<Utc> {
        self.read().at
    }

    fn check_timeout(&self) {
        let elapsed = {
            let transition = self.read();
            match (transition.state, transition.opened_at) {
                (CircuitState::Open, Some(opened_at)) => opened_at.elapsed(),
                _ => return,
            }
        };

        if elapsed >= self.config.reset_timeout {
            let mut transition = self.write();
            if transition.state == CircuitState::Open {
                info!(boundary = %self.boundary, "Circuit half-open, allowing probe calls");
                self.transition_to(&mut transition, CircuitState::HalfOpen);
            }
        }
    }

    fn transition_to(&self, transition: &mut Transition, new_state: CircuitState) {
        transition.state = new_state;
        transition.at = Utc::now();

        match new_state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
                transition.opened_at = None;
            }
            CircuitState::Open => {
                self.success_count.store(0, Ordering::SeqCst);
                self.half_open_requests.store(0, Ordering::SeqCst);
                transition.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                self.success_count.store(0, Ordering::SeqCst);
                self.half_open_requests.store(0, Ordering::SeqCst);
            }
        }
    }
}
