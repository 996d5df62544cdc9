//! Bounded calls across a collaborator boundary.

use std::fmt::Display;
use std::future::Future;

use thiserror::Error;
use tracing::{debug, warn};

use crate::boundary::{Boundary, Transient};
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::GuardConfig;

/// Why a guarded call did not produce a value.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// Transient failures outlasted the retry budget; replay later.
    #[error("{boundary} call deferred after {attempts} attempts: {reason}")]
    Deferred {
        boundary: Boundary,
        attempts: u32,
        reason: String,
    },

    /// The circuit is open; the collaborator was not contacted.
    #[error("{0} circuit open")]
    CircuitOpen(Boundary),

    /// The collaborator answered with a definitive error.
    #[error(transparent)]
    Rejected(E),
}

impl<E> GuardError<E> {
    /// Deferred and open-circuit outcomes are both retried on a later trigger.
    pub fn is_deferred(&self) -> bool {
        !matches!(self, GuardError::Rejected(_))
    }
}

/// Wraps every call to one collaborator with a per-attempt timeout,
/// exponential backoff between attempts and a circuit breaker.
pub struct BoundaryGuard {
    boundary: Boundary,
    config: GuardConfig,
    breaker: CircuitBreaker,
}

impl BoundaryGuard {
    pub fn new(boundary: Boundary, config: GuardConfig) -> Self {
        let breaker = CircuitBreaker::new(boundary, config.breaker.clone());
        Self {
            boundary,
            config,
            breaker,
        }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `call`, retrying transient failures within the configured budget.
    pub async fn call<T, E, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            if !self.breaker.allow_request() {
                debug!(boundary = %self.boundary, operation, "Circuit open, skipping call");
                return Err(GuardError::CircuitOpen(self.boundary));
            }

            match tokio::time::timeout(retry.call_timeout, call()).await {
                Ok(Ok(value)) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(err)) if !err.is_transient() => {
                    // The collaborator is up and said no.
                    self.breaker.record_success();
                    return Err(GuardError::Rejected(err));
                }
                Ok(Err(err)) => {
                    self.breaker.record_failure();
                    last_reason = err.to_string();
                }
                Err(_) => {
                    self.breaker.record_failure();
                    last_reason = format!("timed out after {:?}", retry.call_timeout);
                }
            }

            warn!(
                boundary = %self.boundary,
                operation,
                attempt,
                max_attempts,
                reason = %last_reason,
                "Boundary call failed"
            );
            if attempt < max_attempts {
                tokio::time::sleep(retry.backoff_for(attempt)).await;
            }
        }

        Err(GuardError::Deferred {
            boundary: self.boundary,
            attempts: max_attempts,
            reason: last_reason,
        })
    }
}
