use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

/// Consecutive-failure circuit breaker with a single half-open probe.
///
/// After `failure_threshold` consecutive classified failures the breaker
/// opens for `cooldown`; while open every admission is refused. Once the
/// cool-down elapses a single probe call is admitted; its outcome closes or
/// re-opens the circuit. Every [`Admission`] must resolve one way or the
/// other; one dropped without an outcome re-opens an in-flight probe so the
/// breaker can never stick in the half-open window.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<State>,
}

/// Permission for one call, handed out by [`CircuitBreaker::try_admit`].
///
/// Resolve with [`succeeded`] or [`failed`]; dropping an unresolved probe
/// admission (the call was cancelled or never dispatched) re-opens the
/// circuit for another cool-down.
///
/// [`succeeded`]: Admission::succeeded
/// [`failed`]: Admission::failed
pub(crate) struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl Admission<'_> {
    pub(crate) fn succeeded(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    pub(crate) fn failed(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.reopen("probe abandoned");
        }
    }
}

impl CircuitBreaker {
    pub(crate) fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Admits a call if the circuit allows one right now. In the half-open
    /// window only the first caller gets through; the rest are refused until
    /// the probe resolves.
    pub(crate) fn try_admit(&self) -> Option<Admission<'_>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Closed { .. } => Some(Admission {
                breaker: self,
                probe: false,
                resolved: false,
            }),
            State::Open { until } => {
                if Instant::now() >= until {
                    debug!("circuit cool-down elapsed, admitting probe");
                    *state = State::HalfOpen;
                    Some(Admission {
                        breaker: self,
                        probe: true,
                        resolved: false,
                    })
                } else {
                    None
                }
            }
            State::HalfOpen => None,
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, State::HalfOpen) {
            debug!("probe succeeded, closing circuit");
        }
        *state = State::Closed {
            consecutive_failures: 0,
        };
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    warn!(
                        failures,
                        cooldown = ?self.cooldown,
                        "circuit breaker opened"
                    );
                    *state = State::Open {
                        until: Instant::now() + self.cooldown,
                    };
                } else {
                    *state = State::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            State::HalfOpen => {
                warn!(cooldown = ?self.cooldown, "probe failed, circuit re-opened");
                *state = State::Open {
                    until: Instant::now() + self.cooldown,
                };
            }
            State::Open { .. } => {}
        }
    }

    fn reopen(&self, why: &'static str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, State::HalfOpen) {
            debug!(why, cooldown = ?self.cooldown, "circuit re-opened");
            *state = State::Open {
                until: Instant::now() + self.cooldown,
            };
        }
    }
}
