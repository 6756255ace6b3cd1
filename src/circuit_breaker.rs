//! Circuit breaker wrapping the Producer's broker publishes (SPEC_FULL.md §4.H).
//!
//! State timing follows the teacher's `EdgeFallbackController`: an atomic
//! state flag plus an `RwLock<Instant>` marking the last transition, checked
//! cheaply on every call instead of running a background timer task.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    threshold: u32,
    timeout: Duration,
    last_transition: RwLock<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            threshold,
            timeout,
            last_transition: RwLock::new(Instant::now()),
        }
    }

    fn raw_state(&self) -> u8 {
        self.state.load(Ordering::Relaxed)
    }

    /// Should a publish attempt be allowed against the broker right now?
    /// Closed and HalfOpen allow an attempt; Open short-circuits unless the
    /// cooldown has elapsed, in which case it transitions to HalfOpen first.
    pub fn allow_attempt(&self) -> bool {
        match self.raw_state() {
            CLOSED => true,
            HALF_OPEN => true,
            OPEN => {
                let elapsed = self.last_transition.read().elapsed();
                if elapsed >= self.timeout {
                    self.state.store(HALF_OPEN, Ordering::Relaxed);
                    *self.last_transition.write() = Instant::now();
                    true
                } else {
                    false
                }
            }
            _ => unreachable!(),
        }
    }

    pub fn state(&self) -> State {
        match self.raw_state() {
            CLOSED => State::Closed,
            OPEN => State::Open,
            HALF_OPEN => State::HalfOpen,
            _ => unreachable!(),
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.raw_state() != CLOSED {
            self.state.store(CLOSED, Ordering::Relaxed);
            *self.last_transition.write() = Instant::now();
        }
    }

    pub fn record_failure(&self) {
        match self.raw_state() {
            HALF_OPEN => {
                self.state.store(OPEN, Ordering::Relaxed);
                *self.last_transition.write() = Instant::now();
            }
            CLOSED => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.threshold {
                    self.state.store(OPEN, Ordering::Relaxed);
                    *self.last_transition.write() = Instant::now();
                }
            }
            OPEN => {}
            _ => unreachable!(),
        }
    }
}
