// Ping/pong liveness checks.
//
// Evaluated once per session per loop tick when enabled. Once `interval` has
// passed since the last check:
// - no nonce outstanding (first check, or the previous pong came back):
//   draw a fresh nonce, send `Ping(nonce ^ PING_KEY)`, remember the nonce;
// - a nonce still outstanding: the client missed the whole interval, close it.
// Either way the timer restarts, so a silent client is dropped on the second
// check, about 2 × interval after its last good pong.
//
// The pong side of the round trip lives in `ClientSession::handle_pong`.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::session::ClientSession;

/// What a liveness check did to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// Disabled, or the interval has not elapsed yet.
    Idle,
    /// A new ping went out.
    PingSent,
    /// The previous ping was never answered; the session was closed.
    TimedOut,
    /// Writing the ping failed; the session was closed.
    SendFailed,
}

pub struct LivenessMonitor {
    enabled: bool,
    interval: Duration,
    rng: StdRng,
}

impl LivenessMonitor {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self::with_seed(enabled, interval, rand::random())
    }

    /// Deterministic nonce sequence, for tests.
    pub fn with_seed(enabled: bool, interval: Duration, seed: u64) -> Self {
        Self {
            enabled,
            interval,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Non-negative, so it can never collide with an "unset" marker on
    /// clients that still use -1 for one.
    fn next_nonce(&mut self) -> i32 {
        (self.rng.next_u32() >> 1) as i32
    }

    /// Run one liveness check against `session` at time `now`.
    pub fn check(&mut self, session: &mut ClientSession, now: Instant) -> LivenessOutcome {
        if !self.enabled || session.is_closed() {
            return LivenessOutcome::Idle;
        }
        let elapsed = now.saturating_duration_since(session.last_ping());
        if elapsed <= self.interval {
            return LivenessOutcome::Idle;
        }
        session.set_last_ping(now);

        if session.outstanding_nonce().is_some() {
            log::info!(
                "[{}] no pong within {:?}, closing",
                session.address(),
                self.interval
            );
            session.close();
            return LivenessOutcome::TimedOut;
        }

        let nonce = self.next_nonce();
        log::debug!("[{}] sending ping, nonce {nonce}", session.address());
        match session.send_ping(nonce) {
            Ok(()) => LivenessOutcome::PingSent,
            Err(_) => LivenessOutcome::SendFailed,
        }
    }
}
