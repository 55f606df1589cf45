//! Connection lifecycle and reconnection policy for wsrpc clients.
//!
//! The client's supervisor task owns one [`ReconnectPolicy`] and reports
//! every open and close to it. The policy answers with a [`Decision`]:
//! retry after a fixed interval, or stop.
//!
//! ```text
//! Disconnected -> Connecting -> Ready --(close 1000)--> Closed
//!                     ^           |
//!                     |      (other code)
//!                     |           v
//!                     +---- Reconnecting --(attempts used up)--> Closed
//! ```
//!
//! # Integration
//!
//! The policy is designed to sit inside the supervisor's `tokio::select!`
//! loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.recv() => break,
//!         _ = policy.wait_for_retry() => { /* connect again */ }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use wsrpc_transport::CloseReason;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Reconnection settings for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Reconnect after a non-normal close. Default: `true`.
    pub enabled: bool,
    /// Fixed delay between a failure and the next attempt. Default: 1 s.
    pub interval: Duration,
    /// Reconnection attempts before giving up. 0 = unlimited. Default: 5.
    ///
    /// The count covers consecutive failures only: every successful open
    /// resets it. A peer that accepts each connection and then drops it
    /// with a non-normal code is therefore retried without limit; only
    /// attempts that never open use up the budget.
    pub max_attempts: u32,
    /// Random extra delay (0 to `jitter`) added to each attempt, so many
    /// clients dropped at once do not reconnect in lockstep. Default: 0.
    pub jitter: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(1000),
            max_attempts: 5,
            jitter: Duration::ZERO,
        }
    }
}

impl ReconnectConfig {
    /// A config that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`ReconnectPolicy::new`]. Rules:
    /// - `jitter` is capped to `interval`.
    pub fn validated(mut self) -> Self {
        if self.jitter > self.interval {
            warn!(
                jitter_ms = self.jitter.as_millis() as u64,
                interval_ms = self.interval.as_millis() as u64,
                "reconnect jitter exceeds interval, clamping"
            );
            self.jitter = self.interval;
        }
        self
    }

    /// Returns `true` if retries are unlimited.
    pub fn is_unlimited(&self) -> bool {
        self.max_attempts == 0
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where a client connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not started yet.
    #[default]
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// Open; calls and notifications may be sent.
    Ready,
    /// Waiting out the interval before the next attempt.
    Reconnecting,
    /// Closed for good: explicit close, normal close, or retries used up.
    Closed,
}

impl ConnectionState {
    /// Returns `true` in [`Ready`](Self::Ready).
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns `true` in [`Closed`](Self::Closed).
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why the supervisor stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The connection closed with code 1000.
    Normal,
    /// The application closed the client.
    Explicit,
    /// Reconnection is turned off.
    Disabled,
    /// `max_attempts` reconnections all failed.
    Exhausted { attempts: u32 },
}

/// What to do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Try again after `delay`. `attempt` counts from 1.
    Retry { attempt: u32, delay: Duration },
    /// Give up.
    Stop(StopReason),
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// The reconnection state machine for one client.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    state: ConnectionState,
    attempts: u32,
    /// When the scheduled retry is due (Tokio instant for `sleep_until`).
    next_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    /// Creates a policy in [`ConnectionState::Disconnected`].
    pub fn new(config: ReconnectConfig) -> Self {
        let config = config.validated();
        debug!(
            enabled = config.enabled,
            interval_ms = config.interval.as_millis() as u64,
            max_attempts = config.max_attempts,
            "reconnect policy created"
        );
        Self {
            config,
            state: ConnectionState::Disconnected,
            attempts: 0,
            next_attempt: None,
        }
    }

    /// The (validated) configuration.
    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnection attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records that an attempt is starting.
    pub fn on_connecting(&mut self) {
        if !self.state.is_closed() {
            self.state = ConnectionState::Connecting;
            self.next_attempt = None;
        }
    }

    /// Records a successful open. Resets the attempt counter.
    pub fn on_open(&mut self) {
        if !self.state.is_closed() {
            self.state = ConnectionState::Ready;
            self.attempts = 0;
            self.next_attempt = None;
        }
    }

    /// Records a close (or a failed attempt, reported as 1006) and decides
    /// what happens next.
    ///
    /// Retries while `max_attempts == 0 || attempts < max_attempts`, then
    /// counts the attempt.
    pub fn on_close(&mut self, reason: &CloseReason) -> Decision {
        let stop = if self.state.is_closed() {
            Some(StopReason::Explicit)
        } else if reason.is_normal() {
            Some(StopReason::Normal)
        } else if !self.config.enabled {
            Some(StopReason::Disabled)
        } else if !self.config.is_unlimited() && self.attempts >= self.config.max_attempts {
            Some(StopReason::Exhausted {
                attempts: self.attempts,
            })
        } else {
            None
        };

        if let Some(stop) = stop {
            self.state = ConnectionState::Closed;
            self.next_attempt = None;
            info!(%reason, ?stop, "connection closed, not reconnecting");
            return Decision::Stop(stop);
        }

        self.attempts += 1;
        let delay = self.next_delay();
        self.state = ConnectionState::Reconnecting;
        self.next_attempt = Some(Instant::now() + delay);
        info!(
            %reason,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "connection lost, reconnecting"
        );
        Decision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Closes the policy for good. Later closes answer
    /// [`StopReason::Explicit`] and [`wait_for_retry`](Self::wait_for_retry)
    /// pends forever.
    pub fn close(&mut self) {
        if !self.state.is_closed() {
            self.state = ConnectionState::Closed;
            self.next_attempt = None;
            debug!("reconnect policy closed");
        }
    }

    /// Waits until the scheduled retry is due.
    ///
    /// With no retry scheduled this future pends forever, so
    /// `tokio::select!` keeps serving its other branches.
    pub async fn wait_for_retry(&self) {
        match self.next_attempt {
            Some(at) => time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter = self.config.jitter.as_millis() as u64;
        if jitter == 0 {
            return self.config.interval;
        }
        let extra = rand::rng().random_range(0..=jitter);
        self.config.interval + Duration::from_millis(extra)
    }
}
