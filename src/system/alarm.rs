//! Alarm State Machine
//!
//! Owns the vibration motor and the fall confirm timeout. A detected fall
//! turns the motor on and starts the confirm window. The wearer can cancel
//! with the reset button (or the backend with a `reset` command) before the
//! window runs out; otherwise the fall counts as confirmed and is reported.
//!
//! The pending timeout is carried inside the `Active` phase. Leaving `Active`
//! consumes it, and entering `Active` is refused while one exists, so two
//! outstanding timeouts cannot be represented.

use core::future::pending;

use embassy_time::{Duration, Instant, Timer};
use embedded_hal::pwm::SetDutyCycle;

use crate::system::config::FALL_CONFIRM_WINDOW;

/// Externally visible alarm state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmState {
    Idle,
    Active,
}

/// Pending fall confirmation.
///
/// Not `Clone`: exactly one handle exists per alarm episode. Dropping it
/// cancels the timeout.
#[derive(Debug)]
pub struct ConfirmTimeout {
    deadline: Instant,
}

impl ConfirmTimeout {
    fn schedule(now: Instant, window: Duration) -> Self {
        Self {
            deadline: now + window,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn has_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Completes once the deadline has passed
    pub async fn expired(&self) {
        Timer::at(self.deadline).await
    }
}

enum Phase {
    Idle,
    Active(ConfirmTimeout),
}

pub struct AlarmMachine<V> {
    vibration: V,
    window: Duration,
    phase: Phase,
}

impl<V: SetDutyCycle> AlarmMachine<V> {
    /// Creates an idle machine and makes sure the motor is off
    pub fn new(vibration: V, window: Duration) -> Self {
        let mut machine = Self {
            vibration,
            window,
            phase: Phase::Idle,
        };
        machine.vibrate(false);
        machine
    }

    /// Machine with the default confirm window
    pub fn with_default_window(vibration: V) -> Self {
        Self::new(vibration, FALL_CONFIRM_WINDOW)
    }

    pub fn state(&self) -> AlarmState {
        match self.phase {
            Phase::Idle => AlarmState::Idle,
            Phase::Active(_) => AlarmState::Active,
        }
    }

    /// Idle → Active. Returns false, changing nothing, if already active.
    pub fn raise(&mut self, now: Instant) -> bool {
        if let Phase::Active(_) = self.phase {
            return false;
        }

        self.vibrate(true);
        let timeout = ConfirmTimeout::schedule(now, self.window);
        info!("Fall alarm raised, confirm deadline at {} ms", timeout.deadline().as_millis());
        self.phase = Phase::Active(timeout);
        true
    }

    /// Manual reset: Active → Idle, cancelling the pending timeout.
    ///
    /// Returns false if the machine was already idle.
    pub fn reset(&mut self) -> bool {
        match core::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Active(timeout) => {
                drop(timeout);
                self.vibrate(false);
                info!("Fall alarm cancelled");
                true
            }
            Phase::Idle => false,
        }
    }

    /// Timeout expiry: Active → Idle once the deadline has passed.
    ///
    /// Returns true exactly once per episode; the caller reports the fall.
    pub fn confirm(&mut self, now: Instant) -> bool {
        let expired = matches!(&self.phase, Phase::Active(timeout) if timeout.has_expired(now));
        if !expired {
            return false;
        }

        self.phase = Phase::Idle;
        self.vibrate(false);
        info!("Fall alarm confirmed");
        true
    }

    /// Completes when the pending timeout expires. Never completes while idle.
    pub async fn confirm_timeout(&self) {
        match &self.phase {
            Phase::Active(timeout) => timeout.expired().await,
            Phase::Idle => pending().await,
        }
    }

    fn vibrate(&mut self, on: bool) {
        let result = if on {
            self.vibration.set_duty_cycle_fully_on()
        } else {
            self.vibration.set_duty_cycle_fully_off()
        };
        if result.is_err() {
            warn!("Vibration duty update failed");
        }
    }
}
