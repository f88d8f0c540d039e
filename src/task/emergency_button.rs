//! Emergency button task
//!
//! Polls the active-low emergency button and queues a `Help` frame for every
//! accepted press. Presses closer together than the debounce interval,
//! including a contact that is simply held down, collapse into one.

use embassy_time::{Instant, Timer};
use embedded_hal::digital::InputPin;

use crate::system::config::BUTTON_POLL_INTERVAL;
use crate::system::debounce::Debouncer;
use crate::system::event;
use crate::system::identity::DeviceIdentity;
use crate::system::protocol::TelemetryMessage;

pub struct EmergencyButton<B> {
    pin: B,
    debouncer: Debouncer,
    identity: DeviceIdentity,
}

impl<B: InputPin> EmergencyButton<B> {
    pub fn new(pin: B, debouncer: Debouncer, identity: DeviceIdentity) -> Self {
        Self {
            pin,
            debouncer,
            identity,
        }
    }

    /// Reads the pin once; returns the frame to send for an accepted press
    pub fn poll(&mut self, now: Instant) -> Option<TelemetryMessage> {
        let pressed = self.pin.is_low().unwrap_or(false);
        self.debouncer
            .accept(pressed, now)
            .then_some(TelemetryMessage::Help { id: self.identity })
    }

    pub async fn run(mut self) -> ! {
        loop {
            if let Some(message) = self.poll(Instant::now()) {
                info!("Emergency button pressed");
                event::publish(message);
            }
            Timer::after(BUTTON_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::convert::Infallible;
    use embassy_time::Duration;
    use embedded_hal::digital::ErrorType;

    struct Button<'a>(&'a Cell<bool>);

    impl ErrorType for Button<'_> {
        type Error = Infallible;
    }

    impl InputPin for Button<'_> {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0.get())
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0.get())
        }
    }

    const NODE: DeviceIdentity = DeviceIdentity::new("010101-1111");

    /// Polls every 10 ms for `total_ms`, with the contact closed during
    /// `[start, start + 20)` for each press start
    fn help_count(presses: &[u64], total_ms: u64) -> usize {
        let level = Cell::new(false);
        let mut button = EmergencyButton::new(Button(&level), Debouncer::new(Duration::from_millis(200)), NODE);

        let mut count = 0;
        for ms in (0..total_ms).step_by(10) {
            level.set(presses.iter().any(|&start| ms >= start && ms < start + 20));
            if let Some(message) = button.poll(Instant::from_millis(1000 + ms)) {
                assert_eq!(message, TelemetryMessage::Help { id: NODE });
                count += 1;
            }
        }
        count
    }

    #[test]
    fn presses_50ms_apart_send_one_help() {
        assert_eq!(help_count(&[0, 50], 500), 1);
    }

    #[test]
    fn presses_250ms_apart_send_two_helps() {
        assert_eq!(help_count(&[0, 250], 500), 2);
    }

    #[test]
    fn released_button_sends_nothing() {
        assert_eq!(help_count(&[], 500), 0);
    }
}
