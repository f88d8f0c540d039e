//! Fall alarm task
//!
//! Runs the fall monitor over the sample stream and drives the alarm state
//! machine. While the alarm is active the physical reset button is checked on
//! every sample; a remote `reset` command has the same effect. If neither
//! arrives before the confirm window closes, a `Fall` frame is queued in the
//! same step that returns the machine to idle.
//!
//! The loop waits on three things at once: the next sample, a remote reset and
//! the confirm timeout. Whichever completes first is handled; the other two
//! futures are dropped, which is how a pending timeout gets cancelled.

use embassy_futures::select::{select3, Either3};
use embassy_time::Instant;
use embedded_hal::digital::InputPin;
use embedded_hal::pwm::SetDutyCycle;

use crate::system::alarm::{AlarmMachine, AlarmState};
use crate::system::event;
use crate::system::fall::FallMonitor;
use crate::system::identity::DeviceIdentity;
use crate::system::protocol::TelemetryMessage;
use crate::system::sample::{SampleSource, SensorSample};

pub struct FallAlarm<V, B> {
    machine: AlarmMachine<V>,
    monitor: FallMonitor,
    reset_button: B,
    identity: DeviceIdentity,
}

impl<V: SetDutyCycle, B: InputPin> FallAlarm<V, B> {
    pub fn new(machine: AlarmMachine<V>, monitor: FallMonitor, reset_button: B, identity: DeviceIdentity) -> Self {
        Self {
            machine,
            monitor,
            reset_button,
            identity,
        }
    }

    /// Handles one sample: manual reset first, then fall classification
    pub fn on_sample(&mut self, sample: &SensorSample) {
        if self.machine.state() == AlarmState::Active && self.reset_pressed() && self.machine.reset() {
            info!("Alarm reset by wearer");
        }

        if self.monitor.classify(sample, self.machine.state()) {
            self.machine.raise(sample.timestamp);
        }
    }

    /// Handles a `reset` command from the backend
    pub fn on_remote_reset(&mut self) {
        if self.machine.reset() {
            info!("Alarm reset remotely");
        } else {
            debug!("Remote reset with no active alarm");
        }
    }

    /// Handles the confirm timeout; returns the frame to report, if any
    pub fn on_timeout(&mut self, now: Instant) -> Option<TelemetryMessage> {
        self.machine
            .confirm(now)
            .then_some(TelemetryMessage::Fall { id: self.identity })
    }

    fn reset_pressed(&mut self) -> bool {
        // Active low; an unreadable pin counts as released
        self.reset_button.is_low().unwrap_or(false)
    }

    pub async fn run<S: SampleSource>(mut self, mut samples: S) -> ! {
        loop {
            let outcome = select3(
                samples.next_sample(),
                event::wait_reset_request(),
                self.machine.confirm_timeout(),
            )
            .await;

            match outcome {
                Either3::First(sample) => self.on_sample(&sample),
                Either3::Second(()) => self.on_remote_reset(),
                Either3::Third(()) => {
                    if let Some(message) = self.on_timeout(Instant::now()) {
                        warn!("Fall confirmed, reporting");
                        event::publish(message);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use crate::system::event::tests::{lock_globals, reset_globals};
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embassy_futures::select::select;
    use embassy_time::{Duration, Timer};
    use embedded_hal::digital::ErrorType as PinErrorType;
    use embedded_hal::pwm::ErrorType as PwmErrorType;

    struct Motor<'a>(&'a Cell<u16>);

    impl PwmErrorType for Motor<'_> {
        type Error = Infallible;
    }

    impl SetDutyCycle for Motor<'_> {
        fn max_duty_cycle(&self) -> u16 {
            100
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.0.set(duty);
            Ok(())
        }
    }

    /// Button whose level the test controls
    struct Button<'a>(&'a Cell<bool>);

    impl PinErrorType for Button<'_> {
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

    fn sample(g: f64, secs: u64) -> SensorSample {
        SensorSample {
            motion_magnitude: g,
            pulse_raw: 0,
            timestamp: Instant::from_secs(secs),
        }
    }

    fn alarm<'a>(duty: &'a Cell<u16>, pressed: &'a Cell<bool>) -> FallAlarm<Motor<'a>, Button<'a>> {
        FallAlarm::new(
            AlarmMachine::new(Motor(duty), Duration::from_secs(30)),
            FallMonitor::default(),
            Button(pressed),
            NODE,
        )
    }

    #[test]
    fn impact_raises_the_alarm_once() {
        let (duty, pressed) = (Cell::new(0), Cell::new(false));
        let mut alarm = alarm(&duty, &pressed);

        alarm.on_sample(&sample(1.0, 0));
        assert_eq!(alarm.machine.state(), AlarmState::Idle);

        alarm.on_sample(&sample(3.0, 1));
        assert_eq!(alarm.machine.state(), AlarmState::Active);
        assert_eq!(duty.get(), 100);

        // Second impact while active leaves the original deadline in place
        alarm.on_sample(&sample(0.5, 2));
        alarm.on_sample(&sample(3.5, 5));
        assert_eq!(alarm.on_timeout(Instant::from_secs(30)), None);
        assert_eq!(alarm.on_timeout(Instant::from_secs(31)), Some(TelemetryMessage::Fall { id: NODE }));
    }

    #[test]
    fn button_reset_at_ten_seconds_suppresses_report() {
        let (duty, pressed) = (Cell::new(0), Cell::new(false));
        let mut alarm = alarm(&duty, &pressed);

        alarm.on_sample(&sample(3.0, 0));
        pressed.set(true);
        alarm.on_sample(&sample(1.0, 10));
        assert_eq!(alarm.machine.state(), AlarmState::Idle);
        assert_eq!(duty.get(), 0);

        assert_eq!(alarm.on_timeout(Instant::from_secs(30)), None);
    }

    #[test]
    fn unanswered_alarm_reports_fall_at_thirty_seconds() {
        let (duty, pressed) = (Cell::new(0), Cell::new(false));
        let mut alarm = alarm(&duty, &pressed);

        alarm.on_sample(&sample(3.0, 0));
        for secs in 1..30 {
            alarm.on_sample(&sample(1.0, secs));
        }
        assert_eq!(alarm.machine.state(), AlarmState::Active);

        assert_eq!(alarm.on_timeout(Instant::from_secs(30)), Some(TelemetryMessage::Fall { id: NODE }));
        assert_eq!(alarm.machine.state(), AlarmState::Idle);
        assert_eq!(duty.get(), 0);
        assert_eq!(alarm.on_timeout(Instant::from_secs(31)), None);
    }

    #[test]
    fn remote_reset_cancels_alarm() {
        let (duty, pressed) = (Cell::new(0), Cell::new(false));
        let mut alarm = alarm(&duty, &pressed);

        alarm.on_sample(&sample(3.0, 0));
        alarm.on_remote_reset();
        assert_eq!(alarm.machine.state(), AlarmState::Idle);
        assert_eq!(alarm.on_timeout(Instant::from_secs(30)), None);

        // Nothing to cancel
        alarm.on_remote_reset();
        assert_eq!(alarm.machine.state(), AlarmState::Idle);
    }

    #[test]
    fn held_reset_button_does_not_block_detection_while_idle() {
        let (duty, pressed) = (Cell::new(0), Cell::new(true));
        let mut alarm = alarm(&duty, &pressed);

        alarm.on_sample(&sample(3.0, 0));
        assert_eq!(alarm.machine.state(), AlarmState::Active);
    }

    /// Live sample stream, one sample every 20 ms: an impact, a second impact
    /// while the alarm is up, then rest. Presses the reset button on sample
    /// `press_at`.
    struct Wearer<'a> {
        next: usize,
        press_at: Option<usize>,
        pressed: &'a Cell<bool>,
    }

    impl SampleSource for Wearer<'_> {
        async fn next_sample(&mut self) -> SensorSample {
            const SCRIPT: [f64; 4] = [3.0, 1.0, 1.0, 3.5];

            Timer::after(Duration::from_millis(20)).await;
            if self.press_at == Some(self.next) {
                self.pressed.set(true);
            }
            let g = SCRIPT.get(self.next).copied().unwrap_or(1.0);
            self.next += 1;
            SensorSample {
                motion_magnitude: g,
                pulse_raw: 0,
                timestamp: Instant::now(),
            }
        }
    }

    /// Runs the task for 500 ms with a 200 ms confirm window and counts the
    /// queued fall reports
    fn falls_reported(press_at: Option<usize>, duty: &Cell<u16>) -> usize {
        let pressed = Cell::new(false);
        let alarm = FallAlarm::new(
            AlarmMachine::new(Motor(duty), Duration::from_millis(200)),
            FallMonitor::default(),
            Button(&pressed),
            NODE,
        );
        let wearer = Wearer {
            next: 0,
            press_at,
            pressed: &pressed,
        };

        block_on(select(alarm.run(wearer), Timer::after(Duration::from_millis(500))));

        let mut falls = 0;
        while let Ok(message) = event::TELEMETRY_CHANNEL.try_receive() {
            assert_eq!(message, TelemetryMessage::Fall { id: NODE });
            falls += 1;
        }
        falls
    }

    #[test]
    fn running_task_reports_one_fall_per_alarm() {
        let _globals = lock_globals();
        reset_globals();

        let duty = Cell::new(0);
        assert_eq!(falls_reported(None, &duty), 1);
        assert_eq!(duty.get(), 0);
    }

    #[test]
    fn running_task_stays_quiet_after_button_reset() {
        let _globals = lock_globals();
        reset_globals();

        let duty = Cell::new(0);
        // Fifth sample, about 100 ms into the 200 ms window
        assert_eq!(falls_reported(Some(4), &duty), 0);
        assert_eq!(duty.get(), 0);
    }
}
