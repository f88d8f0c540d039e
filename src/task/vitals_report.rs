//! Vitals report task
//!
//! Answers `send_update` requests from the backend: reads the battery and
//! queues a `Battery` frame, then runs a pulse measurement and queues a
//! `Pulse` frame. The measurement takes a full window, which is why it runs
//! here and not in the transport task.

use embassy_time::{Duration, Instant};

use crate::system::battery::BatteryGauge;
use crate::system::event;
use crate::system::hardware::AnalogInput;
use crate::system::identity::DeviceIdentity;
use crate::system::protocol::TelemetryMessage;
use crate::system::pulse::{BpmEstimate, PulseEstimator};
use crate::system::sample::SampleSource;
use crate::task::pulse_measure::measure;

pub struct VitalsReport<A> {
    gauge: BatteryGauge<A>,
    estimator: PulseEstimator,
    window: Duration,
    identity: DeviceIdentity,
}

impl<A: AnalogInput> VitalsReport<A> {
    pub fn new(gauge: BatteryGauge<A>, estimator: PulseEstimator, window: Duration, identity: DeviceIdentity) -> Self {
        Self {
            gauge,
            estimator,
            window,
            identity,
        }
    }

    /// Produces one report, handing each frame to `emit` as soon as it is ready
    pub async fn report<S: SampleSource>(
        &mut self,
        samples: Option<&mut S>,
        start: Instant,
        mut emit: impl FnMut(TelemetryMessage),
    ) {
        let percent = self.gauge.read_percent().await;
        emit(TelemetryMessage::Battery {
            id: self.identity,
            percent,
        });

        let bpm = match samples {
            Some(samples) => measure(&mut self.estimator, samples, start, self.window).await,
            None => {
                error!("No sample subscription available, skipping pulse measurement");
                BpmEstimate::invalid()
            }
        };
        emit(TelemetryMessage::Pulse { id: self.identity, bpm });
    }

    pub async fn run(mut self) -> ! {
        loop {
            event::wait_update_request().await;
            info!("Vitals update requested");

            // Subscribe per request so no stale samples pile up in between
            let mut subscriber = event::subscribe_samples();
            self.report(subscriber.as_mut(), Instant::now(), event::publish).await;
        }
    }
}
