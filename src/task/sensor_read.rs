//! Sensor sampling task
//!
//! Samples the accelerometer and the pulse sensor every `SAMPLE_INTERVAL` and
//! publishes each sample to the sample channel. Subscribers that fall behind
//! lose old samples; the sampler itself never waits for them.

use embassy_time::Ticker;

use crate::system::config::SAMPLE_INTERVAL;
use crate::system::event;
use crate::system::hardware::{AnalogInput, MotionSensor};
use crate::system::sample::Sampler;

pub async fn sensor_read<M: MotionSensor, P: AnalogInput>(mut sampler: Sampler<M, P>) -> ! {
    let mut ticker = Ticker::every(SAMPLE_INTERVAL);
    info!("Sampling every {} ms", SAMPLE_INTERVAL.as_millis());

    loop {
        let sample = sampler.sample().await;
        event::publish_sample(sample);
        ticker.next().await;
    }
}
