//! System Events
//!
//! Channels and signals for inter-task communication.
//!
//! - `SAMPLES`: sampler output, fanned out to the fall/alarm loop and to
//!   pulse measurements
//! - `TELEMETRY_CHANNEL`: outbound frames, drained by the transport task
//! - `UPDATE_REQUEST` / `REMOTE_RESET`: control commands routed from the
//!   transport task

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::pubsub::{PubSubChannel, Subscriber};
use embassy_sync::signal::Signal;

use crate::system::protocol::TelemetryMessage;
use crate::system::sample::{SampleSource, SensorSample};

/// Outbound queue depth
pub const TELEMETRY_CAPACITY: usize = 16;

/// Samples buffered per subscriber before the oldest is lost
pub const SAMPLE_CAPACITY: usize = 4;
/// Fall/alarm loop and one pulse measurement at a time, plus a spare
pub const SAMPLE_SUBSCRIBERS: usize = 3;

/// Multi-producer, single-consumer queue of outbound telemetry
pub static TELEMETRY_CHANNEL: Channel<CriticalSectionRawMutex, TelemetryMessage, TELEMETRY_CAPACITY> =
    Channel::new();

/// Sensor samples, one publisher and several subscribers
pub static SAMPLES: PubSubChannel<CriticalSectionRawMutex, SensorSample, SAMPLE_CAPACITY, SAMPLE_SUBSCRIBERS, 1> =
    PubSubChannel::new();

/// Backend asked for a battery and pulse report
static UPDATE_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Backend asked to cancel a pending fall alarm
static REMOTE_RESET: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub type SampleSubscriber =
    Subscriber<'static, CriticalSectionRawMutex, SensorSample, SAMPLE_CAPACITY, SAMPLE_SUBSCRIBERS, 1>;

/// Queues a telemetry message without waiting.
///
/// A full queue means the broker link is down or slow. The oldest queued
/// message makes room, so control loops never stall on the transport and the
/// latest alarm is always queued.
pub fn publish(message: TelemetryMessage) {
    if let Err(TrySendError::Full(message)) = TELEMETRY_CHANNEL.try_send(message) {
        if let Ok(oldest) = TELEMETRY_CHANNEL.try_receive() {
            error!("Telemetry queue full, dropping {:?}", oldest);
        }
        if TELEMETRY_CHANNEL.try_send(message).is_err() {
            error!("Telemetry queue full, dropping {:?}", message);
        }
    }
}

/// Publishes a sample to all current subscribers, overwriting the oldest
/// sample of a lagging subscriber
pub fn publish_sample(sample: SensorSample) {
    SAMPLES.immediate_publisher().publish_immediate(sample);
}

/// Subscribes to the sample stream, or `None` if all slots are taken
pub fn subscribe_samples() -> Option<SampleSubscriber> {
    SAMPLES.subscriber().ok()
}

impl SampleSource for SampleSubscriber {
    async fn next_sample(&mut self) -> SensorSample {
        self.next_message_pure().await
    }
}

pub fn request_update() {
    UPDATE_REQUEST.signal(());
}

pub async fn wait_update_request() {
    UPDATE_REQUEST.wait().await
}

pub fn request_reset() {
    REMOTE_RESET.signal(());
}

pub async fn wait_reset_request() {
    REMOTE_RESET.wait().await
}
