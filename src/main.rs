//! Vitals node firmware entry point
//!
//! Brings up WiFi and the network stack, initializes the sensors and spawns
//! the control tasks.
//!
//! The CYW43439 firmware and CLM blobs are not linked into the image. Flash
//! them once to the addresses below:
//!
//! ```text
//! probe-rs download 43439A0.bin --binary-format bin --chip RP235x --base-address 0x10100000
//! probe-rs download 43439A0_clm.bin --binary-format bin --chip RP235x --base-address 0x10140000
//! ```

#![no_std]
#![no_main]

use cyw43::JoinOptions;
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_net::{Stack, StackResources};
use embassy_rp::block::ImageDef;
use embassy_rp::config::Config;
use embassy_rp::gpio::{Input, Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIO0};
use embassy_rp::pio::Pio;
use embassy_rp::pwm::Pwm;
use embassy_time::{Instant, Timer};
use nanorand::{Rng, WyRand};
use static_cell::StaticCell;
use vitals_node::split_resources;
use vitals_node::system::alarm::AlarmMachine;
use vitals_node::system::battery::BatteryGauge;
use vitals_node::system::config::{
    BatteryConfig, PulseConfig, CONNECT_RETRY_DELAY, MEASUREMENT_WINDOW, WIFI_NETWORK, WIFI_PASSWORD,
};
use vitals_node::system::debounce::Debouncer;
use vitals_node::system::event::{self, SampleSubscriber};
use vitals_node::system::fall::FallMonitor;
use vitals_node::system::identity::DeviceIdentity;
use vitals_node::system::pulse::PulseEstimator;
use vitals_node::system::resources::{
    self, Accelerometer, AdcInput, AssignedResources, BatteryChargeResources, EmergencyButtonResources, Irqs,
    MotionSensorResources, PulseSensorResources, ResetButtonResources, VibrationResources, WifiResources,
};
use vitals_node::system::sample::Sampler;
use vitals_node::task::emergency_button::EmergencyButton;
use vitals_node::task::fall_alarm::FallAlarm;
use vitals_node::task::sensor_read;
use vitals_node::task::transport::{self, BrokerLink};
use vitals_node::task::vitals_report::VitalsReport;
use {defmt_rtt as _, panic_probe as _};

/// Firmware image type for bootloader
#[link_section = ".start_block"]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

/// Flash location and size of the CYW43439 firmware blob
const WIFI_FIRMWARE: (usize, usize) = (0x1010_0000, 230_321);
/// Flash location and size of the CYW43439 CLM blob
const WIFI_CLM: (usize, usize) = (0x1014_0000, 4_752);

type WifiSpi = PioSpi<'static, PIO0, 0, DMA_CH0>;

#[embassy_executor::task]
async fn wifi_task(runner: cyw43::Runner<'static, Output<'static>, WifiSpi>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn sensor_read_task(sampler: Sampler<Accelerometer, AdcInput>) -> ! {
    sensor_read::sensor_read(sampler).await
}

#[embassy_executor::task]
async fn fall_alarm_task(alarm: FallAlarm<Pwm<'static>, Input<'static>>, samples: SampleSubscriber) -> ! {
    alarm.run(samples).await
}

#[embassy_executor::task]
async fn emergency_button_task(button: EmergencyButton<Input<'static>>) -> ! {
    button.run().await
}

#[embassy_executor::task]
async fn vitals_report_task(report: VitalsReport<AdcInput>) -> ! {
    report.run().await
}

#[embassy_executor::task]
async fn transport_task(link: BrokerLink, identity: DeviceIdentity) -> ! {
    transport::run_transport(link, identity).await
}

/// Brings up the radio and the network stack, then joins the configured
/// network, retrying until it succeeds
async fn start_network(spawner: &Spawner, r: WifiResources) -> Stack<'static> {
    // SAFETY: the blobs are flashed to these addresses ahead of time and the
    // region is never written at runtime
    let fw = unsafe { core::slice::from_raw_parts(WIFI_FIRMWARE.0 as *const u8, WIFI_FIRMWARE.1) };
    let clm = unsafe { core::slice::from_raw_parts(WIFI_CLM.0 as *const u8, WIFI_CLM.1) };

    let pwr = Output::new(r.pwr, Level::Low);
    let cs = Output::new(r.cs, Level::High);
    let mut pio = Pio::new(r.pio, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        r.dio,
        r.clk,
        r.dma,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    spawner.spawn(wifi_task(runner)).unwrap();

    control.init(clm).await;
    control
        .set_power_management(cyw43::PowerManagementMode::PowerSave)
        .await;

    let mut rng = WyRand::new_seed(Instant::now().as_ticks());
    static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        net_device,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        rng.generate::<u64>(),
    );
    spawner.spawn(net_task(runner)).unwrap();

    loop {
        match control
            .join(WIFI_NETWORK, JoinOptions::new(WIFI_PASSWORD.as_bytes()))
            .await
        {
            Ok(()) => break,
            Err(err) => {
                warn!("WiFi join failed with status {}, retrying", err.status);
                Timer::after(CONNECT_RETRY_DELAY).await;
            }
        }
    }
    info!("Joined {}, waiting for DHCP", WIFI_NETWORK);
    stack.wait_config_up().await;
    info!("Network up");

    stack
}

/// Firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Config::default());
    let identity = DeviceIdentity::configured();
    info!("Vitals node {} starting", identity.as_str());

    // The ADC is shared by the pulse sampler and the battery gauge, so it is
    // set up before any task that reads it is spawned.
    resources::init_adc(p.ADC);

    let r = split_resources!(p);

    let mut motion = resources::motion_sensor(r.motion_sensor);
    if let Err(fault) = motion.wake().await {
        // Sampling still starts; the sampler reports zero motion until the bus recovers
        warn!("Accelerometer wake-up failed: {:?}", fault);
    }
    let sampler = Sampler::new(motion, resources::pulse_input(r.pulse_sensor));

    // Subscribe before the sampler starts so no sample is missed
    let alarm_samples = event::subscribe_samples().unwrap();
    let alarm = FallAlarm::new(
        AlarmMachine::with_default_window(resources::vibration_pwm(r.vibration)),
        FallMonitor::default(),
        resources::reset_button(r.reset_button),
        identity,
    );

    let button = EmergencyButton::new(
        resources::emergency_button(r.emergency_button),
        Debouncer::default(),
        identity,
    );

    let report = VitalsReport::new(
        BatteryGauge::new(resources::battery_input(r.battery_charge), BatteryConfig::default()),
        PulseEstimator::new(PulseConfig::default(), Instant::now()),
        MEASUREMENT_WINDOW,
        identity,
    );

    spawner.spawn(sensor_read_task(sampler)).unwrap();
    spawner.spawn(fall_alarm_task(alarm, alarm_samples)).unwrap();
    spawner.spawn(emergency_button_task(button)).unwrap();
    spawner.spawn(vitals_report_task(report)).unwrap();

    // Alarm handling works offline; only reporting waits for the network
    let stack = start_network(&spawner, r.wifi).await;

    static RX_BUFFER: StaticCell<[u8; 1024]> = StaticCell::new();
    static TX_BUFFER: StaticCell<[u8; 1024]> = StaticCell::new();
    let link = BrokerLink::new(stack, RX_BUFFER.init([0; 1024]), TX_BUFFER.init([0; 1024]));
    spawner.spawn(transport_task(link, identity)).unwrap();
}
